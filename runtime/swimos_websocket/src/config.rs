// Copyright 2015-2024 Swim Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

const DEFAULT_MAX_FRAME_SIZE: usize = 64 << 20;
const DEFAULT_MAX_HEADER_SIZE: usize = 8 * 1024;
const DEFAULT_READ_CHUNK_SIZE: usize = 1024;
const DEFAULT_CLOSE_ATTEMPTS: u32 = 3;
const DEFAULT_CLOSE_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for WebSocket clients and servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// The largest frame payload that will be accepted from a peer (default: 64MiB).
    pub max_frame_size: usize,
    /// The largest HTTP head that will be accepted during the opening handshake (default: 8KiB).
    pub max_header_size: usize,
    /// The number of bytes requested from the socket per read while reading an HTTP head
    /// (default: 1024).
    pub read_chunk_size: usize,
    /// How many times to wait for the peer's close frame after sending one (default: 3).
    pub close_attempts: u32,
    /// The bound on each wait for the peer's close frame (default: 1s).
    pub close_interval: Duration,
    /// If this is set, ping frames are answered with a pong carrying the same payload
    /// (default: true).
    pub auto_pong: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            close_attempts: DEFAULT_CLOSE_ATTEMPTS,
            close_interval: DEFAULT_CLOSE_INTERVAL,
            auto_pong: true,
        }
    }
}

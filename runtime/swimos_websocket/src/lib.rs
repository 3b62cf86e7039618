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

//! # SwimOS Synchronous WebSocket Engine
//!
//! An RFC 6455 implementation over blocking TCP sockets that can act as either a client or a
//! server. It consists of:
//!
//! - A frame codec, with masking and minimal length encoding.
//! - The HTTP upgrade handshake for both roles, including `Sec-WebSocket-Accept` derivation.
//! - A registry that owns every socket and tracks which have completed their handshake.
//! - A single-threaded loop that services whichever sockets are ready to be read.
//! - Named callbacks through which an application observes and drives its connections.
//!
//! Fragmented messages are not reassembled; every frame is delivered as it is received.

mod client;
mod config;
mod connection;
mod errors;
mod events;
#[cfg(test)]
mod fixture;
/// The opening handshake.
pub mod handshake;
mod lifecycle;
/// The readiness loop that services registered sockets.
pub mod multiplex;
/// Frames and the types that describe them.
pub mod protocol;
mod registry;
mod server;

pub use client::{Target, WebSocketClient};
pub use config::WebSocketConfig;
pub use connection::Connection;
pub use errors::{CloseError, Error, ErrorKind, HttpError, ProtocolError};
pub use events::{Events, Session};
pub use protocol::frame::Frame;
pub use protocol::{CloseCode, CloseReason, OpCode, PayloadType, Role};
pub use registry::{ConnectionId, ConnectionRegistry, Socket};
pub use server::WebSocketServer;

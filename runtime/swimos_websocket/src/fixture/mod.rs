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

use crate::handshake::{HandshakeRequest, HandshakeResponse};
use bytes::{Buf, BytesMut};
use std::cmp;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

/// A connected pair of in-memory endpoints. Bytes written to one are read from the other; a read
/// from an endpoint with nothing pending reports end of stream.
pub fn mock() -> (MockPeer, MockStream) {
    let peer_to_stream = Arc::new(Mutex::new(BytesMut::new()));
    let stream_to_peer = Arc::new(Mutex::new(BytesMut::new()));

    let peer = MockPeer {
        tx_buf: peer_to_stream.clone(),
        rx_buf: stream_to_peer.clone(),
    };
    let stream = MockStream {
        tx_buf: stream_to_peer,
        rx_buf: peer_to_stream,
    };

    (peer, stream)
}

pub struct MockPeer {
    pub rx_buf: Arc<Mutex<BytesMut>>,
    pub tx_buf: Arc<Mutex<BytesMut>>,
}

impl MockPeer {
    pub fn write_bytes(&self, bytes: &[u8]) {
        self.tx_buf.lock().unwrap().extend_from_slice(bytes);
    }

    pub fn write_request(&self, request: &HandshakeRequest) {
        let mut buf = BytesMut::new();
        request.write_into(&mut buf);
        self.write_bytes(&buf);
    }

    pub fn write_response(&self, response: &HandshakeResponse) {
        let mut buf = BytesMut::new();
        response.write_into(&mut buf);
        self.write_bytes(&buf);
    }

    /// Takes everything that the stream has written so far.
    pub fn take_written(&self) -> BytesMut {
        self.rx_buf.lock().unwrap().split()
    }

    /// Takes the HTTP head that the stream has written, leaving any bytes that follow it.
    pub fn take_head(&self) -> Option<BytesMut> {
        let mut guard = self.rx_buf.lock().unwrap();
        let end = guard.windows(4).position(|w| w == b"\r\n\r\n")?;
        Some(guard.split_to(end + 4))
    }
}

pub struct MockStream {
    pub rx_buf: Arc<Mutex<BytesMut>>,
    pub tx_buf: Arc<Mutex<BytesMut>>,
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.rx_buf.lock().unwrap();
        let cnt = cmp::min(guard.remaining(), buf.len());

        buf[..cnt].copy_from_slice(&guard[..cnt]);
        guard.advance(cnt);

        Ok(cnt)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx_buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

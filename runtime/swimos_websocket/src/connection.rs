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

use crate::config::WebSocketConfig;
use crate::errors::{Error, ProtocolError};
use crate::handshake::{
    exec_client_handshake, exec_server_handshake, HandshakeMessage, HandshakeRequest,
    HandshakeResponse, WebSocketResponse,
};
use crate::protocol::frame::{encode_frame, read_frame, Frame, CONTROL_MAX_SIZE};
use crate::protocol::{CloseReason, ControlCode, HeaderFlags, OpCode, PayloadType, Role};
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use tracing::{debug, trace};

/// One peer socket together with the state of its close handshake.
///
/// Bytes that arrived alongside the opening handshake are held in a read buffer and are consumed
/// before anything else is read from the socket.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    stream: S,
    role: Role,
    peer_addr: Option<SocketAddr>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    close_count: u32,
    peer_reason: Option<CloseReason>,
}

impl Connection<TcpStream> {
    pub fn new(stream: TcpStream, role: Role) -> Connection<TcpStream> {
        let peer_addr = stream.peer_addr().ok();
        Connection::from_stream(stream, role, peer_addr)
    }

    /// Takes any error pending on the socket.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.stream.take_error()
    }

    /// Waits for the peer to answer a close frame. Up to `close_attempts` frames are read, each
    /// read bounded by `close_interval`. Returns whether a close frame was received.
    pub fn await_close(&mut self, config: &WebSocketConfig) -> bool {
        if let Err(e) = self.stream.set_read_timeout(Some(config.close_interval)) {
            debug!(error = %e, "Failed to set a read timeout. Not waiting for a close frame.");
            return false;
        }

        for attempt in 1..=config.close_attempts {
            match self.read_frame(config.max_frame_size) {
                Ok(Some(frame)) if frame.opcode().is_close() => {
                    self.peer_reason = CloseReason::from_payload(frame.payload());
                    trace!(attempt, "Received the peer's close frame.");
                    return true;
                }
                Ok(Some(frame)) => {
                    trace!(attempt, opcode = %frame.opcode(), "Discarding a frame while closing.");
                }
                Ok(None) => return false,
                Err(e) if is_timeout(&e) => trace!(attempt, "Timed out waiting for a close frame."),
                Err(e) => {
                    debug!(error = %e, "Failed to read a close frame.");
                    return false;
                }
            }
        }

        false
    }
}

impl<S> Connection<S> {
    pub fn from_stream(stream: S, role: Role, peer_addr: Option<SocketAddr>) -> Connection<S> {
        Connection {
            stream,
            role,
            peer_addr,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            close_count: 0,
            peer_reason: None,
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether bytes have already been read from the socket but not yet consumed.
    pub fn has_buffered(&self) -> bool {
        !self.read_buf.is_empty()
    }

    /// The number of close frames that have been sent or received.
    pub fn close_count(&self) -> u32 {
        self.close_count
    }

    pub fn is_closing(&self) -> bool {
        self.close_count > 0
    }

    /// Records that a close frame was sent or received, returning the new count.
    pub fn increment_close_count(&mut self) -> u32 {
        self.close_count += 1;
        self.close_count
    }

    /// The reason carried by the peer's close frame, if one has been received.
    pub fn peer_reason(&self) -> Option<&CloseReason> {
        self.peer_reason.as_ref()
    }

    pub fn set_peer_reason(&mut self, reason: Option<CloseReason>) {
        self.peer_reason = reason;
    }

    pub fn read_frame(&mut self, max_size: usize) -> Result<Option<Frame>, Error>
    where
        S: Read,
    {
        read_frame(self, max_size)
    }

    /// Writes a single, final frame. Frames sent by a client are masked.
    pub fn send(&mut self, payload: &[u8], payload_type: PayloadType) -> Result<(), Error>
    where
        S: Write,
    {
        self.write_frame(payload, OpCode::from(payload_type))
    }

    /// Writes a close frame carrying `reason`.
    pub fn send_close(&mut self, reason: &CloseReason) -> Result<(), Error>
    where
        S: Write,
    {
        let mut payload = BytesMut::new();
        reason.write_into(&mut payload);
        self.write_frame(&payload, OpCode::ControlCode(ControlCode::Close))
    }

    fn write_frame(&mut self, payload: &[u8], opcode: OpCode) -> Result<(), Error>
    where
        S: Write,
    {
        if opcode.is_control() && payload.len() > CONTROL_MAX_SIZE {
            return Err(ProtocolError::ControlFrameOverflow.into());
        }

        let Connection {
            stream,
            role,
            write_buf,
            ..
        } = self;

        write_buf.clear();
        encode_frame(write_buf, payload, HeaderFlags::FIN, opcode, role.is_client());
        stream.write_all(write_buf)?;
        stream.flush()?;

        trace!(opcode = %opcode, len = payload.len(), "Sent frame.");
        Ok(())
    }

    /// Runs the client half of the opening handshake.
    pub fn client_handshake<H>(
        &mut self,
        config: &WebSocketConfig,
        host: &str,
        path: &str,
        on_handshake: H,
    ) -> Result<HandshakeResponse, Error>
    where
        S: Read + Write,
        H: FnMut(HandshakeMessage<'_>),
    {
        let Connection {
            stream, read_buf, ..
        } = self;
        exec_client_handshake(stream, read_buf, config, host, path, on_handshake)
    }

    /// Runs the server half of the opening handshake.
    pub fn server_handshake<F, H>(
        &mut self,
        config: &WebSocketConfig,
        filter: F,
        on_handshake: H,
    ) -> Result<HandshakeRequest, Error>
    where
        S: Read + Write,
        F: FnMut(&HandshakeRequest) -> Result<(), WebSocketResponse>,
        H: FnMut(HandshakeMessage<'_>),
    {
        let Connection {
            stream, read_buf, ..
        } = self;
        exec_server_handshake(stream, read_buf, config, filter, on_handshake)
    }
}

impl<S> Read for Connection<S>
where
    S: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buf.is_empty() {
            return self.stream.read(buf);
        }

        let count = self.read_buf.len().min(buf.len());
        buf[..count].copy_from_slice(&self.read_buf[..count]);
        self.read_buf.advance(count);
        Ok(count)
    }
}

fn is_timeout(error: &Error) -> bool {
    error
        .downcast_ref::<io::Error>()
        .map(|e| matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut))
        .unwrap_or(false)
}

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

//! The parts of a connection's lifecycle that are shared by clients and servers: reading frames
//! from open connections, raising events for them and the close handshake.

use crate::config::WebSocketConfig;
use crate::errors::{Error, ProtocolError};
use crate::events::{Action, Events, Session};
use crate::protocol::frame::Frame;
use crate::protocol::{CloseCode, CloseReason, ControlCode, OpCode, PayloadType};
use crate::registry::{ConnectionId, ConnectionRegistry, Socket};
use tracing::{debug, trace, warn};

/// Everything needed to service one connection.
pub(crate) struct Context<'a> {
    pub registry: &'a mut ConnectionRegistry,
    pub events: &'a mut Events,
    pub config: &'a WebSocketConfig,
}

impl<'a> Context<'a> {
    /// Reads and handles a single frame from an open connection.
    pub fn on_readable(&mut self, id: ConnectionId) {
        let Some(connection) = self.registry.open_connection_mut(id) else {
            return;
        };

        match connection.take_error() {
            Ok(None) => {}
            Ok(Some(e)) | Err(e) => return self.fault(id, e.into()),
        }

        match connection.read_frame(self.config.max_frame_size) {
            Ok(Some(frame)) => {
                trace!(id = %id, header = %frame.header(), len = frame.payload_len(), "Received frame.");
                self.on_frame(id, frame);
            }
            Ok(None) => {
                debug!(id = %id, "Peer disconnected.");
                self.teardown(id);
            }
            Err(e) => match e.downcast_ref::<ProtocolError>() {
                Some(protocol_error) => {
                    let code = match protocol_error {
                        ProtocolError::FrameOverflow => CloseCode::Overflow,
                        _ => CloseCode::Protocol,
                    };
                    debug!(id = %id, error = %e, "Received an invalid frame.");
                    self.events.fire_error(id, &e);
                    // The stream can no longer be decoded so the peer's reply is not awaited.
                    if let Some(connection) = self.registry.connection_mut(id) {
                        connection.increment_close_count();
                    }
                    self.close_connection(id, CloseReason::new(code, None));
                }
                None => self.fault(id, e),
            },
        }
    }

    /// Handles a decoded frame. Each frame is surfaced independently; continuation frames are
    /// not coalesced.
    pub fn on_frame(&mut self, id: ConnectionId, frame: Frame) {
        match frame.opcode() {
            OpCode::ControlCode(ControlCode::Close) => {
                let reason = CloseReason::from_payload(frame.payload());
                debug!(id = %id, reason = ?reason, "Received a close frame.");

                let reply = close_reply(reason.as_ref());
                if let Some(connection) = self.registry.connection_mut(id) {
                    connection.set_peer_reason(reason);
                    connection.increment_close_count();
                }
                self.close_connection(id, reply);
            }
            OpCode::ControlCode(ControlCode::Ping) => {
                if self.config.auto_pong {
                    if let Some(connection) = self.registry.connection_mut(id) {
                        if let Err(e) = connection.send(frame.payload(), PayloadType::Pong) {
                            debug!(id = %id, error = %e, "Failed to answer a ping.");
                        }
                    }
                }
                self.messaging(id, &frame);
            }
            _ => self.messaging(id, &frame),
        }
    }

    /// Raises the `message` event for `frame`.
    pub fn messaging(&mut self, id: ConnectionId, frame: &Frame) {
        let mut session = Session::new(id, self.registry);
        self.events.fire_message(&mut session, frame);
        let actions = session.into_actions();
        self.apply(actions);
    }

    /// Raises the `open` event for a client connection.
    pub fn opened(&mut self, id: ConnectionId) {
        let mut session = Session::new(id, self.registry);
        self.events.fire_open(&mut session);
        let actions = session.into_actions();
        self.apply(actions);
    }

    /// Raises the `connection` event for a connection that a server has just upgraded.
    pub fn connected(&mut self, id: ConnectionId) {
        let mut session = Session::new(id, self.registry);
        self.events.fire_connection(&mut session);
        let actions = session.into_actions();
        self.apply(actions);
    }

    /// Carries out the actions that callbacks requested.
    pub fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Close(id, reason) => self.close_connection(id, reason),
                Action::Error(id, error) => self.events.fire_error(id, &error),
                Action::Fault(id, error) => self.fault(id, error),
                Action::Shutdown => {
                    let removed = self.registry.remove_listeners();
                    debug!(removed, "Stopped listening.");
                }
            }
        }
    }

    /// Runs the close handshake for `id` and tears the connection down.
    ///
    /// A close frame is always sent; failing to send it does not prevent the teardown. If a close
    /// frame has already been sent or received the connection is torn down at once, otherwise
    /// the peer's close frame is awaited for a bounded time first.
    pub fn close_connection(&mut self, id: ConnectionId, reason: CloseReason) {
        let Some(connection) = self.registry.connection_mut(id) else {
            trace!(id = %id, "Ignoring a close request for a removed connection.");
            return;
        };

        let count = connection.increment_close_count();
        if let Err(e) = connection.send_close(&reason) {
            debug!(id = %id, error = %e, "Failed to send a close frame.");
        }

        if count == 1 {
            let acknowledged = connection.await_close(self.config);
            debug!(id = %id, acknowledged, "Close handshake finished.");
        }

        self.teardown(id);
    }

    /// Raises the `error` event for a failed socket and tears it down.
    pub fn fault(&mut self, id: ConnectionId, error: Error) {
        warn!(id = %id, error = %error, "Connection failed.");
        self.events.fire_error(id, &error);
        self.teardown(id);
    }

    /// Removes the socket from the registry and releases it. The `close` event is raised if the
    /// connection was open.
    pub fn teardown(&mut self, id: ConnectionId) {
        let was_open = self.registry.is_open(id);

        match self.registry.remove(id) {
            Some(Socket::Peer(connection)) if was_open => {
                self.events.fire_close(id, connection.peer_reason());
            }
            Some(_) => {}
            None => trace!(id = %id, "Connection already removed."),
        }
    }
}

/// The reason sent in answer to a peer's close frame. The peer's code is echoed unless it may not
/// appear on the wire.
fn close_reply(reason: Option<&CloseReason>) -> CloseReason {
    let code = match reason {
        Some(CloseReason { code, .. }) if code.is_sendable() => *code,
        Some(_) => CloseCode::Protocol,
        None => CloseCode::Normal,
    };
    CloseReason::new(code, None)
}

#[cfg(test)]
mod tests {
    use super::{close_reply, Context};
    use crate::config::WebSocketConfig;
    use crate::connection::Connection;
    use crate::events::Events;
    use crate::protocol::{CloseCode, CloseReason, Role};
    use crate::registry::ConnectionRegistry;
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn close_replies() {
        assert_eq!(close_reply(None), CloseReason::new(CloseCode::Normal, None));

        let going_away = CloseReason::new(CloseCode::GoingAway, Some("bye".to_string()));
        assert_eq!(
            close_reply(Some(&going_away)),
            CloseReason::new(CloseCode::GoingAway, None)
        );

        let private = CloseReason::new(CloseCode::Other(4000), None);
        assert_eq!(close_reply(Some(&private)).code, CloseCode::Other(4000));

        for code in [999, 1004, 1005, 1006, 1015, 2000, 5000] {
            let reason = CloseReason::new(CloseCode::from(code), None);
            assert_eq!(
                close_reply(Some(&reason)),
                CloseReason::new(CloseCode::Protocol, None),
                "{}",
                code
            );
        }
    }

    #[test]
    fn close_wait_is_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_silent, _) = listener.accept().unwrap();

        let mut registry = ConnectionRegistry::new().unwrap();
        let id = registry
            .insert_peer(Connection::new(stream, Role::Client), true)
            .unwrap();

        let closes = Arc::new(AtomicUsize::new(0));
        let count = closes.clone();
        let mut events = Events::new().on_close(move |_, reason| {
            assert!(reason.is_none());
            count.fetch_add(1, Ordering::SeqCst);
        });
        let config = WebSocketConfig {
            close_attempts: 3,
            close_interval: Duration::from_millis(100),
            ..Default::default()
        };

        let mut context = Context {
            registry: &mut registry,
            events: &mut events,
            config: &config,
        };
        let start = Instant::now();
        context.close_connection(id, CloseReason::new(CloseCode::Normal, None));
        context.close_connection(id, CloseReason::new(CloseCode::Normal, None));
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(250), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}

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

use crate::errors::{CloseError, Error};
use crate::handshake::HandshakeMessage;
use crate::protocol::frame::Frame;
use crate::protocol::{CloseCode, CloseReason, PayloadType};
use crate::registry::{ConnectionId, ConnectionRegistry};
use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use tracing::debug;

type SessionCallback = Box<dyn FnMut(&mut Session<'_>) + Send>;
type MessageCallback = Box<dyn FnMut(&mut Session<'_>, &[u8], &Frame) + Send>;
type CloseCallback = Box<dyn FnMut(ConnectionId, Option<&CloseReason>) + Send>;
type ErrorCallback = Box<dyn FnMut(ConnectionId, &Error) + Send>;
type HandshakeCallback = Box<dyn FnMut(&mut HandshakeMessage<'_>) + Send>;

/// The callbacks that an application registers with a client or a server. Any number of
/// callbacks may be registered for each event; they are called in the order that they were
/// registered.
#[derive(Default)]
pub struct Events {
    open: Vec<SessionCallback>,
    connection: Vec<SessionCallback>,
    message: Vec<MessageCallback>,
    close: Vec<CloseCallback>,
    error: Vec<ErrorCallback>,
    handshake: Vec<HandshakeCallback>,
}

impl Debug for Events {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events")
            .field("open", &self.open.len())
            .field("connection", &self.connection.len())
            .field("message", &self.message.len())
            .field("close", &self.close.len())
            .field("error", &self.error.len())
            .field("handshake", &self.handshake.len())
            .finish()
    }
}

impl Events {
    pub fn new() -> Events {
        Events::default()
    }

    /// Called when a client's connection has been upgraded, before any frames are read.
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Session<'_>) + Send + 'static,
    {
        self.open.push(Box::new(f));
        self
    }

    /// Called when a server has upgraded a new connection, before any frames are read.
    pub fn on_connection<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Session<'_>) + Send + 'static,
    {
        self.connection.push(Box::new(f));
        self
    }

    /// Called for every frame received on an open connection other than close frames. The
    /// payload is unmasked.
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Session<'_>, &[u8], &Frame) + Send + 'static,
    {
        self.message.push(Box::new(f));
        self
    }

    /// Called once when an open connection is torn down, with the reason from the peer's close
    /// frame if one was received.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: FnMut(ConnectionId, Option<&CloseReason>) + Send + 'static,
    {
        self.close.push(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnMut(ConnectionId, &Error) + Send + 'static,
    {
        self.error.push(Box::new(f));
        self
    }

    /// Called with the outgoing handshake message before it is written.
    pub fn on_handshake<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut HandshakeMessage<'_>) + Send + 'static,
    {
        self.handshake.push(Box::new(f));
        self
    }

    pub(crate) fn fire_open(&mut self, session: &mut Session<'_>) {
        for callback in &mut self.open {
            callback(session);
        }
    }

    pub(crate) fn fire_connection(&mut self, session: &mut Session<'_>) {
        for callback in &mut self.connection {
            callback(session);
        }
    }

    pub(crate) fn fire_message(&mut self, session: &mut Session<'_>, frame: &Frame) {
        for callback in &mut self.message {
            callback(session, frame.payload(), frame);
        }
    }

    pub(crate) fn fire_close(&mut self, id: ConnectionId, reason: Option<&CloseReason>) {
        for callback in &mut self.close {
            callback(id, reason);
        }
    }

    pub(crate) fn fire_error(&mut self, id: ConnectionId, error: &Error) {
        for callback in &mut self.error {
            callback(id, error);
        }
    }

    pub(crate) fn fire_handshake(&mut self, message: &mut HandshakeMessage<'_>) {
        for callback in &mut self.handshake {
            callback(message);
        }
    }
}

/// Work requested by a callback that is carried out once the callback has returned.
#[derive(Debug)]
pub(crate) enum Action {
    Close(ConnectionId, CloseReason),
    Error(ConnectionId, Error),
    Fault(ConnectionId, Error),
    Shutdown,
}

/// The context passed to callbacks for a single connection.
///
/// Frames are written as soon as they are sent. Closing a connection, and shutting down a
/// server's listener, take effect once the callback returns.
pub struct Session<'a> {
    id: ConnectionId,
    registry: &'a mut ConnectionRegistry,
    actions: Vec<Action>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(id: ConnectionId, registry: &'a mut ConnectionRegistry) -> Session<'a> {
        Session {
            id,
            registry,
            actions: Vec::new(),
        }
    }

    pub(crate) fn into_actions(self) -> Vec<Action> {
        self.actions
    }

    /// The connection that this session belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.registry
            .connection(self.id)
            .and_then(|connection| connection.peer_addr())
    }

    /// The identifiers of every open connection, including this one.
    pub fn open_connections(&self) -> Vec<ConnectionId> {
        self.registry.open_ids()
    }

    pub fn send_text(&mut self, payload: &str) -> Result<(), Error> {
        self.send(payload.as_bytes(), PayloadType::Text)
    }

    pub fn send_binary(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.send(payload, PayloadType::Binary)
    }

    pub fn ping(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.send(payload, PayloadType::Ping)
    }

    pub fn pong(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.send(payload, PayloadType::Pong)
    }

    pub fn send(&mut self, payload: &[u8], payload_type: PayloadType) -> Result<(), Error> {
        self.send_to(self.id, payload, payload_type)
    }

    /// Sends a frame on any open connection.
    ///
    /// If the connection is not open, or its socket has a pending error, nothing is sent and the
    /// `error` event is raised for it. A socket that fails while the frame is written is torn
    /// down.
    pub fn send_to(
        &mut self,
        id: ConnectionId,
        payload: &[u8],
        payload_type: PayloadType,
    ) -> Result<(), Error> {
        let connection = match self.registry.open_connection_mut(id) {
            Some(connection) => connection,
            None => {
                self.actions
                    .push(Action::Error(id, CloseError::Closed.into()));
                return Err(CloseError::Closed.into());
            }
        };

        match connection.take_error() {
            Ok(None) => {}
            Ok(Some(e)) | Err(e) => {
                self.actions.push(Action::Fault(id, e.into()));
                return Err(CloseError::Faulted.into());
            }
        }

        match connection.send(payload, payload_type) {
            Err(e) if e.is_io() => {
                debug!(id = %id, error = %e, "Failed to send a frame.");
                self.actions.push(Action::Fault(id, e));
                Err(CloseError::Faulted.into())
            }
            result => result,
        }
    }

    /// Starts the close handshake for this connection with a normal closure.
    pub fn close(&mut self, reason: Option<CloseReason>) {
        self.close_connection(self.id, reason)
    }

    /// Starts the close handshake for any connection. Closing a connection that is already
    /// closed does nothing.
    pub fn close_connection(&mut self, id: ConnectionId, reason: Option<CloseReason>) {
        let reason = reason.unwrap_or_else(|| CloseReason::new(CloseCode::Normal, None));
        self.actions.push(Action::Close(id, reason));
    }

    /// Stops a server from accepting connections. The server runs until its remaining
    /// connections have closed.
    pub fn shutdown(&mut self) {
        self.actions.push(Action::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, Events, Session};
    use crate::connection::Connection;
    use crate::errors::CloseError;
    use crate::protocol::{CloseCode, Role};
    use crate::registry::ConnectionRegistry;
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};

    fn registry_with_peer(open: bool) -> (ConnectionRegistry, crate::ConnectionId, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (peer, _) = listener.accept().unwrap();

        let mut registry = ConnectionRegistry::new().unwrap();
        let id = registry
            .insert_peer(Connection::new(stream, Role::Client), open)
            .unwrap();
        (registry, id, peer)
    }

    #[test]
    fn send_before_open() {
        let (mut registry, id, _peer) = registry_with_peer(false);
        let mut session = Session::new(id, &mut registry);

        let error = session.send_text("early").expect_err("Expected the send to fail");
        assert_eq!(
            error.downcast_ref::<CloseError>(),
            Some(&CloseError::Closed)
        );

        let actions = session.into_actions();
        assert!(matches!(actions.as_slice(), [Action::Error(err_id, _)] if *err_id == id));
    }

    #[test]
    fn close_and_shutdown_are_deferred() {
        let (mut registry, id, _peer) = registry_with_peer(true);
        let mut session = Session::new(id, &mut registry);

        session.send_text("now").unwrap();
        session.close(None);
        session.shutdown();
        assert_eq!(session.open_connections(), vec![id]);

        match session.into_actions().as_slice() {
            [Action::Close(close_id, reason), Action::Shutdown] => {
                assert_eq!(*close_id, id);
                assert_eq!(reason.code, CloseCode::Normal);
            }
            actions => panic!("Unexpected actions: {:?}", actions),
        }
        assert!(registry.is_open(id));
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let first = calls.clone();
        let second = calls.clone();

        let (mut registry, id, _peer) = registry_with_peer(true);
        let mut events = Events::new()
            .on_connection(move |_| first.lock().unwrap().push(1))
            .on_connection(move |_| second.lock().unwrap().push(2));

        events.fire_connection(&mut Session::new(id, &mut registry));
        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
    }
}

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
use crate::connection::Connection;
use crate::errors::Error;
use crate::events::Events;
use crate::handshake::{HandshakeRequest, WebSocketResponse};
use crate::lifecycle::Context;
use crate::multiplex::{self, Dispatch};
use crate::protocol::Role;
use crate::registry::{ConnectionId, ConnectionRegistry, Socket};
use std::fmt::{Debug, Formatter};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use tracing::{debug, info, warn};

type RequestFilter = Box<dyn FnMut(&HandshakeRequest) -> Result<(), WebSocketResponse> + Send>;

/// A WebSocket server. The listening socket and every accepted connection are serviced by a
/// single thread.
pub struct WebSocketServer {
    registry: ConnectionRegistry,
    events: Events,
    config: WebSocketConfig,
    filter: Option<RequestFilter>,
    local_addr: SocketAddr,
}

impl Debug for WebSocketServer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketServer")
            .field("registry", &self.registry)
            .field("events", &self.events)
            .field("config", &self.config)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

impl WebSocketServer {
    /// Binds a listening socket to `addr`.
    pub fn bind<A>(addr: A, config: WebSocketConfig, events: Events) -> Result<WebSocketServer, Error>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let mut registry = ConnectionRegistry::new()?;
        registry.insert_listener(listener)?;
        info!(addr = %local_addr, "Listening for connections.");

        Ok(WebSocketServer {
            registry,
            events,
            config,
            filter: None,
            local_addr,
        })
    }

    /// Installs a filter that is offered every valid upgrade request. A request that the filter
    /// refuses is answered with the returned response and the connection is closed.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: FnMut(&HandshakeRequest) -> Result<(), WebSocketResponse> + Send + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// The address that the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Services the listener and all connections. Returns once the listener has been shut down
    /// and every connection has closed.
    pub fn run(self) -> Result<(), Error> {
        let WebSocketServer {
            mut registry,
            mut events,
            config,
            mut filter,
            ..
        } = self;

        let mut dispatch = ServerDispatch {
            events: &mut events,
            config: &config,
            filter: &mut filter,
        };
        multiplex::run(&mut registry, &mut dispatch)
    }
}

struct ServerDispatch<'a> {
    events: &'a mut Events,
    config: &'a WebSocketConfig,
    filter: &'a mut Option<RequestFilter>,
}

impl<'a> ServerDispatch<'a> {
    fn context<'b>(&'b mut self, registry: &'b mut ConnectionRegistry) -> Context<'b> {
        Context {
            registry,
            events: &mut *self.events,
            config: self.config,
        }
    }

    fn accept(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId) {
        let Some(Socket::Listener(listener)) = registry.get(id) else {
            return;
        };

        match listener.accept() {
            Ok((stream, addr)) => {
                let connection = Connection::new(stream, Role::Server);
                match registry.insert_peer(connection, false) {
                    Ok(peer) => debug!(listener = %id, id = %peer, addr = %addr, "Accepted connection."),
                    Err(e) => warn!(addr = %addr, error = %e, "Failed to register a connection."),
                }
            }
            Err(e) => warn!(listener = %id, error = %e, "Failed to accept a connection."),
        }
    }

    fn handshake(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId) {
        let Some(connection) = registry.connection_mut(id) else {
            return;
        };

        let ServerDispatch {
            events,
            config,
            filter,
        } = self;

        let result = connection.server_handshake(
            *config,
            |request| match filter.as_mut() {
                Some(filter) => filter(request),
                None => Ok(()),
            },
            |mut message| events.fire_handshake(&mut message),
        );

        match result {
            Ok(request) => {
                debug!(id = %id, path = %request.path, "Upgraded connection.");
                registry.set_open(id);
                self.context(registry).connected(id);
            }
            Err(e) => {
                debug!(id = %id, error = %e, "Dropping connection after a failed handshake.");
                registry.remove(id);
            }
        }
    }
}

impl<'a> Dispatch for ServerDispatch<'a> {
    fn dispatch(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId) {
        match registry.get(id) {
            Some(Socket::Listener(_)) => self.accept(registry, id),
            Some(Socket::Peer(connection)) => match connection.take_error() {
                Ok(Some(e)) | Err(e) => self.context(registry).fault(id, e.into()),
                Ok(None) if registry.is_open(id) => self.context(registry).on_readable(id),
                Ok(None) => self.handshake(registry, id),
            },
            None => {}
        }
    }

    fn fault(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId, error: Error) {
        self.context(registry).fault(id, error);
    }
}

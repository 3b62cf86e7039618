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
use crate::errors::{Error, HttpError};
use crate::events::Events;
use crate::lifecycle::Context;
use crate::multiplex::{self, Dispatch};
use crate::protocol::Role;
use crate::registry::{ConnectionId, ConnectionRegistry};
use http::Uri;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

const WS_SCHEME: &str = "ws";
const WSS_SCHEME: &str = "wss";
const DEFAULT_PORT: u16 = 80;

/// The endpoint named by a `ws://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// The path and query to request.
    pub path: String,
}

impl Target {
    /// Parses a `ws://` URL. Secure (`wss://`) URLs are not supported.
    pub fn parse(url: &str) -> Result<Target, HttpError> {
        let uri = url
            .parse::<Uri>()
            .map_err(|e| HttpError::MalformattedUri(e.to_string()))?;

        match uri.scheme_str() {
            Some(WS_SCHEME) => {}
            Some(WSS_SCHEME) => return Err(HttpError::UnsupportedScheme(WSS_SCHEME.to_string())),
            Some(scheme) => return Err(HttpError::UnsupportedScheme(scheme.to_string())),
            None => return Err(HttpError::MalformattedUri(url.to_string())),
        }

        let host = match uri.host() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(HttpError::MalformattedUri(url.to_string())),
        };

        let path = match uri.path_and_query().map(|p| p.as_str()) {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => "/".to_string(),
        };

        Ok(Target {
            host,
            port: uri.port_u16().unwrap_or(DEFAULT_PORT),
            path,
        })
    }

    /// The value of the `Host` header for this target.
    pub fn authority(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let mut last_error = None;

        for addr in (host, self.port).to_socket_addrs()? {
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Failed to connect.");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "The host did not resolve to an address.")
        }))
    }
}

/// A WebSocket client with a single upgraded connection.
#[derive(Debug)]
pub struct WebSocketClient {
    registry: ConnectionRegistry,
    events: Events,
    config: WebSocketConfig,
    id: ConnectionId,
}

impl WebSocketClient {
    /// Connects to `url` and executes the opening handshake.
    ///
    /// The request is offered to the `handshake` callbacks of `events` before it is sent. If the
    /// handshake fails the socket is closed and the error is returned.
    pub fn connect(
        url: &str,
        config: WebSocketConfig,
        mut events: Events,
    ) -> Result<WebSocketClient, Error> {
        let target = Target::parse(url)?;
        let stream = target.connect()?;

        let mut connection = Connection::new(stream, Role::Client);
        connection.client_handshake(&config, &target.authority(), &target.path, |mut message| {
            events.fire_handshake(&mut message)
        })?;

        let mut registry = ConnectionRegistry::new()?;
        let id = registry.insert_peer(connection, true)?;
        info!(url, id = %id, "Connected.");

        Ok(WebSocketClient {
            registry,
            events,
            config,
            id,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Raises the `open` event and then services the connection until it is closed.
    pub fn run(self) -> Result<(), Error> {
        let WebSocketClient {
            mut registry,
            mut events,
            config,
            id,
        } = self;

        Context {
            registry: &mut registry,
            events: &mut events,
            config: &config,
        }
        .opened(id);

        let mut dispatch = ClientDispatch {
            events: &mut events,
            config: &config,
        };
        multiplex::run(&mut registry, &mut dispatch)
    }
}

struct ClientDispatch<'a> {
    events: &'a mut Events,
    config: &'a WebSocketConfig,
}

impl<'a> Dispatch for ClientDispatch<'a> {
    fn dispatch(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId) {
        Context {
            registry,
            events: &mut *self.events,
            config: self.config,
        }
        .on_readable(id);
    }

    fn fault(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId, error: Error) {
        Context {
            registry,
            events: &mut *self.events,
            config: self.config,
        }
        .fault(id, error);
    }
}

#[cfg(test)]
mod tests {
    use super::Target;
    use crate::errors::HttpError;

    #[test]
    fn parse_target() {
        let target = Target::parse("ws://127.0.0.1:9001/chat?room=1").unwrap();
        assert_eq!(
            target,
            Target {
                host: "127.0.0.1".to_string(),
                port: 9001,
                path: "/chat?room=1".to_string(),
            }
        );
        assert_eq!(target.authority(), "127.0.0.1:9001");
    }

    #[test]
    fn default_port_and_path() {
        let target = Target::parse("ws://example.com").unwrap();
        assert_eq!(target.port, 80);
        assert_eq!(target.path, "/");
        assert_eq!(target.authority(), "example.com");
    }

    #[test]
    fn secure_scheme_is_unsupported() {
        assert_eq!(
            Target::parse("wss://example.com/"),
            Err(HttpError::UnsupportedScheme("wss".to_string()))
        );
        assert_eq!(
            Target::parse("http://example.com/"),
            Err(HttpError::UnsupportedScheme("http".to_string()))
        );
    }

    #[test]
    fn malformed_urls() {
        assert!(matches!(
            Target::parse("not a url"),
            Err(HttpError::MalformattedUri(_))
        ));
        assert!(matches!(
            Target::parse("/chat"),
            Err(HttpError::MalformattedUri(_))
        ));
    }
}

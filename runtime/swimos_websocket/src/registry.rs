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

use crate::connection::Connection;
use polling::{Event, Poller};
use slab::Slab;
use std::fmt::{Display, Formatter};
use std::io;
use std::net::TcpListener;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Identifies a socket tracked by a [`ConnectionRegistry`]. Identifiers are never reused: a
/// socket registered after another was removed gets a distinct identifier even if it occupies the
/// same slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    key: usize,
    sequence: u64,
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.key, self.sequence)
    }
}

/// A socket owned by the registry.
#[derive(Debug)]
pub enum Socket {
    Listener(TcpListener),
    Peer(Connection),
}

impl Socket {
    fn add(&self, poller: &Poller, key: usize) -> io::Result<()> {
        match self {
            Socket::Listener(listener) => poller.add(listener, Event::readable(key)),
            Socket::Peer(connection) => poller.add(connection.stream(), Event::readable(key)),
        }
    }

    fn rearm(&self, poller: &Poller, key: usize) -> io::Result<()> {
        match self {
            Socket::Listener(listener) => poller.modify(listener, Event::readable(key)),
            Socket::Peer(connection) => poller.modify(connection.stream(), Event::readable(key)),
        }
    }

    fn delete(&self, poller: &Poller) -> io::Result<()> {
        match self {
            Socket::Listener(listener) => poller.delete(listener),
            Socket::Peer(connection) => poller.delete(connection.stream()),
        }
    }
}

#[derive(Debug)]
struct Entry {
    sequence: u64,
    socket: Socket,
    open: bool,
}

/// Owns every socket that is serviced by the multiplex loop and records which of them have
/// completed the opening handshake.
#[derive(Debug)]
pub struct ConnectionRegistry {
    poller: Poller,
    entries: Slab<Entry>,
    sequence: u64,
}

impl ConnectionRegistry {
    pub fn new() -> io::Result<ConnectionRegistry> {
        Ok(ConnectionRegistry {
            poller: Poller::new()?,
            entries: Slab::new(),
            sequence: 0,
        })
    }

    /// Registers a listening socket.
    pub fn insert_listener(&mut self, listener: TcpListener) -> io::Result<ConnectionId> {
        self.insert(Socket::Listener(listener), false)
    }

    /// Registers a peer socket. `open` is set if its opening handshake has already completed.
    pub fn insert_peer(&mut self, connection: Connection, open: bool) -> io::Result<ConnectionId> {
        self.insert(Socket::Peer(connection), open)
    }

    fn insert(&mut self, socket: Socket, open: bool) -> io::Result<ConnectionId> {
        let ConnectionRegistry {
            poller,
            entries,
            sequence,
        } = self;

        let vacant = entries.vacant_entry();
        let key = vacant.key();
        socket.add(poller, key)?;

        *sequence += 1;
        let id = ConnectionId {
            key,
            sequence: *sequence,
        };
        vacant.insert(Entry {
            sequence: *sequence,
            socket,
            open,
        });

        debug!(id = %id, open, "Registered socket.");
        Ok(id)
    }

    fn entry(&self, id: ConnectionId) -> Option<&Entry> {
        self.entries
            .get(id.key)
            .filter(|entry| entry.sequence == id.sequence)
    }

    fn entry_mut(&mut self, id: ConnectionId) -> Option<&mut Entry> {
        self.entries
            .get_mut(id.key)
            .filter(|entry| entry.sequence == id.sequence)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entry(id).is_some()
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.entry(id).map(|entry| entry.open).unwrap_or(false)
    }

    /// Marks a peer as having completed its opening handshake. A socket never leaves the open
    /// set other than by being removed.
    pub fn set_open(&mut self, id: ConnectionId) {
        if let Some(entry) = self.entry_mut(id) {
            if matches!(entry.socket, Socket::Peer(_)) {
                entry.open = true;
                debug!(id = %id, "Connection open.");
            }
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Socket> {
        self.entry(id).map(|entry| &entry.socket)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Socket> {
        self.entry_mut(id).map(|entry| &mut entry.socket)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        match self.get(id) {
            Some(Socket::Peer(connection)) => Some(connection),
            _ => None,
        }
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        match self.get_mut(id) {
            Some(Socket::Peer(connection)) => Some(connection),
            _ => None,
        }
    }

    /// The connection with the identifier `id` if it has completed its opening handshake.
    pub fn open_connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        match self.entry_mut(id) {
            Some(Entry {
                socket: Socket::Peer(connection),
                open: true,
                ..
            }) => Some(connection),
            _ => None,
        }
    }

    /// Deregisters a socket and hands it back to the caller, who releases it by dropping it.
    /// Returns `None` if the socket has already been removed.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Socket> {
        self.entry(id)?;

        let Entry { socket, open, .. } = self.entries.remove(id.key);
        if let Err(e) = socket.delete(&self.poller) {
            warn!(id = %id, error = %e, "Failed to deregister socket.");
        }

        debug!(id = %id, open, "Removed socket.");
        Some(socket)
    }

    /// Removes every listening socket.
    pub fn remove_listeners(&mut self) -> usize {
        let listeners = self.ids(|entry| matches!(entry.socket, Socket::Listener(_)));
        for id in &listeners {
            self.remove(*id);
        }
        listeners.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The identifiers of every connection that has completed its opening handshake.
    pub fn open_ids(&self) -> Vec<ConnectionId> {
        self.ids(|entry| entry.open)
    }

    /// The identifiers of open connections that hold bytes that have already been read from
    /// their sockets.
    pub fn buffered_ids(&self) -> Vec<ConnectionId> {
        self.ids(|entry| match &entry.socket {
            Socket::Peer(connection) => entry.open && connection.has_buffered(),
            Socket::Listener(_) => false,
        })
    }

    fn ids<F>(&self, predicate: F) -> Vec<ConnectionId>
    where
        F: Fn(&Entry) -> bool,
    {
        self.entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, entry)| ConnectionId {
                key,
                sequence: entry.sequence,
            })
            .collect()
    }

    /// Blocks until at least one registered socket is readable or `timeout` elapses. The sockets
    /// that were reported are returned in the order that the poller reported them; each must be
    /// re-armed with [`ConnectionRegistry::rearm`] before it will be reported again.
    pub fn wait(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<Vec<ConnectionId>> {
        events.clear();
        self.poller.wait(events, timeout)?;

        let ready = events
            .iter()
            .filter_map(|event| {
                self.entries.get(event.key).map(|entry| ConnectionId {
                    key: event.key,
                    sequence: entry.sequence,
                })
            })
            .collect::<Vec<_>>();

        trace!(ready = ready.len(), "Sockets ready.");
        Ok(ready)
    }

    /// Requests readiness notifications for `id` again. Does nothing if it has been removed.
    pub fn rearm(&self, id: ConnectionId) -> io::Result<()> {
        match self.entry(id) {
            Some(entry) => entry.socket.rearm(&self.poller, id.key),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionRegistry, Socket};
    use crate::connection::Connection;
    use crate::protocol::Role;
    use polling::Event;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    fn listener() -> TcpListener {
        TcpListener::bind("127.0.0.1:0").unwrap()
    }

    fn pair() -> (TcpStream, TcpStream) {
        let listener = listener();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn ids_are_not_reused() {
        let mut registry = ConnectionRegistry::new().unwrap();
        let first = registry.insert_listener(listener()).unwrap();
        assert!(registry.remove(first).is_some());

        let second = registry.insert_listener(listener()).unwrap();
        assert_ne!(first, second);
        assert!(!registry.contains(first));
        assert!(registry.contains(second));

        assert!(registry.remove(first).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn open_membership() {
        let (client, _server) = pair();
        let mut registry = ConnectionRegistry::new().unwrap();
        let listener_id = registry.insert_listener(listener()).unwrap();
        let id = registry
            .insert_peer(Connection::new(client, Role::Client), false)
            .unwrap();

        assert!(!registry.is_open(id));
        assert!(registry.open_connection_mut(id).is_none());
        assert!(registry.connection(id).is_some());

        registry.set_open(id);
        registry.set_open(listener_id);
        assert!(registry.is_open(id));
        assert!(!registry.is_open(listener_id));
        assert_eq!(registry.open_ids(), vec![id]);

        assert!(matches!(registry.remove(id), Some(Socket::Peer(_))));
        assert!(!registry.is_open(id));
        assert!(registry.open_ids().is_empty());
    }

    #[test]
    fn remove_listeners() {
        let (client, _server) = pair();
        let mut registry = ConnectionRegistry::new().unwrap();
        registry.insert_listener(listener()).unwrap();
        registry.insert_listener(listener()).unwrap();
        let peer = registry
            .insert_peer(Connection::new(client, Role::Client), true)
            .unwrap();

        assert_eq!(registry.remove_listeners(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(peer));
    }

    #[test]
    fn readiness() {
        let (client, mut server) = pair();
        let mut registry = ConnectionRegistry::new().unwrap();
        let id = registry
            .insert_peer(Connection::new(client, Role::Client), true)
            .unwrap();
        let mut events: Vec<Event> = Vec::new();

        let ready = registry
            .wait(&mut events, Some(Duration::from_millis(50)))
            .unwrap();
        assert!(ready.is_empty());

        server.write_all(b"x").unwrap();
        let ready = registry
            .wait(&mut events, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(ready, vec![id]);

        registry.rearm(id).unwrap();
        let ready = registry
            .wait(&mut events, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(ready, vec![id]);
    }
}

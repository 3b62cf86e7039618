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

use crate::errors::Error;
use crate::registry::{ConnectionId, ConnectionRegistry};
use std::io;
use std::time::Duration;
use tracing::{error, trace};

/// Services the sockets of a [`ConnectionRegistry`] as they become ready.
pub trait Dispatch {
    /// Handles a socket that is ready to be read. Runs to completion before the next ready
    /// socket is considered.
    fn dispatch(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId);

    /// Handles a socket that could not be re-armed and so would never be reported again.
    fn fault(&mut self, registry: &mut ConnectionRegistry, id: ConnectionId, error: Error) {
        error!(id = %id, error = %error, "Dropping a socket that could not be re-armed.");
        registry.remove(id);
    }

    /// Whether the loop should end. By default, the loop runs until no sockets remain.
    fn terminate(&mut self, registry: &ConnectionRegistry) -> bool {
        registry.is_empty()
    }
}

/// Runs the multiplex loop until `dispatch` asks for it to terminate.
///
/// Each iteration blocks until at least one socket is ready. Connections that already hold
/// unread bytes are treated as ready without waiting. Only a failure of the poller itself ends
/// the loop with an error.
pub fn run<D>(registry: &mut ConnectionRegistry, dispatch: &mut D) -> Result<(), Error>
where
    D: Dispatch,
{
    let mut events = Vec::new();

    loop {
        if dispatch.terminate(registry) {
            trace!("Multiplex loop terminated.");
            return Ok(());
        }

        let buffered = registry.buffered_ids();
        let timeout = if buffered.is_empty() {
            None
        } else {
            Some(Duration::ZERO)
        };

        let mut ready = match registry.wait(&mut events, timeout) {
            Ok(ready) => ready,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        for id in buffered {
            if !ready.contains(&id) {
                ready.push(id);
            }
        }

        for id in ready {
            if !registry.contains(id) {
                continue;
            }

            dispatch.dispatch(registry, id);

            if let Err(e) = registry.rearm(id) {
                dispatch.fault(registry, id, e.into());
            }
        }
    }
}

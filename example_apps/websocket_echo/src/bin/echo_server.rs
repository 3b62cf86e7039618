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

//! A server that answers every text or binary frame with the same payload. A message of
//! `shutdown` stops the server from accepting new connections.

use clap::Parser;
use std::error::Error;
use swimos_websocket::{Events, OpCode, PayloadType, WebSocketConfig, WebSocketServer};
use tracing::{debug, info};
use websocket_echo::setup_logging;

const SHUTDOWN_COMMAND: &[u8] = b"shutdown";

fn main() -> Result<(), Box<dyn Error>> {
    let Params {
        host,
        port,
        enable_logging,
    } = Params::parse();
    setup_logging(enable_logging)?;

    let events = Events::new()
        .on_connection(|session| {
            info!(id = %session.id(), addr = ?session.peer_addr(), "Client connected.");
        })
        .on_message(|session, payload, frame| {
            let payload_type = match frame.opcode() {
                op if op == OpCode::from(PayloadType::Text) => PayloadType::Text,
                op if op == OpCode::from(PayloadType::Binary) => PayloadType::Binary,
                _ => return,
            };
            if payload == SHUTDOWN_COMMAND {
                session.shutdown();
            }
            let id = session.id();
            if let Err(error) = session.send(payload, payload_type) {
                debug!(id = %id, error = %error, "Failed to echo a message.");
            }
        })
        .on_close(|id, reason| {
            info!(id = %id, reason = ?reason, "Client disconnected.");
        })
        .on_error(|id, error| {
            info!(id = %id, error = %error, "Connection error.");
        });

    let server = WebSocketServer::bind((host.as_str(), port), WebSocketConfig::default(), events)?;
    println!("Listening on ws://{}", server.local_addr());
    server.run()?;
    Ok(())
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Params {
    /// The address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// The port to listen on.
    #[arg(short, long, default_value = "9001")]
    port: u16,
    #[arg(long, default_value = "false")]
    /// Specify that logging should be enabled.
    enable_logging: bool,
}

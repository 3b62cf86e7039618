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

//! Sends each message given on the command line to an echo server, prints the replies and then
//! closes the connection.

use clap::Parser;
use std::collections::VecDeque;
use std::error::Error;
use swimos_websocket::{Events, WebSocketClient, WebSocketConfig};
use websocket_echo::setup_logging;

fn main() -> Result<(), Box<dyn Error>> {
    let Params {
        url,
        messages,
        enable_logging,
    } = Params::parse();
    setup_logging(enable_logging)?;

    let mut pending = VecDeque::from(messages);

    let events = Events::new()
        .on_open(|session| {
            if session.send_text("hello").is_err() {
                session.close(None);
            }
        })
        .on_message(move |session, payload, _| {
            println!("{}", String::from_utf8_lossy(payload));
            match pending.pop_front() {
                Some(message) => {
                    if session.send_text(&message).is_err() {
                        session.close(None);
                    }
                }
                None => session.close(None),
            }
        })
        .on_close(|_, reason| match reason {
            Some(reason) => println!("Closed: {}", reason),
            None => println!("Closed."),
        });

    WebSocketClient::connect(&url, WebSocketConfig::default(), events)?.run()?;
    Ok(())
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Params {
    /// The URL of the server.
    #[arg(short, long, default_value = "ws://127.0.0.1:9001/")]
    url: String,
    /// Messages to send after the greeting.
    messages: Vec<String>,
    #[arg(long, default_value = "false")]
    /// Specify that logging should be enabled.
    enable_logging: bool,
}

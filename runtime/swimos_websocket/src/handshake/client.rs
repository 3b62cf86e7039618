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
use crate::errors::{Error, HttpError};
use crate::handshake::io::BufferedIo;
use crate::handshake::{
    accept_key, read_head, single_header, validate_header_value, HandshakeMessage,
    HandshakeRequest, HandshakeResponse, UPGRADE_STR, WEBSOCKET_STR,
};
use bytes::{Buf, BytesMut};
use http::{header, StatusCode};
use std::io::{Read, Write};
use tracing::{debug, trace};

/// Executes the client half of the opening handshake over `stream`.
///
/// The request for `path` on `host` is offered to `on_handshake` before it is sent. On success
/// `buf` holds any bytes that the server sent after its response head; these belong to the frame
/// stream.
pub fn exec_client_handshake<S, H>(
    stream: &mut S,
    buf: &mut BytesMut,
    config: &WebSocketConfig,
    host: &str,
    path: &str,
    mut on_handshake: H,
) -> Result<HandshakeResponse, Error>
where
    S: Read + Write,
    H: FnMut(HandshakeMessage<'_>),
{
    let mut request = HandshakeRequest::client(host, path);
    on_handshake(HandshakeMessage::Request(&mut request));

    let key = request
        .key()
        .ok_or(HttpError::MissingHeader(header::SEC_WEBSOCKET_KEY))?
        .to_string();

    buf.clear();
    request.write_into(buf);
    BufferedIo::new(stream, buf).write()?;
    buf.clear();

    trace!(host, path, "Sent upgrade request.");

    let head_len = read_head(stream, buf, config)?;
    let response = HandshakeResponse::parse(&buf[..head_len])?;
    validate_response(&response, &key)?;
    buf.advance(head_len);

    debug!(host, path, "Client handshake completed.");
    Ok(response)
}

/// Checks that `response` accepts an upgrade request that carried `key`.
pub fn validate_response(response: &HandshakeResponse, key: &str) -> Result<(), HttpError> {
    if response.version != 1 {
        return Err(HttpError::HttpVersion(Some(response.version)));
    }

    if response.status != StatusCode::SWITCHING_PROTOCOLS {
        return Err(HttpError::Status(response.status));
    }

    let headers = &response.headers;
    validate_header_value(headers, header::UPGRADE, WEBSOCKET_STR)?;
    validate_header_value(headers, header::CONNECTION, UPGRADE_STR)?;

    let accept = single_header(headers, header::SEC_WEBSOCKET_ACCEPT)?;
    if accept == accept_key(key.as_bytes()) {
        Ok(())
    } else {
        Err(HttpError::KeyMismatch)
    }
}

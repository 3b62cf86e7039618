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
use crate::handshake::{
    read_head, single_header, validate_header_value, write_response, HandshakeMessage,
    HandshakeRequest, HandshakeResponse, WebSocketResponse, METHOD_GET, SEC_WEBSOCKET_VERSION,
    UPGRADE_STR, WEBSOCKET_STR, WEBSOCKET_VERSION_STR,
};
use bytes::BytesMut;
use http::{header, StatusCode};
use std::io::{Read, Write};
use tracing::{debug, trace};

/// Executes the server half of the opening handshake over `stream`.
///
/// The request is validated and then offered to `filter`, which may refuse it with any response.
/// An invalid request is answered with `400 Bad Request`, or `426 Upgrade Required` if the
/// client asked for an unsupported protocol version. The `101 Switching Protocols` response is
/// offered to `on_handshake` before it is sent. On success `buf` holds any bytes that the client
/// sent after its request head; these belong to the frame stream.
pub fn exec_server_handshake<S, F, H>(
    stream: &mut S,
    buf: &mut BytesMut,
    config: &WebSocketConfig,
    mut filter: F,
    mut on_handshake: H,
) -> Result<HandshakeRequest, Error>
where
    S: Read + Write,
    F: FnMut(&HandshakeRequest) -> Result<(), WebSocketResponse>,
    H: FnMut(HandshakeMessage<'_>),
{
    let head_len = match read_head(stream, buf, config) {
        Ok(len) => len,
        Err(e) => {
            if let Some(HttpError::HeaderOverflow(_)) = e.downcast_ref::<HttpError>() {
                reject(stream, buf, StatusCode::BAD_REQUEST.into());
            }
            debug!(error = %e, "Server handshake failed.");
            return Err(e);
        }
    };

    let request = match HandshakeRequest::parse(&buf[..head_len]) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Server handshake failed.");
            reject(stream, buf, StatusCode::BAD_REQUEST.into());
            return Err(e);
        }
    };

    let key = match validate_request(&request) {
        Ok(key) => key.to_string(),
        Err(e) => {
            debug!(error = %e, path = %request.path, "Server handshake failed.");
            reject(stream, buf, rejection_for(&e));
            return Err(e.into());
        }
    };

    if let Err(response) = filter(&request) {
        let status = response.status();
        debug!(status = %status, path = %request.path, "Rejected connection.");
        reject(stream, buf, response);
        return Err(HttpError::Rejected(status).into());
    }

    let mut response = HandshakeResponse::switching_protocols(&key);
    on_handshake(HandshakeMessage::Response(&mut response));

    let mut remaining = buf.split_off(head_len);
    write_response(stream, buf, &response)?;
    std::mem::swap(buf, &mut remaining);

    trace!(path = %request.path, remaining = buf.len(), "Server handshake completed.");
    Ok(request)
}

/// Checks that `request` is a valid upgrade request, returning its `Sec-WebSocket-Key`.
pub fn validate_request(request: &HandshakeRequest) -> Result<&str, HttpError> {
    if request.method != METHOD_GET {
        return Err(HttpError::HttpMethod(Some(request.method.clone())));
    }

    if request.version != 1 {
        return Err(HttpError::HttpVersion(Some(request.version)));
    }

    let headers = &request.headers;
    validate_header_value(headers, header::UPGRADE, WEBSOCKET_STR)?;
    validate_header_value(headers, header::CONNECTION, UPGRADE_STR)?;

    let version = single_header(headers, header::SEC_WEBSOCKET_VERSION)?;
    if version != WEBSOCKET_VERSION_STR {
        return Err(HttpError::UnsupportedVersion(version.to_string()));
    }

    single_header(headers, header::SEC_WEBSOCKET_KEY)
}

/// The response that refuses a request which failed validation with `error`.
pub fn rejection_for(error: &HttpError) -> WebSocketResponse {
    match error {
        HttpError::UnsupportedVersion(_) => upgrade_required(),
        HttpError::MissingHeader(name) | HttpError::InvalidHeader(name)
            if *name == header::SEC_WEBSOCKET_VERSION =>
        {
            upgrade_required()
        }
        _ => StatusCode::BAD_REQUEST.into(),
    }
}

fn upgrade_required() -> WebSocketResponse {
    let mut response = WebSocketResponse::from(StatusCode::UPGRADE_REQUIRED);
    response
        .headers
        .insert(SEC_WEBSOCKET_VERSION, WEBSOCKET_VERSION_STR);
    response
}

/// Best-effort write of a refusal; the connection is dropped by the caller either way.
fn reject<S>(stream: &mut S, buf: &mut BytesMut, response: WebSocketResponse)
where
    S: Write,
{
    if let Err(e) = write_response(stream, buf, &response.into_response()) {
        debug!(error = %e, "Failed to write the handshake rejection.");
    }
}

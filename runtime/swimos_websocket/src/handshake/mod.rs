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

mod client;
mod headers;
mod io;
mod server;
#[cfg(test)]
mod tests;

pub use client::exec_client_handshake;
pub use headers::{HeaderField, Headers};
pub use server::{exec_server_handshake, rejection_for, validate_request};

use crate::config::WebSocketConfig;
use crate::errors::{Error, HttpError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use http::header::HeaderName;
use http::status::InvalidStatusCode;
use http::StatusCode;
use httparse::Status;
use io::BufferedIo;
use sha1::{Digest, Sha1};
use std::io::{Read, Write};

/// rfc6455 § 1.3: the GUID appended to the client's key when computing the accept key.
pub const ACCEPT_KEY: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const WEBSOCKET_VERSION_STR: &str = "13";

const WEBSOCKET_STR: &str = "websocket";
const UPGRADE_STR: &str = "Upgrade";
const METHOD_GET: &str = "GET";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_HEADERS: usize = 32;
const FALLBACK_REASON: &str = "Bad Request";

const HOST: &str = "Host";
const UPGRADE: &str = "Upgrade";
const CONNECTION: &str = "Connection";
const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
const SEC_WEBSOCKET_ACCEPT: &str = "Sec-WebSocket-Accept";
const SEC_WEBSOCKET_VERSION: &str = "Sec-WebSocket-Version";

/// Computes the value of `Sec-WebSocket-Accept` for the provided `Sec-WebSocket-Key`.
pub fn accept_key(key: &[u8]) -> String {
    let mut digest = Sha1::new();
    digest.update(key);
    digest.update(ACCEPT_KEY);

    STANDARD.encode(digest.finalize())
}

/// Generates a fresh `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    STANDARD.encode(nonce)
}

/// An HTTP upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub method: String,
    pub path: String,
    /// The minor HTTP/1 version.
    pub version: u8,
    pub headers: Headers,
}

impl HandshakeRequest {
    /// Builds the request that a client sends to open a connection to `path` on `host`.
    pub fn client(host: &str, path: &str) -> HandshakeRequest {
        let headers = Headers::from_iter([
            (HOST, host.to_string()),
            (UPGRADE, WEBSOCKET_STR.to_string()),
            (CONNECTION, UPGRADE_STR.to_string()),
            (SEC_WEBSOCKET_KEY, generate_key()),
            (SEC_WEBSOCKET_VERSION, WEBSOCKET_VERSION_STR.to_string()),
        ]);

        HandshakeRequest {
            method: METHOD_GET.to_string(),
            path: path.to_string(),
            version: 1,
            headers,
        }
    }

    /// Parses a complete request head.
    pub fn parse(head: &[u8]) -> Result<HandshakeRequest, Error> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);

        match request.parse(head)? {
            Status::Complete(_) => {}
            Status::Partial => {
                return Err(HttpError::MalformattedHeader("incomplete request head".into()).into())
            }
        }

        let (method, path, version) = match (request.method, request.path, request.version) {
            (Some(method), Some(path), Some(version)) => (method, path, version),
            (method, ..) => return Err(HttpError::HttpMethod(method.map(str::to_string)).into()),
        };

        Ok(HandshakeRequest {
            method: method.to_string(),
            path: path.to_string(),
            version,
            headers: Headers::try_from(&*request.headers)?,
        })
    }

    /// The value of `Sec-WebSocket-Key`, if it occurs exactly once.
    pub fn key(&self) -> Option<&str> {
        self.headers
            .get(SEC_WEBSOCKET_KEY)
            .and_then(|field| field.single())
    }

    pub fn write_into(&self, dst: &mut BytesMut) {
        let HandshakeRequest {
            method,
            path,
            version,
            headers,
        } = self;

        dst.put_slice(format!("{} {} HTTP/1.{}\r\n", method, path, version).as_bytes());
        headers.write_into(dst);
        dst.put_slice(b"\r\n");
    }
}

/// An HTTP response to an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: StatusCode,
    pub reason: String,
    /// The minor HTTP/1 version.
    pub version: u8,
    pub headers: Headers,
}

impl HandshakeResponse {
    pub fn new(status: StatusCode, headers: Headers) -> HandshakeResponse {
        HandshakeResponse {
            status,
            reason: status
                .canonical_reason()
                .unwrap_or(FALLBACK_REASON)
                .to_string(),
            version: 1,
            headers,
        }
    }

    /// Builds the `101 Switching Protocols` response that accepts a client which sent `key`.
    pub fn switching_protocols(key: &str) -> HandshakeResponse {
        let headers = Headers::from_iter([
            (UPGRADE, WEBSOCKET_STR.to_string()),
            (CONNECTION, UPGRADE_STR.to_string()),
            (SEC_WEBSOCKET_ACCEPT, accept_key(key.as_bytes())),
            (SEC_WEBSOCKET_VERSION, WEBSOCKET_VERSION_STR.to_string()),
        ]);
        HandshakeResponse::new(StatusCode::SWITCHING_PROTOCOLS, headers)
    }

    /// Parses a complete response head.
    pub fn parse(head: &[u8]) -> Result<HandshakeResponse, Error> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);

        match response.parse(head)? {
            Status::Complete(_) => {}
            Status::Partial => {
                return Err(
                    HttpError::MalformattedHeader("incomplete response head".into()).into(),
                )
            }
        }

        let version = response.version.ok_or(HttpError::HttpVersion(None))?;
        let status = response
            .code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| HttpError::MalformattedHeader("status line".into()))?;

        Ok(HandshakeResponse {
            status,
            reason: response.reason.unwrap_or_default().to_string(),
            version,
            headers: Headers::try_from(&*response.headers)?,
        })
    }

    pub fn write_into(&self, dst: &mut BytesMut) {
        let HandshakeResponse {
            status,
            reason,
            version,
            headers,
        } = self;

        dst.put_slice(format!("HTTP/1.{} {} {}\r\n", version, status.as_str(), reason).as_bytes());
        headers.write_into(dst);
        dst.put_slice(b"\r\n");
    }
}

/// The outgoing half of an opening handshake, offered to `handshake` callbacks before it is
/// written. Callbacks may add or alter headers.
#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeMessage<'a> {
    /// A client's upgrade request.
    Request(&'a mut HandshakeRequest),
    /// A server's `101 Switching Protocols` response.
    Response(&'a mut HandshakeResponse),
}

impl<'a> HandshakeMessage<'a> {
    pub fn headers(&mut self) -> &mut Headers {
        match self {
            HandshakeMessage::Request(request) => &mut request.headers,
            HandshakeMessage::Response(response) => &mut response.headers,
        }
    }
}

/// A response to send to a client if the connection will not be upgraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketResponse {
    status: StatusCode,
    headers: Headers,
}

impl WebSocketResponse {
    /// Attempt to construct a new `WebSocketResponse` from `code`.
    ///
    /// # Errors
    /// Errors if the status code is invalid.
    pub fn new(code: u16) -> Result<WebSocketResponse, InvalidStatusCode> {
        StatusCode::from_u16(code).map(WebSocketResponse::from)
    }

    /// Attempt to construct a new `WebSocketResponse` from `code` and `headers`.
    ///
    /// # Errors
    /// Errors if the status code is invalid.
    pub fn with_headers<I, N, V>(code: u16, headers: I) -> Result<WebSocketResponse, InvalidStatusCode>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        Ok(WebSocketResponse {
            status: StatusCode::from_u16(code)?,
            headers: Headers::from_iter(headers),
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn into_response(self) -> HandshakeResponse {
        let WebSocketResponse { status, headers } = self;
        HandshakeResponse::new(status, headers)
    }
}

impl From<StatusCode> for WebSocketResponse {
    fn from(status: StatusCode) -> Self {
        WebSocketResponse {
            status,
            headers: Headers::new(),
        }
    }
}

/// Renders `response` into `buf` and writes it to `stream`.
pub fn write_response<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    response: &HandshakeResponse,
) -> Result<(), Error>
where
    S: Write,
{
    buf.clear();
    response.write_into(buf);

    let mut buffered = BufferedIo::new(stream, buf);
    buffered.write()?;
    buffered.clear();

    Ok(())
}

/// Reads from `stream` until `buf` holds a complete HTTP head, returning the length of the head
/// including its terminating blank line. Any bytes following the head are left in `buf`.
pub fn read_head<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    config: &WebSocketConfig,
) -> Result<usize, Error>
where
    S: Read,
{
    let mut searched = 0;
    let mut buffered = BufferedIo::new(stream, buf);

    loop {
        if let Some(position) = find_terminator(&buffered.buffer[..], searched) {
            return Ok(position + HEADER_TERMINATOR.len());
        }

        let len = buffered.buffer.len();
        if len > config.max_header_size {
            return Err(HttpError::HeaderOverflow(config.max_header_size).into());
        }
        searched = len.saturating_sub(HEADER_TERMINATOR.len() - 1);

        if buffered.read(config.read_chunk_size.max(1))? == 0 {
            return Err(HttpError::ConnectionClosed.into());
        }
    }
}

fn find_terminator(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|position| from + position)
}

/// Returns whether any comma-separated token of any `name` header equals `token`, ignoring
/// ASCII case.
fn header_contains(headers: &Headers, name: &str, token: &str) -> bool {
    headers
        .get_all(name)
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}

/// Returns the value of a header that must occur exactly once.
fn single_header<'h>(headers: &'h Headers, name: HeaderName) -> Result<&'h str, HttpError> {
    match headers.get(name.as_str()) {
        Some(HeaderField::Single(value)) => Ok(value),
        Some(HeaderField::Multiple(_)) => Err(HttpError::InvalidHeader(name)),
        None => Err(HttpError::MissingHeader(name)),
    }
}

fn validate_header_value(headers: &Headers, name: HeaderName, token: &str) -> Result<(), HttpError> {
    if header_contains(headers, name.as_str(), token) {
        Ok(())
    } else if headers.contains(name.as_str()) {
        Err(HttpError::InvalidHeader(name))
    } else {
        Err(HttpError::MissingHeader(name))
    }
}

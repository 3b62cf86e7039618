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
use crate::fixture::{mock, MockPeer};
use crate::handshake::{
    accept_key, exec_client_handshake, exec_server_handshake, generate_key, read_head,
    HandshakeMessage, HandshakeRequest, HandshakeResponse, HeaderField, Headers,
    WebSocketResponse,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::BytesMut;
use http::{header, StatusCode};

const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

fn upgrade_request() -> HandshakeRequest {
    let mut request = HandshakeRequest::client("127.0.0.1:9001", "/chat");
    request.headers.insert("Sec-WebSocket-Key", KEY);
    request
}

fn run_server(request: &HandshakeRequest) -> (MockPeer, Result<HandshakeRequest, Error>) {
    let (peer, mut stream) = mock();
    peer.write_request(request);

    let mut buf = BytesMut::new();
    let result = exec_server_handshake(
        &mut stream,
        &mut buf,
        &WebSocketConfig::default(),
        |_: &HandshakeRequest| Ok(()),
        |_: HandshakeMessage<'_>| {},
    );
    (peer, result)
}

fn written_response(peer: &MockPeer) -> HandshakeResponse {
    let head = peer.take_head().expect("No response was written");
    HandshakeResponse::parse(&head).expect("Invalid response")
}

fn http_error(error: &Error) -> &HttpError {
    assert!(error.is_http());
    error.downcast_ref::<HttpError>().expect("Missing cause")
}

#[test]
fn rfc_accept_key() {
    assert_eq!(accept_key(KEY.as_bytes()), ACCEPT);
}

#[test]
fn generated_keys_are_sixteen_bytes() {
    let key = generate_key();
    assert_eq!(key.len(), 24);
    assert_eq!(STANDARD.decode(&key).unwrap().len(), 16);
    assert_ne!(generate_key(), key);
}

#[test]
fn headers_lookup() {
    let mut headers = Headers::new();
    headers.append("Connection", "keep-alive");
    headers.append("Host", "localhost");
    headers.append("connection", "Upgrade");

    assert_eq!(
        headers.get("CONNECTION"),
        Some(HeaderField::Multiple(vec!["keep-alive", "Upgrade"]))
    );
    assert_eq!(headers.get("host"), Some(HeaderField::Single("localhost")));
    assert_eq!(headers.get("Upgrade"), None);

    headers.insert("Connection", "close");
    assert_eq!(headers.get("connection"), Some(HeaderField::Single("close")));
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec![("Connection", "close"), ("Host", "localhost")]
    );

    assert!(headers.remove("HOST"));
    assert!(!headers.remove("Host"));
    assert_eq!(headers.len(), 1);
}

#[test]
fn request_round_trip() {
    let request = upgrade_request();
    let mut buf = BytesMut::new();
    request.write_into(&mut buf);

    assert!(buf.starts_with(b"GET /chat HTTP/1.1\r\nHost: 127.0.0.1:9001\r\n"));
    assert!(buf.ends_with(b"\r\n\r\n"));
    assert_eq!(HandshakeRequest::parse(&buf).unwrap(), request);
}

#[test]
fn server_accepts_upgrade() {
    let (peer, result) = run_server(&upgrade_request());

    let request = result.expect("Handshake failed");
    assert_eq!(request.path, "/chat");
    assert_eq!(request.key(), Some(KEY));

    let response = written_response(&peer);
    assert_eq!(response.status, StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(response.reason, "Switching Protocols");
    let headers = &response.headers;
    assert_eq!(headers.get("upgrade"), Some(HeaderField::Single("websocket")));
    assert_eq!(headers.get("connection"), Some(HeaderField::Single("Upgrade")));
    assert_eq!(
        headers.get("sec-websocket-accept"),
        Some(HeaderField::Single(ACCEPT))
    );
    assert_eq!(
        headers.get("sec-websocket-version"),
        Some(HeaderField::Single("13"))
    );
    assert!(peer.take_written().is_empty());
}

#[test]
fn bytes_after_the_head_are_kept() {
    let (peer, mut stream) = mock();
    peer.write_request(&upgrade_request());
    peer.write_bytes(&[0x81, 0x00]);

    let mut buf = BytesMut::new();
    exec_server_handshake(
        &mut stream,
        &mut buf,
        &WebSocketConfig::default(),
        |_: &HandshakeRequest| Ok(()),
        |_: HandshakeMessage<'_>| {},
    )
    .expect("Handshake failed");

    assert_eq!(&buf[..], &[0x81, 0x00]);
}

#[test]
fn token_lists_are_accepted() {
    let mut request = upgrade_request();
    request.headers.insert("Connection", "keep-alive, Upgrade");
    request.headers.insert("Upgrade", "WebSocket");

    let (_peer, result) = run_server(&request);
    assert!(result.is_ok());
}

#[test]
fn missing_upgrade_is_a_bad_request() {
    let mut request = upgrade_request();
    request.headers.remove("Upgrade");

    let (peer, result) = run_server(&request);
    let error = result.expect_err("Expected a failed handshake");
    assert_eq!(
        http_error(&error),
        &HttpError::MissingHeader(header::UPGRADE)
    );
    assert_eq!(written_response(&peer).status, StatusCode::BAD_REQUEST);
}

#[test]
fn missing_key_is_a_bad_request() {
    let mut request = upgrade_request();
    request.headers.remove("Sec-WebSocket-Key");

    let (peer, result) = run_server(&request);
    let error = result.expect_err("Expected a failed handshake");
    assert_eq!(
        http_error(&error),
        &HttpError::MissingHeader(header::SEC_WEBSOCKET_KEY)
    );
    assert_eq!(written_response(&peer).status, StatusCode::BAD_REQUEST);
}

#[test]
fn duplicated_key_is_a_bad_request() {
    let mut request = upgrade_request();
    request.headers.append("Sec-WebSocket-Key", KEY);

    let (peer, result) = run_server(&request);
    let error = result.expect_err("Expected a failed handshake");
    assert_eq!(
        http_error(&error),
        &HttpError::InvalidHeader(header::SEC_WEBSOCKET_KEY)
    );
    assert_eq!(written_response(&peer).status, StatusCode::BAD_REQUEST);
}

#[test]
fn post_is_a_bad_request() {
    let mut request = upgrade_request();
    request.method = "POST".to_string();

    let (peer, result) = run_server(&request);
    let error = result.expect_err("Expected a failed handshake");
    assert_eq!(
        http_error(&error),
        &HttpError::HttpMethod(Some("POST".to_string()))
    );
    assert_eq!(written_response(&peer).status, StatusCode::BAD_REQUEST);
}

#[test]
fn garbage_is_a_bad_request() {
    let (peer, mut stream) = mock();
    peer.write_bytes(b"\x00\x01 not http\r\n\r\n");

    let mut buf = BytesMut::new();
    let result = exec_server_handshake(
        &mut stream,
        &mut buf,
        &WebSocketConfig::default(),
        |_: &HandshakeRequest| Ok(()),
        |_: HandshakeMessage<'_>| {},
    );

    assert!(result.expect_err("Expected a failed handshake").is_http());
    assert_eq!(written_response(&peer).status, StatusCode::BAD_REQUEST);
}

#[test]
fn unsupported_version_requires_upgrade() {
    let mut request = upgrade_request();
    request.headers.insert("Sec-WebSocket-Version", "12");

    let (peer, result) = run_server(&request);
    let error = result.expect_err("Expected a failed handshake");
    assert_eq!(
        http_error(&error),
        &HttpError::UnsupportedVersion("12".to_string())
    );

    let response = written_response(&peer);
    assert_eq!(response.status, StatusCode::UPGRADE_REQUIRED);
    assert_eq!(response.reason, "Upgrade Required");
    assert_eq!(
        response.headers.get("Sec-WebSocket-Version"),
        Some(HeaderField::Single("13"))
    );
}

#[test]
fn missing_version_requires_upgrade() {
    let mut request = upgrade_request();
    request.headers.remove("Sec-WebSocket-Version");

    let (peer, result) = run_server(&request);
    assert!(result.is_err());
    assert_eq!(written_response(&peer).status, StatusCode::UPGRADE_REQUIRED);
}

#[test]
fn filter_rejects_with_status() {
    let (peer, mut stream) = mock();
    peer.write_request(&upgrade_request());

    let mut buf = BytesMut::new();
    let result = exec_server_handshake(
        &mut stream,
        &mut buf,
        &WebSocketConfig::default(),
        |request: &HandshakeRequest| {
            if request.path == "/chat" {
                Err(WebSocketResponse::with_headers(404, [("X-Reason", "no such room")]).unwrap())
            } else {
                Ok(())
            }
        },
        |_: HandshakeMessage<'_>| panic!("Rejected requests are not upgraded"),
    );

    let error = result.expect_err("Expected a rejection");
    assert_eq!(
        http_error(&error),
        &HttpError::Rejected(StatusCode::NOT_FOUND)
    );

    let response = written_response(&peer);
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.reason, "Not Found");
    assert_eq!(
        response.headers.get("x-reason"),
        Some(HeaderField::Single("no such room"))
    );
}

#[test]
fn uncommon_status_falls_back_to_bad_request_text() {
    let response = WebSocketResponse::new(499).unwrap().into_response();
    assert_eq!(response.status.as_u16(), 499);
    assert_eq!(response.reason, "Bad Request");
}

#[test]
fn server_handshake_hook_sees_response() {
    let (peer, mut stream) = mock();
    peer.write_request(&upgrade_request());

    let mut buf = BytesMut::new();
    exec_server_handshake(
        &mut stream,
        &mut buf,
        &WebSocketConfig::default(),
        |_: &HandshakeRequest| Ok(()),
        |mut message: HandshakeMessage<'_>| {
            assert!(matches!(message, HandshakeMessage::Response(_)));
            message.headers().insert("X-Served-By", "swimos");
        },
    )
    .expect("Handshake failed");

    let response = written_response(&peer);
    assert_eq!(
        response.headers.get("x-served-by"),
        Some(HeaderField::Single("swimos"))
    );
}

#[test]
fn read_head_overflow() {
    let (peer, mut stream) = mock();
    peer.write_bytes(&[b'a'; 200]);

    let config = WebSocketConfig {
        max_header_size: 64,
        ..Default::default()
    };
    let error = read_head(&mut stream, &mut BytesMut::new(), &config).unwrap_err();
    assert_eq!(http_error(&error), &HttpError::HeaderOverflow(64));
}

#[test]
fn read_head_connection_closed() {
    let (_peer, mut stream) = mock();

    let error =
        read_head(&mut stream, &mut BytesMut::new(), &WebSocketConfig::default()).unwrap_err();
    assert_eq!(http_error(&error), &HttpError::ConnectionClosed);
}

#[test]
fn read_head_in_small_chunks() {
    let (peer, mut stream) = mock();
    peer.write_bytes(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\nrest");

    let config = WebSocketConfig {
        read_chunk_size: 1,
        ..Default::default()
    };
    let mut buf = BytesMut::new();
    let len = read_head(&mut stream, &mut buf, &config).unwrap();

    assert!(buf[..len].ends_with(b"\r\n\r\n"));
    assert_eq!(len, buf.len());
}

fn client_with_fixed_key(response: &HandshakeResponse) -> (MockPeer, Result<BytesMut, Error>) {
    let (peer, mut stream) = mock();
    peer.write_response(response);
    peer.write_bytes(b"frames");

    let mut buf = BytesMut::new();
    let result = exec_client_handshake(
        &mut stream,
        &mut buf,
        &WebSocketConfig::default(),
        "localhost:9001",
        "/chat?room=1",
        |message: HandshakeMessage<'_>| {
            if let HandshakeMessage::Request(request) = message {
                request.headers.insert("Sec-WebSocket-Key", KEY);
            }
        },
    );
    (peer, result.map(|_| buf))
}

#[test]
fn client_handshake() {
    let (peer, result) = client_with_fixed_key(&HandshakeResponse::switching_protocols(KEY));
    let remaining = result.expect("Handshake failed");
    assert_eq!(&remaining[..], b"frames");

    let head = peer.take_head().expect("No request was written");
    let request = HandshakeRequest::parse(&head).unwrap();
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/chat?room=1");
    assert_eq!(
        request.headers.get("host"),
        Some(HeaderField::Single("localhost:9001"))
    );
    assert_eq!(request.key(), Some(KEY));
}

#[test]
fn client_rejects_wrong_accept_key() {
    let response = HandshakeResponse::switching_protocols("c29tZSBvdGhlciBub25jZQ==");
    let (_peer, result) = client_with_fixed_key(&response);

    let error = result.expect_err("Expected a key mismatch");
    assert_eq!(http_error(&error), &HttpError::KeyMismatch);
}

#[test]
fn client_rejects_refusal() {
    let response = WebSocketResponse::new(403).unwrap().into_response();
    let (_peer, result) = client_with_fixed_key(&response);

    let error = result.expect_err("Expected a refusal");
    assert_eq!(http_error(&error), &HttpError::Status(StatusCode::FORBIDDEN));
}

#[test]
fn client_rejects_missing_upgrade() {
    let mut response = HandshakeResponse::switching_protocols(KEY);
    response.headers.remove("Upgrade");
    let (_peer, result) = client_with_fixed_key(&response);

    let error = result.expect_err("Expected a failed handshake");
    assert_eq!(
        http_error(&error),
        &HttpError::MissingHeader(header::UPGRADE)
    );
}

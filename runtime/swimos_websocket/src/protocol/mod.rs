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

pub mod frame;

use bytes::{BufMut, BytesMut};
use std::convert::TryFrom;
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

bitflags::bitflags! {
    /// The flags in the first byte of a frame header.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        const FIN       = 0b1000_0000;

        const RSV_1     = 0b0100_0000;
        const RSV_2     = 0b0010_0000;
        const RSV_3     = 0b0001_0000;
    }
}

impl HeaderFlags {
    pub fn is_fin(&self) -> bool {
        self.contains(HeaderFlags::FIN)
    }
}

/// Which end of the connection this peer is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// rfc6455 § 5.3: all frames sent from the client to the server are masked.
    pub fn is_client(&self) -> bool {
        matches!(self, Role::Client)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    DataCode(DataCode),
    ControlCode(ControlCode),
}

impl OpCode {
    pub fn is_data(&self) -> bool {
        matches!(self, OpCode::DataCode(_))
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::ControlCode(_))
    }

    pub fn is_close(&self) -> bool {
        matches!(self, OpCode::ControlCode(ControlCode::Close))
    }

    pub fn is_ping(&self) -> bool {
        matches!(self, OpCode::ControlCode(ControlCode::Ping))
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OpCode::DataCode(code) => write!(f, "{:?}", code),
            OpCode::ControlCode(code) => write!(f, "{:?}", code),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataCode {
    Continuation = 0,
    Text = 1,
    Binary = 2,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlCode {
    Close = 8,
    Ping = 9,
    Pong = 10,
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        match op {
            OpCode::DataCode(code) => code as u8,
            OpCode::ControlCode(code) => code as u8,
        }
    }
}

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum OpCodeParseErr {
    #[error("Reserved OpCode: `{0}`")]
    Reserved(u8),
}

impl TryFrom<u8> for OpCode {
    type Error = OpCodeParseErr;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(OpCode::DataCode(DataCode::Continuation)),
            1 => Ok(OpCode::DataCode(DataCode::Text)),
            2 => Ok(OpCode::DataCode(DataCode::Binary)),
            8 => Ok(OpCode::ControlCode(ControlCode::Close)),
            9 => Ok(OpCode::ControlCode(ControlCode::Ping)),
            10 => Ok(OpCode::ControlCode(ControlCode::Pong)),
            r => Err(OpCodeParseErr::Reserved(r)),
        }
    }
}

/// The kind of payload that an application sends. Control intent is only ever expressed by the
/// variant, never by the content of the payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadType {
    Text,
    Binary,
    Ping,
    Pong,
}

impl From<PayloadType> for OpCode {
    fn from(ty: PayloadType) -> Self {
        match ty {
            PayloadType::Text => OpCode::DataCode(DataCode::Text),
            PayloadType::Binary => OpCode::DataCode(DataCode::Binary),
            PayloadType::Ping => OpCode::ControlCode(ControlCode::Ping),
            PayloadType::Pong => OpCode::ControlCode(ControlCode::Pong),
        }
    }
}

/// rfc6455 § 7.4.1 status codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    Protocol,
    Unsupported,
    Status,
    Abnormal,
    Invalid,
    Policy,
    Overflow,
    Extension,
    Unexpected,
    Other(u16),
}

impl CloseCode {
    /// Whether the code may be sent in a close frame. 1005, 1006 and 1015 are reserved for local
    /// use, as are codes outside of the registered and private ranges.
    pub fn is_sendable(&self) -> bool {
        matches!(u16::from(*self), 1000..=1003 | 1007..=1011 | 3000..=4999)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Overflow => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Unexpected => 1011,
            CloseCode::Other(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Overflow,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Unexpected,
            code => CloseCode::Other(code),
        }
    }
}

/// The status code and optional description carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: CloseCode,
    pub description: Option<String>,
}

impl CloseReason {
    pub fn new(code: CloseCode, description: Option<String>) -> Self {
        CloseReason { code, description }
    }

    /// Parses the payload of a close frame. Payloads shorter than two bytes carry no status.
    pub fn from_payload(payload: &[u8]) -> Option<CloseReason> {
        if payload.len() < 2 {
            return None;
        }

        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let description = match &payload[2..] {
            [] => None,
            rest => Some(String::from_utf8_lossy(rest).into_owned()),
        };

        Some(CloseReason::new(CloseCode::from(code), description))
    }

    /// Writes the close frame payload for this reason. The description is truncated so that the
    /// payload fits inside a control frame.
    pub fn write_into(&self, dst: &mut BytesMut) {
        let CloseReason { code, description } = self;
        dst.put_u16(u16::from(*code));

        if let Some(description) = description {
            let mut end = description.len().min(frame::CONTROL_MAX_SIZE - 2);
            while !description.is_char_boundary(end) {
                end -= 1;
            }
            dst.put_slice(&description.as_bytes()[..end]);
        }
    }
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let CloseReason { code, description } = self;
        match description {
            Some(description) => write!(f, "{} ({})", u16::from(*code), description),
            None => write!(f, "{}", u16::from(*code)),
        }
    }
}

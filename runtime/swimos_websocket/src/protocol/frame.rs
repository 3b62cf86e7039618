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

use crate::errors::{Error, ProtocolError};
use crate::protocol::{HeaderFlags, OpCode};
use bytes::{BufMut, Bytes, BytesMut};
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::io::{self, Read};

/// rfc6455 § 5.5: all control frames MUST have a payload length of 125 bytes or less.
pub const CONTROL_MAX_SIZE: usize = 125;

const U16_MAX: usize = u16::MAX as usize;
const U64_HIGH_BIT: u64 = 1 << 63;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: OpCode,
    pub flags: HeaderFlags,
    pub mask: Option<u32>,
}

impl FrameHeader {
    pub fn new(opcode: OpCode, flags: HeaderFlags, mask: Option<u32>) -> Self {
        FrameHeader {
            opcode,
            flags,
            mask,
        }
    }

    /// Writes the header of a frame carrying `payload_len` bytes, always choosing the shortest
    /// length encoding.
    pub fn write_into(
        dst: &mut BytesMut,
        opcode: OpCode,
        header_flags: HeaderFlags,
        mask: Option<u32>,
        payload_len: usize,
    ) {
        let masked = mask.is_some();
        let (second, mut offset) = if masked { (0x80, 6) } else { (0x0, 2) };

        if payload_len > U16_MAX {
            offset += 8;
        } else if payload_len > 125 {
            offset += 2;
        }

        dst.reserve(offset + payload_len);
        let first = header_flags.bits() | u8::from(opcode);

        if payload_len < 126 {
            dst.extend_from_slice(&[first, second | payload_len as u8]);
        } else if payload_len <= U16_MAX {
            dst.extend_from_slice(&[first, second | 126]);
            dst.put_u16(payload_len as u16);
        } else {
            dst.extend_from_slice(&[first, second | 127]);
            dst.put_u64(payload_len as u64);
        };

        if let Some(mask) = mask {
            dst.put_u32(mask);
        }
    }
}

impl Display for FrameHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let FrameHeader {
            opcode,
            flags,
            mask,
        } = self;
        write!(
            f,
            "opcode: {}, flags: {:?}, mask: {:?}",
            opcode, flags, mask
        )
    }
}

/// A single decoded frame. The payload is always held unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
}

impl Frame {
    pub fn new<P>(header: FrameHeader, payload: P) -> Frame
    where
        P: Into<Bytes>,
    {
        Frame {
            header,
            payload: payload.into(),
        }
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn opcode(&self) -> OpCode {
        self.header.opcode
    }

    pub fn is_fin(&self) -> bool {
        self.header.flags.is_fin()
    }

    pub fn is_masked(&self) -> bool {
        self.header.mask.is_some()
    }

    /// The key that the payload was masked with on the wire.
    pub fn masking_key(&self) -> Option<[u8; 4]> {
        self.header.mask.map(u32::to_be_bytes)
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Encodes this frame, masking the payload with the key in its header.
    pub fn write_into(&self, dst: &mut BytesMut) {
        let FrameHeader {
            opcode,
            flags,
            mask,
        } = self.header;
        encode_frame_with(dst, &self.payload, flags, opcode, mask);
    }
}

/// Appends a frame containing `payload` to `dst`. If `mask` is set, a random masking key is
/// generated for the frame.
pub fn encode_frame(
    dst: &mut BytesMut,
    payload: &[u8],
    flags: HeaderFlags,
    opcode: OpCode,
    mask: bool,
) {
    let mask = if mask {
        Some(rand::random::<u32>())
    } else {
        None
    };
    encode_frame_with(dst, payload, flags, opcode, mask);
}

/// Appends a frame containing `payload` to `dst`, masked with `mask` if one is provided.
pub fn encode_frame_with(
    dst: &mut BytesMut,
    payload: &[u8],
    flags: HeaderFlags,
    opcode: OpCode,
    mask: Option<u32>,
) {
    FrameHeader::write_into(dst, opcode, flags, mask, payload.len());

    let start = dst.len();
    dst.extend_from_slice(payload);

    if let Some(mask) = mask {
        apply_mask(mask, &mut dst[start..]);
    }
}

/// Reads a single frame from `reader`.
///
/// Returns `Ok(None)` if the stream ends before a complete frame has been read; this is how an
/// ungraceful disconnect presents itself and a partial frame is never retried.
pub fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Frame>, Error>
where
    R: Read,
{
    let mut head = [0; 2];
    if !fill(reader, &mut head)? {
        return Ok(None);
    }

    let [first, second] = head;
    let flags = HeaderFlags::from_bits_truncate(first);
    let opcode = OpCode::try_from(first & 0xF)?;
    let masked = second & 0x80 != 0;

    let length = match second & 0x7F {
        126 => {
            let mut len = [0; 2];
            if !fill(reader, &mut len)? {
                return Ok(None);
            }
            u64::from(u16::from_be_bytes(len))
        }
        127 => {
            let mut len = [0; 8];
            if !fill(reader, &mut len)? {
                return Ok(None);
            }
            let len = u64::from_be_bytes(len);
            if len & U64_HIGH_BIT != 0 {
                // rfc6455 § 5.2: the most significant bit MUST be 0
                return Err(ProtocolError::FrameOverflow.into());
            }
            len
        }
        len => u64::from(len),
    };

    let length = match usize::try_from(length) {
        Ok(len) if len <= max_size => len,
        _ => return Err(ProtocolError::FrameOverflow.into()),
    };

    let mask = if masked {
        let mut key = [0; 4];
        if !fill(reader, &mut key)? {
            return Ok(None);
        }
        Some(u32::from_be_bytes(key))
    } else {
        None
    };

    let mut payload = BytesMut::zeroed(length);
    if !fill(reader, &mut payload)? {
        return Ok(None);
    }

    if let Some(mask) = mask {
        apply_mask(mask, &mut payload);
    }

    Ok(Some(Frame::new(
        FrameHeader::new(opcode, flags, mask),
        payload.freeze(),
    )))
}

fn fill<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool, Error>
where
    R: Read,
{
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub fn apply_mask(mask: u32, bytes: &mut [u8]) {
    let mask: [u8; 4] = mask.to_be_bytes();

    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte ^= mask[i & 0x3];
    }
}

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
use std::io::{self, Read, Write};

use bytes::BytesMut;

pub struct BufferedIo<'s, S> {
    socket: &'s mut S,
    pub buffer: &'s mut BytesMut,
}

impl<'s, S> BufferedIo<'s, S> {
    pub fn new(socket: &'s mut S, buffer: &'s mut BytesMut) -> BufferedIo<'s, S> {
        BufferedIo { socket, buffer }
    }

    pub fn write(&mut self) -> Result<(), Error>
    where
        S: Write,
    {
        let BufferedIo { socket, buffer } = self;

        socket.write_all(buffer)?;
        socket.flush()?;

        Ok(())
    }

    /// Appends at most `chunk` bytes from the socket to the buffer, returning how many were read.
    pub fn read(&mut self, chunk: usize) -> Result<usize, Error>
    where
        S: Read,
    {
        let BufferedIo { socket, buffer } = self;

        let len = buffer.len();
        buffer.resize(len + chunk, 0);

        let result = loop {
            match socket.read(&mut buffer[len..]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => break result,
            }
        };

        let read_count = *result.as_ref().unwrap_or(&0);
        buffer.truncate(len + read_count);

        Ok(result?)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

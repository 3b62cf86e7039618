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

use crate::errors::HttpError;
use bytes::{BufMut, BytesMut};

/// The value(s) of a header. A name that appears on more than one line yields every value, in
/// the order that they were received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderField<'a> {
    Single(&'a str),
    Multiple(Vec<&'a str>),
}

impl<'a> HeaderField<'a> {
    /// The value if the header occurred exactly once.
    pub fn single(&self) -> Option<&'a str> {
        match self {
            HeaderField::Single(value) => Some(*value),
            HeaderField::Multiple(_) => None,
        }
    }

    pub fn values(&self) -> Vec<&'a str> {
        match self {
            HeaderField::Single(value) => vec![*value],
            HeaderField::Multiple(values) => values.clone(),
        }
    }
}

/// An ordered collection of header lines. Names are written exactly as they were inserted but are
/// matched ASCII case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets `name` to `value`. The first existing line with a matching name keeps its position and
    /// any further lines with that name are dropped.
    pub fn insert<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        let value = value.into();

        match self.position(&name) {
            Some(idx) => {
                let mut pos = 0;
                self.entries.retain(|(n, _)| {
                    let keep = pos <= idx || !n.eq_ignore_ascii_case(&name);
                    pos += 1;
                    keep
                });
                self.entries[idx] = (name, value);
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Adds a header line without replacing existing lines of the same name.
    pub fn append<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.entries.push((name.into(), value.into()));
    }

    /// Removes every line named `name`, returning whether any were present.
    pub fn remove(&mut self, name: &str) -> bool {
        let len = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        len != self.entries.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<HeaderField<'_>> {
        let mut values = self
            .entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str());
        let first = values.next()?;

        match values.next() {
            Some(second) => {
                let mut all = vec![first, second];
                all.extend(values);
                Some(HeaderField::Multiple(all))
            }
            None => Some(HeaderField::Single(first)),
        }
    }

    pub fn get_all<'h>(&'h self, name: &'h str) -> impl Iterator<Item = &'h str> + 'h {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn write_into(&self, dst: &mut BytesMut) {
        for (name, value) in &self.entries {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Headers {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

impl<'h> TryFrom<&[httparse::Header<'h>]> for Headers {
    type Error = HttpError;

    fn try_from(headers: &[httparse::Header<'h>]) -> Result<Self, Self::Error> {
        headers
            .iter()
            .map(|header| match std::str::from_utf8(header.value) {
                Ok(value) => Ok((header.name.to_string(), value.trim().to_string())),
                Err(_) => Err(HttpError::MalformattedHeader(header.name.to_string())),
            })
            .collect()
    }
}

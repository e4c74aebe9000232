// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Types and utilities for domain names.
//!
//! The central type is [`Name`], an owned, absolute domain name stored
//! in uncompressed wire format alongside the offsets of its labels.
//! Comparisons are ASCII-case-insensitive, and the [`Ord`]
//! implementation is the DNSSEC canonical ordering, which is also the
//! ordering of the database's name tree.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use arrayvec::ArrayVec;

mod error;
mod label;
pub use error::Error;
pub use label::Label;

/// The maximum length of a label, not including the length octet.
pub const MAX_LABEL_LEN: usize = 63;

/// The maximum length of a name on the wire.
pub const MAX_WIRE_LEN: usize = 255;

/// The maximum number of labels in a name, including the null label.
pub const MAX_N_LABELS: usize = 128;

////////////////////////////////////////////////////////////////////////
// NAMES                                                              //
////////////////////////////////////////////////////////////////////////

/// An absolute domain name.
///
/// Names are stored in uncompressed wire format. Equality and hashing
/// ignore ASCII case, as required by [RFC 1034 § 3.1].
///
/// [RFC 1034 § 3.1]: https://tools.ietf.org/html/rfc1034#section-3.1
#[derive(Clone)]
pub struct Name {
    wire: Box<[u8]>,
    offsets: Box<[u8]>,
}

#[allow(clippy::len_without_is_empty)] // A name always has a null label.
impl Name {
    /// Returns the root name `.`.
    pub fn root() -> Self {
        Self {
            wire: Box::new([0]),
            offsets: Box::new([0]),
        }
    }

    /// Builds a name from its non-null labels, leftmost first. The null
    /// label is appended automatically.
    pub fn from_labels<'a, I>(labels: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut wire: ArrayVec<u8, MAX_WIRE_LEN> = ArrayVec::new();
        let mut offsets: ArrayVec<u8, MAX_N_LABELS> = ArrayVec::new();
        for label in labels {
            if label.is_empty() {
                return Err(Error::NullNonTerminal);
            } else if label.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            offsets.try_push(wire.len() as u8).map_err(|_| Error::NameTooLong)?;
            wire.try_push(label.len() as u8).map_err(|_| Error::NameTooLong)?;
            wire.try_extend_from_slice(label).map_err(|_| Error::NameTooLong)?;
        }
        offsets.try_push(wire.len() as u8).map_err(|_| Error::NameTooLong)?;
        wire.try_push(0).map_err(|_| Error::NameTooLong)?;
        Ok(Self {
            wire: wire.as_slice().into(),
            offsets: offsets.as_slice().into(),
        })
    }

    /// Parses an uncompressed name from the beginning of `octets`,
    /// returning the name and the number of octets it occupied.
    pub fn try_from_uncompressed(octets: &[u8]) -> Result<(Self, usize), Error> {
        let mut labels: ArrayVec<&[u8], MAX_N_LABELS> = ArrayVec::new();
        let mut cursor = 0;
        loop {
            let len = *octets.get(cursor).ok_or(Error::UnexpectedEnd)? as usize;
            if len == 0 {
                cursor += 1;
                break;
            } else if len & 0xc0 == 0xc0 {
                return Err(Error::InvalidPointer);
            } else if len > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            let label = octets
                .get(cursor + 1..cursor + 1 + len)
                .ok_or(Error::UnexpectedEnd)?;
            labels.try_push(label).map_err(|_| Error::NameTooLong)?;
            cursor += 1 + len;
        }
        Ok((Self::from_labels(labels)?, cursor))
    }

    /// Returns the number of labels in this name, including the null
    /// label.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns whether this is the root name.
    pub fn is_root(&self) -> bool {
        self.len() == 1
    }

    /// Returns whether the leftmost label of this name is `*`.
    pub fn is_wildcard(&self) -> bool {
        self.label(0).is_asterisk()
    }

    /// Returns the `index`th label, counting from the left.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not less than [`Name::len`].
    pub fn label(&self, index: usize) -> Label {
        let start = self.offsets[index] as usize;
        let len = self.wire[start] as usize;
        Label::new(&self.wire[start + 1..start + 1 + len])
    }

    /// Returns an iterator over the labels of this name, leftmost
    /// first. The null label is included.
    pub fn labels(&self) -> impl DoubleEndedIterator<Item = Label> + ExactSizeIterator + '_ {
        (0..self.len()).map(move |index| self.label(index))
    }

    /// Returns the uncompressed wire representation of this name.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire
    }

    /// Returns the name obtained by removing the leftmost `n` labels,
    /// or [`None`] if that would remove the null label.
    pub fn superdomain(&self, n: usize) -> Option<Self> {
        if n >= self.len() {
            return None;
        }
        let base = self.offsets[n];
        Some(Self {
            wire: self.wire[base as usize..].into(),
            offsets: self.offsets[n..].iter().map(|o| o - base).collect(),
        })
    }

    /// Returns the parent of this name, or [`None`] for the root.
    pub fn parent(&self) -> Option<Self> {
        self.superdomain(1)
    }

    /// Returns an iterator over this name and its superdomains,
    /// starting from the root and ending with this name.
    pub fn suffixes(&self) -> impl Iterator<Item = Self> + '_ {
        (0..self.len()).rev().filter_map(move |n| self.superdomain(n))
    }

    /// Returns whether this name is equal to or a subdomain of
    /// `other`.
    pub fn eq_or_subdomain_of(&self, other: &Self) -> bool {
        self.len() >= other.len()
            && self
                .labels()
                .rev()
                .zip(other.labels().rev())
                .all(|(a, b)| a == b)
    }

    /// Returns whether this name is a proper subdomain of `other`.
    pub fn is_subdomain_of(&self, other: &Self) -> bool {
        self.len() > other.len() && self.eq_or_subdomain_of(other)
    }

    /// Returns the name formed by prepending `label` to this name.
    pub fn prepend(&self, label: &[u8]) -> Result<Self, Error> {
        let mut labels: ArrayVec<&[u8], MAX_N_LABELS> = ArrayVec::new();
        labels.try_push(label).map_err(|_| Error::NameTooLong)?;
        for existing in self.labels().filter(|l| !l.is_null()) {
            labels.try_push(existing.octets()).map_err(|_| Error::NameTooLong)?;
        }
        Self::from_labels(labels)
    }

    /// Returns the wildcard name `*.<self>`.
    pub fn wildcard(&self) -> Result<Self, Error> {
        self.prepend(b"*")
    }

    /// Computes a case-insensitive hash of this name. This is stable
    /// across runs, so it can be used to assign names to lock shards.
    pub fn hash_caseless(&self) -> u32 {
        // FNV-1a.
        self.wire.iter().fold(0x811c_9dc5u32, |hash, octet| {
            (hash ^ octet.to_ascii_lowercase() as u32).wrapping_mul(0x0100_0193)
        })
    }
}

impl FromStr for Name {
    type Err = Error;

    /// Parses a name in presentation format. Names are always treated
    /// as absolute, so the trailing dot is optional. The escapes `\X`
    /// and `\DDD` of [RFC 1035 § 5.1] are supported.
    ///
    /// [RFC 1035 § 5.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-5.1
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(Error::StrEmpty);
        } else if !text.is_ascii() {
            return Err(Error::StrNotAscii);
        } else if text == "." {
            return Ok(Self::root());
        }

        let mut buf: ArrayVec<ArrayVec<u8, MAX_LABEL_LEN>, MAX_N_LABELS> = ArrayVec::new();
        let mut current: ArrayVec<u8, MAX_LABEL_LEN> = ArrayVec::new();
        let mut octets = text.bytes();
        let mut pending = false;
        while let Some(octet) = octets.next() {
            let value = match octet {
                b'.' => {
                    if current.is_empty() {
                        return Err(Error::NullNonTerminal);
                    }
                    buf.try_push(std::mem::take(&mut current))
                        .map_err(|_| Error::NameTooLong)?;
                    pending = false;
                    continue;
                }
                b'\\' => parse_escape(&mut octets)?,
                other => other,
            };
            current.try_push(value).map_err(|_| Error::LabelTooLong)?;
            pending = true;
        }
        if pending {
            buf.try_push(current).map_err(|_| Error::NameTooLong)?;
        }
        Self::from_labels(buf.iter().map(|l| l.as_slice()))
    }
}

fn parse_escape(octets: &mut impl Iterator<Item = u8>) -> Result<u8, Error> {
    let first = octets.next().ok_or(Error::InvalidEscape)?;
    if !first.is_ascii_digit() {
        return Ok(first);
    }
    let mut value = (first - b'0') as u16;
    for _ in 0..2 {
        match octets.next() {
            Some(digit) if digit.is_ascii_digit() => value = value * 10 + (digit - b'0') as u16,
            _ => return Err(Error::InvalidEscape),
        }
    }
    u8::try_from(value).map_err(|_| Error::InvalidEscape)
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels().filter(|l| !l.is_null()) {
            write!(f, "{}.", label)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.wire.eq_ignore_ascii_case(&other.wire)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for octet in self.wire.iter() {
            state.write_u8(octet.to_ascii_lowercase());
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The [`Ord`] implementation for `Name` employs DNSSEC's canonical
/// ordering of domain names. Per [RFC 4034 § 6.1], `Name`s are ordered
/// as strings of labels read from right to left.
///
/// [RFC 4034 § 6.1]: https://datatracker.ietf.org/doc/html/rfc4034#section-6.1
impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.labels()
            .rev()
            .zip(other.labels().rev())
            .find_map(|(a, b)| Some(a.cmp(&b)).filter(|ordering| ordering.is_ne()))
            .unwrap_or_else(|| self.len().cmp(&other.len()))
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

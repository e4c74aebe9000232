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

//! Implementation of the [`Label`] type.

use std::cmp::Ordering;
use std::fmt;

/// A borrowed view of one label of a [`Name`](super::Name).
///
/// Note that in accordance with [RFC 1034 § 3.1], comparisons between
/// `Label`s are case-insensitive assuming ASCII, but case is preserved
/// in the underlying octets.
///
/// [RFC 1034 § 3.1]: https://tools.ietf.org/html/rfc1034#section-3.1
#[derive(Clone, Copy)]
pub struct Label<'a> {
    octets: &'a [u8],
}

#[allow(clippy::len_without_is_empty)] // Following DNS terminology, we have is_null().
impl<'a> Label<'a> {
    pub(super) fn new(octets: &'a [u8]) -> Self {
        Self { octets }
    }

    /// Returns whether this `Label` is the asterisk label `*`.
    pub fn is_asterisk(&self) -> bool {
        self.octets == b"*"
    }

    /// Returns whether this `Label` is the null (zero-length) label.
    pub fn is_null(&self) -> bool {
        self.octets.is_empty()
    }

    /// Returns the number of octets in this `Label`.
    pub fn len(&self) -> usize {
        self.octets.len()
    }

    /// Returns the octets of this `Label`.
    pub fn octets(&self) -> &'a [u8] {
        self.octets
    }
}

impl PartialEq for Label<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.octets.eq_ignore_ascii_case(other.octets)
    }
}

impl Eq for Label<'_> {}

impl PartialOrd for Label<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Labels are ordered as unsigned octet strings after conversion to
/// lowercase, per [RFC 4034 § 6.1].
///
/// [RFC 4034 § 6.1]: https://datatracker.ietf.org/doc/html/rfc4034#section-6.1
impl Ord for Label<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.octets.iter().map(u8::to_ascii_lowercase);
        let b = other.octets.iter().map(u8::to_ascii_lowercase);
        a.cmp(b)
    }
}

impl fmt::Display for Label<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &octet in self.octets {
            match octet {
                b'.' | b'\\' | b'"' | b'(' | b')' | b';' | b'@' | b'$' => {
                    write!(f, "\\{}", octet as char)?
                }
                0x21..=0x7e => write!(f, "{}", octet as char)?,
                _ => write!(f, "\\{:03}", octet)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Label<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_comparison_ignores_case() {
        assert_eq!(Label::new(b"Example"), Label::new(b"eXAMPLE"));
        assert_ne!(Label::new(b"example"), Label::new(b"examples"));
    }

    #[test]
    fn label_ordering_is_canonical() {
        assert!(Label::new(b"a") < Label::new(b"Z"));
        assert!(Label::new(b"z") < Label::new(b"zABC"));
        assert!(Label::new(b"\x01") < Label::new(b"*"));
        assert!(Label::new(b"*") < Label::new(b"\xc8"));
    }

    #[test]
    fn label_display_escapes() {
        assert_eq!(Label::new(b"a.b").to_string(), "a\\.b");
        assert_eq!(Label::new(b"\x07x").to_string(), "\\007x");
        assert_eq!(Label::new(b"*").to_string(), "*");
    }
}

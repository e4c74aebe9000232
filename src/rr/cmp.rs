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

//! Type-aware equality of RDATA.
//!
//! [RFC 3597 § 6] specifies that RRs of unknown type are equal when
//! their RDATA is bitwise equal, and that new RR types should not have
//! type-specific comparison rules. Only types that predate the RFC and
//! embed domain names compare those names case-insensitively. The
//! database relies on this when merging and subtracting record sets,
//! and when deciding whether refreshed cache data is identical to what
//! it already holds.
//!
//! [RFC 3597 § 6]: https://datatracker.ietf.org/doc/html/rfc3597#section-6

use super::Type;
use crate::name::Name;

/// The layout of an RDATA whose embedded names need case-insensitive
/// comparison: a fixed-length prefix, some number of uncompressed
/// names, and a fixed-length tail.
struct Layout {
    prefix: usize,
    names: usize,
    tail: usize,
}

impl Layout {
    const fn names(names: usize) -> Self {
        Self {
            prefix: 0,
            names,
            tail: 0,
        }
    }
}

fn layout_of(rr_type: Type) -> Option<Layout> {
    match rr_type {
        Type::NS
        | Type::MD
        | Type::MF
        | Type::CNAME
        | Type::MB
        | Type::MG
        | Type::MR
        | Type::PTR
        | Type::DNAME => Some(Layout::names(1)),
        Type::MINFO => Some(Layout::names(2)),
        Type::SOA => Some(Layout {
            prefix: 0,
            names: 2,
            tail: 20,
        }),
        Type::MX => Some(Layout {
            prefix: 2,
            names: 1,
            tail: 0,
        }),
        _ => None,
    }
}

/// Compares two RDATAs of type `rr_type`. Embedded domain names are
/// compared case-insensitively for the types that require it; all
/// other data is compared bitwise. If either RDATA turns out to be
/// malformed, the comparison falls back to bitwise.
pub fn equal(rr_type: Type, first: &[u8], second: &[u8]) -> bool {
    if first.len() != second.len() {
        // Equal names always have equal lengths, so the RDATAs can't
        // be equal either way.
        return false;
    }
    let layout = match layout_of(rr_type) {
        Some(layout) => layout,
        None => return first == second,
    };
    if first.len() < layout.prefix || first[..layout.prefix] != second[..layout.prefix] {
        return first == second;
    }
    match compare_names(&first[layout.prefix..], &second[layout.prefix..], layout.names) {
        Fields::Equal(len) => {
            let rest = layout.prefix + len;
            if first.len() - rest == layout.tail {
                first[rest..] == second[rest..]
            } else {
                // The remaining fields have the wrong length, so the
                // data is malformed.
                first == second
            }
        }
        Fields::Unequal => false,
        Fields::Undecidable => first == second,
    }
}

/// The outcome of comparing a run of name fields.
#[derive(Debug, Eq, PartialEq)]
enum Fields {
    /// All fields were valid and equal; they occupy this many octets.
    Equal(usize),

    /// The RDATAs definitely differ.
    Unequal,

    /// A malformed name was found in both; everything must be compared
    /// again bitwise.
    Undecidable,
}

fn compare_names(first: &[u8], second: &[u8], n: usize) -> Fields {
    let mut offset = 0;
    for _ in 0..n {
        match (
            Name::try_from_uncompressed(&first[offset..]),
            Name::try_from_uncompressed(&second[offset..]),
        ) {
            (Ok((a, len)), Ok((b, _))) => {
                if a != b {
                    return Fields::Unequal;
                }
                offset += len;
            }
            // One valid and one invalid name can't be bitwise equal.
            (Ok(_), Err(_)) | (Err(_), Ok(_)) => return Fields::Unequal,
            (Err(_), Err(_)) => return Fields::Undecidable,
        }
    }
    Fields::Equal(offset)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

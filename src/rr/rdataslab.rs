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

//! The [`RdataSlab`] structure.
//!
//! A slab stores the RDATA of one record set in a single contiguous
//! buffer: a big-endian 16-bit record count followed by each RDATA,
//! prefixed by its big-endian 16-bit length. Records are kept sorted by
//! their octets and free of duplicates (as judged by [`cmp::equal`]
//! for the slab's type), so two slabs holding the same set have the
//! same layout.

use std::fmt;
use std::iter::FusedIterator;

use super::{cmp, Type};

////////////////////////////////////////////////////////////////////////
// RDATASLAB STRUCTURE                                                //
////////////////////////////////////////////////////////////////////////

/// The packed RDATA of one record set.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct RdataSlab {
    octets: Box<[u8]>,
}

impl RdataSlab {
    /// Packs the given RDATAs, which are compared as RDATA of type
    /// `rr_type` to drop duplicates.
    pub fn new<'a, I>(rr_type: Type, rdatas: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut unique: Vec<&[u8]> = Vec::new();
        for rdata in rdatas {
            if rdata.len() > u16::MAX as usize {
                return Err(Error::RdataTooLong);
            }
            if !unique.iter().any(|existing| cmp::equal(rr_type, existing, rdata)) {
                unique.push(rdata);
            }
        }
        Self::pack(unique)
    }

    /// Returns a slab holding no records. This is the payload of
    /// negative cache entries that carry no proof.
    pub fn empty() -> Self {
        Self {
            octets: Box::new([0, 0]),
        }
    }

    fn pack(mut rdatas: Vec<&[u8]>) -> Result<Self, Error> {
        if rdatas.len() > u16::MAX as usize {
            return Err(Error::TooManyRecords);
        }
        rdatas.sort_unstable();
        let size = 2 + rdatas.iter().map(|r| 2 + r.len()).sum::<usize>();
        let mut octets = Vec::with_capacity(size);
        octets.extend_from_slice(&(rdatas.len() as u16).to_be_bytes());
        for rdata in rdatas {
            octets.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            octets.extend_from_slice(rdata);
        }
        Ok(Self {
            octets: octets.into(),
        })
    }

    /// Returns the number of records in the slab.
    pub fn count(&self) -> usize {
        u16::from_be_bytes([self.octets[0], self.octets[1]]) as usize
    }

    /// Returns whether the slab holds no records.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns the size of the packed slab in octets.
    pub fn size(&self) -> usize {
        self.octets.len()
    }

    /// Returns the packed representation.
    pub fn octets(&self) -> &[u8] {
        &self.octets
    }

    /// Returns an iterator over the RDATAs in the slab.
    pub fn iter(&self) -> Iter {
        Iter {
            remaining: self.count(),
            cursor: &self.octets[2..],
        }
    }

    fn contains(&self, rr_type: Type, rdata: &[u8]) -> bool {
        self.iter().any(|existing| cmp::equal(rr_type, existing, rdata))
    }

    /// Computes the union of this slab and `new`.
    ///
    /// With `exact`, finding any record of `new` already present is an
    /// error ([`Error::NotExact`]). Unless `force` is set, a merge that
    /// adds nothing reports [`Error::Unchanged`].
    pub fn merge(
        &self,
        rr_type: Type,
        new: &Self,
        exact: bool,
        force: bool,
    ) -> Result<Self, Error> {
        let added: Vec<&[u8]> = new.iter().filter(|r| !self.contains(rr_type, r)).collect();
        if exact && added.len() < new.count() {
            return Err(Error::NotExact);
        } else if added.is_empty() && !force {
            return Err(Error::Unchanged);
        }
        Self::pack(self.iter().chain(added).collect())
    }

    /// Removes the records of `other` from this slab. Returns [`None`]
    /// if no records remain.
    ///
    /// With `exact`, every record of `other` must be present
    /// ([`Error::NotExact`] otherwise). Removing nothing reports
    /// [`Error::Unchanged`].
    pub fn subtract(
        &self,
        rr_type: Type,
        other: &Self,
        exact: bool,
    ) -> Result<Option<Self>, Error> {
        let kept: Vec<&[u8]> = self.iter().filter(|r| !other.contains(rr_type, r)).collect();
        let removed = self.count() - kept.len();
        if exact && removed != other.count() {
            return Err(Error::NotExact);
        } else if removed == 0 {
            return Err(Error::Unchanged);
        } else if kept.is_empty() {
            return Ok(None);
        }
        Self::pack(kept).map(Some)
    }

    /// Compares two slabs octet for octet.
    pub fn equal(&self, other: &Self) -> bool {
        self.octets == other.octets
    }

    /// Compares two slabs record by record, as RDATA of type `rr_type`.
    pub fn equal_canonical(&self, rr_type: Type, other: &Self) -> bool {
        self.count() == other.count()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| cmp::equal(rr_type, a, b))
    }
}

impl fmt::Debug for RdataSlab {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut list = f.debug_list();
        for rdata in self.iter() {
            list.entry(&format_args!("{:02x?}", rdata));
        }
        list.finish()
    }
}

////////////////////////////////////////////////////////////////////////
// RDATASLAB ITERATION                                                //
////////////////////////////////////////////////////////////////////////

/// An iterator over the RDATAs of an [`RdataSlab`].
pub struct Iter<'a> {
    remaining: usize,
    cursor: &'a [u8],
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let len_octets: [u8; 2] = self.cursor.get(0..2)?.try_into().ok()?;
        let len = u16::from_be_bytes(len_octets) as usize;
        let rdata = self.cursor.get(2..len + 2)?;
        self.cursor = &self.cursor[len + 2..];
        self.remaining -= 1;
        Some(rdata)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl FusedIterator for Iter<'_> {}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors and non-success outcomes of slab operations.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// The operation would not change the slab.
    Unchanged,

    /// An exact merge or subtraction did not match exactly.
    NotExact,

    /// More than 65,535 records.
    TooManyRecords,

    /// An RDATA longer than 65,535 octets.
    RdataTooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Unchanged => f.write_str("record set unchanged"),
            Self::NotExact => f.write_str("records did not match exactly"),
            Self::TooManyRecords => f.write_str("too many records in record set"),
            Self::RdataTooLong => f.write_str("RDATA is too long"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

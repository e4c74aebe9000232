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

//! The [`Rdataset`] and [`NoQname`] structures.

use std::sync::Arc;

use super::{RdataSlab, Trust, Type, TypeKey};
use crate::name::Name;

/// A record set as handed to and returned by the database.
///
/// The RDATA is shared with the database's stored copy, so cloning an
/// `Rdataset` is cheap. For a negative cache entry, `rr_type` is zero
/// and `covers` is the type whose non-existence is recorded (ANY for
/// an NXDOMAIN entry).
#[derive(Clone, Debug)]
pub struct Rdataset {
    pub rr_type: Type,
    pub covers: Type,

    /// When passed to the database: the TTL in seconds. When returned:
    /// the remaining TTL relative to the lookup time (caches) or the
    /// stored TTL (zones).
    pub ttl: u32,
    pub trust: Trust,
    pub rdata: Arc<RdataSlab>,

    /// Marks a negative cache entry as recording NXDOMAIN.
    pub nxdomain: bool,

    /// The DNSSEC proof that the query name does not exist, attached
    /// to answers synthesized from a wildcard.
    pub noqname: Option<Arc<NoQname>>,

    /// The round-robin counter of the stored set at the time it was
    /// returned. Callers may use it to rotate the order of records.
    pub count: u32,
}

impl Rdataset {
    /// Makes a record set of the given type.
    pub fn new(rr_type: Type, ttl: u32, rdata: RdataSlab) -> Self {
        Self {
            rr_type,
            covers: Type::from_u16(0),
            ttl,
            trust: Trust::None,
            rdata: Arc::new(rdata),
            nxdomain: false,
            noqname: None,
            count: 0,
        }
    }

    /// Makes the RRSIG set that signs `covers`.
    pub fn signature(covers: Type, ttl: u32, rdata: RdataSlab) -> Self {
        Self {
            covers,
            ..Self::new(Type::RRSIG, ttl, rdata)
        }
    }

    /// Makes a negative cache entry for `covers`. Passing ANY records
    /// that the whole name does not exist.
    pub fn negative(covers: Type, ttl: u32, rdata: RdataSlab) -> Self {
        Self {
            covers,
            nxdomain: covers == Type::ANY,
            ..Self::new(Type::from_u16(0), ttl, rdata)
        }
    }

    pub fn with_trust(mut self, trust: Trust) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_noqname(mut self, noqname: NoQname) -> Self {
        self.noqname = Some(Arc::new(noqname));
        self
    }

    /// Returns the key under which this set is stored.
    pub fn key(&self) -> TypeKey {
        TypeKey::new(self.rr_type, self.covers)
    }

    /// Returns whether this is a negative cache entry.
    pub fn is_negative(&self) -> bool {
        self.key().is_negative()
    }
}

/// A DNSSEC proof of non-existence of a query name: the covering NSEC
/// and its signatures.
#[derive(Clone, Debug)]
pub struct NoQname {
    pub name: Name,
    pub nsec: Arc<RdataSlab>,
    pub nsec_sig: Arc<RdataSlab>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_keys() {
        let a = Rdataset::new(Type::A, 300, RdataSlab::empty()).with_trust(Trust::Answer);
        assert_eq!(a.key(), TypeKey::of(Type::A));
        assert_eq!(a.trust, Trust::Answer);
        let sig = Rdataset::signature(Type::NS, 300, RdataSlab::empty());
        assert_eq!(sig.key(), TypeKey::SIG_NS);
        let neg = Rdataset::negative(Type::ANY, 300, RdataSlab::empty());
        assert!(neg.is_negative());
        assert!(neg.nxdomain);
        assert_eq!(neg.key(), TypeKey::NCACHE_ANY);
        assert!(!Rdataset::negative(Type::MX, 300, RdataSlab::empty()).nxdomain);
    }
}

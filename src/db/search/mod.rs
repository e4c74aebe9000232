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

//! Lookups.
//!
//! A lookup descends the tree toward the query name, inspecting the
//! flagged nodes it passes for zone cuts (NS or DNAME records) and for
//! wildcard parents. What happens at the bottom depends on the kind of
//! database; see [`zone`] and [`cache`].

mod cache;
mod zone;

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use super::header::{HeaderId, ShardState};
use super::lifecycle::new_reference;
use super::lock::Shard;
use super::tree::Node;
use super::{Database, DbInner, Error, NodeHandle, Version};
use crate::name::Name;
use crate::rr::{Rdataset, Type};
use crate::util;

////////////////////////////////////////////////////////////////////////
// OPTIONS AND RESULTS                                                //
////////////////////////////////////////////////////////////////////////

/// Flags modifying a lookup.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct FindOptions(u16);

impl FindOptions {
    /// Return data found below a zone cut (as [`FindResult::Glue`])
    /// rather than the delegation.
    pub const GLUE_OK: Self = Self(0x0001);

    /// Don't synthesize answers from wildcards.
    pub const NO_WILD: Self = Self(0x0002);

    /// Return NSEC proofs even if the zone is not secure.
    pub const FORCE_NSEC: Self = Self(0x0004);

    /// Check that glue is plausible (an address of one of the
    /// delegation's name servers), returning the delegation otherwise.
    pub const VALIDATE_GLUE: Self = Self(0x0008);

    /// Accept cache data whose trust is still pending validation.
    pub const PENDING_OK: Self = Self(0x0010);

    /// Accept cache data learned from additional sections.
    pub const ADDITIONAL_OK: Self = Self(0x0020);

    /// On a cache miss, answer with a cached NSEC record covering the
    /// name, if there is one.
    pub const COVERING_NSEC: Self = Self(0x0040);

    /// For [`Database::find_zonecut`]: ignore the query name's own
    /// node.
    pub const NO_EXACT: Self = Self(0x0080);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FindOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for FindOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FindOptions({:#06x})", self.0)
    }
}

/// The outcome of a successful lookup. Every variant other than
/// `Success` tells the caller that the answer needs further handling.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FindResult {
    /// The records were found.
    Success,

    /// The records were found below a zone cut; they are glue.
    Glue,

    /// An ANY query reached a zone cut; the node's data is returned
    /// without records.
    ZoneCut,

    /// The name is at or below an NS zone cut. The answer holds the
    /// delegation's NS records.
    Delegation,

    /// The name is below a DNAME. The answer holds the DNAME records.
    Dname,

    /// A CNAME exists instead of the requested type.
    Cname,

    /// The name does not exist.
    NxDomain,

    /// The name exists but has no records of the requested type.
    NxRrset,

    /// The name exists only as an empty non-terminal.
    EmptyName,

    /// The name matched a wildcard that has no records of the
    /// requested type.
    EmptyWild,

    /// A cache has an NSEC record covering the name.
    CoveringNsec,

    /// A cache holds a negative entry saying the name does not exist.
    NcacheNxDomain,

    /// A cache holds a negative entry saying the type does not exist.
    NcacheNxRrset,
}

/// The answer to a lookup.
#[derive(Debug)]
pub struct Answer {
    pub result: FindResult,

    /// The name the answer pertains to: the query name for answers
    /// about it (including wildcard matches), the owner of the zone
    /// cut for referrals, or the owner of the NSEC record for proofs
    /// of nonexistence.
    pub name: Name,

    /// The node the answer came from.
    pub node: Option<NodeHandle>,
    pub rdataset: Option<Rdataset>,
    pub sig_rdataset: Option<Rdataset>,

    /// Set when the answer was synthesized from a wildcard.
    pub wildcard: bool,
}

impl Answer {
    fn new(result: FindResult, name: Name) -> Self {
        Self {
            result,
            name,
            node: None,
            rdataset: None,
            sig_rdataset: None,
            wildcard: false,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ZONE CUTS                                                          //
////////////////////////////////////////////////////////////////////////

/// A zone cut found during a lookup, with its records bound.
struct ZoneCut {
    node: NodeHandle,
    rdataset: Rdataset,
    sig_rdataset: Option<Rdataset>,
    is_dname: bool,
}

impl ZoneCut {
    /// Turns the cut into a referral answer.
    fn into_delegation(self) -> Answer {
        let result = if self.is_dname {
            FindResult::Dname
        } else {
            FindResult::Delegation
        };
        Answer {
            result,
            name: self.node.name().clone(),
            rdataset: Some(self.rdataset),
            sig_rdataset: self.sig_rdataset,
            node: Some(self.node),
            wildcard: false,
        }
    }
}

/// Takes a reference to `node` for an answer. The caller must hold
/// the node's shard guard.
fn reference(db: &Arc<DbInner>, shard: &Shard, node: &Arc<Node>) -> NodeHandle {
    new_reference(shard, node);
    NodeHandle::new(db.clone(), node.clone())
}

/// Binds the headers found for an answer, if any.
fn bind_pair(
    state: &ShardState,
    found: Option<HeaderId>,
    sig: Option<HeaderId>,
    now: u32,
) -> (Option<Rdataset>, Option<Rdataset>) {
    (
        found.map(|id| state.header(id).bind(now)),
        sig.map(|id| state.header(id).bind(now)),
    )
}

////////////////////////////////////////////////////////////////////////
// ENTRY POINTS                                                       //
////////////////////////////////////////////////////////////////////////

impl Database {
    /// Looks up records of `rr_type` for `name`.
    ///
    /// Zones read at `version`, or at the current version if none is
    /// given. Caches take no version and read as of `now` (zero meaning
    /// the current time).
    ///
    /// Lookup outcomes that need further handling by the caller, such
    /// as referrals and nonexistence, are reported through
    /// [`Answer::result`]. Errors are reserved for a failed search.
    pub fn find(
        &self,
        name: &Name,
        version: Option<&Version>,
        rr_type: Type,
        options: FindOptions,
        now: u32,
    ) -> Result<Answer, Error> {
        let (serial, _attached) = self.read_version(version)?;
        if self.kind().is_cache() {
            let now = if now == 0 { util::now() } else { now };
            cache::find(&self.inner, name, rr_type, options, now)
        } else {
            zone::find(&self.inner, name, serial, rr_type, options)
        }
    }

    /// Finds the deepest zone cut at or above `name` (above only, with
    /// [`FindOptions::NO_EXACT`]) and returns its NS records. Only
    /// caches support this.
    pub fn find_zonecut(
        &self,
        name: &Name,
        options: FindOptions,
        now: u32,
    ) -> Result<Answer, Error> {
        if !self.kind().is_cache() {
            return Err(Error::NotImplemented);
        }
        let now = if now == 0 { util::now() } else { now };
        cache::find_zonecut(&self.inner, name, options, now)
    }

    /// Finds the record set of type `rr_type` (covering `covers`, for
    /// signatures) at a node, along with its signature when `covers`
    /// is zero. A cache may instead answer with a negative entry, with
    /// [`FindResult::NcacheNxDomain`] or [`FindResult::NcacheNxRrset`].
    pub fn find_rdataset(
        &self,
        node: &NodeHandle,
        version: Option<&Version>,
        rr_type: Type,
        covers: Type,
        now: u32,
    ) -> Result<Answer, Error> {
        if rr_type == Type::ANY {
            return Err(Error::NotImplemented);
        }
        if !node.belongs_to(self) {
            return Err(Error::NotFound);
        }
        let (serial, _attached) = self.read_version(version)?;
        if self.kind().is_cache() {
            let now = if now == 0 { util::now() } else { now };
            cache::find_rdataset(&self.inner, &node.node, rr_type, covers, now)
        } else {
            zone::find_rdataset(&self.inner, &node.node, serial, rr_type, covers)
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::*;

    #[test]
    fn options_combine() {
        let options = FindOptions::GLUE_OK | FindOptions::NO_WILD;
        assert!(options.contains(FindOptions::GLUE_OK));
        assert!(options.contains(FindOptions::NO_WILD));
        assert!(!options.contains(FindOptions::FORCE_NSEC));
        assert!(FindOptions::empty().contains(FindOptions::empty()));
    }

    #[test]
    fn zones_do_not_find_zonecuts() {
        let db = zone();
        assert_eq!(
            db.find_zonecut(&name("www.example."), FindOptions::empty(), 0)
                .unwrap_err(),
            Error::NotImplemented
        );
    }

    #[test]
    fn caches_reject_versions() {
        let db = cache();
        let other = zone();
        let version = other.current_version();
        assert_eq!(
            db.find(&name("example."), Some(&version), Type::A, FindOptions::empty(), 0)
                .unwrap_err(),
            Error::InvalidVersion
        );
    }

    #[test]
    fn zones_reject_foreign_versions() {
        let db = zone();
        let other = zone();
        let version = other.current_version();
        assert_eq!(
            db.find(&name("example."), Some(&version), Type::A, FindOptions::empty(), 0)
                .unwrap_err(),
            Error::InvalidVersion
        );
    }
}

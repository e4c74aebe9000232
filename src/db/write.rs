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

//! Adding, subtracting, and deleting record sets.
//!
//! A write never modifies a header's records in place. It pushes a new
//! header onto the front of the type's chain, so that readers of older
//! versions keep seeing the old one until it can be reclaimed. Deletion
//! pushes a tombstone.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use super::header::{Attributes, Header, HeaderId, Payload, ShardState};
use super::tree::Node;
use super::version::{Serial, VersionId};
use super::{Database, DbInner, Error, NodeHandle, Version};
use crate::rr::{rdataslab, Rdataset, Trust, Type, TypeKey};
use crate::util;

////////////////////////////////////////////////////////////////////////
// OPTIONS AND OUTCOMES                                               //
////////////////////////////////////////////////////////////////////////

/// Flags modifying [`Database::add_rdataset`].
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct AddOptions(u8);

impl AddOptions {
    /// Merge the records into the existing set of the same type
    /// instead of replacing it. Requires a write version.
    pub const MERGE: Self = Self(0x01);

    /// Add with ultimate trust, overriding any cached data.
    pub const FORCE: Self = Self(0x02);

    /// Fail a merge with [`Error::NotExact`] if any record is already
    /// present.
    pub const EXACT: Self = Self(0x04);

    /// Fail a merge with [`Error::NotExact`] if the TTLs differ.
    pub const EXACT_TTL: Self = Self(0x08);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AddOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for AddOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AddOptions({:#04x})", self.0)
    }
}

/// Flags modifying [`Database::subtract_rdataset`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SubtractOptions(u8);

impl SubtractOptions {
    /// Fail with [`Error::NotExact`] unless every record (and the TTL)
    /// matches.
    pub const EXACT: Self = Self(0x01);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// What a write did.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum WriteOutcome {
    /// The change was made.
    Added,

    /// Nothing changed: the data was already there, was already
    /// absent, or is outranked by more trusted cache data.
    Unchanged,

    /// The change was made, but the node now has a CNAME alongside
    /// other data in this version.
    CnameAndOtherData,

    /// A subtraction removed every record; the type no longer exists
    /// in this version.
    Emptied,
}

/// The outcome of a write and the resulting record set, when there is
/// one to report.
#[derive(Clone, Debug)]
pub struct Written {
    pub outcome: WriteOutcome,

    /// For [`WriteOutcome::Added`], the data now stored. For an
    /// unchanged cache write, the data that prevailed.
    pub rdataset: Option<Rdataset>,
}

impl Written {
    fn unchanged() -> Self {
        Self {
            outcome: WriteOutcome::Unchanged,
            rdataset: None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ENTRY POINTS                                                       //
////////////////////////////////////////////////////////////////////////

/// The version a write goes to: its table index and serial. Caches
/// write with none.
type Target = Option<(VersionId, Serial)>;

impl Database {
    /// Adds `rdataset` at `node`.
    ///
    /// Zones write to the open write `version`; caches take none and
    /// store the TTL as an expiry time relative to `now` (zero meaning
    /// the current time).
    pub fn add_rdataset(
        &self,
        node: &NodeHandle,
        version: Option<&Version>,
        now: u32,
        rdataset: &Rdataset,
        options: AddOptions,
    ) -> Result<Written, Error> {
        let target = self.write_target(node, version)?;
        if options.contains(AddOptions::MERGE) && target.is_none() {
            return Err(Error::InvalidVersion);
        }
        let now = match target {
            Some(_) => 0,
            None if now == 0 => util::now(),
            None => now,
        };

        let db = &self.inner;
        let serial = target.map_or(1, |(_, serial)| serial);
        let mut header = Header::new(
            rdataset.key(),
            serial,
            rdataset.ttl.saturating_add(now),
            rdataset.trust,
            Payload::Exists(rdataset.rdata.clone()),
        );
        if target.is_none() {
            if rdataset.nxdomain {
                header.attributes.insert(Attributes::NXDOMAIN);
            }
            header.noqname = rdataset.noqname.clone();
        }

        // The find-callback flag is only changed with the tree locked
        // for writing.
        let delegating = is_delegating(db, &node.node, rdataset.rr_type);
        let _tree = delegating.then(|| db.tree.write());
        let mut guard = db.locks.content_and_refcount(&node.node);
        let written = add(db, guard.exclusive(), &node.node, target, header, options, false, now)?;
        if delegating && written.outcome == WriteOutcome::Added {
            node.node.set_find_callback();
        }
        Ok(written)
    }

    /// Removes the records of `rdataset` from the set of the same type
    /// at `node`, in the write `version`. Zones only.
    pub fn subtract_rdataset(
        &self,
        node: &NodeHandle,
        version: &Version,
        rdataset: &Rdataset,
        options: SubtractOptions,
    ) -> Result<Written, Error> {
        let (id, serial) = self
            .write_target(node, Some(version))?
            .ok_or(Error::InvalidVersion)?;
        let db = &self.inner;
        let node = &node.node;
        let mut guard = db.locks.content_and_refcount(node);
        let state = guard.exclusive();
        let change = db.state.lock().versions.record_change(id, node)?;

        let key = rdataset.key();
        let (prev, top) = find_top(state, node.slot, |k| k == key);
        let current = top.and_then(|top| first_unignored(state, top));
        let old = match current.map(|id| state.header(id)) {
            Some(old) if old.exists() => old,
            _ => {
                return if options.contains(SubtractOptions::EXACT) {
                    Err(Error::NotExact)
                } else {
                    Ok(Written::unchanged())
                };
            }
        };

        let exact = options.contains(SubtractOptions::EXACT);
        if exact && rdataset.ttl != old.ttl {
            return Err(Error::NotExact);
        }
        let old_rdata = old.rdata().ok_or(Error::BadDb)?;
        let (new, outcome) = match old_rdata.subtract(key.base(), &rdataset.rdata, exact) {
            Ok(Some(rest)) => {
                let mut new = Header::new(
                    key,
                    serial,
                    old.ttl,
                    old.trust,
                    Payload::Exists(Arc::new(rest)),
                );
                new.noqname = old.noqname.clone();
                (new, WriteOutcome::Added)
            }
            Ok(None) => (
                Header::new(key, serial, 0, Trust::None, Payload::Tombstone),
                WriteOutcome::Emptied,
            ),
            Err(rdataslab::Error::Unchanged) => return Ok(Written::unchanged()),
            Err(err) => return Err(err.into()),
        };

        // A subtraction always follows an existing set, so `top` is set.
        let top = top.ok_or(Error::BadDb)?;
        let new_id = push_over(state, node.slot, prev, top, new);
        state.node_mut(node.slot).dirty = true;
        db.state.lock().versions.mark_dirty(id, change);

        let rdataset = (outcome == WriteOutcome::Added).then(|| state.header(new_id).bind(0));
        Ok(Written { outcome, rdataset })
    }

    /// Deletes the set of type `rr_type` (covering `covers`) at `node`
    /// by adding a tombstone for it. ANY, and RRSIG without a covered
    /// type, can't be deleted this way.
    pub fn delete_rdataset(
        &self,
        node: &NodeHandle,
        version: Option<&Version>,
        rr_type: Type,
        covers: Type,
    ) -> Result<WriteOutcome, Error> {
        if rr_type == Type::ANY || (rr_type == Type::RRSIG && covers == Type::from_u16(0)) {
            return Err(Error::NotImplemented);
        }
        let target = self.write_target(node, version)?;
        let serial = target.map_or(1, |(_, serial)| serial);
        let header = Header::new(
            TypeKey::new(rr_type, covers),
            serial,
            0,
            Trust::None,
            Payload::Tombstone,
        );
        let db = &self.inner;
        let mut guard = db.locks.content_and_refcount(&node.node);
        add(db, guard.exclusive(), &node.node, target, header, AddOptions::FORCE, false, 0)
            .map(|written| written.outcome)
    }

    /// Checks that a write suits this database: zones need their own
    /// open write version, caches none.
    fn write_target(&self, node: &NodeHandle, version: Option<&Version>) -> Result<Target, Error> {
        if !node.belongs_to(self) {
            return Err(Error::NotFound);
        }
        match (self.inner.kind.is_cache(), version) {
            (true, None) => Ok(None),
            (false, Some(version)) if version.is_writer() && version.belongs_to(&self.inner) => {
                Ok(Some((version.id(), version.serial())))
            }
            _ => Err(Error::InvalidVersion),
        }
    }
}

/// Returns whether adding `rr_type` at `node` makes it a point where
/// lookups must stop to check for a zone cut: a DNAME anywhere, or an
/// NS away from a zone's origin (anywhere in a stub). Caches find NS
/// cuts without help.
pub(super) fn is_delegating(db: &DbInner, node: &Node, rr_type: Type) -> bool {
    if db.kind.is_cache() {
        rr_type == Type::DNAME
    } else {
        rr_type == Type::DNAME
            || (rr_type == Type::NS && (!db.is_origin(node) || db.kind.is_stub()))
    }
}

////////////////////////////////////////////////////////////////////////
// THE CORE                                                           //
////////////////////////////////////////////////////////////////////////

/// Finds the top header matching `wanted`, returning it and its
/// predecessor in the top list.
fn find_top(
    state: &ShardState,
    slot: usize,
    mut wanted: impl FnMut(TypeKey) -> bool,
) -> (Option<HeaderId>, Option<HeaderId>) {
    let mut prev = None;
    for (id, header) in state.tops(slot) {
        if wanted(header.key) {
            return (prev, Some(id));
        }
        prev = Some(id);
    }
    (prev, None)
}

/// Skips the ignored headers at the top of a chain.
fn first_unignored(state: &ShardState, top: HeaderId) -> Option<HeaderId> {
    let mut current = Some(top);
    while let Some(id) = current {
        if !state.header(id).is_ignored() {
            return Some(id);
        }
        current = state.header(id).down;
    }
    None
}

/// Links `new` in place of the top header `top`, which becomes the
/// first header below it.
fn push_over(
    state: &mut ShardState,
    slot: usize,
    prev: Option<HeaderId>,
    top: HeaderId,
    mut new: Header,
) -> HeaderId {
    new.next = state.header(top).next;
    new.down = Some(top);
    state.header_mut(top).next = None;
    let id = state.alloc(new);
    match prev {
        Some(prev) => state.header_mut(prev).next = Some(id),
        None => state.node_mut(slot).data = Some(id),
    }
    id
}

/// Adds a header to a node, which the caller has locked exclusively.
///
/// While `loading`, no change is recorded and the replaced header is
/// freed at once, since nothing can be reading it.
#[allow(clippy::too_many_arguments)]
pub(super) fn add(
    db: &DbInner,
    state: &mut ShardState,
    node: &Arc<Node>,
    target: Target,
    mut new: Header,
    options: AddOptions,
    loading: bool,
    now: u32,
) -> Result<Written, Error> {
    let slot = node.slot;
    let mut merge = options.contains(AddOptions::MERGE);
    let trust = if options.contains(AddOptions::FORCE) {
        Trust::Ultimate
    } else {
        new.trust
    };

    // Every node a version touches is recorded, even if nothing ends
    // up changing.
    let change = match target {
        Some((id, _)) if !loading => Some(db.state.lock().versions.record_change(id, node)?),
        _ => None,
    };

    let new_nx = !new.exists();
    let mut superseded = None;
    if target.is_none() && !new_nx {
        if new.key.is_negative() {
            if new.key.covers() == Type::ANY {
                // The name doesn't exist, so nothing else at it does.
                let mut current = state.node(slot).data;
                while let Some(id) = current {
                    let header = state.header_mut(id);
                    header.ttl = 0;
                    header.attributes.insert(Attributes::STALE);
                    current = header.next;
                }
                state.node_mut(slot).dirty = true;
            } else {
                superseded = Some(TypeKey::of(new.key.covers()));
            }
        } else {
            let nxdomain = state
                .tops(slot)
                .find(|(_, header)| header.attributes.contains(Attributes::NXDOMAIN))
                .map(|(id, _)| id);
            if let Some(id) = nxdomain {
                let header = state.header(id);
                if header.exists() && header.ttl > now {
                    if trust < header.trust {
                        return Ok(Written {
                            outcome: WriteOutcome::Unchanged,
                            rdataset: Some(header.bind(now)),
                        });
                    }
                    let header = state.header_mut(id);
                    header.ttl = 0;
                    header.attributes.insert(Attributes::STALE);
                    state.node_mut(slot).dirty = true;
                }
            }
            superseded = Some(TypeKey::negative(new.key.base()));
        }
    }

    let key = new.key;
    let (prev, top) = find_top(state, slot, |k| k == key || Some(k) == superseded);
    let current = top.and_then(|top| first_unignored(state, top));

    let new_id = if let (Some(top), Some(current)) = (top, current) {
        let old = state.header(current);
        let old_nx = !old.exists();
        if old_nx && new_nx {
            return Ok(Written::unchanged());
        }

        // Less trusted data doesn't displace live cache data.
        if target.is_none() && trust < old.trust && (old.ttl > now || old_nx) {
            return Ok(Written {
                outcome: WriteOutcome::Unchanged,
                rdataset: old.exists().then(|| old.bind(now)),
            });
        }

        if merge && (old_nx || new_nx) {
            merge = false;
        }
        if merge {
            if options.contains(AddOptions::EXACT_TTL) && new.ttl != old.ttl {
                return Err(Error::NotExact);
            }
            let exact = options.contains(AddOptions::EXACT);
            let force = new.ttl != old.ttl;
            let (Some(old_rdata), Some(new_rdata)) = (old.rdata(), new.rdata()) else {
                return Err(Error::BadDb);
            };
            match old_rdata.merge(key.base(), new_rdata, exact, force) {
                Ok(merged) => new.payload = Payload::Exists(Arc::new(merged)),
                Err(rdataslab::Error::Unchanged) => return Ok(Written::unchanged()),
                Err(err) => return Err(err.into()),
            }
        }

        // Identical NS, A, and AAAA sets in a cache only have their
        // TTLs lowered, so a resolver isn't locked onto old servers by
        // repeated refreshes.
        if db.kind.is_cache() && old.ttl > now && !old_nx && !new_nx && old.trust >= new.trust {
            let same = match (old.rdata(), new.rdata()) {
                (Some(a), Some(b)) if old.key == TypeKey::of(Type::NS) => {
                    a.equal_canonical(Type::NS, b)
                }
                (Some(a), Some(b))
                    if old.key == TypeKey::of(Type::A) || old.key == TypeKey::of(Type::AAAA) =>
                {
                    a.equal(b)
                }
                _ => false,
            };
            if same {
                let old = state.header_mut(current);
                old.ttl = old.ttl.min(new.ttl);
                if old.noqname.is_none() {
                    old.noqname = new.noqname.take();
                }
                return Ok(Written {
                    outcome: WriteOutcome::Added,
                    rdataset: Some(state.header(current).bind(now)),
                });
            }
        }

        if loading {
            new.next = state.header(top).next;
            state.free_down_chain(top);
            let id = state.alloc(new);
            match prev {
                Some(prev) => state.header_mut(prev).next = Some(id),
                None => state.node_mut(slot).data = Some(id),
            }
            id
        } else {
            if db.kind.is_cache() {
                state.header_mut(top).attributes.insert(Attributes::STALE);
            }
            let id = push_over(state, slot, prev, top, new);
            state.node_mut(slot).dirty = true;
            if let (Some((version, _)), Some(change)) = (target, change) {
                db.state.lock().versions.mark_dirty(version, change);
            }
            id
        }
    } else {
        // Deleting what isn't there changes nothing.
        if new_nx {
            return Ok(Written::unchanged());
        }
        match top {
            // Only ignored headers of this type are left.
            Some(top) => {
                let id = push_over(state, slot, prev, top, new);
                state.node_mut(slot).dirty = true;
                if let (Some((version, _)), Some(change)) = (target, change) {
                    db.state.lock().versions.mark_dirty(version, change);
                }
                id
            }
            None => {
                new.next = state.node(slot).data;
                let id = state.alloc(new);
                state.node_mut(slot).data = Some(id);
                id
            }
        }
    };

    if let Some((_, serial)) = target {
        if cname_and_other_data(state, slot, serial) {
            return Ok(Written {
                outcome: WriteOutcome::CnameAndOtherData,
                rdataset: None,
            });
        }
    }
    let rdataset = state.header(new_id).exists().then(|| state.header(new_id).bind(now));
    Ok(Written {
        outcome: WriteOutcome::Added,
        rdataset,
    })
}

/// Returns whether, at `serial`, the node has a CNAME along with data
/// of a type that may not accompany one.
fn cname_and_other_data(state: &ShardState, slot: usize, serial: Serial) -> bool {
    let mut cname = false;
    let mut other = false;
    for (top, header) in state.tops(slot) {
        let visible = state.visible(top, serial).is_some();
        if header.key.base() == Type::CNAME {
            cname |= visible;
        } else if !header.key.effective_type().may_accompany_cname() {
            other |= visible;
        }
    }
    cname && other
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::*;
    use crate::db::FindOptions;
    use crate::rr::RdataSlab;

    const NOW: u32 = 1_000_000;

    fn lookup(db: &Database, owner: &str, rr_type: Type) -> Option<Rdataset> {
        db.find(&name(owner), None, rr_type, FindOptions::empty(), NOW)
            .ok()
            .and_then(|answer| answer.rdataset)
    }

    #[test]
    fn zone_writes_need_a_write_version() {
        let db = zone();
        let node = db.find_node(&name("www.example."), true).unwrap();
        let rdataset = a(300, &[[192, 0, 2, 1]]);
        assert_eq!(
            db.add_rdataset(&node, None, 0, &rdataset, AddOptions::empty()).unwrap_err(),
            Error::InvalidVersion
        );
        let reader = db.current_version();
        assert_eq!(
            db.add_rdataset(&node, Some(&reader), 0, &rdataset, AddOptions::empty())
                .unwrap_err(),
            Error::InvalidVersion
        );
        let other = zone();
        let foreign = other.new_version().unwrap();
        assert_eq!(
            db.add_rdataset(&node, Some(&foreign), 0, &rdataset, AddOptions::empty())
                .unwrap_err(),
            Error::InvalidVersion
        );
    }

    #[test]
    fn caches_take_no_version() {
        let db = cache();
        let node = db.find_node(&name("www.example."), true).unwrap();
        let other = zone();
        let version = other.new_version().unwrap();
        let rdataset = a(300, &[[192, 0, 2, 1]]);
        assert_eq!(
            db.add_rdataset(&node, Some(&version), NOW, &rdataset, AddOptions::empty())
                .unwrap_err(),
            Error::InvalidVersion
        );
        assert_eq!(
            db.add_rdataset(&node, None, NOW, &a(300, &[[192, 0, 2, 1]]), AddOptions::MERGE)
                .unwrap_err(),
            Error::InvalidVersion
        );
    }

    #[test]
    fn adds_replace_unless_merging() {
        let db = zone_with(&[("www.example.", a(300, &[[192, 0, 2, 1]]))]);

        let version = db.new_version().unwrap();
        let written = add_at(&db, Some(&version), "www.example.", &a(300, &[[192, 0, 2, 2]]));
        assert_eq!(written.outcome, WriteOutcome::Added);
        assert_eq!(addresses(&written.rdataset.unwrap()), [[192, 0, 2, 2]]);
        version.commit().unwrap();
        assert_eq!(addresses(&lookup(&db, "www.example.", Type::A).unwrap()), [[192, 0, 2, 2]]);

        let version = db.new_version().unwrap();
        let node = db.find_node(&name("www.example."), false).unwrap();
        let written = db
            .add_rdataset(&node, Some(&version), 0, &a(300, &[[192, 0, 2, 3]]), AddOptions::MERGE)
            .unwrap();
        assert_eq!(addresses(&written.rdataset.unwrap()), [[192, 0, 2, 2], [192, 0, 2, 3]]);

        let written = db
            .add_rdataset(&node, Some(&version), 0, &a(300, &[[192, 0, 2, 3]]), AddOptions::MERGE)
            .unwrap();
        assert_eq!(written.outcome, WriteOutcome::Unchanged);

        assert_eq!(
            db.add_rdataset(
                &node,
                Some(&version),
                0,
                &a(300, &[[192, 0, 2, 3]]),
                AddOptions::MERGE | AddOptions::EXACT
            )
            .unwrap_err(),
            Error::NotExact
        );
        assert_eq!(
            db.add_rdataset(
                &node,
                Some(&version),
                0,
                &a(600, &[[192, 0, 2, 4]]),
                AddOptions::MERGE | AddOptions::EXACT_TTL
            )
            .unwrap_err(),
            Error::NotExact
        );
        drop(node);
        version.commit().unwrap();
    }

    #[test]
    fn rollback_erases_changes() {
        let db = zone_with(&[("www.example.", a(300, &[[192, 0, 2, 1]]))]);
        let version = db.new_version().unwrap();
        add_at(&db, Some(&version), "www.example.", &a(300, &[[192, 0, 2, 9]]));
        add_at(&db, Some(&version), "new.example.", &a(300, &[[192, 0, 2, 10]]));
        version.rollback();

        assert_eq!(addresses(&lookup(&db, "www.example.", Type::A).unwrap()), [[192, 0, 2, 1]]);
        assert!(lookup(&db, "new.example.", Type::A).is_none());

        // A new writer doesn't see the rolled back data either.
        let version = db.new_version().unwrap();
        let node = db.find_node(&name("www.example."), false).unwrap();
        let answer = db
            .find_rdataset(&node, Some(&version), Type::A, Type::from_u16(0), 0)
            .unwrap();
        assert_eq!(addresses(&answer.rdataset.unwrap()), [[192, 0, 2, 1]]);
    }

    #[test]
    fn merges_onto_a_new_type() {
        let db = zone();
        let version = db.new_version().unwrap();
        let node = db.find_node(&name("www.example."), true).unwrap();
        for address in [[1, 1, 1, 1], [2, 2, 2, 2]] {
            let written = db
                .add_rdataset(&node, Some(&version), 0, &a(300, &[address]), AddOptions::MERGE)
                .unwrap();
            assert_eq!(written.outcome, WriteOutcome::Added);
        }
        drop(node);
        version.commit().unwrap();
        assert_eq!(
            addresses(&lookup(&db, "www.example.", Type::A).unwrap()),
            [[1, 1, 1, 1], [2, 2, 2, 2]]
        );
    }

    #[test]
    fn rollback_hides_data_from_held_nodes() {
        let db = zone_with(&[("www.example.", a(300, &[[192, 0, 2, 1]]))]);
        let version = db.new_version().unwrap();
        add_at(&db, Some(&version), "www.example.", &a(300, &[[192, 0, 2, 9]]));
        add_at(&db, Some(&version), "new.example.", &a(300, &[[192, 0, 2, 10]]));

        // Readers look at the nodes before the writer gives up.
        let www = db.find_node(&name("www.example."), false).unwrap();
        let new = db.find_node(&name("new.example."), false).unwrap();
        let answer = db
            .find_rdataset(&new, Some(&version), Type::A, Type::from_u16(0), 0)
            .unwrap();
        assert_eq!(addresses(&answer.rdataset.unwrap()), [[192, 0, 2, 10]]);
        version.rollback();

        let zero = Type::from_u16(0);
        let answer = db.find_rdataset(&www, None, Type::A, zero, 0).unwrap();
        assert_eq!(addresses(&answer.rdataset.unwrap()), [[192, 0, 2, 1]]);
        assert_eq!(
            db.find_rdataset(&new, None, Type::A, zero, 0).unwrap_err(),
            Error::NotFound
        );
        assert!(lookup(&db, "new.example.", Type::A).is_none());
    }

    #[test]
    fn writers_see_their_own_changes() {
        let db = zone();
        let version = db.new_version().unwrap();
        add_at(&db, Some(&version), "www.example.", &a(300, &[[192, 0, 2, 1]]));
        let answer = db
            .find(&name("www.example."), Some(&version), Type::A, FindOptions::empty(), 0)
            .unwrap();
        assert!(answer.rdataset.is_some());
        assert!(lookup(&db, "www.example.", Type::A).is_none());
    }

    #[test]
    fn cname_and_other_data_is_reported() {
        let db = zone();
        let version = db.new_version().unwrap();
        add_at(&db, Some(&version), "alias.example.", &names(Type::CNAME, 300, &["www.example."]));
        let written = add_at(&db, Some(&version), "alias.example.", &nsec(300, "www.example."));
        assert_eq!(written.outcome, WriteOutcome::Added);
        let written = add_at(&db, Some(&version), "alias.example.", &sig(Type::CNAME, 300));
        assert_eq!(written.outcome, WriteOutcome::Added);
        let written = add_at(&db, Some(&version), "alias.example.", &a(300, &[[192, 0, 2, 1]]));
        assert_eq!(written.outcome, WriteOutcome::CnameAndOtherData);
    }

    #[test]
    fn other_data_then_cname_is_reported() {
        let db = zone();
        let version = db.new_version().unwrap();
        add_at(&db, Some(&version), "alias.example.", &a(300, &[[192, 0, 2, 1]]));
        let written = add_at(
            &db,
            Some(&version),
            "alias.example.",
            &names(Type::CNAME, 300, &["www.example."]),
        );
        assert_eq!(written.outcome, WriteOutcome::CnameAndOtherData);
    }

    #[test]
    fn concurrent_readers_see_committed_snapshots() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::thread;

        const COMMITS: u8 = 50;
        let db = zone_with(&[("www.example.", a(300, &[[10, 0, 0, 0]]))]);
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let db = db.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let owner = name("www.example.");
                    let mut last = 0;
                    let mut lookups = 0;
                    while !done.load(Ordering::Acquire) || lookups == 0 {
                        let version = db.current_version();
                        let mut seen = Vec::new();
                        for _ in 0..2 {
                            let answer = db
                                .find(&owner, Some(&version), Type::A, FindOptions::empty(), 0)
                                .unwrap();
                            assert_eq!(answer.result, crate::db::FindResult::Success);
                            let found = addresses(&answer.rdataset.unwrap());
                            assert_eq!(found.len(), 1);
                            seen.push(found[0][3]);
                        }
                        assert_eq!(seen[0], seen[1]);
                        assert!(seen[0] >= last);
                        last = seen[0];
                        lookups += 1;
                    }
                    last
                })
            })
            .collect();

        let writer = {
            let db = db.clone();
            thread::spawn(move || {
                for i in 1..=COMMITS {
                    let version = db.new_version().unwrap();
                    add_at(&db, Some(&version), "www.example.", &a(300, &[[10, 0, 0, i]]));
                    version.commit().unwrap();
                }
            })
        };
        writer.join().unwrap();
        done.store(true, Ordering::Release);
        for reader in readers {
            assert!(reader.join().unwrap() <= COMMITS);
        }
        assert_eq!(
            addresses(&lookup(&db, "www.example.", Type::A).unwrap()),
            [[10, 0, 0, COMMITS]]
        );
    }

    #[test]
    fn deleting_twice_changes_nothing() {
        let db = zone_with(&[("www.example.", a(300, &[[192, 0, 2, 1]]))]);
        let version = db.new_version().unwrap();
        let node = db.find_node(&name("www.example."), false).unwrap();
        let zero = Type::from_u16(0);
        assert_eq!(
            db.delete_rdataset(&node, Some(&version), Type::A, zero),
            Ok(WriteOutcome::Added)
        );
        assert_eq!(
            db.delete_rdataset(&node, Some(&version), Type::A, zero),
            Ok(WriteOutcome::Unchanged)
        );
        assert_eq!(
            db.delete_rdataset(&node, Some(&version), Type::MX, zero),
            Ok(WriteOutcome::Unchanged)
        );
        assert_eq!(
            db.delete_rdataset(&node, Some(&version), Type::ANY, zero),
            Err(Error::NotImplemented)
        );
        assert_eq!(
            db.delete_rdataset(&node, Some(&version), Type::RRSIG, zero),
            Err(Error::NotImplemented)
        );
        drop(node);
        version.commit().unwrap();
        let answer = db
            .find(&name("www.example."), None, Type::A, FindOptions::empty(), 0)
            .unwrap();
        assert_eq!(answer.result, crate::db::FindResult::NxDomain);
    }

    #[test]
    fn subtraction() {
        let db = zone_with(&[("www.example.", a(300, &[[192, 0, 2, 1], [192, 0, 2, 2]]))]);
        let version = db.new_version().unwrap();
        let node = db.find_node(&name("www.example."), false).unwrap();
        let first = a(300, &[[192, 0, 2, 1]]);
        let second = a(300, &[[192, 0, 2, 2]]);

        let written = db
            .subtract_rdataset(&node, &version, &first, SubtractOptions::empty())
            .unwrap();
        assert_eq!(written.outcome, WriteOutcome::Added);
        assert_eq!(addresses(&written.rdataset.unwrap()), [[192, 0, 2, 2]]);

        let written = db
            .subtract_rdataset(&node, &version, &first, SubtractOptions::empty())
            .unwrap();
        assert_eq!(written.outcome, WriteOutcome::Unchanged);

        assert_eq!(
            db.subtract_rdataset(
                &node,
                &version,
                &a(300, &[[192, 0, 2, 2], [192, 0, 2, 3]]),
                SubtractOptions::EXACT
            )
            .unwrap_err(),
            Error::NotExact
        );

        let written = db
            .subtract_rdataset(&node, &version, &second, SubtractOptions::EXACT)
            .unwrap();
        assert_eq!(written.outcome, WriteOutcome::Emptied);
        assert!(written.rdataset.is_none());

        assert_eq!(
            db.subtract_rdataset(&node, &version, &second, SubtractOptions::EXACT)
                .unwrap_err(),
            Error::NotExact
        );
        drop(node);
        version.commit().unwrap();
        assert!(lookup(&db, "www.example.", Type::A).is_none());
    }

    #[test]
    fn caches_cannot_subtract() {
        let db = cache();
        let node = db.find_node(&name("www.example."), true).unwrap();
        let other = zone();
        let version = other.new_version().unwrap();
        let rdataset = a(300, &[[192, 0, 2, 1]]);
        assert_eq!(
            db.subtract_rdataset(&node, &version, &rdataset, SubtractOptions::empty())
                .unwrap_err(),
            Error::InvalidVersion
        );
    }

    #[test]
    fn cache_trust_ordering() {
        let db = cache();
        let weak = names(Type::NS, 300, &["ns1.example."]);
        let strong = names(Type::NS, 300, &["ns2.example."]);

        cache_add(&db, "example.", NOW, weak.clone(), Trust::Additional);
        let written = cache_add(&db, "example.", NOW, strong.clone(), Trust::AuthAuthority);
        assert_eq!(written.outcome, WriteOutcome::Added);
        assert_eq!(written.rdataset.unwrap().trust, Trust::AuthAuthority);

        let written = cache_add(&db, "example.", NOW, weak.clone(), Trust::Additional);
        assert_eq!(written.outcome, WriteOutcome::Unchanged);
        let kept = written.rdataset.unwrap();
        assert_eq!(kept.trust, Trust::AuthAuthority);
        assert!(kept.rdata.equal(&strong.rdata));

        // Forced adds win, and expired data is always replaced.
        let node = db.find_node(&name("example."), false).unwrap();
        let written = db.add_rdataset(&node, None, NOW, &weak, AddOptions::FORCE).unwrap();
        assert_eq!(written.outcome, WriteOutcome::Added);
        let glue = strong.clone().with_trust(Trust::Glue);
        let written = db
            .add_rdataset(&node, None, NOW + 1000, &glue, AddOptions::empty())
            .unwrap();
        assert_eq!(written.outcome, WriteOutcome::Added);
    }

    #[test]
    fn identical_cache_data_only_lowers_the_ttl() {
        let db = cache();
        cache_add(&db, "www.example.", NOW, a(600, &[[192, 0, 2, 1]]), Trust::Answer);
        let written = cache_add(
            &db,
            "www.example.",
            NOW + 100,
            a(600, &[[192, 0, 2, 1]]),
            Trust::Answer,
        );
        assert_eq!(written.outcome, WriteOutcome::Added);
        // The original expiry is kept.
        assert_eq!(written.rdataset.unwrap().ttl, 500);

        let written = cache_add(
            &db,
            "www.example.",
            NOW + 100,
            a(60, &[[192, 0, 2, 1]]),
            Trust::Answer,
        );
        assert_eq!(written.rdataset.unwrap().ttl, 60);
    }

    #[test]
    fn nxdomain_entries_displace_everything() {
        let db = cache();
        cache_add(&db, "gone.example.", NOW, a(300, &[[192, 0, 2, 1]]), Trust::Answer);
        cache_add(
            &db,
            "gone.example.",
            NOW,
            Rdataset::negative(Type::ANY, 300, RdataSlab::empty()),
            Trust::AuthAnswer,
        );
        let answer = db
            .find(&name("gone.example."), None, Type::A, FindOptions::empty(), NOW)
            .unwrap();
        assert_eq!(answer.result, crate::db::FindResult::NcacheNxDomain);

        // Less trusted positive data can't override the NXDOMAIN...
        let written = cache_add(
            &db,
            "gone.example.",
            NOW,
            a(300, &[[192, 0, 2, 2]]),
            Trust::Answer,
        );
        assert_eq!(written.outcome, WriteOutcome::Unchanged);
        assert!(written.rdataset.unwrap().nxdomain);

        // ...but more trusted data can.
        let written = cache_add(
            &db,
            "gone.example.",
            NOW,
            a(300, &[[192, 0, 2, 2]]),
            Trust::Secure,
        );
        assert_eq!(written.outcome, WriteOutcome::Added);
        let answer = db
            .find(&name("gone.example."), None, Type::A, FindOptions::empty(), NOW)
            .unwrap();
        assert_eq!(answer.result, crate::db::FindResult::Success);
    }

    #[test]
    fn negative_entries_supersede_their_type() {
        let db = cache();
        cache_add(&db, "www.example.", NOW, a(300, &[[192, 0, 2, 1]]), Trust::Answer);
        cache_add(
            &db,
            "www.example.",
            NOW,
            Rdataset::negative(Type::A, 300, RdataSlab::empty()),
            Trust::AuthAnswer,
        );
        let answer = db
            .find(&name("www.example."), None, Type::A, FindOptions::empty(), NOW)
            .unwrap();
        assert_eq!(answer.result, crate::db::FindResult::NcacheNxRrset);

        cache_add(&db, "www.example.", NOW, a(300, &[[192, 0, 2, 3]]), Trust::Secure);
        let answer = db
            .find(&name("www.example."), None, Type::A, FindOptions::empty(), NOW)
            .unwrap();
        assert_eq!(answer.result, crate::db::FindResult::Success);
    }

    #[test]
    fn cache_deletion() {
        let db = cache();
        cache_add(&db, "www.example.", NOW, a(300, &[[192, 0, 2, 1]]), Trust::Answer);
        let node = db.find_node(&name("www.example."), false).unwrap();
        assert_eq!(
            db.delete_rdataset(&node, None, Type::A, Type::from_u16(0)),
            Ok(WriteOutcome::Added)
        );
        assert!(lookup(&db, "www.example.", Type::A).is_none());
    }

    #[test]
    fn delegations_flag_the_node() {
        let db = zone();
        let version = db.new_version().unwrap();
        add_at(&db, Some(&version), "example.", &names(Type::NS, 300, &["ns.example."]));
        add_at(&db, Some(&version), "sub.example.", &names(Type::NS, 300, &["ns.sub.example."]));
        let origin = db.find_node(&name("example."), false).unwrap();
        let sub = db.find_node(&name("sub.example."), false).unwrap();
        assert!(!origin.node.has_find_callback());
        assert!(sub.node.has_find_callback());
        drop((origin, sub));
        version.commit().unwrap();
    }
}

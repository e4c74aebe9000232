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

//! Record headers and the per-shard arena that holds them.
//!
//! Each node's data is a list of *top* headers, one per type key,
//! linked through `next`. Each top header heads a `down` list of older
//! versions of the same type, newest first. Headers live in the slab of
//! the shard that protects their node, and links are slab indices, so
//! a whole node's data can be freed by walking its lists.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use slab::Slab;

use super::version::Serial;
use crate::rr::{NoQname, RdataSlab, Rdataset, Trust, TypeKey};

/// The index of a header in its shard's arena.
pub type HeaderId = usize;

/// Seeds the round-robin counters of new headers. Advisory only.
static INIT_COUNT: AtomicU32 = AtomicU32::new(0);

////////////////////////////////////////////////////////////////////////
// ATTRIBUTES                                                         //
////////////////////////////////////////////////////////////////////////

/// Lifecycle flags of a header. These may be toggled in place under the
/// shard lock; everything else about a header is fixed at creation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Attributes(u8);

impl Attributes {
    /// Expired from a cache, pending cleanup.
    pub const STALE: Self = Self(0x01);

    /// Superseded within an uncommitted (or rolled back) version.
    pub const IGNORE: Self = Self(0x02);

    /// Exempt from forced expiry under memory pressure.
    pub const RETAIN: Self = Self(0x04);

    /// A negative cache entry recording NXDOMAIN.
    pub const NXDOMAIN: Self = Self(0x08);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

////////////////////////////////////////////////////////////////////////
// HEADERS                                                            //
////////////////////////////////////////////////////////////////////////

/// The records of a header, or the tombstone recording their deletion.
#[derive(Clone, Debug)]
pub enum Payload {
    Exists(Arc<RdataSlab>),
    Tombstone,
}

/// One version of one record set at a node.
#[derive(Debug)]
pub struct Header {
    pub key: TypeKey,
    pub serial: Serial,

    /// Absolute expiry time for caches; the TTL for zones.
    pub ttl: u32,
    pub trust: Trust,
    pub attributes: Attributes,
    pub count: AtomicU32,
    pub payload: Payload,
    pub noqname: Option<Arc<NoQname>>,
    pub next: Option<HeaderId>,
    pub down: Option<HeaderId>,
}

impl Header {
    pub fn new(key: TypeKey, serial: Serial, ttl: u32, trust: Trust, payload: Payload) -> Self {
        Self {
            key,
            serial,
            ttl,
            trust,
            attributes: Attributes::default(),
            count: AtomicU32::new(INIT_COUNT.fetch_add(1, Ordering::Relaxed)),
            payload,
            noqname: None,
            next: None,
            down: None,
        }
    }

    /// Returns whether this header holds records (is not a tombstone).
    pub fn exists(&self) -> bool {
        matches!(self.payload, Payload::Exists(_))
    }

    pub fn is_ignored(&self) -> bool {
        self.attributes.contains(Attributes::IGNORE)
    }

    pub fn is_stale(&self) -> bool {
        self.attributes.contains(Attributes::STALE)
    }

    pub fn rdata(&self) -> Option<&Arc<RdataSlab>> {
        match &self.payload {
            Payload::Exists(rdata) => Some(rdata),
            Payload::Tombstone => None,
        }
    }

    /// Makes the [`Rdataset`] returned to callers for this header,
    /// advancing the round-robin counter.
    pub fn bind(&self, now: u32) -> Rdataset {
        let rdata = match &self.payload {
            Payload::Exists(rdata) => rdata.clone(),
            Payload::Tombstone => Arc::new(RdataSlab::empty()),
        };
        Rdataset {
            rr_type: self.key.base(),
            covers: self.key.covers(),
            ttl: self.ttl.saturating_sub(now),
            trust: self.trust,
            rdata,
            nxdomain: self.attributes.contains(Attributes::NXDOMAIN),
            noqname: self.noqname.clone(),
            count: self.count.fetch_add(1, Ordering::Relaxed),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// SHARD ARENAS                                                       //
////////////////////////////////////////////////////////////////////////

/// The mutable state of a node, kept in its shard's arena.
#[derive(Debug, Default)]
pub struct NodeData {
    /// The first top header.
    pub data: Option<HeaderId>,

    /// Set when the node holds headers that a sweep could reclaim.
    pub dirty: bool,
}

/// Everything protected by one shard lock.
#[derive(Debug, Default)]
pub struct ShardState {
    pub nodes: Slab<NodeData>,
    pub headers: Slab<Header>,
}

impl ShardState {
    pub fn node(&self, slot: usize) -> &NodeData {
        &self.nodes[slot]
    }

    pub fn node_mut(&mut self, slot: usize) -> &mut NodeData {
        &mut self.nodes[slot]
    }

    pub fn header(&self, id: HeaderId) -> &Header {
        &self.headers[id]
    }

    pub fn header_mut(&mut self, id: HeaderId) -> &mut Header {
        &mut self.headers[id]
    }

    /// Returns an iterator over the top headers of a node.
    pub fn tops(&self, slot: usize) -> Tops {
        Tops {
            state: self,
            next: self.nodes[slot].data,
        }
    }

    /// Walks down from a top header to the version visible at
    /// `serial`. Returns [`None`] if no version is visible or the
    /// visible version is a tombstone.
    pub fn visible(&self, top: HeaderId, serial: Serial) -> Option<HeaderId> {
        let mut current = Some(top);
        while let Some(id) = current {
            let header = &self.headers[id];
            if header.serial <= serial && !header.is_ignored() {
                return header.exists().then_some(id);
            }
            current = header.down;
        }
        None
    }

    /// Returns whether the node holds any records visible at `serial`.
    pub fn is_active(&self, slot: usize, serial: Serial) -> bool {
        self.tops(slot)
            .any(|(top, _)| self.visible(top, serial).is_some())
    }

    pub fn alloc(&mut self, header: Header) -> HeaderId {
        self.headers.insert(header)
    }

    /// Frees a header and everything below it.
    pub fn free_down_chain(&mut self, id: HeaderId) {
        let mut current = Some(id);
        while let Some(id) = current {
            current = self.headers.remove(id).down;
        }
    }

    /// Unlinks the top header `id`, whose predecessor in the top list
    /// is `prev`, and returns the header that followed it.
    pub fn unlink_top(
        &mut self,
        slot: usize,
        prev: Option<HeaderId>,
        id: HeaderId,
    ) -> Option<HeaderId> {
        let next = self.headers[id].next;
        match prev {
            Some(prev) => self.headers[prev].next = next,
            None => self.nodes[slot].data = next,
        }
        next
    }

    /// Frees all of a node's headers.
    pub fn free_node_data(&mut self, slot: usize) {
        let mut current = self.nodes[slot].data.take();
        while let Some(id) = current {
            current = self.headers[id].next;
            self.free_down_chain(id);
        }
    }
}

/// An iterator over the top headers of a node.
pub struct Tops<'a> {
    state: &'a ShardState,
    next: Option<HeaderId>,
}

impl<'a> Iterator for Tops<'a> {
    type Item = (HeaderId, &'a Header);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let header = &self.state.headers[id];
        self.next = header.next;
        Some((id, header))
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::Type;

    fn payload() -> Payload {
        let slab = RdataSlab::new(Type::A, [&[192, 0, 2, 1][..]]).unwrap();
        Payload::Exists(Arc::new(slab))
    }

    /// Builds a node whose A chain holds the given (serial, exists,
    /// ignored) versions, newest first.
    fn chain(versions: &[(Serial, bool, bool)]) -> (ShardState, usize, HeaderId) {
        let mut state = ShardState::default();
        let slot = state.nodes.insert(NodeData::default());
        let mut below = None;
        for &(serial, exists, ignored) in versions.iter().rev() {
            let p = if exists { payload() } else { Payload::Tombstone };
            let mut header = Header::new(TypeKey::of(Type::A), serial, 300, Trust::None, p);
            if ignored {
                header.attributes.insert(Attributes::IGNORE);
            }
            header.down = below;
            below = Some(state.alloc(header));
        }
        let top = below.unwrap();
        state.node_mut(slot).data = Some(top);
        (state, slot, top)
    }

    #[test]
    fn visibility_follows_serials() {
        let (state, _, top) = chain(&[(5, true, false), (3, true, false)]);
        assert_eq!(state.visible(top, 5), Some(top));
        let older = state.header(top).down.unwrap();
        assert_eq!(state.visible(top, 4), Some(older));
        assert_eq!(state.visible(top, 2), None);
    }

    #[test]
    fn visibility_skips_ignored_and_stops_at_tombstones() {
        let (state, _, top) = chain(&[(6, true, true), (5, false, false), (3, true, false)]);
        assert_eq!(state.visible(top, 6), None);
        assert_eq!(state.visible(top, 4).map(|id| state.header(id).serial), Some(3));
    }

    #[test]
    fn activity_follows_visibility() {
        let (state, slot, _) = chain(&[(5, false, false), (3, true, false)]);
        assert!(!state.is_active(slot, 10));
        assert!(state.is_active(slot, 4));
        let (state, slot, _) = chain(&[(5, true, false)]);
        assert!(state.is_active(slot, 5));
        assert!(!state.is_active(slot, 4));
    }

    #[test]
    fn freeing_node_data_empties_the_arena() {
        let (mut state, slot, _) = chain(&[(5, true, false), (3, true, false)]);
        state.free_node_data(slot);
        assert!(state.headers.is_empty());
        assert!(state.node(slot).data.is_none());
    }

    #[test]
    fn bind_computes_relative_ttl_and_rotates() {
        let header = Header::new(TypeKey::of(Type::A), 1, 1300, Trust::Answer, payload());
        let first = header.bind(1000);
        let second = header.bind(1000);
        assert_eq!(first.ttl, 300);
        assert_eq!(first.trust, Trust::Answer);
        assert_eq!(second.count, first.count.wrapping_add(1));
    }
}

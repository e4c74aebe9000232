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

//! Lookups in caches.
//!
//! Caches have no versions; what a reader sees is governed by the
//! absolute expiry time of each header. Expired headers are cleaned up
//! opportunistically as lookups pass them.

use std::sync::Arc;

use super::{bind_pair, reference, Answer, FindOptions, FindResult, ZoneCut};
use crate::db::header::{Attributes, Header};
use crate::db::lock::ShardGuard;
use crate::db::tree::{Chain, Descend, Lookup, NameTree, Node};
use crate::db::{DbInner, Error};
use crate::name::Name;
use crate::rr::{Trust, Type, TypeKey};

const NS: TypeKey = TypeKey::of(Type::NS);
const CNAME: TypeKey = TypeKey::of(Type::CNAME);
const DNAME: TypeKey = TypeKey::of(Type::DNAME);
const NSEC: TypeKey = TypeKey::of(Type::NSEC);

pub(super) fn find(
    db: &Arc<DbInner>,
    name: &Name,
    rr_type: Type,
    options: FindOptions,
    now: u32,
) -> Result<Answer, Error> {
    let mut search = CacheSearch::new(db, options, now);
    let tree = db.tree.read();
    search.find(&tree, name, rr_type)
}

pub(super) fn find_zonecut(
    db: &Arc<DbInner>,
    name: &Name,
    options: FindOptions,
    now: u32,
) -> Result<Answer, Error> {
    let search = CacheSearch::new(db, options, now);
    let tree = db.tree.read();
    let mut chain = Chain::new();
    let exact_ok = !options.contains(FindOptions::NO_EXACT);
    match tree.find(name, &mut chain, exact_ok, |_| Descend::Continue) {
        Lookup::Exact(node) | Lookup::Partial(node) => {
            let mut answer = search.find_deepest_zonecut(&chain, &node)?;
            answer.result = FindResult::Success;
            Ok(answer)
        }
        Lookup::NotFound => Err(Error::NotFound),
    }
}

pub(super) fn find_rdataset(
    db: &Arc<DbInner>,
    node: &Arc<Node>,
    rr_type: Type,
    covers: Type,
    now: u32,
) -> Result<Answer, Error> {
    let key = TypeKey::new(rr_type, covers);
    let negative_key = TypeKey::negative(rr_type);
    let sig_key = (covers == Type::from_u16(0)).then(|| TypeKey::signature_of(rr_type));

    // The caller holds a reference to the node, so expired headers are
    // only marked here.
    let mut guard = db.locks.content_upgradable(node);
    expire_headers(&mut guard, node, now.saturating_sub(db.config.virtual_time));

    let mut found = None;
    let mut foundsig = None;
    for (id, header) in guard.tops(node.slot) {
        if !is_live(header, now) {
            continue;
        }
        if header.key == key || header.key == TypeKey::NCACHE_ANY || header.key == negative_key {
            found = Some(id);
        } else if Some(header.key) == sig_key {
            foundsig = Some(id);
        }
    }
    let found = found.ok_or(Error::NotFound)?;
    let result = negative_result(guard.header(found)).unwrap_or(FindResult::Success);
    let (rdataset, sig_rdataset) = bind_pair(&guard, Some(found), foundsig, now);
    let mut answer = Answer::new(result, node.name.clone());
    answer.rdataset = rdataset;
    answer.sig_rdataset = sig_rdataset;
    Ok(answer)
}

/// Returns whether a header is visible to a cache reader at `now`.
fn is_live(header: &Header, now: u32) -> bool {
    header.ttl > now && header.exists() && !header.is_stale()
}

/// Classifies a negative cache entry; [`None`] for positive data.
fn negative_result(header: &Header) -> Option<FindResult> {
    if !header.key.is_negative() {
        None
    } else if header.attributes.contains(Attributes::NXDOMAIN) {
        Some(FindResult::NcacheNxDomain)
    } else {
        Some(FindResult::NcacheNxRrset)
    }
}

/// Deals with the top headers of `node` that expired at or before
/// `limit`. If nothing references the node they are freed; otherwise
/// they are marked stale and the node dirty, to be swept later. The
/// guard is upgraded only if there is something to do, and only if
/// that needs no waiting; otherwise the headers are left for a later
/// lookup or the sweep.
fn expire_headers(guard: &mut ShardGuard, node: &Node, limit: u32) {
    let unreferenced = node.references() == 0;
    let pending = guard
        .tops(node.slot)
        .any(|(_, header)| header.ttl <= limit && (unreferenced || !header.is_stale()));
    if !pending {
        return;
    }

    let state = match guard.try_exclusive() {
        Some(state) => state,
        None => return,
    };
    let unreferenced = node.references() == 0;
    let mut prev = None;
    let mut current = state.node(node.slot).data;
    while let Some(id) = current {
        if state.header(id).ttl > limit {
            prev = Some(id);
            current = state.header(id).next;
        } else if unreferenced {
            current = state.unlink_top(node.slot, prev, id);
            state.free_down_chain(id);
        } else {
            let header = state.header_mut(id);
            header.attributes.insert(Attributes::STALE);
            current = header.next;
            prev = Some(id);
            state.node_mut(node.slot).dirty = true;
        }
    }
}

/// The state of one cache lookup.
struct CacheSearch<'a> {
    db: &'a Arc<DbInner>,
    options: FindOptions,
    now: u32,

    /// Headers that expired before this are reclaimed.
    limit: u32,

    /// A DNAME found on the way down.
    zonecut: Option<ZoneCut>,
}

impl<'a> CacheSearch<'a> {
    fn new(db: &'a Arc<DbInner>, options: FindOptions, now: u32) -> Self {
        Self {
            db,
            options,
            now,
            limit: now.saturating_sub(db.config.virtual_time),
            zonecut: None,
        }
    }

    fn find(&mut self, tree: &NameTree, name: &Name, rr_type: Type) -> Result<Answer, Error> {
        let mut chain = Chain::new();
        let node = match tree.find(name, &mut chain, true, |node| self.zonecut_callback(node)) {
            Lookup::Exact(node) => node,
            Lookup::Partial(node) => return self.partial_match(tree, &chain, &node),
            Lookup::NotFound => return Err(Error::NotFound),
        };

        // RFC 2535 § 2.3.5. RRSIGs aren't stored on their own, so they
        // needn't be checked.
        let cname_ok = rr_type != Type::DNSKEY && rr_type != Type::NSEC;

        let db = self.db;
        let mut guard = db.locks.content_upgradable(&node);
        expire_headers(&mut guard, &node, self.limit);

        let type_key = TypeKey::of(rr_type);
        let negative_key = TypeKey::negative(rr_type);
        let mut sig_key = TypeKey::signature_of(rr_type);
        let mut found = None;
        let mut foundsig = None;
        let mut ns = None;
        let mut ns_sig = None;
        let mut cname_sig = None;
        let mut empty_node = true;
        for (id, header) in guard.tops(node.slot) {
            if !is_live(header, self.now) {
                continue;
            }
            empty_node = false;
            let key = header.key;
            if key == type_key
                || (rr_type == Type::ANY && !key.is_negative())
                || (cname_ok && key == CNAME)
            {
                found = Some(id);
                if cname_ok && key == CNAME {
                    match cname_sig {
                        Some(sig) => foundsig = Some(sig),
                        None => sig_key = TypeKey::SIG_CNAME,
                    }
                }
            } else if key == sig_key {
                foundsig = Some(id);
            } else if key == TypeKey::NCACHE_ANY || key == negative_key {
                found = Some(id);
            } else if key == NS {
                // Kept in case this node turns out to be the deepest
                // zone cut.
                ns = Some(id);
            } else if key == TypeKey::SIG_NS {
                ns_sig = Some(id);
            } else if cname_ok && key == TypeKey::SIG_CNAME {
                cname_sig = Some(id);
            }
        }

        if empty_node {
            drop(guard);
            return self.find_deepest_zonecut(&chain, &node);
        }

        let found = match found.filter(|&id| self.trusted(guard.header(id).trust)) {
            Some(found) => found,
            None => {
                if ns.is_some() {
                    let mut answer = Answer::new(FindResult::Delegation, node.name.clone());
                    answer.node = Some(reference(db, guard.shard(), &node));
                    let (rdataset, sig_rdataset) = bind_pair(&guard, ns, ns_sig, self.now);
                    answer.rdataset = rdataset;
                    answer.sig_rdataset = sig_rdataset;
                    return Ok(answer);
                }
                drop(guard);
                return self.find_deepest_zonecut(&chain, &node);
            }
        };

        let header = guard.header(found);
        let negative = negative_result(header);
        let result = match negative {
            Some(result) => result,
            None if rr_type != Type::ANY && header.key != type_key && header.key == CNAME => {
                FindResult::Cname
            }
            None => FindResult::Success,
        };

        let mut answer = Answer::new(result, node.name.clone());
        answer.node = Some(reference(db, guard.shard(), &node));
        if rr_type != Type::ANY || negative.is_some() {
            let (rdataset, sig_rdataset) = bind_pair(&guard, Some(found), foundsig, self.now);
            answer.rdataset = rdataset;
            answer.sig_rdataset = sig_rdataset;
        }
        Ok(answer)
    }

    /// Returns whether data of the given trust may be returned under
    /// the search options.
    fn trusted(&self, trust: Trust) -> bool {
        match trust {
            Trust::Glue => self.options.contains(FindOptions::GLUE_OK),
            Trust::Pending => self.options.contains(FindOptions::PENDING_OK),
            Trust::Additional => self.options.contains(FindOptions::ADDITIONAL_OK),
            _ => true,
        }
    }

    /// Caches only stop the descent at DNAMEs; NS cuts are found on the
    /// way back up by [`Self::find_deepest_zonecut`].
    fn zonecut_callback(&mut self, node: &Arc<Node>) -> Descend {
        let db = self.db;
        let mut guard = db.locks.content_upgradable(node);
        expire_headers(&mut guard, node, self.limit);

        let mut dname = None;
        let mut dname_sig = None;
        for (id, header) in guard.tops(node.slot) {
            if !is_live(header, self.now) {
                continue;
            }
            if header.key == DNAME {
                dname = Some(id);
            } else if header.key == TypeKey::SIG_DNAME {
                dname_sig = Some(id);
            }
        }

        let usable = dname.map_or(false, |id| {
            guard.header(id).trust != Trust::Pending
                || self.options.contains(FindOptions::PENDING_OK)
        });
        if !usable {
            return Descend::Continue;
        }
        let (rdataset, sig_rdataset) = bind_pair(&guard, dname, dname_sig, self.now);
        if let Some(rdataset) = rdataset {
            self.zonecut = Some(ZoneCut {
                node: reference(db, guard.shard(), node),
                rdataset,
                sig_rdataset,
                is_dname: true,
            });
        }
        Descend::Stop
    }

    fn partial_match(
        &mut self,
        tree: &NameTree,
        chain: &Chain,
        node: &Arc<Node>,
    ) -> Result<Answer, Error> {
        if self.options.contains(FindOptions::COVERING_NSEC) {
            if let Some(answer) = self.find_covering_nsec(tree, chain) {
                return Ok(answer);
            }
        }
        match self.zonecut.take() {
            Some(cut) => Ok(cut.into_delegation()),
            None => self.find_deepest_zonecut(chain, node),
        }
    }

    /// Walks up from `node` through the chain's levels to the deepest
    /// node with live NS records.
    fn find_deepest_zonecut(&self, chain: &Chain, node: &Arc<Node>) -> Result<Answer, Error> {
        let levels = std::iter::once(node).chain(chain.levels.iter().rev());
        for level in levels {
            let mut guard = self.db.locks.content_upgradable(level);
            expire_headers(&mut guard, level, self.limit);
            let mut ns = None;
            let mut ns_sig = None;
            for (id, header) in guard.tops(level.slot) {
                if !is_live(header, self.now) {
                    continue;
                }
                if header.key == NS {
                    ns = Some(id);
                } else if header.key == TypeKey::SIG_NS {
                    ns_sig = Some(id);
                }
            }
            if ns.is_some() {
                let mut answer = Answer::new(FindResult::Delegation, level.name.clone());
                answer.node = Some(reference(self.db, guard.shard(), level));
                let (rdataset, sig_rdataset) = bind_pair(&guard, ns, ns_sig, self.now);
                answer.rdataset = rdataset;
                answer.sig_rdataset = sig_rdataset;
                return Ok(answer);
            }
        }
        Err(Error::NotFound)
    }

    /// Walks backward from the chain's position past empty nodes to the
    /// first node with data. If that node has an NSEC record, it
    /// covers the query name.
    fn find_covering_nsec(&self, tree: &NameTree, chain: &Chain) -> Option<Answer> {
        let mut current = chain.current(tree);
        while let Some(node) = current {
            let mut guard = self.db.locks.content_upgradable(node);
            expire_headers(&mut guard, node, self.limit);
            let mut found = None;
            let mut foundsig = None;
            let mut empty_node = true;
            for (id, header) in guard.tops(node.slot) {
                if !is_live(header, self.now) || header.attributes.contains(Attributes::NXDOMAIN) {
                    continue;
                }
                empty_node = false;
                if header.key == NSEC {
                    found = Some(id);
                } else if header.key == TypeKey::SIG_NSEC {
                    foundsig = Some(id);
                }
            }
            if found.is_some() {
                let mut answer = Answer::new(FindResult::CoveringNsec, node.name.clone());
                answer.node = Some(reference(self.db, guard.shard(), node));
                let (rdataset, sig_rdataset) = bind_pair(&guard, found, foundsig, self.now);
                answer.rdataset = rdataset;
                answer.sig_rdataset = sig_rdataset;
                return Some(answer);
            } else if !empty_node {
                return None;
            }
            drop(guard);
            current = tree.prev(&node.name);
        }
        None
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

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

//! Lookups in zones.
//!
//! This is essentially the algorithm of [RFC 1034 § 4.3.2] with the
//! DNSSEC additions of [RFC 4035 § 3.1.3]: the topmost zone cut above
//! the name wins, wildcards are synthesized unless a closer name
//! exists, and in a signed zone every negative answer comes with the
//! NSEC record that proves it.
//!
//! [RFC 1034 § 4.3.2]: https://datatracker.ietf.org/doc/html/rfc1034#section-4.3.2
//! [RFC 4035 § 3.1.3]: https://datatracker.ietf.org/doc/html/rfc4035#section-3.1.3

use std::sync::Arc;

use log::error;

use super::{bind_pair, reference, Answer, FindOptions, FindResult, ZoneCut};
use crate::db::tree::{Chain, Descend, Lookup, NameTree, Node};
use crate::db::version::Serial;
use crate::db::{DbInner, Error};
use crate::name::Name;
use crate::rr::{Type, TypeKey};

const NS: TypeKey = TypeKey::of(Type::NS);
const CNAME: TypeKey = TypeKey::of(Type::CNAME);
const DNAME: TypeKey = TypeKey::of(Type::DNAME);
const NSEC: TypeKey = TypeKey::of(Type::NSEC);

pub(super) fn find(
    db: &Arc<DbInner>,
    name: &Name,
    serial: Serial,
    rr_type: Type,
    options: FindOptions,
) -> Result<Answer, Error> {
    let mut search = ZoneSearch {
        db,
        serial,
        options,
        secure: db.state.lock().secure,
        wild: false,
        zonecut: None,
    };
    let tree = db.tree.read();
    search.find(&tree, name, rr_type)
}

/// Implements [`Database::find_rdataset`](crate::db::Database::find_rdataset)
/// for zones.
pub(super) fn find_rdataset(
    db: &Arc<DbInner>,
    node: &Arc<Node>,
    serial: Serial,
    rr_type: Type,
    covers: Type,
) -> Result<Answer, Error> {
    let key = TypeKey::new(rr_type, covers);
    let sig_key = (covers == Type::from_u16(0)).then(|| TypeKey::signature_of(rr_type));
    let guard = db.locks.content(node);
    let mut found = None;
    let mut foundsig = None;
    for (top, header) in guard.tops(node.slot) {
        if header.key == key {
            found = guard.visible(top, serial);
        } else if Some(header.key) == sig_key {
            foundsig = guard.visible(top, serial);
        }
    }
    if found.is_none() {
        return Err(Error::NotFound);
    }
    let (rdataset, sig_rdataset) = bind_pair(&guard, found, foundsig, 0);
    let mut answer = Answer::new(FindResult::Success, node.name.clone());
    answer.rdataset = rdataset;
    answer.sig_rdataset = sig_rdataset;
    Ok(answer)
}

/// The state of one zone lookup.
struct ZoneSearch<'a> {
    db: &'a Arc<DbInner>,
    serial: Serial,
    options: FindOptions,
    secure: bool,

    /// Set when an ancestor passed on the way down is a wildcard
    /// parent and no zone cut was found above it.
    wild: bool,

    /// The topmost zone cut found, if any.
    zonecut: Option<ZoneCut>,
}

impl ZoneSearch<'_> {
    fn find(&mut self, tree: &NameTree, name: &Name, rr_type: Type) -> Result<Answer, Error> {
        let mut chain = Chain::new();
        let lookup = tree.find(name, &mut chain, true, |node| self.zonecut_callback(node));
        match lookup {
            Lookup::Exact(node) => self.found(tree, &chain, &node, name, rr_type, false),
            Lookup::Partial(node) => self.partial_match(tree, &chain, &node, name, rr_type),
            Lookup::NotFound => Err(Error::NotFound),
        }
    }

    /// Checks a flagged node passed on the way down for NS or DNAME
    /// records. Only the topmost cut matters, so the descent stops
    /// there unless glue is wanted.
    fn zonecut_callback(&mut self, node: &Arc<Node>) -> Descend {
        if self.zonecut.is_some() {
            return Descend::Continue;
        }

        let db = self.db;
        let guard = db.locks.content(node);
        let mut ns = None;
        let mut dname = None;
        let mut dname_sig = None;
        for (top, header) in guard.tops(node.slot) {
            if header.key == NS {
                // An NS set at the origin is the zone's own, not a cut,
                // except in a stub zone.
                if !db.is_origin(node) || db.kind.is_stub() {
                    ns = guard.visible(top, self.serial);
                }
            } else if header.key == DNAME {
                dname = guard.visible(top, self.serial);
            } else if header.key == TypeKey::SIG_DNAME {
                dname_sig = guard.visible(top, self.serial);
            }
        }

        let (found, sig, is_dname) = match (dname, ns) {
            (Some(dname), _) => (dname, dname_sig, true),
            (None, Some(ns)) => (ns, None, false),
            (None, None) => {
                if node.is_wild() && !self.options.contains(FindOptions::NO_WILD) {
                    self.wild = true;
                }
                return Descend::Continue;
            }
        };
        let (rdataset, sig_rdataset) = bind_pair(&guard, Some(found), sig, 0);
        if let Some(rdataset) = rdataset {
            self.zonecut = Some(ZoneCut {
                node: reference(db, guard.shard(), node),
                rdataset,
                sig_rdataset,
                is_dname,
            });
        }
        // A wildcard above the cut belongs to the parent zone.
        self.wild = false;
        if self.options.contains(FindOptions::GLUE_OK) {
            Descend::Continue
        } else {
            Descend::Stop
        }
    }

    /// Handles a name that is not in the tree (or has no data), which
    /// is `node` or below it.
    fn partial_match(
        &mut self,
        tree: &NameTree,
        chain: &Chain,
        node: &Arc<Node>,
        name: &Name,
        rr_type: Type,
    ) -> Result<Answer, Error> {
        if let Some(cut) = self.zonecut.take() {
            return Ok(cut.into_delegation());
        }

        if self.wild {
            if let Some(wild_node) = self.find_wildcard(tree, chain, node, name)? {
                return self.found(tree, chain, &wild_node, name, rr_type, true);
            }
        }

        let result = if self.active_empty(tree, chain.cursor.as_ref(), name) {
            FindResult::EmptyName
        } else {
            FindResult::NxDomain
        };
        if self.secure || self.options.contains(FindOptions::FORCE_NSEC) {
            let mut answer = self.find_closest_nsec(tree, chain)?;
            answer.result = result;
            Ok(answer)
        } else {
            Ok(Answer::new(result, node.name.clone()))
        }
    }

    /// Handles an exact match for the query name, or a wildcard that
    /// matched it.
    fn found(
        &mut self,
        tree: &NameTree,
        chain: &Chain,
        node: &Arc<Node>,
        name: &Name,
        rr_type: Type,
        wild: bool,
    ) -> Result<Answer, Error> {
        let db = self.db;
        let mut cname_ok = true;
        let mut maybe_zonecut = false;
        if self.zonecut.is_some() {
            // CNAMEs aren't legitimate glue.
            cname_ok = false;
        } else if node.has_find_callback()
            && (!db.is_origin(node) || db.kind.is_stub())
            && rr_type != Type::DS
        {
            maybe_zonecut = true;
        }
        // RFC 2535 § 2.3.5.
        if rr_type == Type::DNSKEY || rr_type == Type::NSEC {
            cname_ok = false;
        }

        let guard = db.locks.content(node);
        let type_key = TypeKey::of(rr_type);
        let mut sig_key = TypeKey::signature_of(rr_type);
        let mut found = None;
        let mut foundsig = None;
        let mut nsec = None;
        let mut nsec_sig = None;
        let mut cname_sig = None;
        let mut empty_node = true;
        for (top, _) in guard.tops(node.slot) {
            let id = match guard.visible(top, self.serial) {
                Some(id) => id,
                None => continue,
            };
            let key = guard.header(id).key;
            empty_node = false;

            if maybe_zonecut && key == NS {
                self.zonecut = Some(ZoneCut {
                    node: reference(db, guard.shard(), node),
                    rdataset: guard.header(id).bind(0),
                    sig_rdataset: None,
                    is_dname: false,
                });
                maybe_zonecut = false;
                if !self.options.contains(FindOptions::GLUE_OK)
                    && rr_type != Type::NSEC
                    && rr_type != Type::DNSKEY
                {
                    // Anything else would be glue; return the
                    // delegation.
                    found = None;
                    break;
                }
                if found.is_some() && foundsig.is_some() {
                    break;
                }
            }

            if key == type_key || rr_type == Type::ANY || (key == CNAME && cname_ok) {
                found = Some(id);
                if key == CNAME && cname_ok {
                    match cname_sig {
                        Some(sig) => foundsig = Some(sig),
                        None => sig_key = TypeKey::SIG_CNAME,
                    }
                }
                if !maybe_zonecut && foundsig.is_some() {
                    break;
                }
            } else if key == sig_key {
                foundsig = Some(id);
                if !maybe_zonecut && found.is_some() {
                    break;
                }
            } else if key == NSEC {
                nsec = Some(id);
            } else if key == TypeKey::SIG_NSEC {
                nsec_sig = Some(id);
            } else if cname_ok && key == TypeKey::SIG_CNAME {
                cname_sig = Some(id);
            }
        }

        // A node with no data in this version doesn't exist in it.
        if empty_node && !wild {
            drop(guard);
            return self.partial_match(tree, chain, node, name, rr_type);
        }

        let found = match found {
            Some(found) => found,
            None => {
                if let Some(cut) = self.zonecut.take() {
                    // No glue below the cut.
                    drop(guard);
                    return Ok(cut.into_delegation());
                }
                let force_nsec = self.options.contains(FindOptions::FORCE_NSEC);
                if self.secure && (nsec.is_none() || nsec_sig.is_none()) {
                    if !wild {
                        error!(
                            "zone {} is secure, but {} has no signed NSEC record",
                            db.origin, node.name
                        );
                        return Err(Error::BadDb);
                    }
                    drop(guard);
                    let mut answer = self.find_closest_nsec(tree, chain)?;
                    answer.result = FindResult::EmptyWild;
                    return Ok(answer);
                }
                if force_nsec && nsec.is_none() {
                    error!(
                        "zone {}: NSEC proof requested, but {} has no NSEC record",
                        db.origin, node.name
                    );
                    return Err(Error::BadDb);
                }
                let mut answer = Answer::new(FindResult::NxRrset, name.clone());
                answer.node = Some(reference(db, guard.shard(), node));
                if self.secure || force_nsec {
                    let (rdataset, sig_rdataset) = bind_pair(&guard, nsec, nsec_sig, 0);
                    answer.rdataset = rdataset;
                    answer.sig_rdataset = sig_rdataset;
                }
                answer.wildcard = wild;
                return Ok(answer);
            }
        };

        let found_key = guard.header(found).key;
        let at_cut = self
            .zonecut
            .as_ref()
            .map(|cut| Arc::ptr_eq(&cut.node.node, node));
        let result = if rr_type != Type::ANY && found_key != type_key && found_key == CNAME {
            FindResult::Cname
        } else if let Some(at_cut) = at_cut {
            let result = if !at_cut {
                FindResult::Glue
            } else if rr_type == Type::NSEC || rr_type == Type::DNSKEY {
                FindResult::Success
            } else if rr_type == Type::ANY {
                FindResult::ZoneCut
            } else {
                FindResult::Glue
            };
            // Data occluded by a delegation that was added later isn't
            // really glue. Callers who care ask us to check.
            if result == FindResult::Glue
                && self.options.contains(FindOptions::VALIDATE_GLUE)
                && !self.valid_glue(name, rr_type, node)
            {
                drop(guard);
                return self.zonecut.take().map(ZoneCut::into_delegation).ok_or_else(|| {
                    error!("zone {}: glue for {} lies below no zone cut", db.origin, name);
                    Error::BadDb
                });
            }
            result
        } else {
            FindResult::Success
        };

        let mut answer = Answer::new(result, name.clone());
        answer.node = Some(reference(db, guard.shard(), node));
        if rr_type != Type::ANY {
            let (rdataset, sig_rdataset) = bind_pair(&guard, Some(found), foundsig, 0);
            answer.rdataset = rdataset;
            answer.sig_rdataset = sig_rdataset;
        }
        answer.wildcard = wild;
        Ok(answer)
    }

    /// Looks for a wildcard matching `name`, starting at `node` (its
    /// closest ancestor in the tree) and working up the levels of the
    /// chain. The search ends at the first ancestor with data, since
    /// any wildcard above it is occluded.
    fn find_wildcard(
        &self,
        tree: &NameTree,
        chain: &Chain,
        node: &Arc<Node>,
        name: &Name,
    ) -> Result<Option<Arc<Node>>, Error> {
        let levels = std::iter::once(node).chain(chain.levels.iter().rev());
        for level in levels {
            let active = self.is_active(level);
            if level.is_wild() {
                let wname = level.name.wildcard()?;
                if let Some(wild_node) = tree.get(&wname) {
                    if self.is_active(wild_node) || self.active_empty(tree, Some(&wname), &wname) {
                        if self.active_empty_node(tree, chain, name, &wname) {
                            return Ok(None);
                        }
                        return Ok(Some(wild_node.clone()));
                    }
                }
            }
            if active {
                break;
            }
        }
        Ok(None)
    }

    /// Returns whether `node` has data visible in this version.
    fn is_active(&self, node: &Node) -> bool {
        self.db
            .locks
            .content(node)
            .is_active(node.slot, self.serial)
    }

    /// Returns whether the first active node after `start` (or after
    /// the beginning, if [`None`]) is at or below `name`, which makes
    /// `name` an empty non-terminal.
    fn active_empty(&self, tree: &NameTree, start: Option<&Name>, name: &Name) -> bool {
        let mut next = match start {
            Some(start) => tree.next(start),
            None => tree.first(),
        };
        while let Some(node) = next {
            if self.is_active(node) {
                return node.name.eq_or_subdomain_of(name);
            }
            next = tree.next(&node.name);
        }
        false
    }

    /// Returns whether `name` is at or below an empty non-terminal
    /// that lies between it and the wildcard `wname`'s parent. Such a
    /// name exists, so the wildcard does not apply to it.
    fn active_empty_node(&self, tree: &NameTree, chain: &Chain, name: &Name, wname: &Name) -> bool {
        let mut prev = None;
        let mut cursor = chain.current(tree);
        while let Some(node) = cursor {
            if self.is_active(node) {
                prev = Some(node.name.clone());
                break;
            }
            cursor = tree.prev(&node.name);
        }

        let mut next = None;
        let mut cursor = match &chain.cursor {
            Some(current) => tree.next(current),
            None => tree.first(),
        };
        while let Some(node) = cursor {
            if self.is_active(node) {
                next = Some(node.name.clone());
                break;
            }
            cursor = tree.next(&node.name);
        }

        let terminal = match wname.parent() {
            Some(terminal) => terminal,
            None => return false,
        };
        let below = |candidate: &Option<Name>, rname: &Name| {
            candidate
                .as_ref()
                .map_or(false, |candidate| candidate.eq_or_subdomain_of(rname))
        };
        let mut rname = name.clone();
        loop {
            if below(&prev, &rname) || below(&next, &rname) {
                return true;
            }
            rname = match rname.parent() {
                Some(parent) => parent,
                None => return false,
            };
            if rname == terminal {
                return false;
            }
        }
    }

    /// Walks backward from the chain's position to the closest node
    /// with an NSEC record, which proves the nonexistence of the name.
    fn find_closest_nsec(&self, tree: &NameTree, chain: &Chain) -> Result<Answer, Error> {
        let need_sig = self.secure;
        let mut current = chain.current(tree).cloned();
        while let Some(node) = current {
            let guard = self.db.locks.content(&node);
            let mut found = None;
            let mut foundsig = None;
            let mut empty_node = true;
            for (top, _) in guard.tops(node.slot) {
                if let Some(id) = guard.visible(top, self.serial) {
                    empty_node = false;
                    let key = guard.header(id).key;
                    if key == NSEC {
                        found = Some(id);
                        if foundsig.is_some() {
                            break;
                        }
                    } else if key == TypeKey::SIG_NSEC {
                        foundsig = Some(id);
                        if found.is_some() {
                            break;
                        }
                    }
                }
            }
            if !empty_node {
                if found.is_some() && (foundsig.is_some() || !need_sig) {
                    // This relies on the NSEC records of names occluded
                    // by zone cuts having been removed.
                    let mut answer = Answer::new(FindResult::NxDomain, node.name.clone());
                    answer.node = Some(reference(self.db, guard.shard(), &node));
                    let (rdataset, sig_rdataset) = bind_pair(&guard, found, foundsig, 0);
                    answer.rdataset = rdataset;
                    answer.sig_rdataset = sig_rdataset;
                    return Ok(answer);
                } else if found.is_some() || foundsig.is_some() {
                    error!(
                        "zone {}: {} has an unsigned NSEC record or a stray NSEC signature",
                        self.db.origin, node.name
                    );
                    return Err(Error::BadDb);
                }
            }
            drop(guard);
            current = tree.prev(&node.name).cloned();
        }
        error!("zone {}: no NSEC record precedes the name", self.db.origin);
        Err(Error::BadDb)
    }

    /// Returns whether address records at `name` are glue for the zone
    /// cut found: they must belong to one of its name servers.
    fn valid_glue(&self, name: &Name, rr_type: Type, node: &Arc<Node>) -> bool {
        let cut = match &self.zonecut {
            Some(cut) => cut,
            None => return false,
        };
        if rr_type == Type::NS {
            return Arc::ptr_eq(&cut.node.node, node);
        }
        if rr_type != Type::A && rr_type != Type::AAAA && rr_type != Type::A6 {
            return false;
        }
        cut.rdataset.rdata.iter().any(|rdata| {
            Name::try_from_uncompressed(rdata).map_or(false, |(ns_name, _)| ns_name == *name)
        })
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use crate::db::testing::*;
    use crate::db::{Database, FindOptions, FindResult};
    use crate::rr::Type;

    fn find(db: &Database, qname: &str, rr_type: Type, options: FindOptions) -> crate::db::Answer {
        db.find(&name(qname), None, rr_type, options, 0).unwrap()
    }

    fn delegation_zone() -> Database {
        zone_with(&[
            ("example.", names(Type::NS, 3600, &["ns.example."])),
            ("ns.example.", a(3600, &[[192, 0, 2, 1]])),
            ("sub.example.", names(Type::NS, 3600, &["ns.sub.example."])),
            ("ns.sub.example.", a(3600, &[[192, 0, 2, 53]])),
            ("other.sub.example.", a(3600, &[[192, 0, 2, 99]])),
            ("dn.example.", names(Type::DNAME, 3600, &["example.net."])),
        ])
    }

    #[test]
    fn exact_match_succeeds() {
        let db = zone_with(&[("www.example.", a(3600, &[[192, 0, 2, 1]]))]);
        let answer = find(&db, "www.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::Success);
        assert_eq!(answer.name, name("www.example."));
        assert_eq!(addresses(&answer.rdataset.unwrap()), [[192, 0, 2, 1]]);
        assert!(answer.sig_rdataset.is_none());
        assert_eq!(answer.node.unwrap().name(), &name("www.example."));
    }

    #[test]
    fn signatures_accompany_answers() {
        let db = zone_with(&[
            ("www.example.", a(3600, &[[192, 0, 2, 1]])),
            ("www.example.", sig(Type::A, 3600)),
        ]);
        let answer = find(&db, "www.example.", Type::A, FindOptions::empty());
        let sig = answer.sig_rdataset.unwrap();
        assert_eq!(sig.rr_type, Type::RRSIG);
        assert_eq!(sig.covers, Type::A);
    }

    #[test]
    fn negative_answers() {
        let db = zone_with(&[("www.example.", a(3600, &[[192, 0, 2, 1]]))]);
        let answer = find(&db, "www.example.", Type::MX, FindOptions::empty());
        assert_eq!(answer.result, FindResult::NxRrset);
        assert!(answer.rdataset.is_none());
        assert!(answer.node.is_some());

        let answer = find(&db, "nope.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::NxDomain);
        assert_eq!(answer.name, name("example."));

        assert_eq!(
            db.find(&name("example.org."), None, Type::A, FindOptions::empty(), 0)
                .unwrap_err(),
            crate::db::Error::NotFound
        );
    }

    #[test]
    fn cname_replaces_other_types() {
        let db = zone_with(&[("alias.example.", names(Type::CNAME, 3600, &["www.example."]))]);
        let answer = find(&db, "alias.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::Cname);
        assert_eq!(answer.rdataset.unwrap().rr_type, Type::CNAME);

        let answer = find(&db, "alias.example.", Type::CNAME, FindOptions::empty());
        assert_eq!(answer.result, FindResult::Success);

        // NSEC queries are not subject to CNAME matching.
        let answer = find(&db, "alias.example.", Type::NSEC, FindOptions::empty());
        assert_eq!(answer.result, FindResult::NxRrset);
    }

    #[test]
    fn names_below_a_cut_are_delegated() {
        let db = delegation_zone();
        let answer = find(&db, "www.sub.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::Delegation);
        assert_eq!(answer.name, name("sub.example."));
        assert_eq!(answer.rdataset.unwrap().rr_type, Type::NS);

        // The origin's NS records are not a cut.
        let answer = find(&db, "ns.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::Success);
    }

    #[test]
    fn the_cut_itself_is_delegated() {
        let db = delegation_zone();
        let answer = find(&db, "sub.example.", Type::NS, FindOptions::empty());
        assert_eq!(answer.result, FindResult::Delegation);
        assert_eq!(answer.name, name("sub.example."));

        let answer = find(&db, "sub.example.", Type::ANY, FindOptions::GLUE_OK);
        assert_eq!(answer.result, FindResult::ZoneCut);
        assert!(answer.rdataset.is_none());

        // DS records live on the parent side of the cut.
        let answer = find(&db, "sub.example.", Type::DS, FindOptions::empty());
        assert_eq!(answer.result, FindResult::NxRrset);
    }

    #[test]
    fn glue_requires_permission() {
        let db = delegation_zone();
        let answer = find(&db, "ns.sub.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::Delegation);

        let answer = find(&db, "ns.sub.example.", Type::A, FindOptions::GLUE_OK);
        assert_eq!(answer.result, FindResult::Glue);
        assert_eq!(addresses(&answer.rdataset.unwrap()), [[192, 0, 2, 53]]);

        // Missing glue gives the delegation.
        let answer = find(&db, "ns.sub.example.", Type::AAAA, FindOptions::GLUE_OK);
        assert_eq!(answer.result, FindResult::Delegation);
    }

    #[test]
    fn validated_glue_must_be_a_name_server_address() {
        let db = delegation_zone();
        let options = FindOptions::GLUE_OK | FindOptions::VALIDATE_GLUE;
        let answer = find(&db, "ns.sub.example.", Type::A, options);
        assert_eq!(answer.result, FindResult::Glue);
        let answer = find(&db, "other.sub.example.", Type::A, options);
        assert_eq!(answer.result, FindResult::Delegation);
        assert_eq!(answer.name, name("sub.example."));
    }

    #[test]
    fn dname_redirects() {
        let db = delegation_zone();
        let answer = find(&db, "a.b.dn.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::Dname);
        assert_eq!(answer.name, name("dn.example."));
        assert_eq!(answer.rdataset.unwrap().rr_type, Type::DNAME);
    }

    #[test]
    fn stubs_delegate_at_the_origin() {
        let db = stub();
        let version = db.new_version().unwrap();
        add_at(&db, Some(&version), "example.", &names(Type::NS, 3600, &["ns.example.net."]));
        version.commit().unwrap();
        let answer = find(&db, "www.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::Delegation);
        assert_eq!(answer.name, name("example."));
    }

    #[test]
    fn wildcards_synthesize_answers() {
        let db = zone_with(&[("*.example.", a(3600, &[[192, 0, 2, 42]]))]);
        let answer = find(&db, "anything.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::Success);
        assert!(answer.wildcard);
        assert_eq!(answer.name, name("anything.example."));
        assert_eq!(addresses(&answer.rdataset.unwrap()), [[192, 0, 2, 42]]);

        let answer = find(&db, "anything.example.", Type::MX, FindOptions::empty());
        assert_eq!(answer.result, FindResult::NxRrset);
        assert!(answer.wildcard);

        let answer = find(&db, "anything.example.", Type::A, FindOptions::NO_WILD);
        assert_eq!(answer.result, FindResult::NxDomain);
    }

    #[test]
    fn closer_names_exclude_wildcards() {
        let db = zone_with(&[
            ("*.example.", a(3600, &[[1, 2, 3, 4]])),
            ("deep.sub.example.", a(3600, &[[5, 6, 7, 8]])),
        ]);

        let answer = find(&db, "other.sub.example.", Type::A, FindOptions::empty());
        assert!(matches!(answer.result, FindResult::NxDomain | FindResult::EmptyName));
        assert!(!answer.wildcard);
        assert!(answer.rdataset.is_none());

        let answer = find(&db, "sub.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::EmptyName);

        let answer = find(&db, "elsewhere.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::Success);
        assert!(answer.wildcard);
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let db = zone_with(&[("www.example.", a(3600, &[[192, 0, 2, 1]]))]);
        let reader = db.current_version();

        let version = db.new_version().unwrap();
        add_at(&db, Some(&version), "www.example.", &a(3600, &[[192, 0, 2, 2]]));
        add_at(&db, Some(&version), "new.example.", &a(3600, &[[192, 0, 2, 3]]));
        version.commit().unwrap();

        let old = db
            .find(&name("www.example."), Some(&reader), Type::A, FindOptions::empty(), 0)
            .unwrap();
        assert_eq!(addresses(&old.rdataset.unwrap()), [[192, 0, 2, 1]]);
        let old = db
            .find(&name("new.example."), Some(&reader), Type::A, FindOptions::empty(), 0)
            .unwrap();
        assert_eq!(old.result, FindResult::NxDomain);

        let new = find(&db, "www.example.", Type::A, FindOptions::empty());
        assert_eq!(addresses(&new.rdataset.unwrap()), [[192, 0, 2, 2]]);
        drop(reader);
        let new = find(&db, "www.example.", Type::A, FindOptions::empty());
        assert_eq!(addresses(&new.rdataset.unwrap()), [[192, 0, 2, 2]]);
    }

    fn secure_zone() -> Database {
        let db = zone_with(&[
            ("example.", nsec(3600, "b.example.")),
            ("example.", sig(Type::NSEC, 3600)),
            ("b.example.", a(3600, &[[192, 0, 2, 2]])),
            ("b.example.", nsec(3600, "d.example.")),
            ("b.example.", sig(Type::NSEC, 3600)),
            ("d.example.", a(3600, &[[192, 0, 2, 4]])),
            ("d.example.", nsec(3600, "example.")),
            ("d.example.", sig(Type::NSEC, 3600)),
        ]);
        db.inner.state.lock().secure = true;
        db
    }

    #[test]
    fn secure_zones_prove_nonexistence() {
        let db = secure_zone();
        let answer = find(&db, "c.example.", Type::A, FindOptions::empty());
        assert_eq!(answer.result, FindResult::NxDomain);
        assert_eq!(answer.name, name("b.example."));
        assert_eq!(answer.rdataset.unwrap().rr_type, Type::NSEC);
        assert_eq!(answer.sig_rdataset.unwrap().covers, Type::NSEC);

        let answer = find(&db, "b.example.", Type::MX, FindOptions::empty());
        assert_eq!(answer.result, FindResult::NxRrset);
        assert_eq!(answer.rdataset.unwrap().rr_type, Type::NSEC);
    }

    #[test]
    fn secure_zones_without_proofs_are_bad() {
        let db = secure_zone();
        let version = db.new_version().unwrap();
        add_at(&db, Some(&version), "e.example.", &a(3600, &[[192, 0, 2, 5]]));
        version.commit().unwrap();
        assert_eq!(
            db.find(&name("e.example."), None, Type::MX, FindOptions::empty(), 0)
                .unwrap_err(),
            crate::db::Error::BadDb
        );
    }

    #[test]
    fn forced_nsec_without_a_record_is_bad() {
        let db = zone_with(&[("b.example.", a(3600, &[[192, 0, 2, 2]]))]);
        assert_eq!(
            db.find(&name("b.example."), None, Type::MX, FindOptions::FORCE_NSEC, 0)
                .unwrap_err(),
            crate::db::Error::BadDb
        );
        let answer = find(&db, "b.example.", Type::MX, FindOptions::empty());
        assert_eq!(answer.result, FindResult::NxRrset);
    }

    #[test]
    fn forced_nsec_in_unsigned_zones() {
        let db = zone_with(&[
            ("example.", nsec(3600, "b.example.")),
            ("b.example.", a(3600, &[[192, 0, 2, 2]])),
            ("b.example.", nsec(3600, "example.")),
        ]);
        let answer = find(&db, "c.example.", Type::A, FindOptions::FORCE_NSEC);
        assert_eq!(answer.result, FindResult::NxDomain);
        assert_eq!(answer.name, name("b.example."));
        assert!(answer.sig_rdataset.is_none());
    }

    #[test]
    fn find_rdataset_reads_one_type() {
        let db = zone_with(&[
            ("www.example.", a(3600, &[[192, 0, 2, 1]])),
            ("www.example.", sig(Type::A, 3600)),
        ]);
        let node = db.find_node(&name("www.example."), false).unwrap();
        let zero = Type::from_u16(0);
        let answer = db.find_rdataset(&node, None, Type::A, zero, 0).unwrap();
        assert_eq!(answer.rdataset.unwrap().rr_type, Type::A);
        assert!(answer.sig_rdataset.is_some());
        assert_eq!(
            db.find_rdataset(&node, None, Type::MX, zero, 0).unwrap_err(),
            crate::db::Error::NotFound
        );
        assert_eq!(
            db.find_rdataset(&node, None, Type::ANY, zero, 0).unwrap_err(),
            crate::db::Error::NotImplemented
        );
    }
}

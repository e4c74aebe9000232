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

//! Bulk loading of a database, one record set at a time.

use log::{debug, log_enabled, Level};

use super::header::{Attributes, Header, Payload, ShardState};
use super::version::{Serial, VersionId};
use super::write::{self, AddOptions, WriteOutcome};
use super::{Database, DbInner, Error, LoadState};
use crate::name::Name;
use crate::rr::{Rdataset, Type, TypeKey};
use crate::util;

const DNSKEY: TypeKey = TypeKey::of(Type::DNSKEY);
const NSEC: TypeKey = TypeKey::of(Type::NSEC);

/// DNSKEY flags (RFC 4034 section 2.1 and RFC 2535 section 3.1.2).
const KEY_FLAG_NOKEY: u16 = 0xc000;
const KEY_FLAG_OWNER_MASK: u16 = 0x0300;
const KEY_FLAG_ZONE: u16 = 0x0100;
const KEY_PROTOCOL_DNSSEC: u8 = 3;
const KEY_PROTOCOL_ANY: u8 = 255;

/// An in-progress load, started with [`Database::begin_load`].
///
/// Record sets delivered to [`Loader::load_rdataset`] are merged into
/// the current version without recording changes, since nothing reads
/// a database before it is loaded. The load must be finished with
/// [`Loader::end_load`].
#[derive(Debug)]
pub struct Loader {
    db: Database,
    target: Option<(VersionId, Serial)>,
    now: u32,
    loaded: usize,
}

impl Database {
    /// Starts loading the database. A database can only be loaded
    /// once; a second attempt fails with [`Error::LoadState`].
    pub fn begin_load(&self) -> Result<Loader, Error> {
        let target = {
            let mut state = self.inner.state.lock();
            if state.load != LoadState::Unloaded {
                return Err(Error::LoadState);
            }
            state.load = LoadState::Loading;
            if self.inner.kind.is_cache() {
                None
            } else {
                let current = state.versions.current();
                Some((current, state.versions.serial(current)))
            }
        };
        let now = if target.is_some() { 0 } else { util::now() };
        Ok(Loader {
            db: self.clone(),
            target,
            now,
            loaded: 0,
        })
    }
}

impl Loader {
    /// Adds a record set owned by `name`.
    ///
    /// An SOA may only be loaded at a zone's origin, and an NS may not
    /// be owned by a wildcard. Adding records that are already present
    /// is not an error.
    pub fn load_rdataset(
        &mut self,
        name: &Name,
        rdataset: &Rdataset,
    ) -> Result<WriteOutcome, Error> {
        let db = &self.db.inner;
        let is_cache = db.kind.is_cache();
        if !is_cache && !name.eq_or_subdomain_of(&db.origin) {
            return Err(Error::OutOfZone);
        }
        if rdataset.rr_type == Type::SOA && !is_cache && *name != db.origin {
            return Err(Error::NotZoneTop);
        }

        let mut tree = db.tree.write();
        db.add_empty_wildcards(&mut tree, name);
        if name.is_wildcard() {
            if rdataset.rr_type == Type::NS {
                return Err(Error::InvalidNs);
            }
            db.add_wildcard_magic(&mut tree, name);
        }
        let node = db.get_or_insert(&mut tree, name);

        let serial = self.target.map_or(1, |(_, serial)| serial);
        let mut header = Header::new(
            rdataset.key(),
            serial,
            rdataset.ttl.saturating_add(self.now),
            rdataset.trust,
            Payload::Exists(rdataset.rdata.clone()),
        );
        if is_cache {
            if rdataset.nxdomain {
                header.attributes.insert(Attributes::NXDOMAIN);
            }
            header.noqname = rdataset.noqname.clone();
        }

        let mut guard = db.locks.content_and_refcount(&node);
        let written = write::add(
            db,
            guard.exclusive(),
            &node,
            self.target,
            header,
            AddOptions::MERGE,
            true,
            self.now,
        )?;
        if written.outcome == WriteOutcome::Added
            && write::is_delegating(db, &node, rdataset.rr_type)
        {
            node.set_find_callback();
        }
        self.loaded += 1;
        Ok(written.outcome)
    }

    /// Finishes the load. A zone is marked secure if its origin has a
    /// zone key and a signed NSEC record.
    pub fn end_load(self) -> Result<(), Error> {
        let db = &self.db.inner;
        {
            let mut state = db.state.lock();
            if state.load != LoadState::Loading {
                return Err(Error::LoadState);
            }
            state.load = LoadState::Loaded;
        }
        if let Some((_, serial)) = self.target {
            let secure = is_zone_secure(db, serial);
            db.state.lock().secure = secure;
        }
        if log_enabled!(Level::Debug) {
            debug!(
                "loaded {} {}: {} record sets{}",
                db.kind,
                db.origin,
                self.loaded,
                if db.state.lock().secure { ", secure" } else { "" }
            );
        }
        Ok(())
    }
}

/// Returns whether the origin has, at `serial`, a DNSKEY set with a
/// zone key and an NSEC set with a signature.
fn is_zone_secure(db: &DbInner, serial: Serial) -> bool {
    let Some(origin) = db.origin_node.as_ref() else {
        return false;
    };
    let guard = db.locks.content(origin);
    has_zone_key(&guard, origin.slot, serial) && has_signed_nsec(&guard, origin.slot, serial)
}

fn visible_rdata(state: &ShardState, slot: usize, key: TypeKey, serial: Serial) -> Option<&Header> {
    state
        .tops(slot)
        .filter(|(_, header)| header.key == key)
        .find_map(|(top, _)| state.visible(top, serial))
        .map(|id| state.header(id))
        .filter(|header| header.exists())
}

fn has_zone_key(state: &ShardState, slot: usize, serial: Serial) -> bool {
    visible_rdata(state, slot, DNSKEY, serial)
        .and_then(Header::rdata)
        .map_or(false, |keys| keys.iter().any(is_zone_key))
}

fn has_signed_nsec(state: &ShardState, slot: usize, serial: Serial) -> bool {
    visible_rdata(state, slot, NSEC, serial).is_some()
        && visible_rdata(state, slot, TypeKey::SIG_NSEC, serial).is_some()
}

/// Checks the flags and protocol of a DNSKEY RDATA.
fn is_zone_key(rdata: &[u8]) -> bool {
    if rdata.len() < 4 {
        return false;
    }
    let flags = u16::from_be_bytes([rdata[0], rdata[1]]);
    let protocol = rdata[2];
    flags & KEY_FLAG_NOKEY != KEY_FLAG_NOKEY
        && flags & KEY_FLAG_OWNER_MASK == KEY_FLAG_ZONE
        && (protocol == KEY_PROTOCOL_DNSSEC || protocol == KEY_PROTOCOL_ANY)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::*;
    use crate::db::{FindOptions, FindResult};
    use crate::rr::{RdataSlab, Trust};

    fn dnskey(flags: u16, protocol: u8) -> Rdataset {
        let mut rdata = flags.to_be_bytes().to_vec();
        rdata.extend_from_slice(&[protocol, 8, 1, 2, 3, 4]);
        Rdataset::new(Type::DNSKEY, 3600, RdataSlab::new(Type::DNSKEY, [&rdata[..]]).unwrap())
    }

    fn soa() -> Rdataset {
        let mut rdata = name("ns.example.").wire_repr().to_vec();
        rdata.extend_from_slice(name("hostmaster.example.").wire_repr());
        rdata.extend_from_slice(&[0; 20]);
        Rdataset::new(Type::SOA, 3600, RdataSlab::new(Type::SOA, [&rdata[..]]).unwrap())
    }

    #[test]
    fn loads_only_once() {
        let db = zone();
        let loader = db.begin_load().unwrap();
        assert_eq!(db.begin_load().unwrap_err(), Error::LoadState);
        loader.end_load().unwrap();
        assert_eq!(db.begin_load().unwrap_err(), Error::LoadState);
    }

    #[test]
    fn loaded_data_is_visible_and_merged() {
        let db = zone();
        let mut loader = db.begin_load().unwrap();
        let www = name("www.example.");
        assert_eq!(loader.load_rdataset(&name("example."), &soa()), Ok(WriteOutcome::Added));
        assert_eq!(loader.load_rdataset(&www, &a(300, &[[192, 0, 2, 1]])), Ok(WriteOutcome::Added));
        assert_eq!(loader.load_rdataset(&www, &a(300, &[[192, 0, 2, 2]])), Ok(WriteOutcome::Added));
        assert_eq!(
            loader.load_rdataset(&www, &a(300, &[[192, 0, 2, 2]])),
            Ok(WriteOutcome::Unchanged)
        );
        loader.end_load().unwrap();

        let answer = db.find(&www, None, Type::A, FindOptions::empty(), 0).unwrap();
        assert_eq!(answer.result, FindResult::Success);
        assert_eq!(addresses(&answer.rdataset.unwrap()), [[192, 0, 2, 1], [192, 0, 2, 2]]);
        assert!(!db.is_secure());
    }

    #[test]
    fn soa_only_at_the_origin() {
        let db = zone();
        let mut loader = db.begin_load().unwrap();
        assert_eq!(
            loader.load_rdataset(&name("www.example."), &soa()),
            Err(Error::NotZoneTop)
        );
        assert_eq!(
            loader.load_rdataset(&name("www.example.org."), &a(300, &[[192, 0, 2, 1]])),
            Err(Error::OutOfZone)
        );
    }

    #[test]
    fn no_ns_at_wildcards() {
        let db = zone();
        let mut loader = db.begin_load().unwrap();
        assert_eq!(
            loader.load_rdataset(&name("*.example."), &names(Type::NS, 300, &["ns.example."])),
            Err(Error::InvalidNs)
        );
        loader
            .load_rdataset(&name("*.example."), &a(300, &[[192, 0, 2, 1]]))
            .unwrap();
        loader.end_load().unwrap();
        let answer = db
            .find(&name("anything.example."), None, Type::A, FindOptions::empty(), 0)
            .unwrap();
        assert!(answer.wildcard);
    }

    #[test]
    fn loaded_delegations_are_found() {
        let db = zone();
        let mut loader = db.begin_load().unwrap();
        loader
            .load_rdataset(&name("sub.example."), &names(Type::NS, 300, &["ns.sub.example."]))
            .unwrap();
        loader
            .load_rdataset(&name("ns.sub.example."), &a(300, &[[192, 0, 2, 53]]))
            .unwrap();
        loader.end_load().unwrap();
        let answer = db
            .find(&name("www.sub.example."), None, Type::A, FindOptions::empty(), 0)
            .unwrap();
        assert_eq!(answer.result, FindResult::Delegation);
        assert_eq!(answer.name, name("sub.example."));
    }

    #[test]
    fn signed_zones_are_secure() {
        let db = zone();
        let mut loader = db.begin_load().unwrap();
        let origin = name("example.");
        loader.load_rdataset(&origin, &dnskey(0x0101, 3)).unwrap();
        loader.load_rdataset(&origin, &nsec(3600, "www.example.")).unwrap();
        loader.load_rdataset(&origin, &sig(Type::NSEC, 3600)).unwrap();
        loader.end_load().unwrap();
        assert!(db.is_secure());
    }

    #[test]
    fn unsigned_nsec_is_not_secure() {
        let db = zone();
        let mut loader = db.begin_load().unwrap();
        let origin = name("example.");
        loader.load_rdataset(&origin, &dnskey(0x0101, 3)).unwrap();
        loader.load_rdataset(&origin, &nsec(3600, "www.example.")).unwrap();
        loader.end_load().unwrap();
        assert!(!db.is_secure());
    }

    #[test]
    fn zone_keys() {
        assert!(is_zone_key(&[0x01, 0x00, 3, 8]));
        assert!(is_zone_key(&[0x01, 0x01, 255, 8]));
        assert!(!is_zone_key(&[0x01, 0x00, 2, 8]));
        assert!(!is_zone_key(&[0x00, 0x00, 3, 8]));
        assert!(!is_zone_key(&[0xc1, 0x00, 3, 8]));
        assert!(!is_zone_key(&[0x01, 0x00]));
    }

    #[test]
    fn caches_load_with_expiry_times() {
        let db = cache();
        let mut loader = db.begin_load().unwrap();
        let www = name("www.example.");
        loader
            .load_rdataset(&www, &a(300, &[[192, 0, 2, 1]]).with_trust(Trust::Answer))
            .unwrap();
        loader.end_load().unwrap();
        let answer = db.find(&www, None, Type::A, FindOptions::empty(), 0).unwrap();
        let rdataset = answer.rdataset.unwrap();
        assert!(rdataset.ttl <= 300 && rdataset.ttl > 0);
        assert!(!db.is_secure());
    }
}

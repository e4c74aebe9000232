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

//! Fixtures shared by the database tests.

use lazy_static::lazy_static;

use super::header::Attributes;
use super::{AddOptions, Config, Database, DbKind, NodeHandle, Version, Written};
use crate::class::Class;
use crate::name::Name;
use crate::rr::{RdataSlab, Rdataset, Trust, Type};

lazy_static! {
    pub static ref ORIGIN: Name = "example.".parse().unwrap();
    static ref SIG_RDATA: Vec<u8> = (0..32).collect();
}

/// A shorthand to create a Name, panicking on errors.
pub fn name(text: &str) -> Name {
    text.parse().unwrap()
}

pub fn zone() -> Database {
    Database::create(DbKind::Zone, ORIGIN.clone(), Class::IN, Config::default()).unwrap()
}

pub fn stub() -> Database {
    Database::create(DbKind::Stub, ORIGIN.clone(), Class::IN, Config::default()).unwrap()
}

pub fn cache() -> Database {
    Database::create(DbKind::Cache, Name::root(), Class::IN, Config::default()).unwrap()
}

pub fn rdata_a(addresses: &[[u8; 4]]) -> RdataSlab {
    RdataSlab::new(Type::A, addresses.iter().map(|a| &a[..])).unwrap()
}

pub fn a(ttl: u32, addresses: &[[u8; 4]]) -> Rdataset {
    Rdataset::new(Type::A, ttl, rdata_a(addresses))
}

/// Makes a record set whose RDATAs are uncompressed names, such as NS
/// or CNAME.
pub fn names(rr_type: Type, ttl: u32, targets: &[&str]) -> Rdataset {
    let wire: Vec<Name> = targets.iter().map(|t| name(t)).collect();
    let slab = RdataSlab::new(rr_type, wire.iter().map(|n| n.wire_repr())).unwrap();
    Rdataset::new(rr_type, ttl, slab)
}

/// Makes an RRSIG set covering `covers`, with placeholder RDATA.
pub fn sig(covers: Type, ttl: u32) -> Rdataset {
    let slab = RdataSlab::new(Type::RRSIG, [&SIG_RDATA[..]]).unwrap();
    Rdataset::signature(covers, ttl, slab)
}

/// Makes an NSEC set with placeholder RDATA.
pub fn nsec(ttl: u32, next: &str) -> Rdataset {
    let mut rdata = name(next).wire_repr().to_vec();
    rdata.extend_from_slice(&[0, 1, 0x40]);
    Rdataset::new(Type::NSEC, ttl, RdataSlab::new(Type::NSEC, [&rdata[..]]).unwrap())
}

/// Adds a record set at `owner`, creating the node.
pub fn add_at(
    db: &Database,
    version: Option<&Version>,
    owner: &str,
    rdataset: &Rdataset,
) -> Written {
    let node = db.find_node(&name(owner), true).unwrap();
    db.add_rdataset(&node, version, 0, rdataset, AddOptions::empty())
        .unwrap()
}

/// Adds a cache entry at `owner` as of time `now`.
pub fn cache_add(
    db: &Database,
    owner: &str,
    now: u32,
    rdataset: Rdataset,
    trust: Trust,
) -> Written {
    let node = db.find_node(&name(owner), true).unwrap();
    db.add_rdataset(&node, None, now, &rdataset.with_trust(trust), AddOptions::empty())
        .unwrap()
}

/// Builds a committed zone from (owner, record set) pairs.
pub fn zone_with(records: &[(&str, Rdataset)]) -> Database {
    let db = zone();
    let version = db.new_version().unwrap();
    for (owner, rdataset) in records {
        add_at(&db, Some(&version), owner, rdataset);
    }
    version.commit().unwrap();
    db
}

pub fn addresses(rdataset: &Rdataset) -> Vec<[u8; 4]> {
    rdataset
        .rdata
        .iter()
        .map(|rdata| rdata.try_into().unwrap())
        .collect()
}

/// Returns whether any top header of the node is stale.
pub fn stale_headers(db: &Database, node: &NodeHandle) -> bool {
    let guard = db.inner.locks.content(&node.node);
    let stale = guard
        .tops(node.node.slot)
        .any(|(_, header)| header.attributes.contains(Attributes::STALE));
    stale
}

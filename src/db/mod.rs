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

//! A versioned, concurrent, node-based store of DNS records.
//!
//! A [`Database`] holds either a zone (authoritative data, possibly
//! DNSSEC-signed), a stub zone, or a cache (data learned from other
//! servers, with absolute expiry times and trust levels). Names are
//! kept in a tree in DNSSEC canonical order; each name's node carries
//! a list of record sets, one per type, each with a history of
//! versions.
//!
//! ## Versions
//!
//! Zones are multi-version. Readers attach to the current version with
//! [`Database::current_version`] and see a consistent snapshot no
//! matter what is committed while they run. At most one write version,
//! opened with [`Database::new_version`], exists at a time; its changes
//! become visible only once it is committed with [`Version::commit`],
//! and vanish if it is rolled back. Old record versions are reclaimed
//! once no open version can see them.
//!
//! Caches are single-version: data is visible as soon as it is added
//! and disappears when it expires. Expired data lingers for a short
//! grace period (the *virtual time*) before it is reclaimed.
//!
//! ## Concurrency
//!
//! Three kinds of locks exist, always taken in this order: the tree
//! lock, which guards the shape of the name tree; the node locks, a
//! fixed table of shards each guarding the record data of the nodes
//! hashed to it; and the database lock, which guards version state.
//! Lookups take the tree lock for reading, so they run concurrently
//! with each other and with writes to existing nodes.
//!
//! ## Node handles
//!
//! A [`NodeHandle`] is a counted reference to a node. A node with no
//! handles, no data, and no descendants is removed from the tree, if
//! that can be done without waiting for the tree lock; otherwise the
//! removal waits for a later pass.

mod config;
mod error;
mod header;
mod iter;
mod lifecycle;
mod load;
mod lock;
mod search;
mod tree;
mod version;
mod write;

#[cfg(test)]
mod testing;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, log_enabled, Level};
use parking_lot::{Mutex, RwLock};

pub use config::Config;
pub use error::Error;
pub use iter::{DbIterator, RdatasetIter};
pub use load::Loader;
pub use lock::LockMode;
pub use search::{Answer, FindOptions, FindResult};
pub use version::{Serial, Version};
pub use write::{AddOptions, SubtractOptions, WriteOutcome, Written};

use crate::class::Class;
use crate::name::Name;
use crate::task::TaskQueue;
use crate::util;
use header::{Attributes, NodeData};
use lifecycle::{decrement_reference, new_reference, TreeAccess};
use lock::NodeLockTable;
use tree::{NameTree, Node};
use version::VersionTable;

////////////////////////////////////////////////////////////////////////
// DATABASE KINDS                                                     //
////////////////////////////////////////////////////////////////////////

/// What a [`Database`] holds.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DbKind {
    /// An authoritative zone.
    Zone,

    /// A stub zone: like a zone, but NS records at the origin are
    /// treated as a delegation.
    Stub,

    /// A cache.
    Cache,
}

impl DbKind {
    pub fn is_cache(self) -> bool {
        self == Self::Cache
    }

    pub fn is_stub(self) -> bool {
        self == Self::Stub
    }
}

impl fmt::Display for DbKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Zone => f.write_str("zone"),
            Self::Stub => f.write_str("stub"),
            Self::Cache => f.write_str("cache"),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// SHARED STATE                                                       //
////////////////////////////////////////////////////////////////////////

/// Where a database is in its loading lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

/// The state guarded by the database lock.
#[derive(Debug)]
struct DbState {
    versions: VersionTable,

    /// The number of lock shards not yet retired. The database is
    /// freed when this reaches zero.
    active: usize,
    task: Option<Arc<TaskQueue>>,
    load: LoadState,
    secure: bool,
}

/// The shared core of a database, referenced by [`Database`] handles,
/// [`NodeHandle`]s, and background teardown jobs.
#[derive(Debug)]
struct DbInner {
    kind: DbKind,
    class: Class,
    origin: Name,

    /// The node of the zone's origin, which is never removed. Caches
    /// have none.
    origin_node: Option<Arc<Node>>,
    config: Config,
    tree: Arc<RwLock<NameTree>>,
    locks: NodeLockTable,
    state: Mutex<DbState>,

    /// The number of [`Database`] handles.
    references: AtomicUsize,
    overmem: AtomicBool,

    /// Set once teardown has freed every node.
    freed: AtomicBool,
}

impl DbInner {
    fn is_origin(&self, node: &Node) -> bool {
        self.origin_node
            .as_ref()
            .map_or(false, |origin| std::ptr::eq(Arc::as_ptr(origin), node))
    }

    /// Returns the node for `name`, creating it (but not any ancestors)
    /// if needed. The tree must be locked for writing.
    fn get_or_insert(&self, tree: &mut NameTree, name: &Name) -> Arc<Node> {
        if let Some(node) = tree.get(name) {
            return node.clone();
        }
        let node = Arc::new(new_node(&self.locks, name));
        tree.insert(node.clone());
        node
    }

    /// Creates the parent of the wildcard `name` and flags it, so that
    /// lookups passing through it consider wildcard matches.
    fn add_wildcard_magic(&self, tree: &mut NameTree, name: &Name) {
        if let Some(parent) = name.parent() {
            let node = self.get_or_insert(tree, &parent);
            node.set_wild();
        }
    }

    /// Gives every wildcard ancestor of `name` below the origin its
    /// node and wildcard magic, so that wildcards with no data of
    /// their own still take part in lookups.
    fn add_empty_wildcards(&self, tree: &mut NameTree, name: &Name) {
        let n = name.len();
        for i in (self.origin.len() + 1)..n {
            if let Some(suffix) = name.superdomain(n - i) {
                if suffix.is_wildcard() {
                    self.add_wildcard_magic(tree, &suffix);
                    self.get_or_insert(tree, &suffix);
                }
            }
        }
    }
}

/// Allocates a node's data slot in the shard its name hashes to.
fn new_node(locks: &NodeLockTable, name: &Name) -> Node {
    let lock_index = locks.index_for(name.hash_caseless());
    let slot = locks
        .shard(lock_index)
        .lock()
        .exclusive()
        .nodes
        .insert(NodeData::default());
    Node::new(name.clone(), lock_index, slot)
}

////////////////////////////////////////////////////////////////////////
// DATABASE HANDLES                                                   //
////////////////////////////////////////////////////////////////////////

/// A handle to a database.
///
/// Handles are cheap to clone. When the last handle is dropped, the
/// database is torn down as soon as no [`NodeHandle`] keeps any of its
/// nodes referenced. Open [`Version`]s and iterators hold handles of
/// their own.
pub struct Database {
    inner: Arc<DbInner>,
}

impl Database {
    /// Creates an empty database.
    ///
    /// For a zone or stub, `origin` is the zone's apex, and its node
    /// exists for the lifetime of the database. A cache's origin is
    /// normally the root.
    pub fn create(kind: DbKind, origin: Name, class: Class, config: Config) -> Result<Self, Error> {
        let lock_count = config.lock_count_for(kind)?;
        let locks = NodeLockTable::new(lock_count, config.lock_mode);
        let mut tree = NameTree::new();
        let origin_node = if kind.is_cache() {
            None
        } else {
            let node = Arc::new(new_node(&locks, &origin));
            tree.insert(node.clone());
            Some(node)
        };
        debug!("creating {} database {} with {} node locks", kind, origin, lock_count);
        let inner = DbInner {
            kind,
            class,
            origin,
            origin_node,
            config,
            tree: Arc::new(RwLock::new(tree)),
            locks,
            state: Mutex::new(DbState {
                versions: VersionTable::new(),
                active: lock_count,
                task: None,
                load: LoadState::Unloaded,
                secure: false,
            }),
            references: AtomicUsize::new(1),
            overmem: AtomicBool::new(false),
            freed: AtomicBool::new(false),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    fn inner(&self) -> &DbInner {
        &self.inner
    }

    pub fn kind(&self) -> DbKind {
        self.inner.kind
    }

    pub fn class(&self) -> Class {
        self.inner.class
    }

    pub fn origin(&self) -> &Name {
        &self.inner.origin
    }

    /// Attaches to the current version.
    pub fn current_version(&self) -> Version {
        let (id, serial) = self.inner.state.lock().versions.attach_current();
        Version::new(self.clone(), id, serial, false)
    }

    /// Opens the write version. Only one may be open at a time.
    pub fn new_version(&self) -> Result<Version, Error> {
        let (id, serial) = self.inner.state.lock().versions.begin_write()?;
        Ok(Version::new(self.clone(), id, serial, true))
    }

    /// Resolves the version a read runs at. A zone read without a
    /// version attaches to the current one for its duration; the
    /// returned [`Version`] must outlive every lock the read takes.
    fn read_version(&self, version: Option<&Version>) -> Result<(Serial, Option<Version>), Error> {
        match version {
            Some(_) if self.inner.kind.is_cache() => Err(Error::InvalidVersion),
            Some(version) if !version.belongs_to(self.inner()) => Err(Error::InvalidVersion),
            Some(version) => Ok((version.serial(), None)),
            None if self.inner.kind.is_cache() => Ok((1, None)),
            None => {
                let current = self.current_version();
                Ok((current.serial(), Some(current)))
            }
        }
    }

    /// Finds the node for `name`. If `create` is set, a missing node
    /// is created; otherwise [`Error::NotFound`] is returned for it.
    /// Zones reject names outside their origin.
    pub fn find_node(&self, name: &Name, create: bool) -> Result<NodeHandle, Error> {
        let db = &self.inner;
        if !db.kind.is_cache() && !name.eq_or_subdomain_of(&db.origin) {
            return Err(Error::OutOfZone);
        }

        {
            let tree = db.tree.read();
            if let Some(node) = tree.get(name) {
                let guard = db.locks.content(node);
                new_reference(guard.shard(), node);
                return Ok(NodeHandle::new(db.clone(), node.clone()));
            }
        }
        if !create {
            return Err(Error::NotFound);
        }

        let mut tree = db.tree.write();
        let node = match tree.get(name) {
            Some(node) => node.clone(),
            None => {
                let node = db.get_or_insert(&mut tree, name);
                db.add_empty_wildcards(&mut tree, name);
                if name.is_wildcard() {
                    db.add_wildcard_magic(&mut tree, name);
                }
                node
            }
        };
        let guard = db.locks.content(&node);
        new_reference(guard.shard(), &node);
        drop(guard);
        Ok(NodeHandle::new(db.clone(), node))
    }

    /// Returns whether the zone was found to be DNSSEC-signed when it
    /// was loaded.
    pub fn is_secure(&self) -> bool {
        self.inner.state.lock().secure
    }

    /// Returns the number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.inner.tree.read().len()
    }

    /// Databases live in memory only.
    pub fn is_persistent(&self) -> bool {
        false
    }

    /// Sets the task queue on which teardown runs incrementally. With
    /// no task queue, teardown frees everything at once.
    pub fn set_task(&self, task: Option<Arc<TaskQueue>>) {
        self.inner.state.lock().task = task;
    }

    /// Tells a cache whether memory is short, which makes
    /// [`Database::expire_node`] evict live data at random.
    pub fn set_overmem(&self, overmem: bool) {
        self.inner.overmem.store(overmem, Ordering::Relaxed);
    }

    /// Marks the cache data at a node that has been expired for longer
    /// than the virtual time as stale. If memory is short and the node
    /// has no descendants, there is a one-in-four chance that all of
    /// its data not flagged for retention is expired as well. A zero
    /// `now` means the current time.
    pub fn expire_node(&self, node: &NodeHandle, now: u32) {
        let tree = self.inner.tree.read();
        expire_node(&self.inner, &tree, &node.node, now);
    }

    /// Writes a description of a node and all of its headers, for
    /// debugging.
    pub fn print_node<W: io::Write>(&self, node: &NodeHandle, out: &mut W) -> io::Result<()> {
        let node = &node.node;
        let guard = self.inner.locks.content(node);
        writeln!(
            out,
            "node {}, {} references, locknum = {}",
            node.name,
            node.references(),
            node.lock_index
        )?;
        let mut tops = guard.tops(node.slot).peekable();
        if tops.peek().is_none() {
            return writeln!(out, "(empty)");
        }
        for (top, header) in tops {
            write!(out, "\ttype {:?}", header.key)?;
            let mut current = Some(top);
            let mut first = true;
            while let Some(id) = current {
                let header = guard.header(id);
                if !first {
                    write!(out, "\t")?;
                }
                first = false;
                writeln!(
                    out,
                    "\tserial = {}, ttl = {}, trust = {}, attributes = {}",
                    header.serial,
                    header.ttl,
                    header.trust,
                    header.attributes.bits()
                )?;
                current = header.down;
            }
        }
        Ok(())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        self.inner.references.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.inner.references.fetch_sub(1, Ordering::AcqRel) == 1 {
            lifecycle::maybe_free(&self.inner);
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Database")
            .field("kind", &self.inner.kind)
            .field("origin", &self.inner.origin)
            .field("class", &self.inner.class)
            .finish_non_exhaustive()
    }
}

/// Implements [`Database::expire_node`]. `tree` must be the locked
/// tree.
fn expire_node(db: &DbInner, tree: &NameTree, node: &Node, now: u32) {
    // Zone TTLs are not expiry times.
    if !db.kind.is_cache() {
        return;
    }
    let now = if now == 0 { util::now() } else { now };
    let mut force = false;
    if db.overmem.load(Ordering::Relaxed) {
        force = !tree.has_descendants(&node.name) && rand::random::<u32>() % 4 == 0;
        if log_enabled!(Level::Debug) {
            debug!(
                "overmem cache: {} {}",
                if force { "FORCE" } else { "check" },
                node.name
            );
        }
    }

    let limit = now.saturating_sub(db.config.virtual_time);
    let mut guard = db.locks.content_and_refcount(node);
    let state = guard.exclusive();
    let mut dirty = false;
    let mut current = state.node(node.slot).data;
    while let Some(id) = current {
        let header = state.header_mut(id);
        current = header.next;
        if header.ttl <= limit {
            header.attributes.insert(Attributes::STALE);
            dirty = true;
        } else if force {
            if header.attributes.contains(Attributes::RETAIN) {
                if log_enabled!(Level::Debug) {
                    debug!("overmem cache: reprieve by RETAIN() {}", node.name);
                }
            } else {
                header.ttl = 0;
                header.attributes.insert(Attributes::STALE);
                dirty = true;
            }
        }
    }
    if dirty {
        state.node_mut(node.slot).dirty = true;
    }
}

////////////////////////////////////////////////////////////////////////
// NODE HANDLES                                                       //
////////////////////////////////////////////////////////////////////////

/// A counted reference to a node of a [`Database`].
///
/// Cloning takes another reference. Dropping the last reference to a
/// node may sweep its old data and remove it from the tree.
pub struct NodeHandle {
    db: Arc<DbInner>,
    node: Arc<Node>,
}

impl NodeHandle {
    /// Wraps a node whose reference the caller has already taken.
    fn new(db: Arc<DbInner>, node: Arc<Node>) -> Self {
        Self { db, node }
    }

    pub fn name(&self) -> &Name {
        &self.node.name
    }

    /// Returns the number of references to the node, for diagnostics.
    pub fn references(&self) -> u32 {
        self.node.references()
    }

    fn belongs_to(&self, db: &Database) -> bool {
        Arc::ptr_eq(&self.db, &db.inner)
    }
}

impl Clone for NodeHandle {
    fn clone(&self) -> Self {
        let guard = self.db.locks.content(&self.node);
        new_reference(guard.shard(), &self.node);
        drop(guard);
        Self::new(self.db.clone(), self.node.clone())
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        let (released, exiting) = {
            let mut guard = self.db.locks.content(&self.node);
            let released = decrement_reference(
                &self.db,
                &mut guard,
                &self.node,
                0,
                TreeAccess::Unlocked,
            );
            (released, guard.shard().is_exiting())
        };
        if released.shard_idle && exiting {
            lifecycle::retire_shards(&self.db, 1);
        }
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("NodeHandle").field(&self.node.name).finish()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::rr::{Rdataset, Trust, Type};

    #[test]
    fn zones_start_with_an_origin_node() {
        let db = zone();
        assert_eq!(db.node_count(), 1);
        assert!(!db.is_persistent());
        let origin = db.find_node(&name("example."), false).unwrap();
        assert_eq!(origin.name(), &name("example."));
        assert_eq!(cache().node_count(), 0);
    }

    #[test]
    fn find_node_creates_on_request() {
        let db = zone();
        assert_eq!(db.find_node(&name("www.example."), false).unwrap_err(), Error::NotFound);
        let node = db.find_node(&name("www.example."), true).unwrap();
        assert_eq!(node.references(), 1);
        let again = db.find_node(&name("WWW.example."), false).unwrap();
        assert_eq!(again.references(), 2);
        assert_eq!(db.node_count(), 2);
    }

    #[test]
    fn find_node_rejects_names_outside_the_zone() {
        let db = zone();
        assert_eq!(db.find_node(&name("example.org."), true).unwrap_err(), Error::OutOfZone);
    }

    #[test]
    fn wildcards_get_magic_parents() {
        let db = zone();
        let _node = db.find_node(&name("*.sub.example."), true).unwrap();
        let tree = db.inner.tree.read();
        let parent = tree.get(&name("sub.example.")).unwrap();
        assert!(parent.is_wild());
        assert!(parent.has_find_callback());
    }

    #[test]
    fn empty_wildcards_get_nodes() {
        let db = zone();
        let _node = db.find_node(&name("a.*.example."), true).unwrap();
        let tree = db.inner.tree.read();
        assert!(tree.get(&name("*.example.")).is_some());
        assert!(tree.get(&name("example.")).unwrap().is_wild());
    }

    #[test]
    fn unreferenced_empty_nodes_leave_the_tree() {
        let db = zone();
        let node = db.find_node(&name("www.example."), true).unwrap();
        let clone = node.clone();
        assert_eq!(node.references(), 2);
        drop(node);
        assert_eq!(db.node_count(), 2);
        drop(clone);
        assert_eq!(db.node_count(), 1);

        // The origin stays no matter what.
        drop(db.find_node(&name("example."), false).unwrap());
        assert_eq!(db.node_count(), 1);
    }

    #[test]
    fn print_node_lists_versions() {
        let db = zone();
        let version = db.new_version().unwrap();
        let node = db.find_node(&name("www.example."), true).unwrap();
        db.add_rdataset(&node, Some(&version), 0, &a(300, &[[192, 0, 2, 1]]), AddOptions::empty())
            .unwrap();
        version.commit().unwrap();

        let mut out = Vec::new();
        db.print_node(&node, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("node www.example., 1 references, locknum = "));
        assert!(text.contains("\ttype A\tserial = 2, ttl = 300, trust = "));

        let empty = db.find_node(&name("empty.example."), true).unwrap();
        let mut out = Vec::new();
        db.print_node(&empty, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("(empty)\n"));
    }

    #[test]
    fn expire_node_marks_old_data_stale() {
        let db = cache();
        let node = db.find_node(&name("www.example."), true).unwrap();
        let rdataset = a(100, &[[192, 0, 2, 1]]).with_trust(Trust::Answer);
        db.add_rdataset(&node, None, 1000, &rdataset, AddOptions::empty()).unwrap();

        // Expired, but still within the virtual time.
        db.expire_node(&node, 1200);
        assert!(!stale_headers(&db, &node));
        db.expire_node(&node, 1401);
        assert!(stale_headers(&db, &node));
    }

    #[test]
    fn overmem_expiry_spares_retained_data() {
        let db = cache();
        db.set_overmem(true);
        let node = db.find_node(&name("leaf.example."), true).unwrap();
        let rdataset = a(3600, &[[192, 0, 2, 1]]).with_trust(Trust::Answer);
        db.add_rdataset(&node, None, 1000, &rdataset, AddOptions::empty()).unwrap();
        {
            let mut guard = db.inner.locks.content_and_refcount(&node.node);
            let state = guard.exclusive();
            let top = state.node(node.node.slot).data.unwrap();
            state.header_mut(top).attributes.insert(Attributes::RETAIN);
        }
        for _ in 0..64 {
            db.expire_node(&node, 1000);
        }
        assert!(!stale_headers(&db, &node));
    }

    #[test]
    fn overmem_expiry_eventually_forces_leaves() {
        let db = cache();
        db.set_overmem(true);
        let node = db.find_node(&name("leaf.example."), true).unwrap();
        let rdataset = a(3600, &[[192, 0, 2, 1]]).with_trust(Trust::Answer);
        db.add_rdataset(&node, None, 1000, &rdataset, AddOptions::empty()).unwrap();
        // The odds of 200 misses at one in four are negligible.
        for _ in 0..200 {
            db.expire_node(&node, 1000);
        }
        assert!(stale_headers(&db, &node));
    }

    #[test]
    fn teardown_waits_for_node_references() {
        let db = zone();
        let node = db.find_node(&name("www.example."), true).unwrap();
        let inner = db.inner.clone();
        drop(db);
        assert!(!inner.freed.load(Ordering::Acquire));
        drop(node);
        assert!(inner.freed.load(Ordering::Acquire));
    }

    #[test]
    fn teardown_runs_incrementally_on_a_task() {
        let db = cache();
        let task = TaskQueue::manual();
        db.set_task(Some(task.clone()));
        for i in 0..500 {
            let owner = name(&format!("host{}.example.", i));
            let node = db.find_node(&owner, true).unwrap();
            let rdataset =
                Rdataset::new(Type::A, 300, rdata_a(&[[192, 0, 2, 1]])).with_trust(Trust::Answer);
            db.add_rdataset(&node, None, 1000, &rdataset, AddOptions::empty()).unwrap();
        }
        let inner = db.inner.clone();
        drop(db);
        assert!(!inner.freed.load(Ordering::Acquire));
        assert!(task.run_pending() > 1);
        assert!(inner.freed.load(Ordering::Acquire));
        assert_eq!(inner.tree.read().len(), 0);
    }
}

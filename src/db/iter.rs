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

//! Iteration over the nodes of a database and the record sets of a
//! node.

use std::fmt;
use std::sync::Arc;
use std::vec;

use log::debug;
use parking_lot::lock_api::{ArcRwLockUpgradableReadGuard, ArcRwLockWriteGuard};

use super::lifecycle::{decrement_reference, new_reference, TreeAccess};
use super::tree::{Chain, NameTree, Node, TreeGuard};
use super::{expire_node, Database, Error, NodeHandle, Version};
use crate::name::Name;
use crate::rr::Rdataset;
use crate::util;

/// The number of nodes a cleaning iterator queues for deletion before
/// it deletes them all under one acquisition of the tree write lock.
const DELETION_BATCH_MAX: usize = 64;

////////////////////////////////////////////////////////////////////////
// DATABASE ITERATORS                                                 //
////////////////////////////////////////////////////////////////////////

/// A cursor over the nodes of a database in DNSSEC canonical order.
///
/// While positioned, the iterator holds an upgradable read lock on the
/// tree. Lookups can proceed meanwhile, but anything that changes the
/// shape of the tree (creating nodes, adding delegations, or another
/// iterator) waits for it. A thread holding an unpaused iterator must
/// therefore not do those things itself, or it will deadlock; call
/// [`DbIterator::pause`] first. Any positioning method resumes the
/// iteration.
///
/// In cleaning mode (caches only), [`DbIterator::current`] also
/// expires the node's data, and nodes without descendants are queued
/// for deletion.
pub struct DbIterator {
    db: Database,
    tree: Option<TreeGuard>,
    chain: Chain,
    node: Option<Arc<Node>>,
    result: Result<(), Error>,
    cleaning: bool,
    deletions: Vec<Arc<Node>>,
}

impl Database {
    /// Creates an iterator over the database's nodes. It is not
    /// positioned until [`DbIterator::first`], [`DbIterator::last`], or
    /// [`DbIterator::seek`] is called.
    pub fn iter(&self) -> DbIterator {
        DbIterator {
            db: self.clone(),
            tree: None,
            chain: Chain::new(),
            node: None,
            result: Err(Error::NoMore),
            cleaning: false,
            deletions: Vec::new(),
        }
    }
}

impl DbIterator {
    /// Positions the iterator at the first node. Fails with
    /// [`Error::NoMore`] if the database is empty.
    pub fn first(&mut self) -> Result<(), Error> {
        self.chain.reset();
        self.reposition(|tree, chain| chain.next(tree).cloned())
    }

    /// Positions the iterator at the last node. Fails with
    /// [`Error::NoMore`] if the database is empty.
    pub fn last(&mut self) -> Result<(), Error> {
        self.chain.reset();
        self.reposition(|tree, chain| {
            let last = tree.last()?;
            chain.cursor = Some(last.name.clone());
            Some(last.clone())
        })
    }

    /// Positions the iterator at the node for `name`. Fails with
    /// [`Error::NotFound`] if there is none.
    pub fn seek(&mut self, name: &Name) -> Result<(), Error> {
        self.chain.reset();
        let found = self.reposition(|tree, chain| {
            let node = tree.get(name)?;
            chain.cursor = Some(node.name.clone());
            Some(node.clone())
        });
        if found.is_err() {
            self.result = Err(Error::NotFound);
        }
        self.result
    }

    /// Moves to the previous node. Fails with [`Error::NoMore`] at the
    /// start of the database.
    pub fn prev(&mut self) -> Result<(), Error> {
        self.result?;
        if self.node.is_none() {
            return Err(Error::NoMore);
        }
        self.reposition(|tree, chain| chain.prev(tree).cloned())
    }

    /// Moves to the next node. Fails with [`Error::NoMore`] at the end
    /// of the database.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<(), Error> {
        self.result?;
        if self.node.is_none() {
            return Err(Error::NoMore);
        }
        self.reposition(|tree, chain| chain.next(tree).cloned())
    }

    /// Returns a handle to the current node.
    pub fn current(&mut self) -> Result<NodeHandle, Error> {
        self.result?;
        let node = self.node.clone().ok_or(Error::NoMore)?;
        self.resume();
        let db = self.db.inner.clone();
        {
            let guard = db.locks.content(&node);
            new_reference(guard.shard(), &node);
        }
        let handle = NodeHandle::new(db.clone(), node.clone());

        if self.cleaning && db.kind.is_cache() {
            // The current node can't be deleted while the cursor is on
            // it, so it is queued with a reference of its own.
            if self.deletions.len() == DELETION_BATCH_MAX {
                self.flush_deletions();
            }
            let tree = self.resume();
            expire_node(&db, tree, &node, 0);
            if !tree.has_descendants(&node.name) {
                let guard = db.locks.content(&node);
                new_reference(guard.shard(), &node);
                drop(guard);
                self.deletions.push(node);
            }
        }
        Ok(handle)
    }

    /// Returns the name of the closest enclosing node of the current
    /// node, or the root if there is none: the origin relative to which
    /// the current name would be written.
    pub fn origin(&mut self) -> Result<Name, Error> {
        self.result?;
        let node = self.node.clone().ok_or(Error::NoMore)?;
        let tree = self.resume();
        Ok((1..node.name.len())
            .filter_map(|n| node.name.superdomain(n))
            .find(|suffix| tree.get(suffix).is_some())
            .unwrap_or_else(Name::root))
    }

    /// Releases the tree lock until the iterator is next used, and
    /// deletes any nodes queued by cleaning. The position is kept.
    pub fn pause(&mut self) -> Result<(), Error> {
        match self.result {
            Ok(()) | Err(Error::NoMore) => (),
            Err(err) => return Err(err),
        }
        self.tree = None;
        self.flush_deletions();
        Ok(())
    }

    /// Turns cleaning mode on or off.
    pub fn set_cleaning(&mut self, cleaning: bool) {
        self.cleaning = cleaning;
    }

    /// Reacquires the tree lock if the iterator is paused.
    fn resume(&mut self) -> &NameTree {
        let db = &self.db.inner;
        self.tree.get_or_insert_with(|| db.tree.upgradable_read_arc())
    }

    /// Moves the chain with `step`, trading the reference to the old
    /// node for one to the new node.
    fn reposition<F>(&mut self, step: F) -> Result<(), Error>
    where
        F: FnOnce(&NameTree, &mut Chain) -> Option<Arc<Node>>,
    {
        self.resume();
        let found = match &self.tree {
            Some(tree) => step(tree, &mut self.chain),
            None => None,
        };
        self.release_current();
        self.result = match found {
            Some(node) => {
                let guard = self.db.inner.locks.content(&node);
                new_reference(guard.shard(), &node);
                drop(guard);
                self.node = Some(node);
                Ok(())
            }
            None => Err(Error::NoMore),
        };
        self.result
    }

    /// Drops the iterator's reference to the current node.
    fn release_current(&mut self) {
        if let Some(node) = self.node.take() {
            let db = &self.db.inner;
            let mut guard = db.locks.content(&node);
            let tree = if self.tree.is_some() {
                TreeAccess::Upgradable(&mut self.tree)
            } else {
                TreeAccess::Unlocked
            };
            decrement_reference(db, &mut guard, &node, 0, tree);
        }
    }

    /// Drops the references of the nodes queued by cleaning, deleting
    /// those left unused, all under one tree write lock.
    fn flush_deletions(&mut self) {
        if self.deletions.is_empty() {
            return;
        }
        let db = self.db.inner.clone();
        let was_locked = self.tree.is_some();
        let mut tree = match self.tree.take() {
            Some(guard) => ArcRwLockUpgradableReadGuard::upgrade(guard),
            None => db.tree.write_arc(),
        };

        // A node may be queued more than once; only its last reference
        // can delete it.
        debug!(
            "flush_deletions: {} nodes of {} in tree",
            self.deletions.len(),
            tree.len()
        );
        for node in self.deletions.drain(..) {
            let mut guard = db.locks.content(&node);
            decrement_reference(&db, &mut guard, &node, 0, TreeAccess::Exclusive(&mut *tree));
        }

        if was_locked {
            self.tree = Some(ArcRwLockWriteGuard::downgrade_to_upgradable(tree));
        }
    }
}

impl Drop for DbIterator {
    fn drop(&mut self) {
        self.tree = None;
        self.release_current();
        self.flush_deletions();
    }
}

impl fmt::Debug for DbIterator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DbIterator")
            .field("db", &self.db)
            .field("position", &self.chain.cursor)
            .field("paused", &self.tree.is_none())
            .field("cleaning", &self.cleaning)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// RECORD SET ITERATORS                                               //
////////////////////////////////////////////////////////////////////////

/// The record sets of a node, one per type, as of a version (zones) or
/// a time (caches). Holds a reference to the node.
#[derive(Debug)]
pub struct RdatasetIter {
    node: NodeHandle,
    rdatasets: vec::IntoIter<Rdataset>,
}

impl RdatasetIter {
    pub fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl Iterator for RdatasetIter {
    type Item = Rdataset;

    fn next(&mut self) -> Option<Rdataset> {
        self.rdatasets.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rdatasets.size_hint()
    }
}

impl ExactSizeIterator for RdatasetIter {}

impl Database {
    /// Returns the record sets at `node` that exist in `version` (the
    /// current version if none is given) or, for caches, that have not
    /// expired as of `now` (zero meaning the current time). Expired
    /// cache data stays listed until its expiry time has strictly
    /// passed, so that zero-TTL data can still be listed.
    pub fn all_rdatasets(
        &self,
        node: &NodeHandle,
        version: Option<&Version>,
        now: u32,
    ) -> Result<RdatasetIter, Error> {
        if !node.belongs_to(self) {
            return Err(Error::NotFound);
        }
        let (serial, _attached) = self.read_version(version)?;
        let now = match (self.kind().is_cache(), now) {
            (false, _) => 0,
            (true, 0) => util::now(),
            (true, now) => now,
        };

        let guard = self.inner.locks.content(&node.node);
        let rdatasets = guard
            .tops(node.node.slot)
            .filter_map(|(top, _)| guard.visible(top, serial))
            .map(|id| guard.header(id))
            .filter(|header| header.exists() && (now == 0 || now <= header.ttl))
            .map(|header| header.bind(now))
            .collect::<Vec<_>>();
        drop(guard);

        Ok(RdatasetIter {
            node: node.clone(),
            rdatasets: rdatasets.into_iter(),
        })
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

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

//! Versions: serial allocation, open-version bookkeeping, and the
//! cleanup that follows closing a version.
//!
//! Every header records the serial of the version that created it. A
//! reader at serial *s* sees, for each type, the newest header with a
//! serial no greater than *s*. The *least serial* is the smallest serial
//! any open version can read at; headers hidden behind a newer header
//! that is itself no newer than the least serial can be reclaimed.
//!
//! The current (most recently committed) version is only kept in the
//! list of open versions while something references it. Versions in the
//! list are ordered newest first.

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::debug;
use slab::Slab;

use super::lifecycle::{no_references, rollback_node, TreeAccess};
use super::tree::Node;
use super::{Database, DbInner, Error};

/// A version serial number.
pub type Serial = u32;

/// The index of a version in the version table.
pub type VersionId = usize;

/// A node touched by a write version.
#[derive(Debug)]
pub struct Changed {
    pub node: Arc<Node>,

    /// Set when the node still holds history that a sweep at commit
    /// time could not yet reclaim.
    pub dirty: bool,
}

#[derive(Debug)]
struct VersionData {
    serial: Serial,
    references: u32,
    writer: bool,
    commit_ok: bool,
    changed: Vec<Changed>,
}

impl VersionData {
    fn new(serial: Serial, references: u32, writer: bool) -> Self {
        Self {
            serial,
            references,
            writer,
            commit_ok: true,
            changed: Vec::new(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// THE VERSION TABLE                                                  //
////////////////////////////////////////////////////////////////////////

/// The version state of a database, kept under the database lock.
#[derive(Debug)]
pub struct VersionTable {
    versions: Slab<VersionData>,
    current: VersionId,
    future: Option<VersionId>,
    open: VecDeque<VersionId>,
    pub current_serial: Serial,
    pub least_serial: Serial,
    next_serial: Serial,
}

/// The node work left over after closing a version, to be done once
/// the database lock is released.
#[derive(Debug, Default)]
pub struct Closing {
    pub cleanup: Vec<Changed>,

    /// The serial of a rolled-back writer.
    pub rollback: Option<Serial>,

    pub least_serial: Serial,

    /// Set when a commit was refused because a change failed.
    pub commit_failed: bool,
}

impl VersionTable {
    pub fn new() -> Self {
        let mut versions = Slab::new();
        let current = versions.insert(VersionData::new(1, 0, false));
        Self {
            versions,
            current,
            future: None,
            open: VecDeque::new(),
            current_serial: 1,
            least_serial: 1,
            next_serial: 2,
        }
    }

    pub fn serial(&self, id: VersionId) -> Serial {
        self.versions[id].serial
    }

    pub fn current(&self) -> VersionId {
        self.current
    }

    /// Opens the single write version.
    pub fn begin_write(&mut self) -> Result<(VersionId, Serial), Error> {
        if self.future.is_some() {
            return Err(Error::WriterBusy);
        }
        let serial = self.next_serial;
        self.next_serial += 1;
        let id = self.versions.insert(VersionData::new(serial, 1, true));
        self.future = Some(id);
        Ok((id, serial))
    }

    /// Attaches to the current version.
    pub fn attach_current(&mut self) -> (VersionId, Serial) {
        let id = self.current;
        let version = &mut self.versions[id];
        if version.references == 0 {
            self.open.push_front(id);
        }
        version.references += 1;
        (id, version.serial)
    }

    /// Adds a reference to an already referenced version.
    pub fn attach(&mut self, id: VersionId) {
        let version = &mut self.versions[id];
        debug_assert!(version.references > 0);
        version.references += 1;
    }

    /// Records that a write version touched `node`, taking a reference
    /// to the node. Returns the index of the record, for
    /// [`VersionTable::mark_dirty`].
    pub fn record_change(&mut self, id: VersionId, node: &Arc<Node>) -> Result<usize, Error> {
        let version = &mut self.versions[id];
        if version.changed.try_reserve(1).is_err() {
            version.commit_ok = false;
            return Err(Error::NoMemory);
        }
        node.references.fetch_add(1, Ordering::AcqRel);
        version.changed.push(Changed {
            node: node.clone(),
            dirty: false,
        });
        Ok(version.changed.len() - 1)
    }

    pub fn mark_dirty(&mut self, id: VersionId, index: usize) {
        self.versions[id].changed[index].dirty = true;
    }

    /// Makes `id` the least open version, handing its changes over for
    /// cleanup.
    fn make_least(&mut self, id: VersionId, cleanup: &mut Vec<Changed>) {
        let version = &mut self.versions[id];
        self.least_serial = version.serial;
        *cleanup = mem::take(&mut version.changed);
    }

    /// Drops a reference to a version. When the last reference goes,
    /// a writer is committed or rolled back and a reader's pending
    /// cleanups are handed to the next version up. Returns the node
    /// work that remains.
    pub fn close(&mut self, id: VersionId, commit: bool) -> Closing {
        let mut closing = Closing::default();
        let version = &mut self.versions[id];
        debug_assert!(version.references > 0);
        version.references -= 1;
        if version.references > 0 {
            closing.least_serial = self.least_serial;
            return closing;
        }

        let mut retire = None;
        if version.writer {
            let commit = if commit && !version.commit_ok {
                closing.commit_failed = true;
                false
            } else {
                commit
            };
            if commit {
                if self.open.is_empty() {
                    // Nobody can read anything older.
                    self.make_least(id, &mut closing.cleanup);
                } else {
                    let version = &mut self.versions[id];
                    let (dirty, clean) = mem::take(&mut version.changed)
                        .into_iter()
                        .partition(|changed| changed.dirty);
                    version.changed = dirty;
                    closing.cleanup = clean;
                }
                let old = self.current;
                if self.versions[old].references == 0 {
                    let leftover = mem::take(&mut self.versions[old].changed);
                    self.versions[id].changed.extend(leftover);
                    retire = Some(old);
                }
                let version = &mut self.versions[id];
                version.writer = false;
                self.current_serial = version.serial;
                self.current = id;
            } else {
                closing.cleanup = mem::take(&mut version.changed);
                closing.rollback = Some(version.serial);
                retire = Some(id);
            }
            self.future = None;
        } else {
            if id != self.current {
                let position = self.open.iter().position(|&v| v == id);
                let least_greater = position
                    .and_then(|p| p.checked_sub(1))
                    .map_or(self.current, |p| self.open[p]);
                if self.versions[id].serial == self.least_serial {
                    self.make_least(least_greater, &mut closing.cleanup);
                } else {
                    let leftover = mem::take(&mut self.versions[id].changed);
                    self.versions[least_greater].changed.extend(leftover);
                }
                retire = Some(id);
            }
            self.open.retain(|&v| v != id);
        }

        if let Some(retired) = retire {
            let retired = self.versions.remove(retired);
            debug_assert!(retired.changed.is_empty());
        }
        closing.least_serial = self.least_serial;
        closing
    }
}

impl Default for VersionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Closes a version and performs the node cleanup it enables: dropping
/// the references taken for changed nodes, marking a rolled-back
/// writer's headers as ignorable, and sweeping nodes left unreferenced.
pub(super) fn close_version(db: &DbInner, id: VersionId, commit: bool) -> Result<(), Error> {
    let closing = db.state.lock().versions.close(id, commit);
    if let Some(serial) = closing.rollback {
        debug!(
            "rolling back version {} of {}: {} nodes",
            serial,
            db.origin,
            closing.cleanup.len()
        );
    }
    for changed in closing.cleanup {
        let node = changed.node;
        let shard = db.locks.shard_of(&node);
        let mut guard = db.locks.content_and_refcount(&node);
        let state = guard.exclusive();
        if let Some(serial) = closing.rollback {
            rollback_node(state, node.slot, serial);
        }
        if node.references.fetch_sub(1, Ordering::AcqRel) == 1 {
            no_references(db, state, shard, &node, closing.least_serial, TreeAccess::Unlocked);
        }
    }
    if closing.commit_failed {
        Err(Error::CommitFailed)
    } else {
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// VERSION HANDLES                                                    //
////////////////////////////////////////////////////////////////////////

/// A reference to a version of a [`Database`]: either a read snapshot
/// or the single write transaction.
///
/// Cloning attaches another reference. Dropping a handle releases its
/// reference; dropping the last reference to a writer without calling
/// [`Version::commit`] rolls it back.
pub struct Version {
    db: Database,
    id: VersionId,
    serial: Serial,
    writer: bool,
    closed: bool,
}

impl Version {
    pub(super) fn new(db: Database, id: VersionId, serial: Serial, writer: bool) -> Self {
        Self {
            db,
            id,
            serial,
            writer,
            closed: false,
        }
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn is_writer(&self) -> bool {
        self.writer
    }

    pub(super) fn id(&self) -> VersionId {
        self.id
    }

    pub(super) fn belongs_to(&self, db: &DbInner) -> bool {
        std::ptr::eq(self.db.inner(), db)
    }

    /// Releases this reference. If it is the last reference to a
    /// write version, the version is committed. A version in which a
    /// change failed to be recorded is rolled back instead, and
    /// [`Error::CommitFailed`] is returned.
    pub fn commit(mut self) -> Result<(), Error> {
        self.close(true)
    }

    /// Releases this reference, rolling back a write version.
    pub fn rollback(mut self) {
        let _ = self.close(false);
    }

    fn close(&mut self, commit: bool) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        close_version(self.db.inner(), self.id, commit && self.writer)
    }
}

impl Clone for Version {
    fn clone(&self) -> Self {
        self.db.inner().state.lock().versions.attach(self.id);
        Self {
            db: self.db.clone(),
            id: self.id,
            serial: self.serial,
            writer: self.writer,
            closed: false,
        }
    }
}

impl Drop for Version {
    fn drop(&mut self) {
        let _ = self.close(false);
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Version")
            .field("serial", &self.serial)
            .field("writer", &self.writer)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

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

//! The node lock table.
//!
//! Nodes are spread over a fixed number of shards by a hash of their
//! names. Each shard has a read/write lock over its [`ShardState`]
//! (the node data and header arenas) and a count of the nodes in the
//! shard that have live references.
//!
//! Two locking modes exist. In [`LockMode::Weak`], node reference
//! counts are atomic and may be changed under a shared guard; only
//! content changes need the exclusive form. In [`LockMode::Strong`],
//! every access takes the exclusive form. The mode is fixed per table;
//! callers ask for [`NodeLockTable::content`] or
//! [`NodeLockTable::content_and_refcount`] and the table picks the
//! guard.

use std::mem;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

use super::header::ShardState;
use super::tree::Node;

/// The largest supported number of shards.
pub const MAX_LOCK_COUNT: usize = 1023;

/// How node reference counts are protected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Reference counts are updated atomically under shared guards.
    Weak,

    /// Reference counts are only updated under exclusive guards.
    Strong,
}

impl LockMode {
    /// The best mode the target supports.
    #[cfg(target_has_atomic = "32")]
    pub const PLATFORM: Self = Self::Weak;

    #[cfg(not(target_has_atomic = "32"))]
    pub const PLATFORM: Self = Self::Strong;
}

impl Default for LockMode {
    fn default() -> Self {
        Self::PLATFORM
    }
}

////////////////////////////////////////////////////////////////////////
// THE TABLE                                                          //
////////////////////////////////////////////////////////////////////////

/// The fixed array of shard locks.
#[derive(Debug)]
pub struct NodeLockTable {
    shards: Box<[Shard]>,
    mode: LockMode,
}

/// One shard of the table.
#[derive(Debug, Default)]
pub struct Shard {
    state: RwLock<ShardState>,

    /// The number of nodes in this shard with live references.
    pub references: AtomicU32,

    /// Set once the database is being torn down.
    exiting: AtomicBool,
}

impl NodeLockTable {
    pub fn new(count: usize, mode: LockMode) -> Self {
        Self {
            shards: (0..count).map(|_| Shard::default()).collect(),
            mode,
        }
    }

    /// Returns the shard index for a name hash.
    pub fn index_for(&self, hash: u32) -> usize {
        hash as usize % self.shards.len()
    }

    pub fn shard(&self, index: usize) -> &Shard {
        &self.shards[index]
    }

    pub fn shards(&self) -> impl Iterator<Item = &Shard> {
        self.shards.iter()
    }

    pub fn shard_of(&self, node: &Node) -> &Shard {
        &self.shards[node.lock_index]
    }

    /// Locks a node's shard for reading its content.
    pub fn content(&self, node: &Node) -> ShardGuard {
        let shard = self.shard_of(node);
        match self.mode {
            LockMode::Weak => ShardGuard::lock_shared(shard),
            LockMode::Strong => ShardGuard::lock_exclusive(shard),
        }
    }

    /// Locks a node's shard for reading, with the chance of a later
    /// [`ShardGuard::try_exclusive`]. Only one upgradable guard per
    /// shard can exist; if another is held, this falls back to a shared
    /// guard rather than wait for it.
    pub fn content_upgradable(&self, node: &Node) -> ShardGuard {
        let shard = self.shard_of(node);
        match self.mode {
            LockMode::Weak => ShardGuard::lock_upgradable(shard),
            LockMode::Strong => ShardGuard::lock_exclusive(shard),
        }
    }

    /// Locks a node's shard exclusively.
    pub fn content_and_refcount(&self, node: &Node) -> ShardGuard {
        ShardGuard::lock_exclusive(self.shard_of(node))
    }
}

impl Shard {
    pub fn lock(&self) -> ShardGuard {
        ShardGuard::lock_exclusive(self)
    }

    pub fn references(&self) -> u32 {
        self.references.load(Ordering::Acquire)
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    /// Must be called with the shard locked.
    pub fn set_exiting(&self) {
        self.exiting.store(true, Ordering::Release);
    }
}

////////////////////////////////////////////////////////////////////////
// GUARDS                                                             //
////////////////////////////////////////////////////////////////////////

/// A guard over a shard's state that may be upgraded in place.
pub struct ShardGuard<'a> {
    shard: &'a Shard,
    kind: GuardKind<'a>,
}

enum GuardKind<'a> {
    Shared(RwLockReadGuard<'a, ShardState>),
    Upgradable(RwLockUpgradableReadGuard<'a, ShardState>),
    Exclusive(RwLockWriteGuard<'a, ShardState>),
    Released,
}

impl<'a> ShardGuard<'a> {
    fn lock_shared(shard: &'a Shard) -> Self {
        Self {
            shard,
            kind: GuardKind::Shared(shard.state.read()),
        }
    }

    fn lock_upgradable(shard: &'a Shard) -> Self {
        let kind = match shard.state.try_upgradable_read() {
            Some(guard) => GuardKind::Upgradable(guard),
            None => GuardKind::Shared(shard.state.read()),
        };
        Self { shard, kind }
    }

    fn lock_exclusive(shard: &'a Shard) -> Self {
        Self {
            shard,
            kind: GuardKind::Exclusive(shard.state.write()),
        }
    }

    pub fn shard(&self) -> &'a Shard {
        self.shard
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self.kind, GuardKind::Exclusive(_))
    }

    /// Returns exclusive access to the state, upgrading the guard if
    /// needed. Upgrading a shared guard releases the lock before
    /// relocking it, so anything read before must be checked again;
    /// upgrading an upgradable guard is atomic.
    pub fn exclusive(&mut self) -> &mut ShardState {
        let kind = mem::replace(&mut self.kind, GuardKind::Released);
        self.kind = match kind {
            GuardKind::Shared(guard) => {
                drop(guard);
                GuardKind::Exclusive(self.shard.state.write())
            }
            GuardKind::Upgradable(guard) => {
                GuardKind::Exclusive(RwLockUpgradableReadGuard::upgrade(guard))
            }
            GuardKind::Exclusive(guard) => GuardKind::Exclusive(guard),
            GuardKind::Released => GuardKind::Exclusive(self.shard.state.write()),
        };
        match &mut self.kind {
            GuardKind::Exclusive(guard) => &mut **guard,
            _ => unreachable!(),
        }
    }
}

impl<'a> ShardGuard<'a> {
    /// Returns exclusive access to the state if it can be had without
    /// waiting. Only upgradable guards can be upgraded, and only while
    /// no shared guards are held; nothing is released on failure.
    pub fn try_exclusive(&mut self) -> Option<&mut ShardState> {
        let kind = mem::replace(&mut self.kind, GuardKind::Released);
        self.kind = match kind {
            GuardKind::Upgradable(guard) => match RwLockUpgradableReadGuard::try_upgrade(guard) {
                Ok(guard) => GuardKind::Exclusive(guard),
                Err(guard) => GuardKind::Upgradable(guard),
            },
            kind => kind,
        };
        match &mut self.kind {
            GuardKind::Exclusive(guard) => Some(&mut **guard),
            _ => None,
        }
    }
}

impl Deref for ShardGuard<'_> {
    type Target = ShardState;

    fn deref(&self) -> &Self::Target {
        match &self.kind {
            GuardKind::Shared(guard) => &**guard,
            GuardKind::Upgradable(guard) => &**guard,
            GuardKind::Exclusive(guard) => &**guard,
            GuardKind::Released => unreachable!(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

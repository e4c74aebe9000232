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

//! Reclamation of headers, nodes, and whole databases.
//!
//! Headers are swept from a node when its last reference goes away and
//! it is marked dirty. A node left with no data and no descendants is
//! then removed from the tree, if the tree lock can be taken without
//! blocking; otherwise the removal is deferred to a later pass (such as
//! an iterator in cleaning mode).
//!
//! A database is freed once its handle count has dropped to zero and
//! every lock shard has no referenced nodes. Freeing a large tree is
//! done in quanta on the database's task queue, if it has one.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, log_enabled, Level};
use parking_lot::lock_api::{ArcRwLockUpgradableReadGuard, ArcRwLockWriteGuard};

use super::header::{Attributes, ShardState};
use super::lock::{Shard, ShardGuard};
use super::tree::{NameTree, Node, TreeGuard};
use super::version::Serial;
use super::DbInner;
use crate::task::TaskQueue;

/// The number of nodes freed in the first teardown pass run on a task.
pub const INITIAL_QUANTUM: usize = 100;

/// The largest teardown quantum.
const MAX_QUANTUM: usize = 1000;

/// How the caller of a reference drop holds the tree lock, which
/// decides how an unused node may be removed from the tree.
pub enum TreeAccess<'a> {
    /// The tree is not locked; try to take the write lock.
    Unlocked,

    /// The tree is locked with an upgradable read guard; try to upgrade
    /// it, downgrading again afterward.
    Upgradable(&'a mut Option<TreeGuard>),

    /// The tree is locked for writing.
    Exclusive(&'a mut NameTree),
}

/// What dropping a node reference led to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Released {
    /// The node has no references left.
    pub last_reference: bool,

    /// The node's shard has no referenced nodes left.
    pub shard_idle: bool,
}

////////////////////////////////////////////////////////////////////////
// SWEEPS                                                             //
////////////////////////////////////////////////////////////////////////

/// Sweeps a cache node: all older versions go, as do tombstones and
/// stale headers at the top.
pub fn clean_cache_node(state: &mut ShardState, slot: usize) {
    let mut prev = None;
    let mut current = state.node(slot).data;
    while let Some(id) = current {
        if let Some(down) = state.header_mut(id).down.take() {
            state.free_down_chain(down);
        }
        let header = state.header(id);
        if !header.exists() || header.is_stale() {
            current = state.unlink_top(slot, prev, id);
            state.headers.remove(id);
        } else {
            prev = Some(id);
            current = header.next;
        }
    }
    state.node_mut(slot).dirty = false;
}

/// Sweeps a zone node, keeping every version an open reader at
/// `least_serial` or later could still see.
pub fn clean_zone_node(state: &mut ShardState, slot: usize, least_serial: Serial) {
    let mut still_dirty = false;
    let mut top_prev = None;
    let mut current = state.node(slot).data;
    while let Some(mut top) = current {
        let top_next = state.header(top).next;

        // Versions superseded within their own transaction, or rolled
        // back, are never visible.
        let mut parent = top;
        let mut below = state.header(top).down;
        while let Some(id) = below {
            let header = state.header(id);
            let down_next = header.down;
            debug_assert!(header.serial <= state.header(parent).serial);
            if header.serial == state.header(parent).serial || header.is_ignored() {
                state.header_mut(parent).down = down_next;
                state.headers.remove(id);
            } else {
                parent = id;
            }
            below = down_next;
        }

        if state.header(top).is_ignored() {
            match state.header(top).down {
                None => {
                    state.unlink_top(slot, top_prev, top);
                    state.headers.remove(top);
                    current = top_next;
                    continue;
                }
                Some(down) => {
                    match top_prev {
                        Some(prev) => state.header_mut(prev).next = Some(down),
                        None => state.node_mut(slot).data = Some(down),
                    }
                    state.header_mut(down).next = top_next;
                    state.headers.remove(top);
                    top = down;
                }
            }
        }

        // Find the first version older than every open reader and free
        // it along with everything below it.
        let mut parent = top;
        let mut below = state.header(top).down;
        while let Some(id) = below {
            if state.header(id).serial < least_serial {
                break;
            }
            parent = id;
            below = state.header(id).down;
        }
        if let Some(id) = below {
            state.header_mut(parent).down = None;
            state.free_down_chain(id);
        }

        // The top version stays even when older than least_serial,
        // since it is the newest, unless it is a tombstone.
        if state.header(top).down.is_some() {
            still_dirty = true;
            top_prev = Some(top);
        } else if !state.header(top).exists() {
            state.unlink_top(slot, top_prev, top);
            state.headers.remove(top);
        } else {
            top_prev = Some(top);
        }
        current = top_next;
    }
    if !still_dirty {
        state.node_mut(slot).dirty = false;
    }
}

/// Marks every header a rolled-back version created as ignorable.
pub fn rollback_node(state: &mut ShardState, slot: usize, serial: Serial) {
    let mut make_dirty = false;
    let mut current = state.node(slot).data;
    while let Some(top) = current {
        let mut version = Some(top);
        while let Some(id) = version {
            let header = state.header_mut(id);
            if header.serial == serial {
                header.attributes.insert(Attributes::IGNORE);
                make_dirty = true;
            }
            version = header.down;
        }
        current = state.header(top).next;
    }
    if make_dirty {
        state.node_mut(slot).dirty = true;
    }
}

////////////////////////////////////////////////////////////////////////
// NODE REFERENCES                                                    //
////////////////////////////////////////////////////////////////////////

/// Takes a reference to a node. The caller must hold the node's shard
/// guard (exclusively, in strong mode).
pub fn new_reference(shard: &Shard, node: &Node) {
    if node.references.fetch_add(1, Ordering::AcqRel) == 0 {
        shard.references.fetch_add(1, Ordering::AcqRel);
    }
}

/// Drops a reference to a node held through `guard`, sweeping the node
/// and trying to remove it from the tree if it was the last one.
///
/// A clean node with data can't need either, so in weak mode its
/// count is just decremented under the shared guard. Otherwise the
/// guard is made exclusive first.
pub fn decrement_reference(
    db: &DbInner,
    guard: &mut ShardGuard,
    node: &Arc<Node>,
    least_serial: Serial,
    tree: TreeAccess,
) -> Released {
    let shard = guard.shard();
    if !guard.is_exclusive() {
        let data = guard.node(node.slot);
        if !data.dirty && data.data.is_some() {
            let mut released = Released::default();
            if node.references.fetch_sub(1, Ordering::AcqRel) == 1 {
                released.last_reference = true;
                released.shard_idle = shard.references.fetch_sub(1, Ordering::AcqRel) == 1;
            }
            return released;
        }
    }

    let state = guard.exclusive();
    if node.references.fetch_sub(1, Ordering::AcqRel) != 1 {
        return Released::default();
    }
    Released {
        last_reference: true,
        shard_idle: no_references(db, state, shard, node, least_serial, tree),
    }
}

/// Handles a node's reference count reaching zero: sweeps it if dirty,
/// releases its shard reference, and removes it from the tree if it is
/// unused. `least_serial` may be zero to use the database's current
/// least serial. Returns whether the shard became idle.
pub fn no_references(
    db: &DbInner,
    state: &mut ShardState,
    shard: &Shard,
    node: &Arc<Node>,
    least_serial: Serial,
    tree: TreeAccess,
) -> bool {
    debug_assert_eq!(node.references(), 0);
    if state.node(node.slot).dirty {
        if db.kind.is_cache() {
            clean_cache_node(state, node.slot);
        } else {
            let least_serial = if least_serial == 0 {
                db.state.lock().versions.least_serial
            } else {
                least_serial
            };
            clean_zone_node(state, node.slot, least_serial);
        }
    }
    let shard_idle = shard.references.fetch_sub(1, Ordering::AcqRel) == 1;

    if state.node(node.slot).data.is_some() || db.is_origin(node) {
        return shard_idle;
    }
    match tree {
        TreeAccess::Exclusive(tree) => {
            delete_node(tree, state, node);
        }
        TreeAccess::Upgradable(slot) => {
            if let Some(guard) = slot.take() {
                match ArcRwLockUpgradableReadGuard::try_upgrade(guard) {
                    Ok(mut write) => {
                        delete_node(&mut write, state, node);
                        *slot = Some(ArcRwLockWriteGuard::downgrade_to_upgradable(write));
                    }
                    Err(guard) => {
                        *slot = Some(guard);
                        log_deferred(node);
                    }
                }
            }
        }
        TreeAccess::Unlocked => match db.tree.try_write() {
            Some(mut tree) => {
                delete_node(&mut tree, state, node);
            }
            None => log_deferred(node),
        },
    }
    shard_idle
}

fn log_deferred(node: &Node) {
    if log_enabled!(Level::Debug) {
        debug!("no_references: deferring deletion of {}", node.name);
    }
}

/// Removes an unreferenced, empty node from the tree unless it has
/// descendants. `state` must be the node's shard state. Returns whether
/// the node was removed.
pub fn delete_node(tree: &mut NameTree, state: &mut ShardState, node: &Arc<Node>) -> bool {
    if tree.has_descendants(&node.name) {
        return false;
    }
    match tree.get(&node.name) {
        Some(present) if Arc::ptr_eq(present, node) => {
            tree.remove(&node.name);
            state.nodes.remove(node.slot);
            if log_enabled!(Level::Debug) {
                debug!("no_references: deleted node {}", node.name);
            }
            true
        }
        _ => false,
    }
}

////////////////////////////////////////////////////////////////////////
// DATABASE TEARDOWN                                                  //
////////////////////////////////////////////////////////////////////////

/// Called when the last database handle goes away: marks every shard as
/// exiting and retires the shards that are already idle.
pub fn maybe_free(db: &Arc<DbInner>) {
    let mut inactive = 0;
    for shard in db.locks.shards() {
        let _guard = shard.lock();
        shard.set_exiting();
        if shard.references() == 0 {
            inactive += 1;
        }
    }
    if inactive > 0 {
        retire_shards(db, inactive);
    }
}

/// Subtracts idle shards from the active count, freeing the database
/// when none remain.
pub fn retire_shards(db: &Arc<DbInner>, count: usize) {
    let (free, task) = {
        let mut state = db.state.lock();
        state.active = state.active.saturating_sub(count);
        (state.active == 0, state.task.clone())
    };
    if free {
        let quantum = if task.is_some() { INITIAL_QUANTUM } else { 0 };
        free_database(db.clone(), quantum, task);
    }
}

/// Frees the tree, `quantum` nodes at a time (all at once if zero).
/// Each pass that leaves work behind resubmits itself to `task` with an
/// adjusted quantum.
pub fn free_database(db: Arc<DbInner>, quantum: usize, task: Option<Arc<TaskQueue>>) {
    let start = Instant::now();
    let remaining = {
        let mut tree = db.tree.write();
        let mut freed = 0;
        while quantum == 0 || freed < quantum {
            let node = match tree.pop_first() {
                Some(node) => node,
                None => break,
            };
            let mut guard = db.locks.content_and_refcount(&node);
            let state = guard.exclusive();
            state.free_node_data(node.slot);
            state.nodes.remove(node.slot);
            freed += 1;
        }
        tree.len()
    };

    if remaining > 0 {
        if let Some(task) = task {
            let quantum = adjust_quantum(quantum, start.elapsed(), db.config.teardown_rate);
            if log_enabled!(Level::Debug) {
                debug!(
                    "freeing database {}: {} nodes left, next quantum {}",
                    db.origin, remaining, quantum
                );
            }
            let next_db = db.clone();
            let next_task = task.clone();
            match task.send(move || free_database(next_db, quantum, Some(next_task))) {
                Ok(()) => return,
                Err(err) => debug!("freeing database {} synchronously: {}", db.origin, err),
            }
        }
        free_database(db, 0, None);
        return;
    }

    db.freed.store(true, Ordering::Release);
    info!("done freeing database {}", db.origin);
}

/// Computes the next teardown quantum so that a pass takes about as long
/// as one interval at `rate` passes per second.
pub fn adjust_quantum(old: usize, elapsed: Duration, rate: u32) -> usize {
    let rate = u64::from(rate.max(100));
    let interval = (1_000_000 / rate).max(1);
    let usecs = elapsed.as_micros() as u64;
    if usecs == 0 {
        return (old * 2).min(MAX_QUANTUM);
    }
    let new = (old as u64 * interval / usecs).clamp(1, MAX_QUANTUM as u64) as usize;
    (new + old * 3) / 4
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::header::{Header, HeaderId, NodeData, Payload};
    use crate::rr::{RdataSlab, Trust, Type, TypeKey};

    fn payload() -> Payload {
        let slab = RdataSlab::new(Type::A, [&[192, 0, 2, 1][..]]).unwrap();
        Payload::Exists(Arc::new(slab))
    }

    /// Pushes a version of `key` onto the node, as a write would.
    fn push(
        state: &mut ShardState,
        slot: usize,
        key: TypeKey,
        serial: Serial,
        exists: bool,
    ) -> HeaderId {
        let p = if exists { payload() } else { Payload::Tombstone };
        let header = Header::new(key, serial, 300, Trust::None, p);
        let id = state.alloc(header);
        let mut prev = None;
        let mut current = state.node(slot).data;
        while let Some(top) = current {
            if state.header(top).key == key {
                let next = state.header(top).next;
                state.header_mut(id).down = Some(top);
                state.header_mut(id).next = next;
                state.header_mut(top).next = None;
                match prev {
                    Some(prev) => state.header_mut(prev).next = Some(id),
                    None => state.node_mut(slot).data = Some(id),
                }
                state.node_mut(slot).dirty = true;
                return id;
            }
            prev = Some(top);
            current = state.header(top).next;
        }
        state.header_mut(id).next = state.node(slot).data;
        state.node_mut(slot).data = Some(id);
        id
    }

    fn serials(state: &ShardState, slot: usize, key: TypeKey) -> Vec<Serial> {
        let mut serials = Vec::new();
        let mut current = state.tops(slot).find(|(_, h)| h.key == key).map(|(id, _)| id);
        while let Some(id) = current {
            serials.push(state.header(id).serial);
            current = state.header(id).down;
        }
        serials
    }

    fn new_node(state: &mut ShardState) -> usize {
        state.nodes.insert(NodeData::default())
    }

    const A: TypeKey = TypeKey::of(Type::A);
    const MX: TypeKey = TypeKey::of(Type::MX);

    #[test]
    fn zone_sweep_keeps_versions_open_readers_need() {
        let mut state = ShardState::default();
        let slot = new_node(&mut state);
        push(&mut state, slot, A, 2, true);
        push(&mut state, slot, A, 3, true);
        push(&mut state, slot, A, 5, true);

        clean_zone_node(&mut state, slot, 3);
        assert_eq!(serials(&state, slot, A), [5, 3]);
        assert!(state.node(slot).dirty);

        clean_zone_node(&mut state, slot, 5);
        assert_eq!(serials(&state, slot, A), [5]);
        assert!(!state.node(slot).dirty);
        assert_eq!(state.headers.len(), 1);
    }

    #[test]
    fn zone_sweep_drops_duplicate_serials_and_tombstones() {
        let mut state = ShardState::default();
        let slot = new_node(&mut state);
        push(&mut state, slot, A, 2, true);
        push(&mut state, slot, A, 4, true);
        push(&mut state, slot, A, 4, true);
        push(&mut state, slot, MX, 2, true);
        push(&mut state, slot, MX, 4, false);

        clean_zone_node(&mut state, slot, 4);
        assert_eq!(serials(&state, slot, A), [4]);
        assert!(serials(&state, slot, MX).is_empty());
        assert_eq!(state.tops(slot).count(), 1);
        assert!(!state.node(slot).dirty);
    }

    #[test]
    fn rollback_then_sweep_restores_previous_version() {
        let mut state = ShardState::default();
        let slot = new_node(&mut state);
        push(&mut state, slot, A, 1, true);
        push(&mut state, slot, A, 2, true);
        push(&mut state, slot, MX, 2, true);

        rollback_node(&mut state, slot, 2);
        assert!(state.node(slot).dirty);
        let top = state.tops(slot).find(|(_, h)| h.key == A).unwrap().0;
        assert!(state.header(top).attributes.contains(Attributes::IGNORE));
        assert_eq!(state.visible(top, 2).map(|id| state.header(id).serial), Some(1));

        clean_zone_node(&mut state, slot, 1);
        assert_eq!(serials(&state, slot, A), [1]);
        assert!(serials(&state, slot, MX).is_empty());
        assert!(!state.node(slot).dirty);
    }

    #[test]
    fn cache_sweep_frees_history_and_stale_tops() {
        let mut state = ShardState::default();
        let slot = new_node(&mut state);
        push(&mut state, slot, A, 1, true);
        push(&mut state, slot, A, 1, true);
        let mx = push(&mut state, slot, MX, 1, true);
        state.header_mut(mx).attributes.insert(Attributes::STALE);

        clean_cache_node(&mut state, slot);
        assert_eq!(serials(&state, slot, A), [1]);
        assert!(serials(&state, slot, MX).is_empty());
        assert_eq!(state.headers.len(), 1);
        assert!(!state.node(slot).dirty);
    }

    #[test]
    fn quantum_adjusts_toward_target_interval() {
        // At 100 passes per second, a pass should take 10 ms.
        assert_eq!(adjust_quantum(100, Duration::ZERO, 100), 200);
        assert_eq!(adjust_quantum(800, Duration::ZERO, 100), 1000);
        // A pass that took twice as long as the target halves the
        // target quantum, then smoothing applies.
        assert_eq!(adjust_quantum(100, Duration::from_millis(20), 100), (50 + 300) / 4);
        // Very slow passes bottom out at one node.
        assert_eq!(adjust_quantum(4, Duration::from_secs(10), 100), (1 + 12) / 4);
        // Rates under 100 are treated as 100.
        assert_eq!(
            adjust_quantum(100, Duration::from_millis(20), 1),
            adjust_quantum(100, Duration::from_millis(20), 100)
        );
    }
}

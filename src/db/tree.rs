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

//! The [`NameTree`] and [`Node`] structures.
//!
//! The tree maps names to nodes in DNSSEC canonical order, which is
//! what makes the ordered walks of NSEC lookups and database iteration
//! possible. A node's record data does not live here: each node only
//! records which lock shard and arena slot hold it (see
//! [`lock`](super::lock)).

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use arrayvec::ArrayVec;
use parking_lot::lock_api::ArcRwLockUpgradableReadGuard;
use parking_lot::RawRwLock;

use crate::name::{Name, MAX_N_LABELS};

/// An owned upgradable read guard over a tree, as held by iterators
/// between operations.
pub type TreeGuard = ArcRwLockUpgradableReadGuard<RawRwLock, NameTree>;

////////////////////////////////////////////////////////////////////////
// NODES                                                              //
////////////////////////////////////////////////////////////////////////

/// A node of the tree, anchoring one name.
#[derive(Debug)]
pub struct Node {
    pub name: Name,

    /// The shard of the node lock table protecting this node.
    pub lock_index: usize,

    /// The slot of this node's data in its shard's arena.
    pub slot: usize,

    /// The number of live handles to this node.
    pub references: AtomicU32,

    /// Set on the parent of a wildcard name.
    wild: AtomicBool,

    /// Set on nodes that lookups must inspect while descending past
    /// them: delegation points and the parents of wildcards.
    find_callback: AtomicBool,
}

impl Node {
    pub fn new(name: Name, lock_index: usize, slot: usize) -> Self {
        Self {
            name,
            lock_index,
            slot,
            references: AtomicU32::new(0),
            wild: AtomicBool::new(false),
            find_callback: AtomicBool::new(false),
        }
    }

    pub fn references(&self) -> u32 {
        self.references.load(Ordering::Acquire)
    }

    pub fn is_wild(&self) -> bool {
        self.wild.load(Ordering::Relaxed)
    }

    pub fn has_find_callback(&self) -> bool {
        self.find_callback.load(Ordering::Relaxed)
    }

    /// Flags must only be set while the tree is locked for writing.
    pub fn set_wild(&self) {
        self.wild.store(true, Ordering::Relaxed);
        self.set_find_callback();
    }

    pub fn set_find_callback(&self) {
        self.find_callback.store(true, Ordering::Relaxed);
    }
}

////////////////////////////////////////////////////////////////////////
// THE TREE                                                           //
////////////////////////////////////////////////////////////////////////

/// The ordered map from names to nodes.
#[derive(Debug, Default)]
pub struct NameTree {
    nodes: BTreeMap<Name, Arc<Node>>,
}

/// The result of [`NameTree::find`].
#[derive(Debug)]
pub enum Lookup {
    /// The name itself was found.
    Exact(Arc<Node>),

    /// The name was not found; this is its deepest ancestor in the
    /// tree (or the node where the descent was stopped).
    Partial(Arc<Node>),

    /// Neither the name nor any ancestor is in the tree.
    NotFound,
}

/// What a descent callback wants [`NameTree::find`] to do next.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Descend {
    Continue,
    Stop,
}

impl NameTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, name: &Name) -> Option<&Arc<Node>> {
        self.nodes.get(name)
    }

    /// Inserts a node. The caller must have checked that the name is
    /// not yet present.
    pub fn insert(&mut self, node: Arc<Node>) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn remove(&mut self, name: &Name) -> Option<Arc<Node>> {
        self.nodes.remove(name)
    }

    /// Removes and returns the first node in canonical order.
    pub fn pop_first(&mut self) -> Option<Arc<Node>> {
        self.nodes.pop_first().map(|(_, node)| node)
    }

    /// Returns whether any node is a proper subdomain of `name`.
    pub fn has_descendants(&self, name: &Name) -> bool {
        self.next(name)
            .map_or(false, |next| next.name.is_subdomain_of(name))
    }

    pub fn first(&self) -> Option<&Arc<Node>> {
        self.nodes.values().next()
    }

    pub fn last(&self) -> Option<&Arc<Node>> {
        self.nodes.values().next_back()
    }

    /// Returns the node following `name` in canonical order. `name`
    /// need not be in the tree.
    pub fn next(&self, name: &Name) -> Option<&Arc<Node>> {
        self.nodes
            .range::<Name, _>((Bound::Excluded(name), Bound::Unbounded))
            .next()
            .map(|(_, node)| node)
    }

    /// Returns the node preceding `name` in canonical order. `name`
    /// need not be in the tree.
    pub fn prev(&self, name: &Name) -> Option<&Arc<Node>> {
        self.nodes
            .range::<Name, _>((Bound::Unbounded, Bound::Excluded(name)))
            .next_back()
            .map(|(_, node)| node)
    }

    /// Looks up `name`, recording in `chain` the ancestors passed on
    /// the way down.
    ///
    /// `callback` is invoked, from the top down, on each proper
    /// ancestor of `name` that has its find-callback flag set. If it
    /// returns [`Descend::Stop`], the descent ends with a partial match
    /// at that node. If `exact_ok` is false, a node for `name` itself
    /// is ignored.
    ///
    /// On an exact match, the chain is positioned at the node. Otherwise
    /// it is positioned at the node that would precede `name` (or at no
    /// node if nothing precedes it).
    pub fn find<F>(&self, name: &Name, chain: &mut Chain, exact_ok: bool, mut callback: F) -> Lookup
    where
        F: FnMut(&Arc<Node>) -> Descend,
    {
        chain.reset();
        let mut deepest: Option<&Arc<Node>> = None;
        for suffix in name.suffixes() {
            if suffix.len() == name.len() {
                break;
            }
            if let Some(node) = self.nodes.get(&suffix) {
                if let Some(previous) = deepest.replace(node) {
                    // The level array is as deep as a name is long, so
                    // this can't overflow.
                    let _ = chain.levels.try_push(previous.clone());
                }
                if node.has_find_callback() && callback(node) == Descend::Stop {
                    chain.cursor = Some(node.name.clone());
                    return Lookup::Partial(node.clone());
                }
            }
        }

        if exact_ok {
            if let Some(node) = self.nodes.get(name) {
                if let Some(previous) = deepest {
                    let _ = chain.levels.try_push(previous.clone());
                }
                chain.cursor = Some(node.name.clone());
                return Lookup::Exact(node.clone());
            }
        }
        chain.cursor = self.prev(name).map(|node| node.name.clone());
        match deepest {
            Some(node) => Lookup::Partial(node.clone()),
            None => Lookup::NotFound,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CHAINS                                                             //
////////////////////////////////////////////////////////////////////////

/// The state of a lookup: the ancestors of the matched node, root
/// first, and a position in the tree's canonical order from which
/// lookups can walk backward or forward.
#[derive(Debug, Default)]
pub struct Chain {
    pub levels: ArrayVec<Arc<Node>, MAX_N_LABELS>,
    pub cursor: Option<Name>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.levels.clear();
        self.cursor = None;
    }

    /// Returns the node the chain is positioned at.
    pub fn current<'a>(&self, tree: &'a NameTree) -> Option<&'a Arc<Node>> {
        self.cursor.as_ref().and_then(|name| tree.get(name))
    }

    /// Moves the chain to the previous node. Returns [`None`] (leaving
    /// the position unchanged) at the start of the tree.
    pub fn prev<'a>(&mut self, tree: &'a NameTree) -> Option<&'a Arc<Node>> {
        let prev = tree.prev(self.cursor.as_ref()?)?;
        self.cursor = Some(prev.name.clone());
        Some(prev)
    }

    /// Moves the chain to the next node. An unpositioned chain moves to
    /// the first node. Returns [`None`] at the end of the tree.
    pub fn next<'a>(&mut self, tree: &'a NameTree) -> Option<&'a Arc<Node>> {
        let next = match &self.cursor {
            Some(name) => tree.next(name)?,
            None => tree.first()?,
        };
        self.cursor = Some(next.name.clone());
        Some(next)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

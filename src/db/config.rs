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

//! Tunables of a [`Database`](super::Database).

use super::lock::{LockMode, MAX_LOCK_COUNT};
use super::{DbKind, Error};

/// The default number of node locks for zones and stubs.
pub const DEFAULT_ZONE_LOCK_COUNT: usize = 7;

/// The default number of node locks for caches.
pub const DEFAULT_CACHE_LOCK_COUNT: usize = 1009;

/// The default grace period, in seconds, during which expired cache
/// data is kept around before it is reclaimed.
pub const DEFAULT_VIRTUAL_TIME: u32 = 300;

/// The default teardown rate, in passes per second.
pub const DEFAULT_TEARDOWN_RATE: u32 = 100;

/// Database configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The number of node lock shards. [`None`] picks the default for
    /// the database kind.
    pub node_lock_count: Option<usize>,

    /// How long expired cache data is kept before being reclaimed.
    pub virtual_time: u32,

    /// How many teardown passes to aim for per second when a database
    /// is freed incrementally on a task queue. Values under 100 are
    /// treated as 100.
    pub teardown_rate: u32,

    /// The node locking mode.
    pub lock_mode: LockMode,
}

impl Config {
    /// Returns the number of node locks to create for a database of
    /// the given kind.
    pub fn lock_count_for(&self, kind: DbKind) -> Result<usize, Error> {
        let count = self.node_lock_count.unwrap_or(if kind.is_cache() {
            DEFAULT_CACHE_LOCK_COUNT
        } else {
            DEFAULT_ZONE_LOCK_COUNT
        });
        if (1..=MAX_LOCK_COUNT).contains(&count) {
            Ok(count)
        } else {
            Err(Error::InvalidLockCount)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_lock_count: None,
            virtual_time: DEFAULT_VIRTUAL_TIME,
            teardown_rate: DEFAULT_TEARDOWN_RATE,
            lock_mode: LockMode::default(),
        }
    }
}

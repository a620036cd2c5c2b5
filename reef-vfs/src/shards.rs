//  Copyright 2025 Reef Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use crossbeam::utils::CachePadded;
use itertools::Itertools;
use parking_lot::Mutex;

/// A power-of-two set of mutex-guarded shards selected by the low bits of a
/// 64-bit hash.
///
/// The hash is computed once per handle/name and carried with every
/// reference, so shard selection never rehashes.
pub struct Shards<T> {
    shards: Box<[CachePadded<Mutex<T>>]>,
    mask: u64,
}

impl<T> Shards<T> {
    /// # Panics
    ///
    /// Panics if `num_shards` is not a power of two.
    pub fn new(num_shards: usize, mut init: impl FnMut(usize) -> T) -> Self {
        assert!(num_shards.is_power_of_two(), "shard count must be a power of two");
        let shards = (0..num_shards)
            .map(|i| CachePadded::new(Mutex::new(init(i))))
            .collect_vec()
            .into_boxed_slice();
        Self {
            shards,
            mask: num_shards as u64 - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// The shard owning `hash`.
    pub fn shard(&self, hash: u64) -> &Mutex<T> {
        &self.shards[(hash & self.mask) as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutex<T>> {
        self.shards.iter().map(|s| &**s)
    }
}

/// Shard sizing used by the open caches: the configured bit count is widened
/// by four the way the containers have always been sized, and the per-shard
/// bound keeps a floor of four handles so a tiny (or zero) `max_open_files`
/// still yields a usable cache.
pub fn open_cache_geometry(shard_bits: u8, max_open_files: u32) -> (usize, u32) {
    let num_shards = 1usize << (shard_bits + 4);
    let max_per_shard = (max_open_files / num_shards as u32).max(4);
    (num_shards, max_per_shard)
}

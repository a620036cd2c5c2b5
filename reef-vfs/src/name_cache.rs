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

//! The name cache: (parent FH, name) to child FH with a TTL.
//!
//! Same reader/writer discipline as the attribute cache. The entry key is
//! `parent_fh_hash ^ name_hash`; a hit additionally requires byte-equal
//! parent FH and name. Victim selection treats expired entries as score −1
//! so they always lose to live ones.

use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam::epoch::{self, Atomic, Owned};
use parking_lot::Mutex;
use reef_common::{
    clock::{self, NS_PER_SEC},
    counters::{CacheCounters, CounterSnapshot},
    fh::Fh,
};

struct NameEntry {
    key: u64,
    parent: Fh,
    name: String,
    child: Fh,
    expiration: u64,
    score: AtomicI64,
}

impl NameEntry {
    /// Score used during victim selection: expired entries lose to anything.
    fn effective_score(&self, now: u64) -> i64 {
        if self.expiration < now {
            -1
        } else {
            self.score.load(Ordering::Relaxed)
        }
    }
}

/// (parent FH, name)-keyed child-handle cache.
pub struct NameCache {
    slots: Box<[Atomic<NameEntry>]>,
    entry_locks: Box<[Mutex<()>]>,
    counters: Box<[CacheCounters]>,

    shards_mask: u64,
    slots_mask: u64,
    shard_bits: u8,
    entry_bits: u8,
    entries_per_slot: usize,
    slots_per_shard: usize,
    ttl_ns: u64,
}

impl NameCache {
    pub fn new(shard_bits: u8, slot_bits: u8, entry_bits: u8, ttl_secs: u64) -> Self {
        let num_shards = 1usize << shard_bits;
        let num_slots = 1usize << slot_bits;
        let entries_per_slot = 1usize << entry_bits;
        let total = num_shards * num_slots * entries_per_slot;

        Self {
            slots: (0..total).map(|_| Atomic::null()).collect(),
            entry_locks: (0..num_shards).map(|_| Mutex::new(())).collect(),
            counters: (0..num_shards).map(|_| CacheCounters::default()).collect(),
            shards_mask: num_shards as u64 - 1,
            slots_mask: num_slots as u64 - 1,
            shard_bits,
            entry_bits,
            entries_per_slot,
            slots_per_shard: num_slots * entries_per_slot,
            ttl_ns: ttl_secs * NS_PER_SEC,
        }
    }

    fn shard_of(&self, key: u64) -> usize {
        (key & self.shards_mask) as usize
    }

    fn bucket_base(&self, key: u64) -> usize {
        let shard = self.shard_of(key);
        let slot = ((key >> self.shard_bits) & self.slots_mask) as usize;
        shard * self.slots_per_shard + (slot << self.entry_bits)
    }

    /// Resolve (parent, name) to the child FH if a live entry exists.
    pub fn lookup(&self, parent_hash: u64, parent: &Fh, name_hash: u64, name: &str) -> Option<Fh> {
        let key = parent_hash ^ name_hash;
        let now = clock::monotonic_ns();
        let shard = self.shard_of(key);
        let base = self.bucket_base(key);

        let mut found = None;

        let guard = epoch::pin();
        for slot in &self.slots[base..base + self.entries_per_slot] {
            let shared = slot.load(Ordering::Acquire, &guard);
            if let Some(entry) = unsafe { shared.as_ref() } {
                if entry.key == key
                    && entry.expiration >= now
                    && entry.parent == *parent
                    && entry.name == name
                {
                    entry.score.fetch_add(1, Ordering::Relaxed);
                    found = Some(entry.child);
                    break;
                }
            }
        }
        drop(guard);

        if found.is_some() {
            self.counters[shard].hit.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters[shard].miss.fetch_add(1, Ordering::Relaxed);
        }

        found
    }

    /// Insert (parent, name) → child.
    ///
    /// Victim order: the same (parent, name) always replaces itself; an
    /// empty slot beats any occupied one; otherwise the lowest effective
    /// score loses, and on a score tie the entry expiring later is taken.
    pub fn insert(&self, parent_hash: u64, parent: &Fh, name_hash: u64, name: &str, child: &Fh) {
        let expiration = clock::monotonic_ns() + self.ttl_ns;
        self.insert_with_expiration(parent_hash, parent, name_hash, name, child, expiration);
    }

    fn insert_with_expiration(
        &self,
        parent_hash: u64,
        parent: &Fh,
        name_hash: u64,
        name: &str,
        child: &Fh,
        expiration: u64,
    ) {
        let key = parent_hash ^ name_hash;
        let now = clock::monotonic_ns();
        let shard = self.shard_of(key);
        let base = self.bucket_base(key);

        let entry = Owned::new(NameEntry {
            key,
            parent: *parent,
            name: name.to_string(),
            child: *child,
            expiration,
            score: AtomicI64::new(0),
        });

        let guard = epoch::pin();
        let lock = self.entry_locks[shard].lock();

        let mut best_idx = base;
        let mut best_empty = false;
        let mut best: Option<(i64, u64)> = None;

        for (i, slot) in self.slots[base..base + self.entries_per_slot].iter().enumerate() {
            let shared = slot.load(Ordering::Acquire, &guard);
            match unsafe { shared.as_ref() } {
                Some(old) if old.key == key && old.parent == *parent && old.name == name => {
                    best_idx = base + i;
                    break;
                }
                Some(old) => {
                    if best_empty {
                        continue;
                    }
                    let candidate = (old.effective_score(now), old.expiration);
                    let better = match best {
                        None => true,
                        Some((score, expiration)) => {
                            candidate.0 < score || (candidate.0 == score && candidate.1 > expiration)
                        }
                    };
                    if better {
                        best = Some(candidate);
                        best_idx = base + i;
                    }
                }
                None => {
                    if !best_empty {
                        best_empty = true;
                        best_idx = base + i;
                    }
                }
            }
        }

        let old = self.slots[best_idx].swap(entry, Ordering::Release, &guard);

        self.counters[shard].insert.fetch_add(1, Ordering::Relaxed);

        drop(lock);

        if !old.is_null() {
            unsafe { guard.defer_destroy(old) };
        }
    }

    /// Drop the entry for (parent, name) if present.
    ///
    /// No negative entry is inserted: see the rename path for why the source
    /// name may still be valid afterwards.
    pub fn remove(&self, parent_hash: u64, parent: &Fh, name_hash: u64, name: &str) {
        let key = parent_hash ^ name_hash;
        let shard = self.shard_of(key);
        let base = self.bucket_base(key);

        let guard = epoch::pin();
        let lock = self.entry_locks[shard].lock();

        let mut removed = None;

        for slot in &self.slots[base..base + self.entries_per_slot] {
            let shared = slot.load(Ordering::Acquire, &guard);
            if let Some(entry) = unsafe { shared.as_ref() } {
                if entry.key == key && entry.parent == *parent && entry.name == name {
                    removed = Some(slot.swap(crossbeam::epoch::Shared::null(), Ordering::Release, &guard));
                    break;
                }
            }
        }

        if removed.is_some() {
            self.counters[shard].remove.fetch_add(1, Ordering::Relaxed);
        }

        drop(lock);

        if let Some(old) = removed {
            if !old.is_null() {
                unsafe { guard.defer_destroy(old) };
            }
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters
            .iter()
            .fold(CounterSnapshot::default(), |acc, c| acc.merge(&c.snapshot()))
    }
}

impl Drop for NameCache {
    fn drop(&mut self) {
        let guard = unsafe { epoch::unprotected() };
        for slot in self.slots.iter() {
            let shared = slot.load(Ordering::Relaxed, guard);
            if !shared.is_null() {
                drop(unsafe { shared.into_owned() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use reef_common::hash::{fh_hash, name_hash};

    use super::*;

    fn cache() -> NameCache {
        NameCache::new(1, 2, 1, 30)
    }

    fn keys(parent: &Fh, name: &str) -> (u64, u64) {
        (fh_hash(parent.as_bytes()), name_hash(name.as_bytes()))
    }

    #[test]
    fn test_insert_lookup_remove() {
        let cache = cache();
        let parent = Fh::new(&[1; 4]);
        let child = Fh::new(&[2; 4]);
        let (ph, nh) = keys(&parent, "file.0");

        assert!(cache.lookup(ph, &parent, nh, "file.0").is_none());

        cache.insert(ph, &parent, nh, "file.0", &child);
        assert_eq!(cache.lookup(ph, &parent, nh, "file.0"), Some(child));

        cache.remove(ph, &parent, nh, "file.0");
        assert!(cache.lookup(ph, &parent, nh, "file.0").is_none());

        let snapshot = cache.counters();
        assert_eq!(snapshot.insert, 1);
        assert_eq!(snapshot.remove, 1);
    }

    #[test]
    fn test_hit_requires_equal_parent_and_name() {
        let cache = cache();
        let parent = Fh::new(&[1; 4]);
        let other_parent = Fh::new(&[9; 4]);
        let child = Fh::new(&[2; 4]);
        let (ph, nh) = keys(&parent, "name");

        cache.insert(ph, &parent, nh, "name", &child);

        // Same key bits, different parent bytes: no hit.
        assert!(cache.lookup(ph, &other_parent, nh, "name").is_none());
    }

    #[test]
    fn test_lowest_score_is_victim() {
        // One slot, two entries.
        let cache = NameCache::new(0, 0, 1, 30);
        let parent = Fh::new(&[1]);
        let ph = fh_hash(parent.as_bytes());

        cache.insert(ph, &parent, name_hash(b"a"), "a", &Fh::new(&[10]));
        cache.insert(ph, &parent, name_hash(b"b"), "b", &Fh::new(&[11]));

        // Heat up `a` so `b` becomes the victim.
        for _ in 0..5 {
            cache.lookup(ph, &parent, name_hash(b"a"), "a");
        }

        cache.insert(ph, &parent, name_hash(b"c"), "c", &Fh::new(&[12]));

        assert_eq!(cache.lookup(ph, &parent, name_hash(b"a"), "a"), Some(Fh::new(&[10])));
        assert!(cache.lookup(ph, &parent, name_hash(b"b"), "b").is_none());
        assert_eq!(cache.lookup(ph, &parent, name_hash(b"c"), "c"), Some(Fh::new(&[12])));
    }

    #[test]
    fn test_expired_loses_to_live_entry() {
        // One slot, two entries. `a` is expired; eviction must pick it over
        // the live entry even though their stored scores tie.
        let cache = NameCache::new(0, 0, 1, 30);
        let parent = Fh::new(&[1]);
        let ph = fh_hash(parent.as_bytes());

        cache.insert_with_expiration(ph, &parent, name_hash(b"a"), "a", &Fh::new(&[10]), 1);
        cache.insert(ph, &parent, name_hash(b"b"), "b", &Fh::new(&[11]));

        cache.insert(ph, &parent, name_hash(b"c"), "c", &Fh::new(&[12]));

        assert!(cache.lookup(ph, &parent, name_hash(b"a"), "a").is_none());
        assert_eq!(cache.lookup(ph, &parent, name_hash(b"b"), "b"), Some(Fh::new(&[11])));
        assert_eq!(cache.lookup(ph, &parent, name_hash(b"c"), "c"), Some(Fh::new(&[12])));
    }

    #[test]
    fn test_same_name_replaces_in_place() {
        let cache = cache();
        let parent = Fh::new(&[3; 8]);
        let (ph, nh) = keys(&parent, "x");

        cache.insert(ph, &parent, nh, "x", &Fh::new(&[1]));
        cache.insert(ph, &parent, nh, "x", &Fh::new(&[2]));

        assert_eq!(cache.lookup(ph, &parent, nh, "x"), Some(Fh::new(&[2])));
    }
}

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

//! The attribute cache: FH to attributes with a TTL.
//!
//! Readers never take a lock: slots are epoch-protected atomic pointers and
//! lookups run inside a pinned read section. Writers serialize on a per-shard
//! entry lock, publish with a release store, and retire the displaced entry
//! after the grace period.

use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam::epoch::{self, Atomic, Owned};
use parking_lot::Mutex;
use reef_common::{
    attrs::Attrs,
    clock::{self, NS_PER_SEC},
    counters::{CacheCounters, CounterSnapshot},
    fh::Fh,
};

struct AttrEntry {
    key: u64,
    /// Monotonic ns deadline.
    expiration: u64,
    /// Bumped on every hit; replacement evicts the lowest.
    score: AtomicI64,
    attrs: Attrs,
}

/// FH-keyed attribute cache with score-biased slot replacement.
pub struct AttrCache {
    slots: Box<[Atomic<AttrEntry>]>,
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

impl AttrCache {
    /// All three dimensions are bit counts; the slot table holds
    /// `2^(shard_bits + slot_bits + entry_bits)` entries.
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

    fn shard_of(&self, hash: u64) -> usize {
        (hash & self.shards_mask) as usize
    }

    /// First slot index of the bucket owning `hash`.
    fn bucket_base(&self, hash: u64) -> usize {
        let shard = self.shard_of(hash);
        let slot = ((hash >> self.shard_bits) & self.slots_mask) as usize;
        shard * self.slots_per_shard + (slot << self.entry_bits)
    }

    /// Probe the bucket for an unexpired entry matching the handle.
    pub fn lookup(&self, fh_hash: u64, fh: &Fh) -> Option<Attrs> {
        let now = clock::monotonic_ns();
        let shard = self.shard_of(fh_hash);
        let base = self.bucket_base(fh_hash);

        let mut found = None;

        let guard = epoch::pin();
        for slot in &self.slots[base..base + self.entries_per_slot] {
            let shared = slot.load(Ordering::Acquire, &guard);
            // Readers may observe an entry that a writer is about to retire;
            // the epoch guard keeps it alive for the duration.
            if let Some(entry) = unsafe { shared.as_ref() } {
                if entry.key == fh_hash && entry.expiration >= now && entry.attrs.fh == *fh {
                    entry.score.fetch_add(1, Ordering::Relaxed);
                    found = Some(entry.attrs);
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

    /// Insert attributes for a handle.
    ///
    /// Skipped unless the full stat set was returned; partial results are
    /// not worth caching and must not shadow complete ones. The handle is
    /// stamped into the stored attrs so hits can serve open-by-FH flows.
    pub fn insert(&self, fh_hash: u64, fh: &Fh, attrs: &Attrs) {
        if !attrs.stat_complete() {
            return;
        }

        let shard = self.shard_of(fh_hash);
        let base = self.bucket_base(fh_hash);

        let mut stored = *attrs;
        stored.set_fh(fh);

        let entry = Owned::new(AttrEntry {
            key: fh_hash,
            expiration: clock::monotonic_ns() + self.ttl_ns,
            score: AtomicI64::new(0),
            attrs: stored,
        });

        let guard = epoch::pin();
        let lock = self.entry_locks[shard].lock();

        // Same key always replaces; otherwise prefer an empty slot, else the
        // lowest-score victim.
        let mut best_idx = base;
        let mut best_empty = false;
        let mut best_score = i64::MAX;

        for (i, slot) in self.slots[base..base + self.entries_per_slot].iter().enumerate() {
            let shared = slot.load(Ordering::Acquire, &guard);
            match unsafe { shared.as_ref() } {
                Some(old) if old.key == fh_hash => {
                    best_idx = base + i;
                    break;
                }
                Some(old) => {
                    if !best_empty {
                        let score = old.score.load(Ordering::Relaxed);
                        if score < best_score {
                            best_score = score;
                            best_idx = base + i;
                        }
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

    pub fn counters(&self) -> CounterSnapshot {
        self.counters
            .iter()
            .fold(CounterSnapshot::default(), |acc, c| acc.merge(&c.snapshot()))
    }
}

impl Drop for AttrCache {
    fn drop(&mut self) {
        // No concurrent readers can exist at drop; reclaim in place.
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
    use reef_common::{attrs::AttrMask, hash::fh_hash};

    use super::*;

    fn full_attrs(size: u64) -> Attrs {
        let mut attrs = Attrs::default();
        attrs.set_mask = AttrMask::STAT;
        attrs.size = size;
        attrs.mode = 0o644;
        attrs.nlink = 1;
        attrs
    }

    fn cache() -> AttrCache {
        AttrCache::new(1, 2, 1, 30)
    }

    #[test]
    fn test_insert_lookup_roundtrip() {
        let cache = cache();
        let fh = Fh::new(&[1, 2, 3]);
        let hash = fh_hash(fh.as_bytes());

        assert!(cache.lookup(hash, &fh).is_none());

        cache.insert(hash, &fh, &full_attrs(42));

        let attrs = cache.lookup(hash, &fh).unwrap();
        assert_eq!(attrs.size, 42);
        assert_eq!(attrs.fh, fh);
        assert!(attrs.set_mask.contains(AttrMask::FH));

        let snapshot = cache.counters();
        assert_eq!(snapshot.hit, 1);
        assert_eq!(snapshot.miss, 1);
        assert_eq!(snapshot.insert, 1);
    }

    #[test]
    fn test_partial_attrs_not_cached() {
        let cache = cache();
        let fh = Fh::new(&[9]);
        let hash = fh_hash(fh.as_bytes());

        let mut attrs = full_attrs(1);
        attrs.set_mask = AttrMask::SIZE | AttrMask::MODE;
        cache.insert(hash, &fh, &attrs);

        assert!(cache.lookup(hash, &fh).is_none());
        assert_eq!(cache.counters().insert, 0);
    }

    #[test]
    fn test_same_key_replaces() {
        let cache = cache();
        let fh = Fh::new(&[7, 7]);
        let hash = fh_hash(fh.as_bytes());

        cache.insert(hash, &fh, &full_attrs(1));
        cache.insert(hash, &fh, &full_attrs(2));

        assert_eq!(cache.lookup(hash, &fh).unwrap().size, 2);
    }

    #[test]
    fn test_lowest_score_evicted() {
        // Single slot of two entries so a third insert must pick a victim.
        let cache = AttrCache::new(0, 0, 1, 30);

        let fh_a = Fh::new(&[1]);
        let fh_b = Fh::new(&[2]);
        let fh_c = Fh::new(&[3]);
        let (ha, hb, hc) = (
            fh_hash(fh_a.as_bytes()),
            fh_hash(fh_b.as_bytes()),
            fh_hash(fh_c.as_bytes()),
        );

        cache.insert(ha, &fh_a, &full_attrs(1));
        cache.insert(hb, &fh_b, &full_attrs(2));

        // Heat up `a` so `b` is the lowest-score victim.
        for _ in 0..3 {
            assert!(cache.lookup(ha, &fh_a).is_some());
        }

        cache.insert(hc, &fh_c, &full_attrs(3));

        assert!(cache.lookup(ha, &fh_a).is_some());
        assert!(cache.lookup(hb, &fh_b).is_none());
        assert!(cache.lookup(hc, &fh_c).is_some());
    }

    #[test]
    fn test_expired_entry_misses() {
        let cache = AttrCache::new(0, 0, 1, 0);
        let fh = Fh::new(&[5]);
        let hash = fh_hash(fh.as_bytes());

        cache.insert(hash, &fh, &full_attrs(1));
        std::thread::sleep(std::time::Duration::from_millis(2));

        assert!(cache.lookup(hash, &fh).is_none());
    }

    #[test]
    fn test_readers_survive_replacement() {
        use std::sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        };

        let cache = Arc::new(AttrCache::new(0, 0, 1, 30));
        let fh = Fh::new(&[1, 1, 1]);
        let hash = fh_hash(fh.as_bytes());
        cache.insert(hash, &fh, &full_attrs(0));

        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        if let Some(attrs) = cache.lookup(hash, &fh) {
                            assert_eq!(attrs.fh, fh);
                        }
                    }
                })
            })
            .collect();

        for i in 0..10_000u64 {
            cache.insert(hash, &fh, &full_attrs(i));
        }

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }
}

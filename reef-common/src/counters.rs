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

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-shard cache counters.
///
/// Kept as plain atomics; an exporter can snapshot them without touching the
/// shard locks.
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub hit: AtomicU64,
    pub miss: AtomicU64,
    pub insert: AtomicU64,
    pub acquire: AtomicU64,
    pub remove: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CounterSnapshot {
    pub hit: u64,
    pub miss: u64,
    pub insert: u64,
    pub acquire: u64,
    pub remove: u64,
}

impl CacheCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            insert: self.insert.load(Ordering::Relaxed),
            acquire: self.acquire.load(Ordering::Relaxed),
            remove: self.remove.load(Ordering::Relaxed),
        }
    }
}

impl CounterSnapshot {
    pub fn merge(&self, other: &CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            hit: self.hit + other.hit,
            miss: self.miss + other.miss,
            insert: self.insert + other.insert,
            acquire: self.acquire + other.acquire,
            remove: self.remove + other.remove,
        }
    }
}

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

use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;

// Fixed seeds: a hash is computed once and carried with every reference, so
// it must agree across threads and cache instances for the process lifetime.
const SEEDS: (u64, u64, u64, u64) = (
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

fn state() -> RandomState {
    RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3)
}

/// 64-bit hash over file-handle bytes.
pub fn fh_hash(bytes: &[u8]) -> u64 {
    let mut hasher = state().build_hasher();
    hasher.write(bytes);
    hasher.finish()
}

/// 64-bit hash over a directory-entry name.
pub fn name_hash(name: &[u8]) -> u64 {
    fh_hash(name)
}

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

//! The reef VFS core.
//!
//! This crate holds the concurrency and caching engine behind the NAS
//! frontends: the sharded reference-counted open-handle caches, the
//! RCU-protected attribute and name caches, the request dispatch pipeline,
//! and the rename-on-unlink state machine that keeps unlinked-but-open files
//! readable until their last reference goes away.

pub mod attr_cache;
pub mod context;
pub mod error;
pub mod module;
pub mod name_cache;
pub mod open_cache;
pub mod proc;
pub mod request;
pub mod shards;
pub mod silly;
mod sweeper;
pub mod thread;

pub mod test_utils;

pub mod prelude;
pub use prelude::*;

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

//! reef - the NAS VFS core.
//!
//! This facade re-exports the public API of the workspace crates. Most users
//! want [`prelude`].

pub use reef_common as common;
pub use reef_vfs::{
    attr_cache, context, error, module, name_cache, open_cache, proc, request, shards, silly,
    test_utils, thread,
};

pub use reef_vfs::prelude::*;

pub mod prelude {
    pub use reef_vfs::prelude::*;
}

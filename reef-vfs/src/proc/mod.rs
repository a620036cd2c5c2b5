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

//! Per-operation procedures.
//!
//! Each operation builds a request, dispatches it to the backend module, and
//! finishes in a completion that updates the attribute/name caches on
//! success before invoking the caller's callback and recycling the request.

pub mod allocate;
pub mod close;
pub mod commit;
pub mod create_unlinked;
pub mod getattr;
pub mod getrootfh;
pub mod link;
pub mod lookup;
pub mod mkdir;
pub mod open;
pub mod open_at;
pub mod read;
pub mod readdir;
pub mod readlink;
pub mod remove;
pub mod rename_at;
pub mod rmdir;
pub mod setattr;
pub mod statfs;
pub mod symlink;
pub mod write;

use tracing::trace;

use crate::{
    context::Vfs,
    open_cache::{OpenCache, OpenFlags},
    request::Request,
};

/// Hand a built request to its backend module.
pub(crate) fn dispatch(request: Box<Request>) {
    trace!(
        op = request.op.opcode(),
        module = request.module.name(),
        fh_hash = request.fh_hash,
        "dispatching request"
    );
    let module = request.module.clone();
    module.dispatch(request);
}

/// Path-mode opens use the open-path cache; everything else the open-file
/// cache.
pub(crate) fn open_cache_for(vfs: &Vfs, flags: OpenFlags) -> &OpenCache {
    if flags.contains(OpenFlags::PATH) {
        vfs.open_path_cache()
    } else {
        vfs.open_file_cache()
    }
}

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

//! Silly-rename state.
//!
//! Removing a file that is still open renames it to a hidden name instead,
//! so existing handles keep working; the hidden file is removed when the
//! last reference goes away. The per-handle mark lives in the open handle's
//! extension slot and is idempotent: a second remove of an already-renamed
//! file reports success without issuing anything.

use std::{any::Any, sync::Arc};

use parking_lot::Mutex;
use reef_common::{
    attrs::{AttrMask, Attrs},
    fh::{Fh, FH_MAX},
    hash::name_hash,
};
use tracing::debug;

use crate::{
    open_cache::OpenHandleRef,
    proc::{self, remove::remove_complete},
    request::{Cred, OpData},
    thread::VfsThread,
};

pub const SILLY_PREFIX: &str = ".nfs";

/// Upper bound on a silly name: prefix, hex of the handle, terminator slack.
pub const SILLY_NAME_MAX: usize = 5 + 2 * FH_MAX;

/// The hidden name for an unlinked-but-open file.
///
/// Deterministic from the child FH so concurrent or retried removes converge
/// on the same name.
pub fn silly_name(child_fh: &Fh) -> String {
    format!("{}{}", SILLY_PREFIX, child_fh.hex())
}

/// Per-open-handle silly-rename state, reached through the handle's
/// extension slot.
#[derive(Default)]
pub struct SillyState {
    parent: Mutex<Option<Fh>>,
}

impl SillyState {
    /// Mark the handle silly-renamed into `parent`.
    ///
    /// Returns false when already marked; the caller then reports the remove
    /// as already done.
    pub fn mark(&self, parent: &Fh) -> bool {
        let mut slot = self.parent.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(*parent);
        true
    }

    pub fn marked_parent(&self) -> Option<Fh> {
        *self.parent.lock()
    }

    fn take(&self) -> Option<Fh> {
        self.parent.lock().take()
    }
}

/// The silly state for `handle`, created on first use.
pub fn state(handle: &OpenHandleRef) -> Arc<SillyState> {
    let ext = handle
        .ext()
        .get_or_init(|| Arc::new(SillyState::default()) as Arc<dyn Any + Send + Sync>);
    ext.clone()
        .downcast::<SillyState>()
        .expect("open handle extension slot holds foreign state")
}

/// Consume the silly mark, if any, without creating state.
pub(crate) fn take_marked(handle: &OpenHandleRef) -> Option<Fh> {
    handle
        .ext()
        .get()
        .and_then(|ext| ext.clone().downcast::<SillyState>().ok())
        .and_then(|state| state.take())
}

/// Issue the deferred remove of the hidden name once the marked handle's
/// backend close has gone through. Fire-and-forget: a failure only logs.
pub(crate) fn remove_silly(thread: &VfsThread, handle: &OpenHandleRef, parent: &Fh) {
    let name = silly_name(handle.fh());

    debug!(%name, "removing silly-renamed file after last close");

    let mut request =
        thread.request_alloc_for_module(&Cred::default(), parent, handle.module().clone());

    request.op = OpData::Remove {
        name_hash: name_hash(name.as_bytes()),
        name,
        r_dir_pre_attr: Attrs::request(AttrMask::empty()),
        r_dir_post_attr: Attrs::request(AttrMask::STAT),
        cb: Some(Box::new(|status, _, _| {
            if let Err(error) = status {
                debug!(%error, "silly-name remove failed");
            }
        })),
    };
    request.completion = Some(remove_complete);

    proc::dispatch(request);
}

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

//! Open by file handle.
//!
//! The open-handle cache is consulted first. A cache hit returns without any
//! backend traffic; a miss installs a pending handle and dispatches the
//! backend open, with concurrent acquirers parking on the handle until it is
//! populated.

use reef_common::fh::Fh;

use crate::{
    error::Status,
    open_cache::{OpenFlags, OpenHandleRef, VFS_PRIVATE_UNSET},
    proc::{dispatch, open_cache_for},
    request::{Cred, OpData, Request},
    thread::VfsThread,
};

pub fn open(
    thread: &VfsThread,
    cred: &Cred,
    fh: &Fh,
    flags: OpenFlags,
    exclusive: bool,
    callback: impl FnOnce(Status, Option<OpenHandleRef>) + Send + 'static,
) {
    let mut request = match thread.request_alloc(cred, fh) {
        Ok(request) => request,
        Err(error) => {
            callback(Err(error), None);
            return;
        }
    };

    request.op = OpData::Open {
        flags,
        handle: None,
        r_vfs_private: VFS_PRIVATE_UNSET,
        cb: Some(Box::new(callback)),
    };
    request.completion = Some(open_complete);

    let module = request.module.clone();
    let fh_hash = request.fh_hash;
    let cache = open_cache_for(thread.vfs(), flags);

    cache.acquire(
        thread,
        module,
        request,
        fh,
        fh_hash,
        VFS_PRIVATE_UNSET,
        flags,
        exclusive,
        Box::new(open_acquired),
    );
}

/// Continuation invoked by the open cache once a handle is available.
///
/// A pending handle means this request owns the backend open; anything else
/// is a hit (or a failed wait) and completes directly.
fn open_acquired(mut request: Box<Request>, handle: Option<OpenHandleRef>) {
    if let Some(h) = &handle {
        if h.is_pending() {
            if let OpData::Open { handle: slot, .. } = &mut request.op {
                *slot = Some(h.clone());
            }
            dispatch(request);
            return;
        }
    }

    if let OpData::Open { handle: slot, .. } = &mut request.op {
        *slot = handle;
    }
    request.complete();
}

fn open_complete(mut request: Box<Request>) {
    let thread = request.thread.clone();
    let status = request.status;

    let OpData::Open {
        flags,
        handle,
        r_vfs_private,
        cb,
        ..
    } = std::mem::take(&mut request.op)
    else {
        unreachable!("open completion on foreign request");
    };

    let cb = cb.expect("open callback consumed twice");
    let cache = open_cache_for(thread.vfs(), flags);

    match (status, handle) {
        (Ok(()), Some(handle)) => {
            if handle.is_pending() {
                cache.populate(&thread, &handle, r_vfs_private);
            }
            cb(Ok(()), Some(handle));
        }
        (Err(error), Some(handle)) => {
            // The backend open failed: purge the handle and fail every
            // queued waiter along with it.
            cache.release(&thread, &handle, Err(error));
            cb(Err(error), None);
        }
        (status, None) => cb(status, None),
    }

    thread.request_recycle(request);
}

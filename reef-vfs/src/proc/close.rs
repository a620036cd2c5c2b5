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

//! Backend close of a handle that has left the open cache.
//!
//! Used by capacity eviction, detached-handle release, and the deferred
//! close sweeper. A handle marked silly-renamed gets the hidden name removed
//! once the close has gone through.

use crate::{
    error::Status,
    open_cache::OpenHandleRef,
    proc::dispatch,
    request::{Cred, OpData, Request},
    silly,
    thread::VfsThread,
};

pub(crate) fn close_handle(
    thread: &VfsThread,
    handle: OpenHandleRef,
    done: impl FnOnce(Status) + Send + 'static,
) {
    if handle.is_synthetic() {
        // Synthetic handles hold no backend resource.
        done(Ok(()));
        return;
    }

    let mut request = thread.request_alloc_by_handle(&Cred::default(), &handle);

    request.op = OpData::Close {
        handle,
        cb: Some(Box::new(done)),
    };
    request.completion = Some(close_complete);

    dispatch(request);
}

fn close_complete(mut request: Box<Request>) {
    let thread = request.thread.clone();
    let status = request.status;

    let OpData::Close { handle, cb, .. } = std::mem::take(&mut request.op) else {
        unreachable!("close completion on foreign request");
    };

    // The last close of a silly-renamed file removes the hidden name.
    if let Some(parent) = silly::take_marked(&handle) {
        silly::remove_silly(&thread, &handle, &parent);
    }

    let cb = cb.expect("close callback consumed twice");
    cb(status);

    thread.request_recycle(request);
}

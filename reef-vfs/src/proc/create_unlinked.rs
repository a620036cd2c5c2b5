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

//! Create an orphaned file with no directory entry.
//!
//! The object exists only while handles reference it; the fresh handle is
//! installed with the open cache's always-insert path rather than acquire.

use reef_common::{
    attrs::{AttrMask, Attrs},
    fh::Fh,
    hash::fh_hash,
};

use crate::{
    error::Status,
    module::Capabilities,
    open_cache::{OpenFlags, OpenHandleRef},
    proc::dispatch,
    request::{Cred, OpData, Request},
    thread::VfsThread,
};

pub fn create_unlinked(
    thread: &VfsThread,
    cred: &Cred,
    fh: &Fh,
    set_attr: Attrs,
    attr_mask: AttrMask,
    callback: impl FnOnce(Status, Option<OpenHandleRef>, Attrs) + Send + 'static,
) {
    let mut request = match thread.request_alloc(cred, fh) {
        Ok(request) => request,
        Err(error) => {
            callback(Err(error), None, Attrs::default());
            return;
        }
    };

    assert!(
        request
            .module
            .capabilities()
            .contains(Capabilities::CREATE_UNLINKED),
        "module does not support create_unlinked"
    );

    request.op = OpData::CreateUnlinked {
        anon_key: thread.next_anon_key(),
        flags: OpenFlags::empty(),
        set_attr,
        r_attr: Attrs::request(attr_mask | AttrMask::STAT | AttrMask::FH),
        r_vfs_private: 0,
        cb: Some(Box::new(callback)),
    };
    request.completion = Some(create_unlinked_complete);

    dispatch(request);
}

fn create_unlinked_complete(request: Box<Request>) {
    let thread = request.thread.clone();

    if request.status.is_err() {
        create_unlinked_handle_installed(request, None);
        return;
    }

    let (child_fh, flags, r_vfs_private) = match &request.op {
        OpData::CreateUnlinked {
            r_attr,
            flags,
            r_vfs_private,
            ..
        } => {
            assert!(
                r_attr.set_mask.contains(AttrMask::FH),
                "create_unlinked: no fh returned from vfs module"
            );
            (r_attr.fh, *flags, *r_vfs_private)
        }
        _ => unreachable!("create_unlinked completion on foreign request"),
    };

    let child_hash = fh_hash(child_fh.as_bytes());
    let module = request.module.clone();

    thread.vfs().open_file_cache().insert(
        &thread,
        module,
        request,
        &child_fh,
        child_hash,
        r_vfs_private,
        flags,
        Box::new(create_unlinked_handle_installed),
    );
}

fn create_unlinked_handle_installed(mut request: Box<Request>, handle: Option<OpenHandleRef>) {
    let thread = request.thread.clone();
    let status = request.status;

    let OpData::CreateUnlinked { r_attr, cb, .. } = std::mem::take(&mut request.op) else {
        unreachable!("create_unlinked completion on foreign request");
    };

    if status.is_ok() {
        thread
            .vfs()
            .attr_cache()
            .insert(fh_hash(r_attr.fh.as_bytes()), &r_attr.fh, &r_attr);
    }

    let cb = cb.expect("create_unlinked callback consumed twice");
    cb(status, handle, r_attr);

    thread.request_recycle(request);
}

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

//! Open (and optionally create) a child of an open directory.
//!
//! On success the freshly opened object is installed into the open cache
//! with the always-insert path, the (parent, name) mapping goes into the
//! name cache, and both the child's and the directory's attributes are
//! cached. Modules that do not require real open files may get a synthetic
//! handle for inferred opens.

use reef_common::{
    attrs::{AttrMask, Attrs},
    hash::{fh_hash, name_hash},
};

use crate::{
    error::Status,
    module::Capabilities,
    open_cache::{OpenFlags, OpenHandle, OpenHandleRef},
    proc::{dispatch, open_cache_for},
    request::{Cred, OpData, Request},
    thread::VfsThread,
};

#[allow(clippy::too_many_arguments)]
pub fn open_at(
    thread: &VfsThread,
    cred: &Cred,
    parent: &OpenHandleRef,
    name: &str,
    flags: OpenFlags,
    set_attr: Attrs,
    attr_mask: AttrMask,
    callback: impl FnOnce(Status, Option<OpenHandleRef>, Attrs, Attrs, Attrs) + Send + 'static,
) {
    let mut request = thread.request_alloc_by_handle(cred, parent);

    request.op = OpData::OpenAt {
        parent: parent.clone(),
        name: name.to_string(),
        name_hash: name_hash(name.as_bytes()),
        flags,
        set_attr,
        r_attr: Attrs::request(attr_mask | AttrMask::STAT | AttrMask::FH),
        r_dir_pre_attr: Attrs::request(AttrMask::SIZE | AttrMask::MTIME | AttrMask::CTIME),
        r_dir_post_attr: Attrs::request(AttrMask::STAT),
        r_vfs_private: 0,
        cb: Some(Box::new(callback)),
    };
    request.completion = Some(open_at_complete);

    dispatch(request);
}

fn open_at_complete(request: Box<Request>) {
    let thread = request.thread.clone();

    if request.status.is_err() {
        open_at_handle_installed(request, None);
        return;
    }

    let (child_fh, flags, r_vfs_private) = match &request.op {
        OpData::OpenAt {
            r_attr,
            flags,
            r_vfs_private,
            ..
        } => {
            assert!(
                r_attr.set_mask.contains(AttrMask::FH),
                "open_at: no fh returned from vfs module"
            );
            (r_attr.fh, *flags, *r_vfs_private)
        }
        _ => unreachable!("open_at completion on foreign request"),
    };

    let child_hash = fh_hash(child_fh.as_bytes());
    let module = request.module.clone();

    if module.capabilities().contains(Capabilities::OPEN_FILE_REQUIRED)
        || !flags.contains(OpenFlags::INFERRED)
    {
        let cache = open_cache_for(thread.vfs(), flags);
        cache.insert(
            &thread,
            module,
            request,
            &child_fh,
            child_hash,
            r_vfs_private,
            flags,
            Box::new(open_at_handle_installed),
        );
    } else {
        // Inferred open on a module that needs no open handles: synthesize
        // one and skip the cache entirely.
        let handle = OpenHandle::synthetic(module, &child_fh, child_hash);
        open_at_handle_installed(request, Some(handle));
    }
}

fn open_at_handle_installed(mut request: Box<Request>, handle: Option<OpenHandleRef>) {
    let thread = request.thread.clone();
    let status = request.status;

    let OpData::OpenAt {
        parent,
        name,
        name_hash,
        r_attr,
        r_dir_pre_attr,
        r_dir_post_attr,
        cb,
        ..
    } = std::mem::take(&mut request.op)
    else {
        unreachable!("open_at completion on foreign request");
    };

    if status.is_ok() {
        let vfs = thread.vfs();
        vfs.name_cache()
            .insert(parent.fh_hash(), parent.fh(), name_hash, &name, &r_attr.fh);
        vfs.attr_cache()
            .insert(parent.fh_hash(), parent.fh(), &r_dir_post_attr);
        vfs.attr_cache()
            .insert(fh_hash(r_attr.fh.as_bytes()), &r_attr.fh, &r_attr);
    }

    let cb = cb.expect("open_at callback consumed twice");
    cb(status, handle, r_attr, r_dir_pre_attr, r_dir_post_attr);

    thread.request_recycle(request);
}

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

//! Resolve (directory, name) to the child's handle and attributes.
//!
//! The name cache answers the (parent, name) → FH step and the attribute
//! cache the attributes; only when either misses does the backend see the
//! lookup. Negative results are never cached.

use reef_common::{
    attrs::{AttrMask, Attrs},
    fh::Fh,
    hash::{fh_hash, name_hash},
};

use crate::{
    error::Status,
    proc::dispatch,
    request::{Cred, OpData, Request},
    thread::VfsThread,
};

pub fn lookup(
    thread: &VfsThread,
    cred: &Cred,
    dir_fh: &Fh,
    name: &str,
    attr_mask: AttrMask,
    callback: impl FnOnce(Status, Attrs, Attrs) + Send + 'static,
) {
    let vfs = thread.vfs();
    let dir_hash = fh_hash(dir_fh.as_bytes());
    let nhash = name_hash(name.as_bytes());

    if let Some(child_fh) = vfs.name_cache().lookup(dir_hash, dir_fh, nhash, name) {
        if let Some(attrs) = vfs
            .attr_cache()
            .lookup(fh_hash(child_fh.as_bytes()), &child_fh)
        {
            if attrs.satisfies(attr_mask) {
                callback(Ok(()), attrs, Attrs::default());
                return;
            }
        }
    }

    let mut request = match thread.request_alloc(cred, dir_fh) {
        Ok(request) => request,
        Err(error) => {
            callback(Err(error), Attrs::default(), Attrs::default());
            return;
        }
    };

    request.op = OpData::Lookup {
        name: name.to_string(),
        name_hash: nhash,
        r_attr: Attrs::request(attr_mask | AttrMask::STAT | AttrMask::FH),
        r_dir_attr: Attrs::request(AttrMask::STAT),
        cb: Some(Box::new(callback)),
    };
    request.completion = Some(lookup_complete);

    dispatch(request);
}

fn lookup_complete(mut request: Box<Request>) {
    let thread = request.thread.clone();
    let status = request.status;
    let dir_fh = request.fh;
    let dir_hash = request.fh_hash;

    let OpData::Lookup {
        name,
        name_hash,
        r_attr,
        r_dir_attr,
        cb,
        ..
    } = std::mem::take(&mut request.op)
    else {
        unreachable!("lookup completion on foreign request");
    };

    if status.is_ok() {
        let vfs = thread.vfs();
        vfs.name_cache()
            .insert(dir_hash, &dir_fh, name_hash, &name, &r_attr.fh);
        vfs.attr_cache()
            .insert(fh_hash(r_attr.fh.as_bytes()), &r_attr.fh, &r_attr);
        vfs.attr_cache().insert(dir_hash, &dir_fh, &r_dir_attr);
    }

    let cb = cb.expect("lookup callback consumed twice");
    cb(status, r_attr, r_dir_attr);

    thread.request_recycle(request);
}

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

//! Resolve a module's root file handle.
//!
//! No mount exists yet for the root, so the module is passed explicitly and
//! the request targets the one-byte magic handle.

use std::sync::Arc;

use reef_common::{
    attrs::{AttrMask, Attrs},
    fh::Fh,
};

use crate::{
    error::Status,
    module::Module,
    proc::dispatch,
    request::{Cred, OpData, Request},
    thread::VfsThread,
};

pub fn getrootfh(
    thread: &VfsThread,
    cred: &Cred,
    module: &Arc<dyn Module>,
    path: &str,
    attr_mask: AttrMask,
    callback: impl FnOnce(Status, Attrs) + Send + 'static,
) {
    let magic_fh = Fh::new(&[module.fh_magic()]);
    let mut request = thread.request_alloc_for_module(cred, &magic_fh, module.clone());

    request.op = OpData::GetRootFh {
        path: path.to_string(),
        r_attr: Attrs::request(attr_mask | AttrMask::STAT | AttrMask::FH),
        cb: Some(Box::new(callback)),
    };
    request.completion = Some(getrootfh_complete);

    dispatch(request);
}

fn getrootfh_complete(mut request: Box<Request>) {
    let thread = request.thread.clone();
    let status = request.status;

    let OpData::GetRootFh { r_attr, cb, .. } = std::mem::take(&mut request.op) else {
        unreachable!("getrootfh completion on foreign request");
    };

    if status.is_ok() {
        thread
            .vfs()
            .attr_cache()
            .insert(reef_common::hash::fh_hash(r_attr.fh.as_bytes()), &r_attr.fh, &r_attr);
    }

    let cb = cb.expect("getrootfh callback consumed twice");
    cb(status, r_attr);

    thread.request_recycle(request);
}

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

use reef_common::attrs::{AttrMask, Attrs};

use crate::{
    error::Status,
    open_cache::OpenHandleRef,
    proc::dispatch,
    request::{Cred, OpData, Request},
    thread::VfsThread,
};

pub fn read(
    thread: &VfsThread,
    cred: &Cred,
    handle: &OpenHandleRef,
    offset: u64,
    length: u32,
    attr_mask: AttrMask,
    callback: impl FnOnce(Status, Vec<u8>, bool, Attrs) + Send + 'static,
) {
    let mut request = thread.request_alloc_by_handle(cred, handle);

    request.op = OpData::Read {
        handle: handle.clone(),
        offset,
        length,
        r_data: Vec::new(),
        r_eof: false,
        r_attr: Attrs::request(attr_mask | AttrMask::STAT),
        cb: Some(Box::new(callback)),
    };
    request.completion = Some(read_complete);

    dispatch(request);
}

fn read_complete(mut request: Box<Request>) {
    let thread = request.thread.clone();
    let status = request.status;

    let OpData::Read {
        handle,
        r_data,
        r_eof,
        r_attr,
        cb,
        ..
    } = std::mem::take(&mut request.op)
    else {
        unreachable!("read completion on foreign request");
    };

    if status.is_ok() {
        thread
            .vfs()
            .attr_cache()
            .insert(handle.fh_hash(), handle.fh(), &r_attr);
    }

    let cb = cb.expect("read callback consumed twice");
    cb(status, r_data, r_eof, r_attr);

    thread.request_recycle(request);
}

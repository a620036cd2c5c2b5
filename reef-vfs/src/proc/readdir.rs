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

use reef_common::{
    attrs::{AttrMask, Attrs},
    fh::Fh,
    hash::fh_hash,
};

use crate::{
    error::Status,
    proc::dispatch,
    request::{Cred, DirEntry, OpData, Request},
    thread::VfsThread,
};

pub fn readdir(
    thread: &VfsThread,
    cred: &Cred,
    dir_fh: &Fh,
    cookie: u64,
    attr_mask: AttrMask,
    callback: impl FnOnce(Status, Vec<DirEntry>, bool, Attrs) + Send + 'static,
) {
    let mut request = match thread.request_alloc(cred, dir_fh) {
        Ok(request) => request,
        Err(error) => {
            callback(Err(error), Vec::new(), false, Attrs::default());
            return;
        }
    };

    request.op = OpData::Readdir {
        cookie,
        attr_mask: attr_mask | AttrMask::STAT | AttrMask::FH,
        r_entries: Vec::new(),
        r_eof: false,
        r_dir_attr: Attrs::request(AttrMask::STAT),
        cb: Some(Box::new(callback)),
    };
    request.completion = Some(readdir_complete);

    dispatch(request);
}

fn readdir_complete(mut request: Box<Request>) {
    let thread = request.thread.clone();
    let status = request.status;
    let dir_fh = request.fh;
    let dir_hash = request.fh_hash;

    let OpData::Readdir {
        r_entries,
        r_eof,
        r_dir_attr,
        cb,
        ..
    } = std::mem::take(&mut request.op)
    else {
        unreachable!("readdir completion on foreign request");
    };

    if status.is_ok() {
        let vfs = thread.vfs();
        vfs.attr_cache().insert(dir_hash, &dir_fh, &r_dir_attr);
        // Returned entries carrying a full stat are worth caching; the
        // insert gate drops the rest.
        for entry in &r_entries {
            vfs.attr_cache()
                .insert(fh_hash(entry.attrs.fh.as_bytes()), &entry.attrs.fh, &entry.attrs);
        }
    }

    let cb = cb.expect("readdir callback consumed twice");
    cb(status, r_entries, r_eof, r_dir_attr);

    thread.request_recycle(request);
}

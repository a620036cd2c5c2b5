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
    hash::name_hash,
};

use crate::{
    error::Status,
    proc::dispatch,
    request::{Cred, OpData, Request},
    thread::VfsThread,
};

pub fn rmdir(
    thread: &VfsThread,
    cred: &Cred,
    dir_fh: &Fh,
    name: &str,
    callback: impl FnOnce(Status, Attrs, Attrs) + Send + 'static,
) {
    let mut request = match thread.request_alloc(cred, dir_fh) {
        Ok(request) => request,
        Err(error) => {
            callback(Err(error), Attrs::default(), Attrs::default());
            return;
        }
    };

    request.op = OpData::Rmdir {
        name: name.to_string(),
        name_hash: name_hash(name.as_bytes()),
        r_dir_pre_attr: Attrs::request(AttrMask::SIZE | AttrMask::MTIME | AttrMask::CTIME),
        r_dir_post_attr: Attrs::request(AttrMask::STAT),
        cb: Some(Box::new(callback)),
    };
    request.completion = Some(rmdir_complete);

    dispatch(request);
}

fn rmdir_complete(mut request: Box<Request>) {
    let thread = request.thread.clone();
    let status = request.status;
    let dir_fh = request.fh;
    let dir_hash = request.fh_hash;

    let OpData::Rmdir {
        name,
        name_hash,
        r_dir_pre_attr,
        r_dir_post_attr,
        cb,
        ..
    } = std::mem::take(&mut request.op)
    else {
        unreachable!("rmdir completion on foreign request");
    };

    if status.is_ok() {
        let vfs = thread.vfs();
        vfs.name_cache().remove(dir_hash, &dir_fh, name_hash, &name);
        vfs.attr_cache().insert(dir_hash, &dir_fh, &r_dir_post_attr);
    }

    let cb = cb.expect("rmdir callback consumed twice");
    cb(status, r_dir_pre_attr, r_dir_post_attr);

    thread.request_recycle(request);
}

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
    hash::{fh_hash, name_hash},
};

use crate::{
    error::Status,
    proc::dispatch,
    request::{Cred, OpData, Request},
    thread::VfsThread,
};

#[allow(clippy::too_many_arguments)]
pub fn rename_at(
    thread: &VfsThread,
    cred: &Cred,
    dir_fh: &Fh,
    name: &str,
    new_dir_fh: &Fh,
    new_name: &str,
    callback: impl FnOnce(Status, Attrs, Attrs, Attrs, Attrs) + Send + 'static,
) {
    let mut request = match thread.request_alloc(cred, dir_fh) {
        Ok(request) => request,
        Err(error) => {
            let a = Attrs::default();
            callback(Err(error), a, a, a, a);
            return;
        }
    };

    request.op = OpData::Rename {
        name: name.to_string(),
        name_hash: name_hash(name.as_bytes()),
        new_dir_fh: *new_dir_fh,
        new_dir_fh_hash: fh_hash(new_dir_fh.as_bytes()),
        new_name: new_name.to_string(),
        new_name_hash: name_hash(new_name.as_bytes()),
        r_fromdir_pre_attr: Attrs::request(AttrMask::SIZE | AttrMask::MTIME | AttrMask::CTIME),
        r_fromdir_post_attr: Attrs::request(AttrMask::STAT),
        r_todir_pre_attr: Attrs::request(AttrMask::SIZE | AttrMask::MTIME | AttrMask::CTIME),
        r_todir_post_attr: Attrs::request(AttrMask::STAT),
        cb: Some(Box::new(callback)),
    };
    request.completion = Some(rename_complete);

    dispatch(request);
}

pub(crate) fn rename_complete(mut request: Box<Request>) {
    let thread = request.thread.clone();
    let status = request.status;
    let dir_fh = request.fh;
    let dir_hash = request.fh_hash;

    let OpData::Rename {
        name,
        name_hash,
        new_dir_fh,
        new_dir_fh_hash,
        new_name,
        new_name_hash,
        r_fromdir_pre_attr,
        r_fromdir_post_attr,
        r_todir_pre_attr,
        r_todir_post_attr,
        cb,
        ..
    } = std::mem::take(&mut request.op)
    else {
        unreachable!("rename completion on foreign request");
    };

    if status.is_ok() {
        // Remove cache entries for both the old and new paths. No negative
        // entry is inserted for the old path: if source and destination are
        // hard links to the same inode, the backend may treat the rename as
        // a no-op and leave both paths valid, so marking the old path
        // deleted would be wrong.
        let name_cache = thread.vfs().name_cache();
        name_cache.remove(dir_hash, &dir_fh, name_hash, &name);
        name_cache.remove(new_dir_fh_hash, &new_dir_fh, new_name_hash, &new_name);
    }

    let cb = cb.expect("rename callback consumed twice");
    cb(
        status,
        r_fromdir_pre_attr,
        r_fromdir_post_attr,
        r_todir_pre_attr,
        r_todir_post_attr,
    );

    thread.request_recycle(request);
}

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

//! Remove, with silly-rename support.
//!
//! Silly rename is only considered when the caller provides the child file
//! handle, which happens when the caller is the local client library that
//! resolved the child before removing it. Callers that pass no child FH
//! (protocol servers fronting external clients, which manage their own silly
//! renames) get a plain remove.

use reef_common::{
    attrs::{AttrMask, Attrs},
    fh::Fh,
    hash::{fh_hash, name_hash},
};
use tracing::debug;

use crate::{
    error::Status,
    proc::{dispatch, rename_at::rename_complete},
    request::{Cred, OpData, Request},
    silly,
    thread::VfsThread,
};

pub fn remove_at(
    thread: &VfsThread,
    cred: &Cred,
    dir_fh: &Fh,
    name: &str,
    child_fh: Option<&Fh>,
    callback: impl FnOnce(Status, Attrs, Attrs) + Send + 'static,
) {
    let mut request = match thread.request_alloc(cred, dir_fh) {
        Ok(request) => request,
        Err(error) => {
            callback(Err(error), Attrs::default(), Attrs::default());
            return;
        }
    };

    let nhash = name_hash(name.as_bytes());

    if let Some(child_fh) = child_fh {
        // The caller already resolved the child; check whether it is open.
        let cache = thread.vfs().open_file_cache();
        let child_hash = fh_hash(child_fh.as_bytes());

        if let Some(handle) = cache.lookup_ref(child_fh, child_hash) {
            let state = silly::state(&handle);
            let newly_marked = state.mark(dir_fh);
            cache.release(thread, &handle, Ok(()));

            if !newly_marked {
                // The rename was already performed by a concurrent remove;
                // from the caller's perspective the file is gone.
                debug!(name, "remove: file already silly renamed");
                thread.request_recycle(request);
                callback(Ok(()), Attrs::default(), Attrs::default());
                return;
            }

            // Rewrite the remove into a rename to the hidden name within
            // the same directory. Success completes the remove OK; the true
            // remove happens on last release of the open handle.
            let silly = silly::silly_name(child_fh);
            debug!(name, %silly, "remove: open file, silly renaming");

            request.op = OpData::Rename {
                name: name.to_string(),
                name_hash: nhash,
                new_dir_fh: *dir_fh,
                new_dir_fh_hash: request.fh_hash,
                new_name_hash: name_hash(silly.as_bytes()),
                new_name: silly,
                r_fromdir_pre_attr: Attrs::request(AttrMask::SIZE | AttrMask::MTIME | AttrMask::CTIME),
                r_fromdir_post_attr: Attrs::request(AttrMask::STAT),
                r_todir_pre_attr: Attrs::request(AttrMask::empty()),
                r_todir_post_attr: Attrs::request(AttrMask::empty()),
                cb: Some(Box::new(move |status, pre, post, _, _| {
                    callback(status, pre, post)
                })),
            };
            request.completion = Some(rename_complete);
            dispatch(request);
            return;
        }
    }

    request.op = OpData::Remove {
        name: name.to_string(),
        name_hash: nhash,
        r_dir_pre_attr: Attrs::request(AttrMask::SIZE | AttrMask::MTIME | AttrMask::CTIME),
        r_dir_post_attr: Attrs::request(AttrMask::STAT),
        cb: Some(Box::new(callback)),
    };
    request.completion = Some(remove_complete);

    dispatch(request);
}

pub(crate) fn remove_complete(mut request: Box<Request>) {
    let thread = request.thread.clone();
    let status = request.status;
    let dir_fh = request.fh;
    let dir_hash = request.fh_hash;

    let OpData::Remove {
        name,
        name_hash,
        r_dir_pre_attr,
        r_dir_post_attr,
        cb,
        ..
    } = std::mem::take(&mut request.op)
    else {
        unreachable!("remove completion on foreign request");
    };

    if status.is_ok() {
        let vfs = thread.vfs();
        vfs.name_cache().remove(dir_hash, &dir_fh, name_hash, &name);
        vfs.attr_cache().insert(dir_hash, &dir_fh, &r_dir_post_attr);
    }

    let cb = cb.expect("remove callback consumed twice");
    cb(status, r_dir_pre_attr, r_dir_post_attr);

    thread.request_recycle(request);
}

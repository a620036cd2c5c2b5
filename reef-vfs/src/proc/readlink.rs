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

use reef_common::fh::Fh;

use crate::{
    error::Status,
    proc::dispatch,
    request::{Cred, OpData, Request},
    thread::VfsThread,
};

pub fn readlink(
    thread: &VfsThread,
    cred: &Cred,
    fh: &Fh,
    callback: impl FnOnce(Status, String) + Send + 'static,
) {
    let mut request = match thread.request_alloc(cred, fh) {
        Ok(request) => request,
        Err(error) => {
            callback(Err(error), String::new());
            return;
        }
    };

    request.op = OpData::Readlink {
        r_target: String::new(),
        cb: Some(Box::new(callback)),
    };
    request.completion = Some(readlink_complete);

    dispatch(request);
}

fn readlink_complete(mut request: Box<Request>) {
    let thread = request.thread.clone();
    let status = request.status;

    let OpData::Readlink { r_target, cb, .. } = std::mem::take(&mut request.op) else {
        unreachable!("readlink completion on foreign request");
    };

    let cb = cb.expect("readlink callback consumed twice");
    cb(status, r_target);

    thread.request_recycle(request);
}

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

//! The per-operation request object.
//!
//! A request is allocated from its thread's pool, dispatched to a backend
//! module, completed by the module (which fills the result fields, sets
//! `status` and calls [`Request::complete`]), and recycled back into the
//! pool. Completion always runs on the owning thread; a module completing
//! from elsewhere has the request forwarded through the owner's inbox.

use std::sync::Arc;

use reef_common::{
    attrs::{AttrMask, Attrs},
    fh::Fh,
};

use crate::{
    error::{Status, VfsError},
    module::Module,
    open_cache::{OpenFlags, OpenHandleRef},
    thread::{ResumeTask, VfsThread},
};

/// Caller credentials attached to every request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cred {
    pub uid: u32,
    pub gid: u32,
}

/// One entry returned by readdir.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub cookie: u64,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatFs {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub avail_bytes: u64,
    pub total_files: u64,
    pub free_files: u64,
}

pub type GetrootfhCb = Box<dyn FnOnce(Status, Attrs) + Send>;
pub type GetattrCb = Box<dyn FnOnce(Status, Attrs) + Send>;
pub type SetattrCb = Box<dyn FnOnce(Status, Attrs, Attrs) + Send>;
pub type LookupCb = Box<dyn FnOnce(Status, Attrs, Attrs) + Send>;
pub type OpenCb = Box<dyn FnOnce(Status, Option<OpenHandleRef>) + Send>;
pub type OpenAtCb = Box<dyn FnOnce(Status, Option<OpenHandleRef>, Attrs, Attrs, Attrs) + Send>;
pub type CreateUnlinkedCb = Box<dyn FnOnce(Status, Option<OpenHandleRef>, Attrs) + Send>;
pub type CloseCb = Box<dyn FnOnce(Status) + Send>;
pub type ReadCb = Box<dyn FnOnce(Status, Vec<u8>, bool, Attrs) + Send>;
pub type WriteCb = Box<dyn FnOnce(Status, u32, Attrs, Attrs) + Send>;
pub type CommitCb = Box<dyn FnOnce(Status, Attrs, Attrs) + Send>;
pub type AllocateCb = Box<dyn FnOnce(Status, Attrs, Attrs) + Send>;
/// Shared by remove / rmdir / link: directory pre- and post-attrs.
pub type DirOpCb = Box<dyn FnOnce(Status, Attrs, Attrs) + Send>;
pub type RenameCb = Box<dyn FnOnce(Status, Attrs, Attrs, Attrs, Attrs) + Send>;
pub type MkdirCb = Box<dyn FnOnce(Status, Attrs, Attrs, Attrs) + Send>;
pub type SymlinkCb = Box<dyn FnOnce(Status, Attrs, Attrs, Attrs) + Send>;
pub type ReadlinkCb = Box<dyn FnOnce(Status, String) + Send>;
pub type ReaddirCb = Box<dyn FnOnce(Status, Vec<DirEntry>, bool, Attrs) + Send>;
pub type StatfsCb = Box<dyn FnOnce(Status, StatFs) + Send>;

/// Per-operation arguments and results.
///
/// `r_`-prefixed fields are filled in by the backend module before it calls
/// [`Request::complete`]. Result attrs carry their request mask on entry.
pub enum OpData {
    Idle,
    GetRootFh {
        path: String,
        r_attr: Attrs,
        cb: Option<GetrootfhCb>,
    },
    Getattr {
        handle: OpenHandleRef,
        r_attr: Attrs,
        cb: Option<GetattrCb>,
    },
    Setattr {
        handle: OpenHandleRef,
        set_attr: Attrs,
        r_pre_attr: Attrs,
        r_post_attr: Attrs,
        cb: Option<SetattrCb>,
    },
    Lookup {
        name: String,
        name_hash: u64,
        r_attr: Attrs,
        r_dir_attr: Attrs,
        cb: Option<LookupCb>,
    },
    Open {
        flags: OpenFlags,
        handle: Option<OpenHandleRef>,
        r_vfs_private: u64,
        cb: Option<OpenCb>,
    },
    OpenAt {
        parent: OpenHandleRef,
        name: String,
        name_hash: u64,
        flags: OpenFlags,
        set_attr: Attrs,
        r_attr: Attrs,
        r_dir_pre_attr: Attrs,
        r_dir_post_attr: Attrs,
        r_vfs_private: u64,
        cb: Option<OpenAtCb>,
    },
    Close {
        handle: OpenHandleRef,
        cb: Option<CloseCb>,
    },
    Read {
        handle: OpenHandleRef,
        offset: u64,
        length: u32,
        r_data: Vec<u8>,
        r_eof: bool,
        r_attr: Attrs,
        cb: Option<ReadCb>,
    },
    Write {
        handle: OpenHandleRef,
        offset: u64,
        sync: bool,
        data: Vec<u8>,
        r_length: u32,
        r_pre_attr: Attrs,
        r_post_attr: Attrs,
        cb: Option<WriteCb>,
    },
    Commit {
        handle: OpenHandleRef,
        offset: u64,
        length: u64,
        r_pre_attr: Attrs,
        r_post_attr: Attrs,
        cb: Option<CommitCb>,
    },
    Allocate {
        handle: OpenHandleRef,
        offset: u64,
        length: u64,
        r_pre_attr: Attrs,
        r_post_attr: Attrs,
        cb: Option<AllocateCb>,
    },
    Remove {
        name: String,
        name_hash: u64,
        r_dir_pre_attr: Attrs,
        r_dir_post_attr: Attrs,
        cb: Option<DirOpCb>,
    },
    Rename {
        name: String,
        name_hash: u64,
        new_dir_fh: Fh,
        new_dir_fh_hash: u64,
        new_name: String,
        new_name_hash: u64,
        r_fromdir_pre_attr: Attrs,
        r_fromdir_post_attr: Attrs,
        r_todir_pre_attr: Attrs,
        r_todir_post_attr: Attrs,
        cb: Option<RenameCb>,
    },
    Mkdir {
        name: String,
        name_hash: u64,
        set_attr: Attrs,
        r_attr: Attrs,
        r_dir_pre_attr: Attrs,
        r_dir_post_attr: Attrs,
        cb: Option<MkdirCb>,
    },
    Rmdir {
        name: String,
        name_hash: u64,
        r_dir_pre_attr: Attrs,
        r_dir_post_attr: Attrs,
        cb: Option<DirOpCb>,
    },
    Symlink {
        name: String,
        name_hash: u64,
        target: String,
        set_attr: Attrs,
        r_attr: Attrs,
        r_dir_pre_attr: Attrs,
        r_dir_post_attr: Attrs,
        cb: Option<SymlinkCb>,
    },
    Readlink {
        r_target: String,
        cb: Option<ReadlinkCb>,
    },
    Link {
        name: String,
        name_hash: u64,
        target_fh: Fh,
        target_fh_hash: u64,
        r_dir_pre_attr: Attrs,
        r_dir_post_attr: Attrs,
        cb: Option<DirOpCb>,
    },
    Readdir {
        cookie: u64,
        attr_mask: AttrMask,
        r_entries: Vec<DirEntry>,
        r_eof: bool,
        r_dir_attr: Attrs,
        cb: Option<ReaddirCb>,
    },
    Statfs {
        r_statfs: StatFs,
        cb: Option<StatfsCb>,
    },
    CreateUnlinked {
        anon_key: u64,
        flags: OpenFlags,
        set_attr: Attrs,
        r_attr: Attrs,
        r_vfs_private: u64,
        cb: Option<CreateUnlinkedCb>,
    },
}

impl Default for OpData {
    fn default() -> Self {
        Self::Idle
    }
}

impl OpData {
    pub fn opcode(&self) -> &'static str {
        match self {
            OpData::Idle => "idle",
            OpData::GetRootFh { .. } => "getrootfh",
            OpData::Getattr { .. } => "getattr",
            OpData::Setattr { .. } => "setattr",
            OpData::Lookup { .. } => "lookup",
            OpData::Open { .. } => "open",
            OpData::OpenAt { .. } => "open_at",
            OpData::Close { .. } => "close",
            OpData::Read { .. } => "read",
            OpData::Write { .. } => "write",
            OpData::Commit { .. } => "commit",
            OpData::Allocate { .. } => "allocate",
            OpData::Remove { .. } => "remove",
            OpData::Rename { .. } => "rename",
            OpData::Mkdir { .. } => "mkdir",
            OpData::Rmdir { .. } => "rmdir",
            OpData::Symlink { .. } => "symlink",
            OpData::Readlink { .. } => "readlink",
            OpData::Link { .. } => "link",
            OpData::Readdir { .. } => "readdir",
            OpData::Statfs { .. } => "statfs",
            OpData::CreateUnlinked { .. } => "create_unlinked",
        }
    }
}

/// A dispatched VFS operation.
pub struct Request {
    pub thread: VfsThread,
    pub cred: Cred,
    /// Target file handle (the directory handle for directory operations).
    pub fh: Fh,
    pub fh_hash: u64,
    pub module: Arc<dyn Module>,
    pub status: Status,
    pub op: OpData,
    pub(crate) completion: Option<fn(Box<Request>)>,
}

impl Request {
    pub(crate) fn new(thread: VfsThread, module: Arc<dyn Module>) -> Box<Self> {
        Box::new(Self {
            thread,
            cred: Cred::default(),
            fh: Fh::empty(),
            fh_hash: 0,
            module,
            status: Ok(()),
            op: OpData::Idle,
            completion: None,
        })
    }

    /// Fail the request with `error` and run its completion.
    pub fn fail(mut self: Box<Self>, error: VfsError) {
        self.status = Err(error);
        self.complete();
    }

    /// Hand the request back to the dispatch pipeline.
    ///
    /// Called by the backend module once the result fields and `status` are
    /// filled in. The completion stage runs on the owning thread: inline when
    /// the module completed there, otherwise forwarded through the owner's
    /// inbox and doorbell.
    pub fn complete(self: Box<Self>) {
        if self.thread.is_current() {
            self.run_completion();
        } else {
            let thread = self.thread.clone();
            thread.post(ResumeTask::Complete(self));
        }
    }

    pub(crate) fn run_completion(mut self: Box<Self>) {
        debug_assert!(self.thread.is_current());
        if let Some(completion) = self.completion.take() {
            completion(self);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.cred = Cred::default();
        self.fh = Fh::empty();
        self.fh_hash = 0;
        self.status = Ok(());
        self.op = OpData::Idle;
        self.completion = None;
    }
}

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

pub use reef_common::{
    attrs::{AttrMask, Attrs, FileType},
    counters::CounterSnapshot,
    fh::{Fh, FH_MAX, MOUNT_ID_SIZE},
    hash::{fh_hash, name_hash},
};

pub use crate::{
    attr_cache::AttrCache,
    context::{TtlCacheConfig, Vfs, VfsConfig, FILE_CACHE_ID, PATH_CACHE_ID},
    error::{Status, VfsError, VfsResult},
    module::{Capabilities, Module},
    name_cache::NameCache,
    open_cache::{
        AccessMode, HandleFlags, OpenCache, OpenFlags, OpenHandle, OpenHandleRef,
        SYNTHETIC_CACHE_ID, VFS_PRIVATE_UNSET,
    },
    proc::{
        allocate::allocate, commit::commit, create_unlinked::create_unlinked, getattr::getattr,
        getrootfh::getrootfh, link::link, lookup::lookup, mkdir::mkdir, open::open,
        open_at::open_at, read::read, readdir::readdir, readlink::readlink, remove::remove_at,
        rename_at::rename_at, rmdir::rmdir, setattr::setattr, statfs::statfs, symlink::symlink,
        write::write,
    },
    request::{Cred, DirEntry, OpData, Request, StatFs},
    silly::{silly_name, SillyState, SILLY_NAME_MAX, SILLY_PREFIX},
    thread::VfsThread,
};

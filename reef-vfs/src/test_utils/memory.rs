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

//! A POSIX-ish in-memory backend.
//!
//! Files are sparse page maps, so writes at large offsets stay cheap and
//! holes read as zeros. Unlinked inodes survive while open handles reference
//! them, which is what the open-unlink-read scenarios exercise.

use std::{collections::BTreeMap, sync::Mutex as StdMutex};

use hashbrown::HashMap;
use parking_lot::Mutex;
use reef_common::{
    attrs::{AttrMask, Attrs, FileType},
    clock,
    fh::{Fh, MOUNT_ID_SIZE},
};

use crate::{
    error::{Status, VfsError},
    module::{Capabilities, Module},
    open_cache::OpenFlags,
    request::{DirEntry, OpData, Request, StatFs},
};

const PAGE: usize = 4096;
const ROOT_INO: u64 = 1;

#[derive(Default)]
struct PageFile {
    pages: HashMap<u64, Box<[u8; PAGE]>>,
    size: u64,
}

impl PageFile {
    fn write(&mut self, offset: u64, data: &[u8]) {
        let mut pos = 0usize;
        while pos < data.len() {
            let at = offset + pos as u64;
            let page_idx = at / PAGE as u64;
            let page_off = (at % PAGE as u64) as usize;
            let chunk = (PAGE - page_off).min(data.len() - pos);

            let page = self
                .pages
                .entry(page_idx)
                .or_insert_with(|| Box::new([0u8; PAGE]));
            page[page_off..page_off + chunk].copy_from_slice(&data[pos..pos + chunk]);

            pos += chunk;
        }
        self.size = self.size.max(offset + data.len() as u64);
    }

    fn read(&self, offset: u64, length: usize) -> Vec<u8> {
        if offset >= self.size {
            return Vec::new();
        }
        let length = length.min((self.size - offset) as usize);
        let mut out = vec![0u8; length];

        let mut pos = 0usize;
        while pos < length {
            let at = offset + pos as u64;
            let page_idx = at / PAGE as u64;
            let page_off = (at % PAGE as u64) as usize;
            let chunk = (PAGE - page_off).min(length - pos);

            if let Some(page) = self.pages.get(&page_idx) {
                out[pos..pos + chunk].copy_from_slice(&page[page_off..page_off + chunk]);
            }

            pos += chunk;
        }
        out
    }

    fn truncate(&mut self, size: u64) {
        if size < self.size {
            let last_page = size / PAGE as u64;
            let keep = (size % PAGE as u64) as usize;
            self.pages.retain(|&idx, _| idx <= last_page);
            if let Some(page) = self.pages.get_mut(&last_page) {
                page[keep..].fill(0);
            }
        }
        self.size = size;
    }
}

enum Node {
    File(PageFile),
    Dir(BTreeMap<String, u64>),
    Symlink(String),
}

struct Inode {
    ino: u64,
    file_type: FileType,
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    open_count: u32,
    atime: u64,
    mtime: u64,
    ctime: u64,
    node: Node,
}

impl Inode {
    fn size(&self) -> u64 {
        match &self.node {
            Node::File(file) => file.size,
            Node::Dir(entries) => entries.len() as u64,
            Node::Symlink(target) => target.len() as u64,
        }
    }
}

#[derive(Default)]
struct FsState {
    inodes: HashMap<u64, Inode>,
    /// Backend cookie (vfs_private) to inode.
    opens: HashMap<u64, u64>,
    next_ino: u64,
    next_open: u64,
}

/// The in-memory backend module.
pub struct MemoryFs {
    magic: u8,
    mount_id: [u8; MOUNT_ID_SIZE],
    state: Mutex<FsState>,
    /// Dispatch trace for tests that assert on backend traffic.
    ops: StdMutex<Vec<&'static str>>,
}

impl MemoryFs {
    pub fn new(magic: u8) -> Self {
        let mut state = FsState {
            next_ino: ROOT_INO + 1,
            next_open: 1,
            ..Default::default()
        };

        let now = clock::monotonic_ns();
        state.inodes.insert(
            ROOT_INO,
            Inode {
                ino: ROOT_INO,
                file_type: FileType::Directory,
                mode: 0o755,
                uid: 0,
                gid: 0,
                nlink: 2,
                open_count: 0,
                atime: now,
                mtime: now,
                ctime: now,
                node: Node::Dir(BTreeMap::new()),
            },
        );

        Self {
            magic,
            mount_id: [magic; MOUNT_ID_SIZE],
            state: Mutex::new(state),
            ops: StdMutex::new(Vec::new()),
        }
    }

    pub fn mount_id(&self) -> &[u8] {
        &self.mount_id
    }

    pub fn root_fh(&self) -> Fh {
        self.fh_of(ROOT_INO)
    }

    /// Ops dispatched so far, in order.
    pub fn dispatched_ops(&self) -> Vec<&'static str> {
        self.ops.lock().unwrap().clone()
    }

    /// Live inode count, orphans included.
    pub fn inode_count(&self) -> usize {
        self.state.lock().inodes.len()
    }

    fn fh_of(&self, ino: u64) -> Fh {
        let mut bytes = [0u8; MOUNT_ID_SIZE + 8];
        bytes[..MOUNT_ID_SIZE].copy_from_slice(&self.mount_id);
        bytes[MOUNT_ID_SIZE..].copy_from_slice(&ino.to_be_bytes());
        Fh::new(&bytes)
    }

    fn ino_of(&self, fh: &Fh) -> Result<u64, VfsError> {
        let bytes = fh.as_bytes();
        if bytes.len() != MOUNT_ID_SIZE + 8 || bytes[..MOUNT_ID_SIZE] != self.mount_id {
            return Err(VfsError::Stale);
        }
        let mut ino = [0u8; 8];
        ino.copy_from_slice(&bytes[MOUNT_ID_SIZE..]);
        Ok(u64::from_be_bytes(ino))
    }

    fn attrs_of(&self, inode: &Inode) -> Attrs {
        let mut attrs = Attrs {
            set_mask: AttrMask::STAT,
            file_type: inode.file_type,
            mode: inode.mode,
            nlink: inode.nlink,
            uid: inode.uid,
            gid: inode.gid,
            size: inode.size(),
            space_used: inode.size(),
            ino: inode.ino,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
            ..Default::default()
        };
        attrs.set_fh(&self.fh_of(inode.ino));
        attrs
    }

    fn new_inode(&self, state: &mut FsState, file_type: FileType, mode: u32, node: Node) -> u64 {
        let ino = state.next_ino;
        state.next_ino += 1;
        let now = clock::monotonic_ns();
        state.inodes.insert(
            ino,
            Inode {
                ino,
                file_type,
                mode,
                uid: 0,
                gid: 0,
                nlink: if matches!(file_type, FileType::Directory) {
                    2
                } else {
                    1
                },
                open_count: 0,
                atime: now,
                mtime: now,
                ctime: now,
                node,
            },
        );
        ino
    }

    fn open_inode(&self, state: &mut FsState, ino: u64) -> u64 {
        let cookie = state.next_open;
        state.next_open += 1;
        state.opens.insert(cookie, ino);
        state.inodes.get_mut(&ino).unwrap().open_count += 1;
        cookie
    }

    fn reap(&self, state: &mut FsState, ino: u64) {
        if ino == ROOT_INO {
            return;
        }
        if let Some(inode) = state.inodes.get(&ino) {
            let linked = if matches!(inode.file_type, FileType::Directory) {
                inode.nlink > 1
            } else {
                inode.nlink > 0
            };
            if !linked && inode.open_count == 0 {
                state.inodes.remove(&ino);
            }
        }
    }

    fn dir_entries<'a>(
        &self,
        state: &'a FsState,
        ino: u64,
    ) -> Result<&'a BTreeMap<String, u64>, VfsError> {
        match state.inodes.get(&ino) {
            Some(Inode {
                node: Node::Dir(entries),
                ..
            }) => Ok(entries),
            Some(_) => Err(VfsError::NotDir),
            None => Err(VfsError::Stale),
        }
    }

    fn handle_op(&self, state: &mut FsState, request: &mut Request) -> Status {
        let fh = request.fh;
        let now = clock::monotonic_ns();

        match &mut request.op {
            OpData::GetRootFh { r_attr, .. } => {
                let root = state.inodes.get(&ROOT_INO).unwrap();
                *r_attr = self.attrs_of(root);
                Ok(())
            }

            OpData::Getattr { r_attr, .. } => {
                let ino = self.ino_of(&fh)?;
                let inode = state.inodes.get(&ino).ok_or(VfsError::Stale)?;
                *r_attr = self.attrs_of(inode);
                Ok(())
            }

            OpData::Setattr {
                set_attr,
                r_pre_attr,
                r_post_attr,
                ..
            } => {
                let ino = self.ino_of(&fh)?;
                let inode = state.inodes.get_mut(&ino).ok_or(VfsError::Stale)?;
                *r_pre_attr = self.attrs_of(inode);

                if set_attr.set_mask.contains(AttrMask::MODE) {
                    inode.mode = set_attr.mode & 0o7777;
                }
                if set_attr.set_mask.contains(AttrMask::UID) {
                    inode.uid = set_attr.uid;
                }
                if set_attr.set_mask.contains(AttrMask::GID) {
                    inode.gid = set_attr.gid;
                }
                if set_attr.set_mask.contains(AttrMask::SIZE) {
                    match &mut inode.node {
                        Node::File(file) => file.truncate(set_attr.size),
                        _ => return Err(VfsError::IsDir),
                    }
                }
                inode.ctime = now;

                *r_post_attr = self.attrs_of(state.inodes.get(&ino).unwrap());
                Ok(())
            }

            OpData::Lookup {
                name,
                r_attr,
                r_dir_attr,
                ..
            } => {
                let dir_ino = self.ino_of(&fh)?;
                let entries = self.dir_entries(state, dir_ino)?;
                let child_ino = *entries.get(name.as_str()).ok_or(VfsError::NotFound)?;
                *r_attr = self.attrs_of(state.inodes.get(&child_ino).unwrap());
                *r_dir_attr = self.attrs_of(state.inodes.get(&dir_ino).unwrap());
                Ok(())
            }

            OpData::Open {
                flags,
                r_vfs_private,
                ..
            } => {
                let ino = self.ino_of(&fh)?;
                if !state.inodes.contains_key(&ino) {
                    return Err(VfsError::Stale);
                }
                if flags.contains(OpenFlags::TRUNCATE) {
                    if let Node::File(file) = &mut state.inodes.get_mut(&ino).unwrap().node {
                        file.truncate(0);
                    }
                }
                *r_vfs_private = self.open_inode(state, ino);
                Ok(())
            }

            OpData::OpenAt {
                name,
                flags,
                set_attr,
                r_attr,
                r_dir_pre_attr,
                r_dir_post_attr,
                r_vfs_private,
                ..
            } => {
                let dir_ino = self.ino_of(&fh)?;
                *r_dir_pre_attr = self.attrs_of(state.inodes.get(&dir_ino).ok_or(VfsError::Stale)?);

                let existing = self.dir_entries(state, dir_ino)?.get(name.as_str()).copied();

                let child_ino = match existing {
                    Some(ino) => {
                        if flags.contains(OpenFlags::CREATE | OpenFlags::EXCL) {
                            return Err(VfsError::Exists);
                        }
                        if flags.contains(OpenFlags::TRUNCATE) {
                            if let Node::File(file) = &mut state.inodes.get_mut(&ino).unwrap().node
                            {
                                file.truncate(0);
                            }
                        }
                        ino
                    }
                    None => {
                        if !flags.contains(OpenFlags::CREATE) {
                            return Err(VfsError::NotFound);
                        }
                        let mode = if set_attr.set_mask.contains(AttrMask::MODE) {
                            set_attr.mode & 0o7777
                        } else {
                            0o644
                        };
                        let ino =
                            self.new_inode(state, FileType::Regular, mode, Node::File(PageFile::default()));
                        if let Node::Dir(entries) =
                            &mut state.inodes.get_mut(&dir_ino).unwrap().node
                        {
                            entries.insert(name.clone(), ino);
                        }
                        let dir = state.inodes.get_mut(&dir_ino).unwrap();
                        dir.mtime = now;
                        ino
                    }
                };

                *r_vfs_private = self.open_inode(state, child_ino);
                *r_attr = self.attrs_of(state.inodes.get(&child_ino).unwrap());
                *r_dir_post_attr = self.attrs_of(state.inodes.get(&dir_ino).unwrap());
                Ok(())
            }

            OpData::Close { handle, .. } => {
                let cookie = handle.vfs_private();
                if let Some(ino) = state.opens.remove(&cookie) {
                    if let Some(inode) = state.inodes.get_mut(&ino) {
                        inode.open_count = inode.open_count.saturating_sub(1);
                    }
                    self.reap(state, ino);
                }
                Ok(())
            }

            OpData::Read {
                handle,
                offset,
                length,
                r_data,
                r_eof,
                r_attr,
                ..
            } => {
                let ino = *state
                    .opens
                    .get(&handle.vfs_private())
                    .ok_or(VfsError::Stale)?;
                let inode = state.inodes.get(&ino).ok_or(VfsError::Stale)?;
                match &inode.node {
                    Node::File(file) => {
                        *r_data = file.read(*offset, *length as usize);
                        *r_eof = *offset + r_data.len() as u64 >= file.size;
                        *r_attr = self.attrs_of(inode);
                        Ok(())
                    }
                    _ => Err(VfsError::IsDir),
                }
            }

            OpData::Write {
                handle,
                offset,
                data,
                r_length,
                r_pre_attr,
                r_post_attr,
                ..
            } => {
                let ino = *state
                    .opens
                    .get(&handle.vfs_private())
                    .ok_or(VfsError::Stale)?;
                let inode = state.inodes.get_mut(&ino).ok_or(VfsError::Stale)?;
                *r_pre_attr = self.attrs_of(inode);
                match &mut inode.node {
                    Node::File(file) => {
                        file.write(*offset, data);
                        *r_length = data.len() as u32;
                        inode.mtime = now;
                        inode.ctime = now;
                        *r_post_attr = self.attrs_of(state.inodes.get(&ino).unwrap());
                        Ok(())
                    }
                    _ => Err(VfsError::IsDir),
                }
            }

            OpData::Commit {
                handle,
                r_pre_attr,
                r_post_attr,
                ..
            } => {
                let ino = *state
                    .opens
                    .get(&handle.vfs_private())
                    .ok_or(VfsError::Stale)?;
                let inode = state.inodes.get(&ino).ok_or(VfsError::Stale)?;
                *r_pre_attr = self.attrs_of(inode);
                *r_post_attr = self.attrs_of(inode);
                Ok(())
            }

            OpData::Allocate {
                handle,
                offset,
                length,
                r_pre_attr,
                r_post_attr,
                ..
            } => {
                let ino = *state
                    .opens
                    .get(&handle.vfs_private())
                    .ok_or(VfsError::Stale)?;
                let inode = state.inodes.get_mut(&ino).ok_or(VfsError::Stale)?;
                *r_pre_attr = self.attrs_of(inode);
                match &mut inode.node {
                    Node::File(file) => {
                        file.size = file.size.max(*offset + *length);
                        *r_post_attr = self.attrs_of(state.inodes.get(&ino).unwrap());
                        Ok(())
                    }
                    _ => Err(VfsError::IsDir),
                }
            }

            OpData::Remove {
                name,
                r_dir_pre_attr,
                r_dir_post_attr,
                ..
            } => {
                let dir_ino = self.ino_of(&fh)?;
                *r_dir_pre_attr = self.attrs_of(state.inodes.get(&dir_ino).ok_or(VfsError::Stale)?);

                let child_ino = *self
                    .dir_entries(state, dir_ino)?
                    .get(name.as_str())
                    .ok_or(VfsError::NotFound)?;

                if matches!(
                    state.inodes.get(&child_ino).unwrap().file_type,
                    FileType::Directory
                ) {
                    return Err(VfsError::IsDir);
                }

                if let Node::Dir(entries) = &mut state.inodes.get_mut(&dir_ino).unwrap().node {
                    entries.remove(name.as_str());
                }
                let dir = state.inodes.get_mut(&dir_ino).unwrap();
                dir.mtime = now;

                let child = state.inodes.get_mut(&child_ino).unwrap();
                child.nlink = child.nlink.saturating_sub(1);
                child.ctime = now;
                self.reap(state, child_ino);

                *r_dir_post_attr = self.attrs_of(state.inodes.get(&dir_ino).unwrap());
                Ok(())
            }

            OpData::Rename {
                name,
                new_dir_fh,
                new_name,
                r_fromdir_pre_attr,
                r_fromdir_post_attr,
                r_todir_pre_attr,
                r_todir_post_attr,
                ..
            } => {
                let from_ino = self.ino_of(&fh)?;
                let to_ino = self.ino_of(new_dir_fh)?;

                *r_fromdir_pre_attr =
                    self.attrs_of(state.inodes.get(&from_ino).ok_or(VfsError::Stale)?);
                *r_todir_pre_attr =
                    self.attrs_of(state.inodes.get(&to_ino).ok_or(VfsError::Stale)?);

                let src_ino = *self
                    .dir_entries(state, from_ino)?
                    .get(name.as_str())
                    .ok_or(VfsError::NotFound)?;
                let dest_ino = self.dir_entries(state, to_ino)?.get(new_name.as_str()).copied();

                // Hard links to the same inode: the rename is a no-op and
                // both names stay valid.
                if dest_ino != Some(src_ino) {
                    if let Some(dest_ino) = dest_ino {
                        let dest = state.inodes.get(&dest_ino).unwrap();
                        if matches!(dest.file_type, FileType::Directory) {
                            if let Node::Dir(entries) = &dest.node {
                                if !entries.is_empty() {
                                    return Err(VfsError::NotEmpty);
                                }
                            }
                        }
                        if let Node::Dir(entries) =
                            &mut state.inodes.get_mut(&to_ino).unwrap().node
                        {
                            entries.remove(new_name.as_str());
                        }
                        let dest = state.inodes.get_mut(&dest_ino).unwrap();
                        dest.nlink = dest.nlink.saturating_sub(1);
                        self.reap(state, dest_ino);
                    }

                    if let Node::Dir(entries) = &mut state.inodes.get_mut(&from_ino).unwrap().node
                    {
                        entries.remove(name.as_str());
                    }
                    if let Node::Dir(entries) = &mut state.inodes.get_mut(&to_ino).unwrap().node {
                        entries.insert(new_name.clone(), src_ino);
                    }

                    state.inodes.get_mut(&from_ino).unwrap().mtime = now;
                    state.inodes.get_mut(&to_ino).unwrap().mtime = now;
                }

                *r_fromdir_post_attr = self.attrs_of(state.inodes.get(&from_ino).unwrap());
                *r_todir_post_attr = self.attrs_of(state.inodes.get(&to_ino).unwrap());
                Ok(())
            }

            OpData::Mkdir {
                name,
                set_attr,
                r_attr,
                r_dir_pre_attr,
                r_dir_post_attr,
                ..
            } => {
                let dir_ino = self.ino_of(&fh)?;
                *r_dir_pre_attr = self.attrs_of(state.inodes.get(&dir_ino).ok_or(VfsError::Stale)?);

                if self.dir_entries(state, dir_ino)?.contains_key(name.as_str()) {
                    return Err(VfsError::Exists);
                }

                let mode = if set_attr.set_mask.contains(AttrMask::MODE) {
                    set_attr.mode & 0o7777
                } else {
                    0o755
                };
                let child_ino =
                    self.new_inode(state, FileType::Directory, mode, Node::Dir(BTreeMap::new()));

                if let Node::Dir(entries) = &mut state.inodes.get_mut(&dir_ino).unwrap().node {
                    entries.insert(name.clone(), child_ino);
                }
                let dir = state.inodes.get_mut(&dir_ino).unwrap();
                dir.nlink += 1;
                dir.mtime = now;

                *r_attr = self.attrs_of(state.inodes.get(&child_ino).unwrap());
                *r_dir_post_attr = self.attrs_of(state.inodes.get(&dir_ino).unwrap());
                Ok(())
            }

            OpData::Rmdir {
                name,
                r_dir_pre_attr,
                r_dir_post_attr,
                ..
            } => {
                let dir_ino = self.ino_of(&fh)?;
                *r_dir_pre_attr = self.attrs_of(state.inodes.get(&dir_ino).ok_or(VfsError::Stale)?);

                let child_ino = *self
                    .dir_entries(state, dir_ino)?
                    .get(name.as_str())
                    .ok_or(VfsError::NotFound)?;

                match &state.inodes.get(&child_ino).unwrap().node {
                    Node::Dir(entries) => {
                        if !entries.is_empty() {
                            return Err(VfsError::NotEmpty);
                        }
                    }
                    _ => return Err(VfsError::NotDir),
                }

                if let Node::Dir(entries) = &mut state.inodes.get_mut(&dir_ino).unwrap().node {
                    entries.remove(name.as_str());
                }
                let dir = state.inodes.get_mut(&dir_ino).unwrap();
                dir.nlink = dir.nlink.saturating_sub(1);
                dir.mtime = now;

                state.inodes.remove(&child_ino);

                *r_dir_post_attr = self.attrs_of(state.inodes.get(&dir_ino).unwrap());
                Ok(())
            }

            OpData::Symlink {
                name,
                target,
                r_attr,
                r_dir_pre_attr,
                r_dir_post_attr,
                ..
            } => {
                let dir_ino = self.ino_of(&fh)?;
                *r_dir_pre_attr = self.attrs_of(state.inodes.get(&dir_ino).ok_or(VfsError::Stale)?);

                if self.dir_entries(state, dir_ino)?.contains_key(name.as_str()) {
                    return Err(VfsError::Exists);
                }

                let child_ino = self.new_inode(
                    state,
                    FileType::Symlink,
                    0o777,
                    Node::Symlink(target.clone()),
                );
                if let Node::Dir(entries) = &mut state.inodes.get_mut(&dir_ino).unwrap().node {
                    entries.insert(name.clone(), child_ino);
                }
                state.inodes.get_mut(&dir_ino).unwrap().mtime = now;

                *r_attr = self.attrs_of(state.inodes.get(&child_ino).unwrap());
                *r_dir_post_attr = self.attrs_of(state.inodes.get(&dir_ino).unwrap());
                Ok(())
            }

            OpData::Readlink { r_target, .. } => {
                let ino = self.ino_of(&fh)?;
                match &state.inodes.get(&ino).ok_or(VfsError::Stale)?.node {
                    Node::Symlink(target) => {
                        *r_target = target.clone();
                        Ok(())
                    }
                    _ => Err(VfsError::Inval),
                }
            }

            OpData::Link {
                name, target_fh, ..
            } => {
                let dir_ino = self.ino_of(&fh)?;
                let target_ino = self.ino_of(target_fh)?;

                if !state.inodes.contains_key(&target_ino) {
                    return Err(VfsError::Stale);
                }
                if self.dir_entries(state, dir_ino)?.contains_key(name.as_str()) {
                    return Err(VfsError::Exists);
                }

                if let Node::Dir(entries) = &mut state.inodes.get_mut(&dir_ino).unwrap().node {
                    entries.insert(name.clone(), target_ino);
                }
                let target = state.inodes.get_mut(&target_ino).unwrap();
                target.nlink += 1;
                target.ctime = now;
                state.inodes.get_mut(&dir_ino).unwrap().mtime = now;
                Ok(())
            }

            OpData::Readdir {
                cookie,
                r_entries,
                r_eof,
                r_dir_attr,
                ..
            } => {
                let dir_ino = self.ino_of(&fh)?;
                let entries = self.dir_entries(state, dir_ino)?.clone();

                for (index, (name, child_ino)) in entries.iter().enumerate() {
                    if (index as u64) < *cookie {
                        continue;
                    }
                    let child = state.inodes.get(child_ino).unwrap();
                    r_entries.push(DirEntry {
                        name: name.clone(),
                        cookie: index as u64 + 1,
                        attrs: self.attrs_of(child),
                    });
                }
                *r_eof = true;
                *r_dir_attr = self.attrs_of(state.inodes.get(&dir_ino).unwrap());
                Ok(())
            }

            OpData::Statfs { r_statfs, .. } => {
                *r_statfs = StatFs {
                    total_bytes: 1 << 40,
                    free_bytes: 1 << 39,
                    avail_bytes: 1 << 39,
                    total_files: 1 << 20,
                    free_files: (1 << 20) - state.inodes.len() as u64,
                };
                Ok(())
            }

            OpData::CreateUnlinked {
                set_attr,
                r_attr,
                r_vfs_private,
                ..
            } => {
                let mode = if set_attr.set_mask.contains(AttrMask::MODE) {
                    set_attr.mode & 0o7777
                } else {
                    0o600
                };
                let ino =
                    self.new_inode(state, FileType::Regular, mode, Node::File(PageFile::default()));
                state.inodes.get_mut(&ino).unwrap().nlink = 0;

                *r_vfs_private = self.open_inode(state, ino);
                *r_attr = self.attrs_of(state.inodes.get(&ino).unwrap());
                Ok(())
            }

            OpData::Idle => unreachable!("idle request dispatched"),
        }
    }
}

impl Module for MemoryFs {
    fn name(&self) -> &'static str {
        "memfs"
    }

    fn fh_magic(&self) -> u8 {
        self.magic
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::OPEN_FILE_REQUIRED | Capabilities::CREATE_UNLINKED
    }

    fn dispatch(&self, mut request: Box<Request>) {
        self.ops.lock().unwrap().push(request.op.opcode());

        let status = {
            let mut state = self.state.lock();
            self.handle_op(&mut state, &mut request)
        };

        request.status = status;
        request.complete();
    }
}

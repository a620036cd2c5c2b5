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

//! A synchronous POSIX-ish client facade over the callback API.
//!
//! Exists so scenario tests read like the conformance suite they mirror:
//! numeric fds, creat/read/write/close, stat by (dir, name). Each call parks
//! on a channel until its callback fires.

use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        mpsc,
    },
    time::Duration,
};

use hashbrown::HashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use reef_common::{
    attrs::{AttrMask, Attrs},
    fh::Fh,
};

use crate::{
    context::Vfs,
    error::{VfsError, VfsResult},
    module::Module,
    open_cache::{OpenFlags, OpenHandleRef},
    proc,
    request::Cred,
    thread::VfsThread,
};

const OP_TIMEOUT: Duration = Duration::from_secs(10);

fn wait<T>(rx: mpsc::Receiver<T>) -> T {
    rx.recv_timeout(OP_TIMEOUT).expect("vfs operation timed out")
}

pub struct Client {
    vfs: Vfs,
    thread: VfsThread,
    cred: Cred,
    root: Fh,
    fds: Mutex<HashMap<i32, OpenHandleRef>>,
    next_fd: AtomicI32,
}

impl Client {
    /// Resolve the module's root and build a client around it.
    pub fn new(vfs: &Vfs, module: &std::sync::Arc<dyn Module>) -> Self {
        let thread = vfs.thread();
        let cred = Cred::default();

        let (tx, rx) = mpsc::channel();
        proc::getrootfh::getrootfh(
            &thread,
            &cred,
            module,
            "/",
            AttrMask::STAT,
            move |status, attrs| {
                let _ = tx.send((status, attrs));
            },
        );
        let (status, attrs) = wait(rx);
        status.expect("getrootfh failed");

        Self {
            vfs: vfs.clone(),
            thread,
            cred,
            root: attrs.fh,
            fds: Mutex::new(HashMap::new()),
            next_fd: AtomicI32::new(3),
        }
    }

    pub fn root(&self) -> Fh {
        self.root
    }

    pub fn thread(&self) -> &VfsThread {
        &self.thread
    }

    /// Run a deferred-close sweep with no age threshold.
    pub fn sweep(&self) {
        self.vfs.sweep_now(&self.thread);
    }

    fn install_fd(&self, handle: OpenHandleRef) -> i32 {
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.fds.lock().insert(fd, handle);
        fd
    }

    /// The open handle backing `fd`.
    pub fn fd_handle(&self, fd: i32) -> VfsResult<OpenHandleRef> {
        self.fds.lock().get(&fd).cloned().ok_or(VfsError::Inval)
    }

    fn open_dir(&self, dir: &Fh) -> VfsResult<OpenHandleRef> {
        let (tx, rx) = mpsc::channel();
        proc::open::open(
            &self.thread,
            &self.cred,
            dir,
            OpenFlags::PATH | OpenFlags::READ_ONLY,
            false,
            move |status, handle| {
                let _ = tx.send((status, handle));
            },
        );
        let (status, handle) = wait(rx);
        status?;
        Ok(handle.expect("open returned no handle"))
    }

    /// open(2) relative to `dir`. `mode` only matters with CREATE.
    pub fn open_at(&self, dir: &Fh, name: &str, flags: OpenFlags, mode: u32) -> VfsResult<i32> {
        let parent = self.open_dir(dir)?;

        let mut set_attr = Attrs::default();
        if flags.contains(OpenFlags::CREATE) {
            set_attr.mode = mode;
            set_attr.set_mask |= AttrMask::MODE;
        }

        let (tx, rx) = mpsc::channel();
        proc::open_at::open_at(
            &self.thread,
            &self.cred,
            &parent,
            name,
            flags,
            set_attr,
            AttrMask::STAT,
            move |status, handle, _attr, _pre, _post| {
                let _ = tx.send((status, handle));
            },
        );
        let (status, handle) = wait(rx);

        self.vfs.release(&self.thread, parent);

        status?;
        Ok(self.install_fd(handle.expect("open_at returned no handle")))
    }

    pub fn creat(&self, dir: &Fh, name: &str, mode: u32) -> VfsResult<i32> {
        self.open_at(dir, name, OpenFlags::CREATE, mode)
    }

    pub fn close(&self, fd: i32) -> VfsResult<()> {
        let handle = self.fds.lock().remove(&fd).ok_or(VfsError::Inval)?;
        self.vfs.release(&self.thread, handle);
        Ok(())
    }

    pub fn write(&self, fd: i32, offset: u64, data: &[u8]) -> VfsResult<u32> {
        let handle = self.fd_handle(fd)?;
        let (tx, rx) = mpsc::channel();
        proc::write::write(
            &self.thread,
            &self.cred,
            &handle,
            offset,
            false,
            data.to_vec(),
            move |status, written, _pre, _post| {
                let _ = tx.send((status, written));
            },
        );
        let (status, written) = wait(rx);
        status?;
        Ok(written)
    }

    pub fn read(&self, fd: i32, offset: u64, length: u32) -> VfsResult<Vec<u8>> {
        let handle = self.fd_handle(fd)?;
        let (tx, rx) = mpsc::channel();
        proc::read::read(
            &self.thread,
            &self.cred,
            &handle,
            offset,
            length,
            AttrMask::STAT,
            move |status, data, _eof, _attr| {
                let _ = tx.send((status, data));
            },
        );
        let (status, data) = wait(rx);
        status?;
        Ok(data)
    }

    pub fn fstat(&self, fd: i32) -> VfsResult<Attrs> {
        let handle = self.fd_handle(fd)?;
        let (tx, rx) = mpsc::channel();
        proc::getattr::getattr(
            &self.thread,
            &self.cred,
            &handle,
            AttrMask::STAT,
            move |status, attrs| {
                let _ = tx.send((status, attrs));
            },
        );
        let (status, attrs) = wait(rx);
        status?;
        Ok(attrs)
    }

    pub fn ftruncate(&self, fd: i32, size: u64) -> VfsResult<Attrs> {
        let handle = self.fd_handle(fd)?;
        let mut set_attr = Attrs::default();
        set_attr.size = size;
        set_attr.set_mask |= AttrMask::SIZE;

        let (tx, rx) = mpsc::channel();
        proc::setattr::setattr(
            &self.thread,
            &self.cred,
            &handle,
            set_attr,
            move |status, _pre, post| {
                let _ = tx.send((status, post));
            },
        );
        let (status, post) = wait(rx);
        status?;
        Ok(post)
    }

    /// stat(2) by (dir, name).
    pub fn stat(&self, dir: &Fh, name: &str) -> VfsResult<Attrs> {
        let (tx, rx) = mpsc::channel();
        proc::lookup::lookup(
            &self.thread,
            &self.cred,
            dir,
            name,
            AttrMask::STAT,
            move |status, attrs, _dir_attrs| {
                let _ = tx.send((status, attrs));
            },
        );
        let (status, attrs) = wait(rx);
        status?;
        Ok(attrs)
    }

    pub fn chmod(&self, dir: &Fh, name: &str, mode: u32) -> VfsResult<Attrs> {
        let attrs = self.stat(dir, name)?;
        let fd = self.open_fh(&attrs.fh, OpenFlags::empty())?;
        let handle = self.fd_handle(fd)?;

        let mut set_attr = Attrs::default();
        set_attr.mode = mode;
        set_attr.set_mask |= AttrMask::MODE;

        let (tx, rx) = mpsc::channel();
        proc::setattr::setattr(
            &self.thread,
            &self.cred,
            &handle,
            set_attr,
            move |status, _pre, post| {
                let _ = tx.send((status, post));
            },
        );
        let (status, post) = wait(rx);
        self.close(fd)?;
        status?;
        Ok(post)
    }

    /// Open an object directly by handle.
    pub fn open_fh(&self, fh: &Fh, flags: OpenFlags) -> VfsResult<i32> {
        let (tx, rx) = mpsc::channel();
        proc::open::open(
            &self.thread,
            &self.cred,
            fh,
            flags,
            false,
            move |status, handle| {
                let _ = tx.send((status, handle));
            },
        );
        let (status, handle) = wait(rx);
        status?;
        Ok(self.install_fd(handle.expect("open returned no handle")))
    }

    /// unlink(2); a plain remove with no child handle.
    pub fn unlink(&self, dir: &Fh, name: &str) -> VfsResult<()> {
        self.remove_common(dir, name, None)
    }

    /// Remove as the local client library does: the child FH is passed so an
    /// open file gets silly-renamed instead of removed.
    pub fn unlink_open(&self, dir: &Fh, name: &str, child_fh: &Fh) -> VfsResult<()> {
        self.remove_common(dir, name, Some(child_fh))
    }

    fn remove_common(&self, dir: &Fh, name: &str, child_fh: Option<&Fh>) -> VfsResult<()> {
        let (tx, rx) = mpsc::channel();
        proc::remove::remove_at(
            &self.thread,
            &self.cred,
            dir,
            name,
            child_fh,
            move |status, _pre, _post| {
                let _ = tx.send(status);
            },
        );
        wait(rx)
    }

    pub fn rename(&self, dir: &Fh, name: &str, new_dir: &Fh, new_name: &str) -> VfsResult<()> {
        let (tx, rx) = mpsc::channel();
        proc::rename_at::rename_at(
            &self.thread,
            &self.cred,
            dir,
            name,
            new_dir,
            new_name,
            move |status, _a, _b, _c, _d| {
                let _ = tx.send(status);
            },
        );
        wait(rx)
    }

    pub fn mkdir(&self, dir: &Fh, name: &str, mode: u32) -> VfsResult<Attrs> {
        let mut set_attr = Attrs::default();
        set_attr.mode = mode;
        set_attr.set_mask |= AttrMask::MODE;

        let (tx, rx) = mpsc::channel();
        proc::mkdir::mkdir(
            &self.thread,
            &self.cred,
            dir,
            name,
            set_attr,
            move |status, attrs, _pre, _post| {
                let _ = tx.send((status, attrs));
            },
        );
        let (status, attrs) = wait(rx);
        status?;
        Ok(attrs)
    }

    pub fn rmdir(&self, dir: &Fh, name: &str) -> VfsResult<()> {
        let (tx, rx) = mpsc::channel();
        proc::rmdir::rmdir(&self.thread, &self.cred, dir, name, move |status, _pre, _post| {
            let _ = tx.send(status);
        });
        wait(rx)
    }

    pub fn symlink(&self, dir: &Fh, name: &str, target: &str) -> VfsResult<Attrs> {
        let (tx, rx) = mpsc::channel();
        proc::symlink::symlink(
            &self.thread,
            &self.cred,
            dir,
            name,
            target,
            Attrs::default(),
            move |status, attrs, _pre, _post| {
                let _ = tx.send((status, attrs));
            },
        );
        let (status, attrs) = wait(rx);
        status?;
        Ok(attrs)
    }

    pub fn readlink(&self, fh: &Fh) -> VfsResult<String> {
        let (tx, rx) = mpsc::channel();
        proc::readlink::readlink(&self.thread, &self.cred, fh, move |status, target| {
            let _ = tx.send((status, target));
        });
        let (status, target) = wait(rx);
        status?;
        Ok(target)
    }

    pub fn link(&self, dir: &Fh, name: &str, target_fh: &Fh) -> VfsResult<()> {
        let (tx, rx) = mpsc::channel();
        proc::link::link(
            &self.thread,
            &self.cred,
            dir,
            name,
            target_fh,
            move |status, _pre, _post| {
                let _ = tx.send(status);
            },
        );
        wait(rx)
    }

    /// Directory listing as names, in backend order.
    pub fn readdir(&self, dir: &Fh) -> VfsResult<Vec<String>> {
        let (tx, rx) = mpsc::channel();
        proc::readdir::readdir(
            &self.thread,
            &self.cred,
            dir,
            0,
            AttrMask::STAT,
            move |status, entries, _eof, _dir_attr| {
                let _ = tx.send((status, entries));
            },
        );
        let (status, entries) = wait(rx);
        status?;
        Ok(entries.into_iter().map(|entry| entry.name).collect_vec())
    }

    pub fn statfs(&self, fh: &Fh) -> VfsResult<crate::request::StatFs> {
        let (tx, rx) = mpsc::channel();
        proc::statfs::statfs(&self.thread, &self.cred, fh, move |status, statfs| {
            let _ = tx.send((status, statfs));
        });
        let (status, statfs) = wait(rx);
        status?;
        Ok(statfs)
    }
}

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

//! End-to-end behavior of the caches and dispatch around the in-memory
//! backend: cache-served operations, blocked opens through a gated module,
//! orphan creation, and unmount draining.

use std::sync::{mpsc, Arc};

use reef_vfs::{
    prelude::*,
    test_utils::{Client, GatedModule, MemoryFs},
};

fn setup() -> (Vfs, Arc<MemoryFs>, Client) {
    let vfs = Vfs::new(VfsConfig::default());
    let fs = Arc::new(MemoryFs::new(0x5a));
    vfs.register_module(fs.clone());
    let module: Arc<dyn Module> = fs.clone();
    let client = Client::new(&vfs, &module);
    (vfs, fs, client)
}

fn count_ops(fs: &MemoryFs, op: &str) -> usize {
    fs.dispatched_ops().iter().filter(|o| **o == op).count()
}

#[test_log::test]
fn test_stat_served_from_caches() {
    let (_vfs, fs, client) = setup();
    let root = client.root();

    let fd = client.creat(&root, "cached", 0o644).unwrap();
    client.close(fd).unwrap();

    // The open-at completion primed both the name and attribute caches, so
    // stat resolves without backend lookups.
    let before = count_ops(&fs, "lookup");
    for _ in 0..5 {
        let attrs = client.stat(&root, "cached").unwrap();
        assert_eq!(attrs.mode & 0o777, 0o644);
    }
    assert_eq!(count_ops(&fs, "lookup"), before);

    client.unlink(&root, "cached").unwrap();
}

#[test_log::test]
fn test_fstat_served_from_attr_cache() {
    let (_vfs, fs, client) = setup();
    let root = client.root();

    let fd = client.creat(&root, "attrcached", 0o600).unwrap();
    client.write(fd, 0, b"abc").unwrap();

    let before = count_ops(&fs, "getattr");
    let attrs = client.fstat(fd).unwrap();
    assert_eq!(attrs.size, 3);
    assert_eq!(count_ops(&fs, "getattr"), before);

    client.close(fd).unwrap();
    client.unlink(&root, "attrcached").unwrap();
}

#[test_log::test]
fn test_gated_open_blocks_until_backend_completes() {
    let vfs = Vfs::new(VfsConfig::default());
    let fs = Arc::new(MemoryFs::new(0x5a));
    let gated = GatedModule::new(fs.clone());
    vfs.register_module(gated.clone());
    let module: Arc<dyn Module> = gated.clone();
    let client = Client::new(&vfs, &module);
    let root = client.root();

    let fd = client.creat(&root, "slow", 0o644).unwrap();
    client.close(fd).unwrap();
    let fh = client.stat(&root, "slow").unwrap().fh;
    client.sweep();

    // Hold the backend open in flight.
    gated.close_gate();

    let thread = client.thread().clone();
    let cred = Cred::default();

    let (tx1, rx1) = mpsc::channel();
    open(&thread, &cred, &fh, OpenFlags::empty(), false, move |status, handle| {
        let _ = tx1.send((status, handle));
    });

    let (tx2, rx2) = mpsc::channel();
    open(&thread, &cred, &fh, OpenFlags::empty(), false, move |status, handle| {
        let _ = tx2.send((status, handle));
    });

    // Neither open can complete: the first owns the in-flight backend open,
    // the second is parked on the pending handle.
    assert!(rx1.try_recv().is_err());
    assert!(rx2.try_recv().is_err());
    assert_eq!(gated.queued_len(), 1);

    gated.open_gate();

    let (status1, handle1) = rx1.recv().unwrap();
    let (status2, handle2) = rx2.recv().unwrap();
    status1.unwrap();
    status2.unwrap();

    let handle1 = handle1.unwrap();
    let handle2 = handle2.unwrap();
    assert!(Arc::ptr_eq(&handle1, &handle2));
    assert_eq!(handle1.opencnt(), 2);

    vfs.release(&thread, handle1);
    vfs.release(&thread, handle2);
}

#[test_log::test]
fn test_create_unlinked_lives_until_release() {
    let (vfs, fs, client) = setup();
    let root = client.root();
    let thread = client.thread().clone();
    let cred = Cred::default();

    let inodes_before = fs.inode_count();

    let (tx, rx) = mpsc::channel();
    create_unlinked(
        &thread,
        &cred,
        &root,
        Attrs::default(),
        AttrMask::STAT,
        move |status, handle, attrs| {
            let _ = tx.send((status, handle, attrs));
        },
    );
    let (status, handle, attrs) = rx.recv().unwrap();
    status.unwrap();
    let handle = handle.unwrap();
    assert_eq!(attrs.nlink, 0);

    // The orphan is writable and readable through the handle but appears in
    // no directory.
    let (tx, rx) = mpsc::channel();
    write(&thread, &cred, &handle, 0, false, b"orphan".to_vec(), move |status, n, _, _| {
        let _ = tx.send((status, n));
    });
    let (status, written) = rx.recv().unwrap();
    status.unwrap();
    assert_eq!(written, 6);

    let (tx, rx) = mpsc::channel();
    read(&thread, &cred, &handle, 0, 6, AttrMask::STAT, move |status, data, _, _| {
        let _ = tx.send((status, data));
    });
    let (status, data) = rx.recv().unwrap();
    status.unwrap();
    assert_eq!(data, b"orphan");

    assert!(client.readdir(&root).unwrap().is_empty());
    assert_eq!(fs.inode_count(), inodes_before + 1);

    // Last release plus a sweep reaps the orphan.
    vfs.release(&thread, handle);
    vfs.sweep_now(&thread);
    assert_eq!(fs.inode_count(), inodes_before);
}

#[test_log::test]
fn test_commit_and_allocate_update_attrs() {
    let (_vfs, _fs, client) = setup();
    let root = client.root();
    let thread = client.thread().clone();
    let cred = Cred::default();

    let fd = client.creat(&root, "alloc", 0o644).unwrap();
    let handle = client.fd_handle(fd).unwrap();

    let (tx, rx) = mpsc::channel();
    allocate(&thread, &cred, &handle, 0, 8192, move |status, _pre, post| {
        let _ = tx.send((status, post));
    });
    let (status, post) = rx.recv().unwrap();
    status.unwrap();
    assert_eq!(post.size, 8192);

    let (tx, rx) = mpsc::channel();
    commit(&thread, &cred, &handle, 0, 8192, move |status, _pre, post| {
        let _ = tx.send((status, post));
    });
    let (status, post) = rx.recv().unwrap();
    status.unwrap();
    assert_eq!(post.size, 8192);

    // fstat sees the allocated size straight from the attribute cache.
    assert_eq!(client.fstat(fd).unwrap().size, 8192);

    client.close(fd).unwrap();
    client.unlink(&root, "alloc").unwrap();
}

#[test_log::test]
fn test_hard_link_rename_to_same_inode_is_noop() {
    let (_vfs, _fs, client) = setup();
    let root = client.root();

    let fd = client.creat(&root, "a", 0o644).unwrap();
    client.close(fd).unwrap();
    let fh = client.stat(&root, "a").unwrap().fh;

    client.link(&root, "b", &fh).unwrap();
    assert_eq!(client.stat(&root, "b").unwrap().ino, client.stat(&root, "a").unwrap().ino);

    // Renaming one hard link over the other leaves both names valid.
    client.rename(&root, "a", &root, "b").unwrap();
    client.stat(&root, "a").unwrap();
    client.stat(&root, "b").unwrap();

    let mut listing = client.readdir(&root).unwrap();
    listing.sort();
    assert_eq!(listing, vec!["a".to_string(), "b".to_string()]);
}

#[test_log::test]
fn test_mkdir_readdir_rmdir() {
    let (_vfs, _fs, client) = setup();
    let root = client.root();

    let dir = client.mkdir(&root, "sub", 0o755).unwrap();
    assert_eq!(dir.file_type, FileType::Directory);

    let fd = client.creat(&dir.fh, "inner", 0o644).unwrap();
    client.close(fd).unwrap();

    assert_eq!(client.readdir(&dir.fh).unwrap(), vec!["inner".to_string()]);
    assert_eq!(client.rmdir(&root, "sub"), Err(VfsError::NotEmpty));

    client.unlink(&dir.fh, "inner").unwrap();
    client.rmdir(&root, "sub").unwrap();
    assert_eq!(client.stat(&root, "sub"), Err(VfsError::NotFound));
}

#[test_log::test]
fn test_symlink_readlink() {
    let (_vfs, _fs, client) = setup();
    let root = client.root();

    let attrs = client.symlink(&root, "ln", "target/path").unwrap();
    assert_eq!(attrs.file_type, FileType::Symlink);
    assert_eq!(client.readlink(&attrs.fh).unwrap(), "target/path");

    client.unlink(&root, "ln").unwrap();
}

#[test_log::test]
fn test_statfs_reports_filesystem() {
    let (_vfs, _fs, client) = setup();
    let root = client.root();

    let statfs = client.statfs(&root).unwrap();
    assert!(statfs.total_bytes > 0);
    assert!(statfs.free_files > 0);
}

#[test_log::test]
fn test_unmount_drain_marks_and_sweeps() {
    let (vfs, fs, client) = setup();
    let root = client.root();

    let mut fds = Vec::new();
    for i in 0..4 {
        fds.push(client.creat(&root, &format!("drain.{i}"), 0o644).unwrap());
    }

    // Referenced handles pin the mount.
    assert!(vfs.mount_open_count(fs.mount_id()) >= 4);

    for fd in fds {
        client.close(fd).unwrap();
    }
    assert_eq!(vfs.mount_open_count(fs.mount_id()), 0);

    // The freshly released handles are younger than any realistic minimum
    // age, so a plain sweep leaves them parked.
    let thread = client.thread();
    let cutoff = reef_common::clock::monotonic_ns().saturating_sub(1);
    vfs.sweep_once(thread, cutoff);
    assert!(vfs.open_file_cache().open_handle_count() > 0);

    // Marking zeroes their timestamps; the same sweep now collects them.
    let marked = vfs.mark_mount_for_close(fs.mount_id());
    assert!(marked >= 4);
    vfs.sweep_once(thread, cutoff);
    assert_eq!(vfs.open_file_cache().open_handle_count(), 0);

    for i in 0..4 {
        client.unlink(&root, &format!("drain.{i}")).unwrap();
    }
}

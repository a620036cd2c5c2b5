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

//! POSIX conformance scenarios driven end to end through the dispatch
//! pipeline, the open/attr/name caches, and the in-memory backend.

use std::sync::Arc;

use reef_vfs::{
    prelude::*,
    test_utils::{Client, MemoryFs},
};

fn setup() -> (Vfs, Arc<MemoryFs>, Client) {
    let vfs = Vfs::new(VfsConfig::default());
    let fs = Arc::new(MemoryFs::new(0x5a));
    vfs.register_module(fs.clone());
    let module: Arc<dyn Module> = fs.clone();
    let client = Client::new(&vfs, &module);
    (vfs, fs, client)
}

#[test_log::test]
fn test_bigfile_write_read_unlink() {
    const SIZE: usize = 1_048_576;
    const CHUNK: usize = 8192;

    let (_vfs, _fs, client) = setup();
    let root = client.root();

    let fd = client.creat(&root, "bigfile", 0o666).unwrap();

    let mut buf = vec![0u8; CHUNK];
    for offset in (0..SIZE).step_by(CHUNK) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = ((offset + i) % 256) as u8;
        }
        let written = client.write(fd, offset as u64, &buf).unwrap();
        assert_eq!(written as usize, CHUNK);
    }

    client.close(fd).unwrap();

    let attrs = client.stat(&root, "bigfile").unwrap();
    assert_eq!(attrs.size, SIZE as u64);

    let fd = client
        .open_at(&root, "bigfile", OpenFlags::READ_ONLY, 0)
        .unwrap();
    for offset in (0..SIZE).step_by(CHUNK) {
        let data = client.read(fd, offset as u64, CHUNK as u32).unwrap();
        assert_eq!(data.len(), CHUNK);
        for (i, b) in data.iter().enumerate() {
            assert_eq!(*b, ((offset + i) % 256) as u8, "mismatch at {}", offset + i);
        }
    }
    client.close(fd).unwrap();

    client.unlink(&root, "bigfile").unwrap();
    assert_eq!(client.stat(&root, "bigfile"), Err(VfsError::NotFound));
}

#[test_log::test]
fn test_chmod_roundtrip() {
    let (_vfs, _fs, client) = setup();
    let root = client.root();

    let fd = client.creat(&root, "file.0", 0o644).unwrap();
    client.close(fd).unwrap();

    client.chmod(&root, "file.0", 0).unwrap();
    let attrs = client.stat(&root, "file.0").unwrap();
    assert_eq!(attrs.mode & 0o777, 0);

    client.chmod(&root, "file.0", 0o666).unwrap();
    let attrs = client.stat(&root, "file.0").unwrap();
    assert_eq!(attrs.mode & 0o777, 0o666);

    client.unlink(&root, "file.0").unwrap();
}

#[test_log::test]
fn test_rename_and_back() {
    let (_vfs, _fs, client) = setup();
    let root = client.root();

    let fd = client.creat(&root, "file.0", 0o644).unwrap();
    client.close(fd).unwrap();

    client.rename(&root, "file.0", &root, "newfile.0").unwrap();
    assert_eq!(client.stat(&root, "file.0"), Err(VfsError::NotFound));
    client.stat(&root, "newfile.0").unwrap();

    client.rename(&root, "newfile.0", &root, "file.0").unwrap();
    client.stat(&root, "file.0").unwrap();
}

#[test_log::test]
fn test_open_unlink_write_read() {
    const LEN: usize = 100;

    let (_vfs, _fs, client) = setup();
    let root = client.root();

    let fd = client.creat(&root, "f", 0o644).unwrap();

    // Plain unlink with no child handle: the entry goes away but the open
    // file stays usable.
    client.unlink(&root, "f").unwrap();

    let msg = b"This is a test message written to the unlinked file\n";
    let mut buf = [0u8; LEN];
    buf[..msg.len()].copy_from_slice(msg);

    assert_eq!(client.write(fd, 0, &buf).unwrap() as usize, LEN);
    let data = client.read(fd, 0, LEN as u32).unwrap();
    assert_eq!(data, buf);

    assert_eq!(client.unlink(&root, "f"), Err(VfsError::NotFound));

    client.close(fd).unwrap();
    assert_eq!(client.close(fd), Err(VfsError::Inval));
}

#[test_log::test]
fn test_exclusive_create() {
    let (_vfs, _fs, client) = setup();
    let root = client.root();

    let fd = client
        .open_at(&root, "excl", OpenFlags::CREATE | OpenFlags::EXCL, 0o644)
        .unwrap();

    let second = client.open_at(&root, "excl", OpenFlags::CREATE | OpenFlags::EXCL, 0o644);
    assert_eq!(second.unwrap_err(), VfsError::Exists);

    client.close(fd).unwrap();
    client.unlink(&root, "excl").unwrap();
}

#[test_log::test]
fn test_silly_rename_under_live_reference() {
    let (_vfs, fs, client) = setup();
    let root = client.root();

    // Client A holds the file open.
    let fd_a = client.creat(&root, "f", 0o644).unwrap();
    client.write(fd_a, 0, b"hello").unwrap();

    let child_fh = client.stat(&root, "f").unwrap().fh;

    // Client B removes through the local library path, passing the child
    // handle it resolved.
    client.unlink_open(&root, "f", &child_fh).unwrap();

    // The remove reported OK but the directory holds the hidden name.
    let listing = client.readdir(&root).unwrap();
    assert_eq!(listing, vec![silly_name(&child_fh)]);

    // A concurrent retry short-circuits: the rename already happened.
    client.unlink_open(&root, "f", &child_fh).unwrap();
    let renames = fs
        .dispatched_ops()
        .iter()
        .filter(|op| **op == "rename")
        .count();
    assert_eq!(renames, 1);

    // A's reads keep working on the renamed file.
    assert_eq!(client.read(fd_a, 0, 5).unwrap(), b"hello");

    // Last close plus a sweep removes the hidden file.
    client.close(fd_a).unwrap();
    client.sweep();
    assert!(client.readdir(&root).unwrap().is_empty());
}

#[test_log::test]
fn test_holey_file() {
    const DATA_RUN: usize = 4321;
    const HOLE: usize = 9012;
    const TOTAL: usize = 70_000;

    let (_vfs, _fs, client) = setup();
    let root = client.root();

    let fd = client.creat(&root, "holey", 0o644).unwrap();

    let mut runs = Vec::new();
    let mut offset = 0usize;
    while offset + DATA_RUN <= TOTAL {
        let mut buf = vec![0u8; DATA_RUN];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = ((offset + i) % 251 + 1) as u8;
        }
        client.write(fd, offset as u64, &buf).unwrap();
        runs.push(offset);
        offset += DATA_RUN + HOLE;
    }

    client.ftruncate(fd, TOTAL as u64).unwrap();
    assert_eq!(client.fstat(fd).unwrap().size, TOTAL as u64);

    let data = client.read(fd, 0, TOTAL as u32).unwrap();
    assert_eq!(data.len(), TOTAL);

    for (pos, b) in data.iter().enumerate() {
        let in_run = runs
            .iter()
            .any(|&start| pos >= start && pos < start + DATA_RUN);
        if in_run {
            assert_eq!(*b, (pos % 251 + 1) as u8, "data mismatch at {pos}");
        } else {
            assert_eq!(*b, 0, "hole not zero at {pos}");
        }
    }

    client.close(fd).unwrap();
    client.unlink(&root, "holey").unwrap();
}

#[test_log::test]
fn test_large_offset_stat() {
    let (_vfs, _fs, client) = setup();
    let root = client.root();

    let fd = client.creat(&root, "bigoff", 0o644).unwrap();

    client.write(fd, 0x8000_0000, &[0x5a]).unwrap();
    assert_eq!(client.fstat(fd).unwrap().size, 0x8000_0001);

    client.write(fd, 0x1_0000_0000, &[0x5a]).unwrap();
    assert_eq!(client.fstat(fd).unwrap().size, 0x1_0000_0001);

    client.close(fd).unwrap();
    client.unlink(&root, "bigoff").unwrap();
}

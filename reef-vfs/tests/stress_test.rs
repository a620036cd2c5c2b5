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

//! Concurrency stress: acquire/release storms across worker threads, with
//! blocked opens resumed over the doorbell path.

use std::sync::{mpsc, Arc};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use reef_vfs::{
    prelude::*,
    test_utils::{Client, MemoryFs},
};

const THREADS: usize = 4;
const ITERS: usize = 250;
const FILES: usize = 8;

/// Synchronous open that services the worker's inbox while waiting, so
/// cross-thread unblocks can land.
fn open_sync(thread: &VfsThread, cred: &Cred, fh: &Fh, flags: OpenFlags) -> VfsResult<OpenHandleRef> {
    let (tx, rx) = mpsc::channel();
    open(thread, cred, fh, flags, false, move |status, handle| {
        let _ = tx.send((status, handle));
    });

    loop {
        match rx.try_recv() {
            Ok((status, handle)) => {
                status?;
                return Ok(handle.expect("open returned no handle"));
            }
            Err(mpsc::TryRecvError::Empty) => {
                if thread.poll() == 0 {
                    std::thread::yield_now();
                }
            }
            Err(mpsc::TryRecvError::Disconnected) => unreachable!("open callback dropped"),
        }
    }
}

fn getattr_sync(thread: &VfsThread, cred: &Cred, handle: &OpenHandleRef) -> VfsResult<Attrs> {
    let (tx, rx) = mpsc::channel();
    getattr(thread, cred, handle, AttrMask::STAT, move |status, attrs| {
        let _ = tx.send((status, attrs));
    });
    loop {
        match rx.try_recv() {
            Ok((status, attrs)) => {
                status?;
                return Ok(attrs);
            }
            Err(mpsc::TryRecvError::Empty) => {
                if thread.poll() == 0 {
                    std::thread::yield_now();
                }
            }
            Err(mpsc::TryRecvError::Disconnected) => unreachable!("getattr callback dropped"),
        }
    }
}

#[test_log::test]
fn test_open_release_storm() {
    let vfs = Vfs::new(VfsConfig::default());
    let fs = Arc::new(MemoryFs::new(0x5a));
    vfs.register_module(fs.clone());
    let module: Arc<dyn Module> = fs.clone();
    let client = Client::new(&vfs, &module);
    let root = client.root();

    let mut fhs = Vec::new();
    for i in 0..FILES {
        let fd = client.creat(&root, &format!("storm.{i}"), 0o644).unwrap();
        client.write(fd, 0, format!("storm.{i}").as_bytes()).unwrap();
        client.close(fd).unwrap();
        fhs.push(client.stat(&root, &format!("storm.{i}")).unwrap().fh);
    }
    client.sweep();
    let fhs = Arc::new(fhs);

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let vfs = vfs.clone();
            let fhs = fhs.clone();
            std::thread::spawn(move || {
                let thread = vfs.thread();
                let cred = Cred::default();
                let mut rng = SmallRng::seed_from_u64(worker as u64 ^ 0x9e3779b9);

                for _ in 0..ITERS {
                    let fh = &fhs[rng.gen_range(0..FILES)];
                    let flags = if rng.gen_bool(0.5) {
                        OpenFlags::READ_ONLY
                    } else {
                        OpenFlags::empty()
                    };

                    let handle = open_sync(&thread, &cred, fh, flags).unwrap();
                    assert!(!handle.is_pending());
                    assert!(handle.opencnt() >= 1);

                    let attrs = getattr_sync(&thread, &cred, &handle).unwrap();
                    assert!(attrs.size > 0);

                    vfs.release(&thread, handle);
                }

                // Drain any resume tasks still parked in the inbox.
                thread.poll();
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    // Every logical reference was released: the files parked on
    // pending-close and a sweep empties both caches.
    let thread = client.thread();
    for fh in fhs.iter() {
        assert!(vfs.open_file_cache().lookup_ref(fh, fh_hash(fh.as_bytes())).is_none());
    }
    vfs.sweep_now(thread);
    assert_eq!(vfs.open_file_cache().open_handle_count(), 0);

    for i in 0..FILES {
        client.unlink(&root, &format!("storm.{i}")).unwrap();
    }
}

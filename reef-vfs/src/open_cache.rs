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

//! The sharded, reference-counted open-handle cache.
//!
//! Two instances exist per context: one for file opens and one for path
//! (directory traversal) opens. Handles keep a logical open count that is
//! independent of their memory lifetime: when the count reaches zero the
//! handle parks on its shard's pending-close queue until the deferred-close
//! sweeper or a capacity eviction issues the backend close.
//!
//! Lock discipline: all handle state is mutated under the owning shard's
//! mutex, which is never held across a backend call or a caller callback.

use std::{
    any::Any,
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, OnceLock,
    },
};

use bitflags::bitflags;
use parking_lot::Mutex;
use reef_common::{clock, counters::CacheCounters, fh::Fh};
use tracing::debug;

use crate::{
    error::Status,
    module::Module,
    proc::close::close_handle,
    request::Request,
    shards::Shards,
    thread::{release_blocked, VfsThread},
};

/// Sentinel for a backend cookie that has not been populated yet.
pub const VFS_PRIVATE_UNSET: u64 = u64::MAX;

/// Cache id of synthetic handles, which belong to no cache.
pub const SYNTHETIC_CACHE_ID: u8 = u8::MAX;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandleFlags: u32 {
        /// Backend open still in flight; `vfs_private` is unset.
        const PENDING = 1 << 0;
        /// Serialize concurrent acquirers: new arrivals queue until the
        /// exclusive holder releases.
        const EXCLUSIVE = 1 << 1;
        /// Removed from the lookup index but kept alive for current holders;
        /// closes immediately on last release.
        const DETACHED = 1 << 2;
        /// Membership marker for the shard's pending-close queue.
        const ON_PENDING_CLOSE = 1 << 3;
    }
}

bitflags! {
    /// Open-time flags, shared by open and open-at.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        const READ_ONLY = 1 << 0;
        const CREATE = 1 << 1;
        const EXCL = 1 << 2;
        const TRUNCATE = 1 << 3;
        /// Path-mode open for directory traversal; uses the open-path cache.
        const PATH = 1 << 4;
        /// The caller does not need to hold the open; a synthetic handle may
        /// be returned when the module permits it.
        const INFERRED = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl OpenFlags {
    pub fn access_mode(self) -> AccessMode {
        if self.contains(OpenFlags::READ_ONLY) {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        }
    }
}

/// An open file or path handle.
///
/// The mutable fields are atomics only so the struct can be shared; every
/// mutation happens under the owning shard's lock.
pub struct OpenHandle {
    fh: Fh,
    fh_hash: u64,
    access: AccessMode,
    cache_id: u8,
    module: Arc<dyn Module>,

    opencnt: AtomicU32,
    flags: AtomicU32,
    vfs_private: AtomicU64,
    /// Monotonic ns, stamped when the open count drops to zero.
    timestamp: AtomicU64,
    blocked: Mutex<Vec<BlockedRequest>>,
    /// Protocol-layer per-handle extension slot (e.g. silly-rename state).
    ext: OnceLock<Arc<dyn Any + Send + Sync>>,
}

pub type OpenHandleRef = Arc<OpenHandle>;

/// A request parked on a handle awaiting populate or release.
pub struct BlockedRequest {
    pub(crate) request: Box<Request>,
    pub(crate) callback: OpenCallback,
    pub(crate) handle: OpenHandleRef,
}

/// Invoked once a handle is available (or the open failed, with `None`).
pub type OpenCallback = Box<dyn FnOnce(Box<Request>, Option<OpenHandleRef>) + Send>;

impl OpenHandle {
    fn new(
        fh: &Fh,
        fh_hash: u64,
        access: AccessMode,
        cache_id: u8,
        module: Arc<dyn Module>,
        vfs_private: u64,
        exclusive: bool,
    ) -> OpenHandleRef {
        let mut flags = HandleFlags::empty();
        if exclusive {
            flags |= HandleFlags::EXCLUSIVE;
        }
        if vfs_private == VFS_PRIVATE_UNSET {
            flags |= HandleFlags::PENDING;
        }
        Arc::new(Self {
            fh: *fh,
            fh_hash,
            access,
            cache_id,
            module,
            opencnt: AtomicU32::new(1),
            flags: AtomicU32::new(flags.bits()),
            vfs_private: AtomicU64::new(vfs_private),
            timestamp: AtomicU64::new(0),
            blocked: Mutex::new(Vec::new()),
            ext: OnceLock::new(),
        })
    }

    /// A cache-less handle for inferred opens on modules that do not require
    /// real open files.
    pub fn synthetic(module: Arc<dyn Module>, fh: &Fh, fh_hash: u64) -> OpenHandleRef {
        Arc::new(Self {
            fh: *fh,
            fh_hash,
            access: AccessMode::ReadWrite,
            cache_id: SYNTHETIC_CACHE_ID,
            module,
            opencnt: AtomicU32::new(1),
            flags: AtomicU32::new(HandleFlags::empty().bits()),
            vfs_private: AtomicU64::new(0),
            timestamp: AtomicU64::new(0),
            blocked: Mutex::new(Vec::new()),
            ext: OnceLock::new(),
        })
    }

    pub fn fh(&self) -> &Fh {
        &self.fh
    }

    pub fn fh_hash(&self) -> u64 {
        self.fh_hash
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access
    }

    pub fn cache_id(&self) -> u8 {
        self.cache_id
    }

    pub fn is_synthetic(&self) -> bool {
        self.cache_id == SYNTHETIC_CACHE_ID
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub fn vfs_private(&self) -> u64 {
        self.vfs_private.load(Ordering::Acquire)
    }

    pub fn flags(&self) -> HandleFlags {
        HandleFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn is_pending(&self) -> bool {
        self.flags().contains(HandleFlags::PENDING)
    }

    pub fn opencnt(&self) -> u32 {
        self.opencnt.load(Ordering::Relaxed)
    }

    pub fn ext(&self) -> &OnceLock<Arc<dyn Any + Send + Sync>> {
        &self.ext
    }

    fn set_flags(&self, flags: HandleFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::Release);
    }

    fn clear_flags(&self, flags: HandleFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::Release);
    }

    fn take_blocked(&self) -> Vec<BlockedRequest> {
        std::mem::take(&mut *self.blocked.lock())
    }
}

impl std::fmt::Debug for OpenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenHandle")
            .field("fh", &self.fh)
            .field("access", &self.access)
            .field("opencnt", &self.opencnt())
            .field("flags", &self.flags())
            .finish()
    }
}

struct OpenCacheShard {
    cache_id: u8,
    handles: Vec<OpenHandleRef>,
    pending_close: VecDeque<OpenHandleRef>,
    open_handles: u32,
    max_open_files: u32,
}

impl OpenCacheShard {
    /// Find a live (non-detached) handle matching `fh` and `access`.
    ///
    /// An RW handle satisfies an RO request; an RW request needs an RW
    /// handle.
    fn find(&self, fh: &Fh, access: AccessMode) -> Option<OpenHandleRef> {
        self.handles
            .iter()
            .find(|h| {
                h.fh == *fh && (h.access == AccessMode::ReadWrite || access == AccessMode::ReadOnly)
            })
            .cloned()
    }

    fn remove_index(&mut self, handle: &OpenHandleRef) {
        if let Some(pos) = self.handles.iter().position(|h| Arc::ptr_eq(h, handle)) {
            self.handles.swap_remove(pos);
        }
    }

    fn unlink_pending_close(&mut self, handle: &OpenHandleRef) {
        if let Some(pos) = self
            .pending_close
            .iter()
            .position(|h| Arc::ptr_eq(h, handle))
        {
            self.pending_close.remove(pos);
        }
        handle.clear_flags(HandleFlags::ON_PENDING_CLOSE);
    }
}

enum AcquireOutcome {
    Done {
        request: Box<Request>,
        callback: OpenCallback,
        handle: OpenHandleRef,
    },
    Blocked,
    Evict {
        request: Box<Request>,
        callback: OpenCallback,
        handle: OpenHandleRef,
        victim: OpenHandleRef,
    },
}

/// One open-handle cache instance.
pub struct OpenCache {
    shards: Shards<OpenCacheShard>,
    cache_id: u8,
    counters: CacheCounters,
}

impl OpenCache {
    /// `num_shards` must be a power of two. The per-shard bound is
    /// `max_open_files / num_shards` with a floor of four.
    pub fn new(cache_id: u8, num_shards: usize, max_open_files: u32) -> Self {
        let max_per_shard = (max_open_files / num_shards as u32).max(4);
        Self {
            shards: Shards::new(num_shards, |_| OpenCacheShard {
                cache_id,
                handles: Vec::new(),
                pending_close: VecDeque::new(),
                open_handles: 0,
                max_open_files: max_per_shard,
            }),
            cache_id,
            counters: CacheCounters::default(),
        }
    }

    pub fn cache_id(&self) -> u8 {
        self.cache_id
    }

    pub fn counters(&self) -> &CacheCounters {
        &self.counters
    }

    /// Total handles currently charged against the shard bounds.
    pub fn open_handle_count(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.lock().open_handles as u64)
            .sum()
    }

    /// Cache-first acquisition, used by open-by-FH.
    ///
    /// On a hit the callback runs synchronously unless the handle is pending
    /// or exclusive, in which case the request parks on the handle. On a miss
    /// a new handle is installed; if the shard is full, one pending-close
    /// victim is evicted first and the callback waits for its backend close.
    #[allow(clippy::too_many_arguments)]
    pub fn acquire(
        &self,
        thread: &VfsThread,
        module: Arc<dyn Module>,
        request: Box<Request>,
        fh: &Fh,
        fh_hash: u64,
        vfs_private: u64,
        open_flags: OpenFlags,
        exclusive: bool,
        callback: OpenCallback,
    ) {
        let access = open_flags.access_mode();

        let outcome = {
            let mut shard = self.shards.shard(fh_hash).lock();

            if let Some(handle) = shard.find(fh, access) {
                assert!(
                    !(handle.flags().contains(HandleFlags::PENDING)
                        && vfs_private != VFS_PRIVATE_UNSET),
                    "pending open handle acquired with concrete vfs private data"
                );

                debug!(
                    fh_hash,
                    opencnt = handle.opencnt(),
                    flags = ?handle.flags(),
                    "open cache acquire: hit"
                );

                if handle.opencnt.load(Ordering::Relaxed) == 0 {
                    shard.unlink_pending_close(&handle);
                }

                handle.opencnt.fetch_add(1, Ordering::Relaxed);

                if handle
                    .flags()
                    .intersects(HandleFlags::EXCLUSIVE | HandleFlags::PENDING)
                {
                    debug!(fh_hash, "open cache acquire: blocking on busy handle");
                    handle.blocked.lock().push(BlockedRequest {
                        request,
                        callback,
                        handle: handle.clone(),
                    });
                    AcquireOutcome::Blocked
                } else {
                    AcquireOutcome::Done {
                        request,
                        callback,
                        handle,
                    }
                }
            } else {
                self.counters.insert.fetch_add(1, Ordering::Relaxed);

                let handle = OpenHandle::new(
                    fh,
                    fh_hash,
                    access,
                    self.cache_id,
                    module,
                    vfs_private,
                    exclusive,
                );
                shard.handles.push(handle.clone());

                debug!(
                    fh_hash,
                    flags = ?handle.flags(),
                    "open cache acquire: new handle"
                );

                if shard.open_handles < shard.max_open_files {
                    shard.open_handles += 1;
                    AcquireOutcome::Done {
                        request,
                        callback,
                        handle,
                    }
                } else {
                    let victim = shard
                        .pending_close
                        .pop_front()
                        .expect("open cache exhausted with referenced handles");
                    victim.clear_flags(HandleFlags::ON_PENDING_CLOSE);
                    shard.remove_index(&victim);

                    debug!(
                        fh_hash,
                        victim_hash = victim.fh_hash(),
                        "open cache acquire: shard full, evicting"
                    );

                    AcquireOutcome::Evict {
                        request,
                        callback,
                        handle,
                        victim,
                    }
                }
            }
        };

        self.counters.acquire.fetch_add(1, Ordering::Relaxed);

        match outcome {
            AcquireOutcome::Done {
                request,
                callback,
                handle,
            } => callback(request, Some(handle)),
            AcquireOutcome::Blocked => {}
            AcquireOutcome::Evict {
                request,
                callback,
                handle,
                victim,
            } => {
                // The acquirer waits for the victim's backend close before
                // its callback fires.
                close_handle(thread, victim, move |status| {
                    if let Err(error) = status {
                        panic!("open cache failed to close evicted handle: {error}");
                    }
                    callback(request, Some(handle));
                });
            }
        }
    }

    /// Unconditional insert, used by open-at and create-unlinked for objects
    /// the backend just opened.
    ///
    /// A prior entry with the same (fh, access-mode) is closed if unused, or
    /// detached so current holders keep working and it closes on its own
    /// last release.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        thread: &VfsThread,
        module: Arc<dyn Module>,
        request: Box<Request>,
        fh: &Fh,
        fh_hash: u64,
        vfs_private: u64,
        open_flags: OpenFlags,
        callback: OpenCallback,
    ) {
        let access = open_flags.access_mode();
        let handle = OpenHandle::new(fh, fh_hash, access, self.cache_id, module, vfs_private, false);

        let mut to_close: Vec<OpenHandleRef> = Vec::new();

        {
            let mut shard = self.shards.shard(fh_hash).lock();

            self.counters.insert.fetch_add(1, Ordering::Relaxed);

            if let Some(existing) = shard.find(fh, access) {
                if existing.opencnt.load(Ordering::Relaxed) == 0 {
                    shard.unlink_pending_close(&existing);
                    shard.remove_index(&existing);
                    to_close.push(existing);
                } else {
                    debug!(fh_hash, "open cache insert: detaching referenced handle");
                    shard.remove_index(&existing);
                    existing.set_flags(HandleFlags::DETACHED);
                }
            } else if shard.open_handles < shard.max_open_files {
                shard.open_handles += 1;
            } else if let Some(victim) = shard.pending_close.pop_front() {
                victim.clear_flags(HandleFlags::ON_PENDING_CLOSE);
                shard.remove_index(&victim);
                to_close.push(victim);
            } else {
                // Every handle in the shard is referenced; exceed the bound
                // rather than fail the insert.
                shard.open_handles += 1;
            }

            shard.handles.push(handle.clone());
        }

        for victim in to_close {
            close_handle(thread, victim, |_| {});
        }

        callback(request, Some(handle));
    }

    /// Store the backend cookie once a pending open completes.
    ///
    /// Clears PENDING and, unless the handle is still exclusively held,
    /// wakes the queued waiters.
    pub fn populate(&self, thread: &VfsThread, handle: &OpenHandleRef, vfs_private: u64) {
        let waiters = {
            let _shard = self.shards.shard(handle.fh_hash).lock();

            debug!(
                fh_hash = handle.fh_hash,
                flags = ?handle.flags(),
                vfs_private,
                "open cache populate"
            );

            handle.vfs_private.store(vfs_private, Ordering::Release);
            handle.clear_flags(HandleFlags::PENDING);

            if handle.flags().contains(HandleFlags::EXCLUSIVE) {
                // The exclusive holder drains the queue on release.
                Vec::new()
            } else {
                handle.take_blocked()
            }
        };

        release_blocked(thread, waiters, Ok(()));
    }

    /// Drop one reference.
    ///
    /// On error the handle is purged and every queued waiter fails with the
    /// same status. Otherwise the exclusive flag clears and, at zero, the
    /// handle parks on pending-close (or closes immediately if detached).
    pub fn release(&self, thread: &VfsThread, handle: &OpenHandleRef, status: Status) {
        let mut close_detached = false;

        let waiters = {
            let mut shard = self.shards.shard(handle.fh_hash).lock();

            assert_eq!(
                handle.cache_id, shard.cache_id,
                "open handle released by wrong cache"
            );

            debug!(
                fh_hash = handle.fh_hash,
                opencnt = handle.opencnt(),
                flags = ?handle.flags(),
                ?status,
                "open cache release"
            );

            handle.clear_flags(HandleFlags::EXCLUSIVE);
            let waiters = handle.take_blocked();

            if status.is_err() {
                // The backend open failed. Purge the handle; waiters are
                // failed below and never release it themselves.
                handle.opencnt.store(0, Ordering::Relaxed);
                if !handle.flags().contains(HandleFlags::DETACHED) {
                    shard.remove_index(handle);
                    shard.open_handles = shard.open_handles.saturating_sub(1);
                }
            } else {
                let prev = handle.opencnt.fetch_sub(1, Ordering::Relaxed);
                assert!(prev > 0, "open handle released below zero");

                if prev == 1 {
                    if handle.flags().contains(HandleFlags::DETACHED) {
                        close_detached = true;
                    } else {
                        handle.timestamp.store(clock::monotonic_ns(), Ordering::Relaxed);
                        handle.set_flags(HandleFlags::ON_PENDING_CLOSE);
                        shard.pending_close.push_back(handle.clone());
                    }
                }
            }

            waiters
        };

        release_blocked(thread, waiters, status);

        if close_detached {
            debug!(fh_hash = handle.fh_hash, "closing detached handle");
            close_handle(thread, handle.clone(), |_| {});
        }
    }

    /// Clone one logical reference of an already-acquired handle.
    pub fn dup(&self, handle: &OpenHandleRef) {
        let _shard = self.shards.shard(handle.fh_hash).lock();
        assert_eq!(
            handle.cache_id, self.cache_id,
            "open handle duped by wrong cache"
        );
        let prev = handle.opencnt.fetch_add(1, Ordering::Relaxed);
        assert!(prev > 0, "dup on open handle with zero opencnt");
    }

    /// Collect pending-close handles older than `min_age` (front-to-back per
    /// shard), unlinking them from both lists. Also reports the total
    /// open-handle gauge. The caller issues the backend closes.
    pub fn defer_close(&self, now: u64, min_age: u64) -> (Vec<OpenHandleRef>, u64) {
        let mut closed = Vec::new();
        let mut count = 0u64;

        for shard_mutex in self.shards.iter() {
            let mut shard = shard_mutex.lock();

            count += shard.open_handles as u64;

            while let Some(front) = shard.pending_close.front() {
                let age = now.saturating_sub(front.timestamp.load(Ordering::Relaxed));
                if age < min_age {
                    break;
                }
                let handle = shard.pending_close.pop_front().unwrap();
                handle.clear_flags(HandleFlags::ON_PENDING_CLOSE);
                shard.remove_index(&handle);
                shard.open_handles = shard.open_handles.saturating_sub(1);
                closed.push(handle);
            }
        }

        (closed, count)
    }

    /// Zero the timestamps of every handle in `mount_id` so the next sweep
    /// collects them. Returns the number of handles marked.
    pub fn mark_for_close_by_mount(&self, mount_id: &[u8]) -> u64 {
        let mut count = 0;
        for shard_mutex in self.shards.iter() {
            let shard = shard_mutex.lock();
            for handle in &shard.handles {
                if handle.fh.in_mount(mount_id) {
                    handle.timestamp.store(0, Ordering::Relaxed);
                    count += 1;
                }
            }
        }
        count
    }

    /// Count actively referenced handles belonging to `mount_id`.
    pub fn count_by_mount(&self, mount_id: &[u8]) -> u64 {
        let mut count = 0;
        for shard_mutex in self.shards.iter() {
            let shard = shard_mutex.lock();
            for handle in &shard.handles {
                if handle.fh.in_mount(mount_id) && handle.opencnt.load(Ordering::Relaxed) > 0 {
                    count += 1;
                }
            }
        }
        count
    }

    /// Take a reference on any live handle for `fh`, regardless of access
    /// mode. Used to answer "is this file open?" without performing an open.
    /// The caller must release the handle.
    pub fn lookup_ref(&self, fh: &Fh, fh_hash: u64) -> Option<OpenHandleRef> {
        let shard = self.shards.shard(fh_hash).lock();
        for handle in &shard.handles {
            if handle.fh == *fh
                && handle.opencnt.load(Ordering::Relaxed) > 0
                && !handle.flags().contains(HandleFlags::PENDING)
            {
                handle.opencnt.fetch_add(1, Ordering::Relaxed);
                return Some(handle.clone());
            }
        }
        None
    }

    /// Whether any handle for `fh` exists, referenced or not.
    pub fn exists(&self, fh: &Fh, fh_hash: u64) -> bool {
        let shard = self.shards.shard(fh_hash).lock();
        shard.handles.iter().any(|handle| handle.fh == *fh)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use reef_common::hash::fh_hash;

    use super::*;
    use crate::{
        context::{Vfs, VfsConfig},
        error::VfsError,
        request::Cred,
        test_utils::MemoryFs,
    };

    type Results = Arc<StdMutex<Vec<(Status, Option<OpenHandleRef>)>>>;

    fn setup() -> (Vfs, crate::thread::VfsThread, Arc<MemoryFs>) {
        let vfs = Vfs::new(VfsConfig::default());
        let fs = Arc::new(MemoryFs::new(0x42));
        vfs.register_module(fs.clone());
        let thread = vfs.thread();
        (vfs, thread, fs)
    }

    fn test_fh(tag: u8) -> (Fh, u64) {
        let fh = Fh::new(&[0x42, tag, tag, tag]);
        let hash = fh_hash(fh.as_bytes());
        (fh, hash)
    }

    fn recording_callback(results: &Results) -> OpenCallback {
        let results = results.clone();
        Box::new(move |request, handle| {
            results.lock().unwrap().push((request.status, handle));
            request.thread.clone().request_recycle(request);
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn do_acquire(
        cache: &OpenCache,
        thread: &crate::thread::VfsThread,
        fs: &Arc<MemoryFs>,
        fh: &Fh,
        hash: u64,
        vfs_private: u64,
        flags: OpenFlags,
        exclusive: bool,
        results: &Results,
    ) {
        let module: Arc<dyn crate::module::Module> = fs.clone();
        let request = thread.request_alloc_for_module(&Cred::default(), fh, module.clone());
        cache.acquire(
            thread,
            module,
            request,
            fh,
            hash,
            vfs_private,
            flags,
            exclusive,
            recording_callback(results),
        );
    }

    #[test]
    fn test_acquire_hit_and_refcount() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 64);
        let (fh, hash) = test_fh(1);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        do_acquire(&cache, &thread, &fs, &fh, hash, 11, OpenFlags::empty(), false, &results);
        do_acquire(&cache, &thread, &fs, &fh, hash, VFS_PRIVATE_UNSET, OpenFlags::READ_ONLY, false, &results);

        let got = results.lock().unwrap();
        assert_eq!(got.len(), 2);
        let first = got[0].1.as_ref().unwrap();
        let second = got[1].1.as_ref().unwrap();
        // The RW handle satisfies the RO acquire.
        assert!(Arc::ptr_eq(first, second));
        assert_eq!(first.opencnt(), 2);
        assert_eq!(first.vfs_private(), 11);
        drop(got);

        cache.release(&thread, &cache.lookup_ref(&fh, hash).unwrap(), Ok(()));
        let handle = results.lock().unwrap()[0].1.clone().unwrap();
        cache.release(&thread, &handle, Ok(()));
        cache.release(&thread, &handle, Ok(()));

        assert_eq!(handle.opencnt(), 0);
        assert!(handle.flags().contains(HandleFlags::ON_PENDING_CLOSE));
        assert!(cache.exists(&fh, hash));
        assert_eq!(cache.open_handle_count(), 1);

        let snapshot = cache.counters().snapshot();
        assert_eq!(snapshot.acquire, 2);
        assert_eq!(snapshot.insert, 1);
    }

    #[test]
    fn test_rw_acquire_needs_rw_handle() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 64);
        let (fh, hash) = test_fh(2);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        do_acquire(&cache, &thread, &fs, &fh, hash, 1, OpenFlags::READ_ONLY, false, &results);
        do_acquire(&cache, &thread, &fs, &fh, hash, 2, OpenFlags::empty(), false, &results);

        let got = results.lock().unwrap();
        let ro = got[0].1.as_ref().unwrap();
        let rw = got[1].1.as_ref().unwrap();
        assert!(!Arc::ptr_eq(ro, rw));
        assert_eq!(ro.access_mode(), AccessMode::ReadOnly);
        assert_eq!(rw.access_mode(), AccessMode::ReadWrite);
        assert_eq!(cache.open_handle_count(), 2);
    }

    #[test]
    fn test_pending_blocks_second_acquirer() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 64);
        let (fh, hash) = test_fh(3);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        do_acquire(&cache, &thread, &fs, &fh, hash, VFS_PRIVATE_UNSET, OpenFlags::empty(), false, &results);

        let owner = results.lock().unwrap()[0].1.clone().unwrap();
        assert!(owner.is_pending());

        // Second acquirer parks on the handle; no callback yet.
        do_acquire(&cache, &thread, &fs, &fh, hash, VFS_PRIVATE_UNSET, OpenFlags::empty(), false, &results);
        assert_eq!(results.lock().unwrap().len(), 1);
        assert_eq!(owner.opencnt(), 2);

        cache.populate(&thread, &owner, 99);

        let got = results.lock().unwrap();
        assert_eq!(got.len(), 2);
        let waiter = got[1].1.as_ref().unwrap();
        assert!(!waiter.is_pending());
        // The waiter observes the populated cookie.
        assert_eq!(waiter.vfs_private(), 99);
    }

    #[test]
    fn test_release_error_purges_and_fails_waiters() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 64);
        let (fh, hash) = test_fh(4);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        do_acquire(&cache, &thread, &fs, &fh, hash, VFS_PRIVATE_UNSET, OpenFlags::empty(), false, &results);
        let owner = results.lock().unwrap()[0].1.clone().unwrap();

        do_acquire(&cache, &thread, &fs, &fh, hash, VFS_PRIVATE_UNSET, OpenFlags::empty(), false, &results);
        assert_eq!(results.lock().unwrap().len(), 1);

        cache.release(&thread, &owner, Err(VfsError::Fault));

        let got = results.lock().unwrap();
        assert_eq!(got.len(), 2);
        // Waiters get the error and no handle; they never release.
        assert_eq!(got[1].0, Err(VfsError::Fault));
        assert!(got[1].1.is_none());
        drop(got);

        assert!(!cache.exists(&fh, hash));
        assert_eq!(cache.open_handle_count(), 0);
    }

    #[test]
    fn test_exclusive_defers_waiters_past_populate() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 64);
        let (fh, hash) = test_fh(5);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        do_acquire(&cache, &thread, &fs, &fh, hash, VFS_PRIVATE_UNSET, OpenFlags::empty(), true, &results);
        let owner = results.lock().unwrap()[0].1.clone().unwrap();
        assert!(owner.flags().contains(HandleFlags::EXCLUSIVE));

        do_acquire(&cache, &thread, &fs, &fh, hash, VFS_PRIVATE_UNSET, OpenFlags::empty(), false, &results);

        // Populate keeps the queue parked while EXCLUSIVE holds.
        cache.populate(&thread, &owner, 5);
        assert_eq!(results.lock().unwrap().len(), 1);

        // The exclusive holder's release drains the queue.
        cache.release(&thread, &owner, Ok(()));
        let got = results.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert!(got[1].0.is_ok());
        let waiter = got[1].1.as_ref().unwrap();
        assert!(!waiter.flags().contains(HandleFlags::EXCLUSIVE));
        assert_eq!(waiter.vfs_private(), 5);
    }

    #[test]
    fn test_insert_detaches_referenced_existing() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 64);
        let (fh, hash) = test_fh(6);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        do_acquire(&cache, &thread, &fs, &fh, hash, 1, OpenFlags::empty(), false, &results);
        let old = results.lock().unwrap()[0].1.clone().unwrap();

        let module: Arc<dyn crate::module::Module> = fs.clone();
        let request = thread.request_alloc_for_module(&Cred::default(), &fh, module.clone());
        cache.insert(
            &thread,
            module,
            request,
            &fh,
            hash,
            2,
            OpenFlags::empty(),
            recording_callback(&results),
        );

        let new = results.lock().unwrap()[1].1.clone().unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.flags().contains(HandleFlags::DETACHED));

        // Lookups now resolve to the replacement only.
        let found = cache.lookup_ref(&fh, hash).unwrap();
        assert!(Arc::ptr_eq(&found, &new));
        cache.release(&thread, &found, Ok(()));

        // Detached handles close immediately on last release, not via
        // pending-close.
        let closes_before = fs
            .dispatched_ops()
            .iter()
            .filter(|op| **op == "close")
            .count();
        cache.release(&thread, &old, Ok(()));
        let closes_after = fs
            .dispatched_ops()
            .iter()
            .filter(|op| **op == "close")
            .count();
        assert_eq!(closes_after, closes_before + 1);
    }

    #[test]
    fn test_insert_closes_unreferenced_existing() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 64);
        let (fh, hash) = test_fh(7);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        do_acquire(&cache, &thread, &fs, &fh, hash, 1, OpenFlags::empty(), false, &results);
        let old = results.lock().unwrap()[0].1.clone().unwrap();
        cache.release(&thread, &old, Ok(()));
        assert!(old.flags().contains(HandleFlags::ON_PENDING_CLOSE));

        let module: Arc<dyn crate::module::Module> = fs.clone();
        let request = thread.request_alloc_for_module(&Cred::default(), &fh, module.clone());
        cache.insert(
            &thread,
            module,
            request,
            &fh,
            hash,
            2,
            OpenFlags::empty(),
            recording_callback(&results),
        );

        assert!(fs.dispatched_ops().contains(&"close"));
        let new = results.lock().unwrap()[1].1.clone().unwrap();
        let found = cache.lookup_ref(&fh, hash).unwrap();
        assert!(Arc::ptr_eq(&found, &new));
        cache.release(&thread, &found, Ok(()));
    }

    #[test]
    fn test_capacity_eviction_from_pending_close() {
        let (_vfs, thread, fs) = setup();
        // One shard bounded at four handles.
        let cache = OpenCache::new(7, 1, 4);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for tag in 0..4u8 {
            let (fh, hash) = test_fh(0x10 + tag);
            do_acquire(&cache, &thread, &fs, &fh, hash, tag as u64, OpenFlags::empty(), false, &results);
            handles.push(results.lock().unwrap().last().unwrap().1.clone().unwrap());
        }
        assert_eq!(cache.open_handle_count(), 4);

        for handle in &handles {
            cache.release(&thread, handle, Ok(()));
        }

        // A fifth net-new acquire evicts the oldest pending-close entry.
        let (fh, hash) = test_fh(0x20);
        do_acquire(&cache, &thread, &fs, &fh, hash, 9, OpenFlags::empty(), false, &results);

        assert_eq!(results.lock().unwrap().len(), 5);
        assert_eq!(cache.open_handle_count(), 4);

        let (first_fh, first_hash) = test_fh(0x10);
        assert!(!cache.exists(&first_fh, first_hash));
        assert!(cache.exists(&fh, hash));
        assert!(fs.dispatched_ops().contains(&"close"));
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn test_acquire_exhausted_aborts() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 4);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        // Five referenced handles against a bound of four: no victim.
        for tag in 0..5u8 {
            let (fh, hash) = test_fh(0x30 + tag);
            do_acquire(&cache, &thread, &fs, &fh, hash, tag as u64, OpenFlags::empty(), false, &results);
        }
    }

    #[test]
    fn test_defer_close_honors_min_age() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 64);
        let (fh, hash) = test_fh(8);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        do_acquire(&cache, &thread, &fs, &fh, hash, 1, OpenFlags::empty(), false, &results);
        let handle = results.lock().unwrap()[0].1.clone().unwrap();
        cache.release(&thread, &handle, Ok(()));

        let now = reef_common::clock::monotonic_ns();
        let (victims, count) = cache.defer_close(now, u64::MAX);
        assert!(victims.is_empty());
        assert_eq!(count, 1);

        let (victims, _) = cache.defer_close(now + 1_000_000_000, 1);
        assert_eq!(victims.len(), 1);
        assert!(Arc::ptr_eq(&victims[0], &handle));
        assert!(!cache.exists(&fh, hash));
        assert_eq!(cache.open_handle_count(), 0);
    }

    #[test]
    fn test_lookup_ref_skips_idle_and_pending() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 64);
        let (fh, hash) = test_fh(9);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        assert!(cache.lookup_ref(&fh, hash).is_none());

        do_acquire(&cache, &thread, &fs, &fh, hash, VFS_PRIVATE_UNSET, OpenFlags::empty(), false, &results);
        let owner = results.lock().unwrap()[0].1.clone().unwrap();

        // Pending handles are invisible to lookup_ref.
        assert!(cache.lookup_ref(&fh, hash).is_none());

        cache.populate(&thread, &owner, 3);
        let reffed = cache.lookup_ref(&fh, hash).unwrap();
        assert_eq!(reffed.opencnt(), 2);
        cache.release(&thread, &reffed, Ok(()));
        cache.release(&thread, &owner, Ok(()));

        // Unreferenced (pending-close) handles exist but take no new refs.
        assert!(cache.exists(&fh, hash));
        assert!(cache.lookup_ref(&fh, hash).is_none());
    }

    #[test]
    fn test_dup_clones_reference() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 64);
        let (fh, hash) = test_fh(10);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        do_acquire(&cache, &thread, &fs, &fh, hash, 1, OpenFlags::empty(), false, &results);
        let handle = results.lock().unwrap()[0].1.clone().unwrap();

        cache.dup(&handle);
        assert_eq!(handle.opencnt(), 2);

        cache.release(&thread, &handle, Ok(()));
        assert_eq!(handle.opencnt(), 1);
        cache.release(&thread, &handle, Ok(()));
        assert_eq!(handle.opencnt(), 0);
    }

    #[test]
    #[should_panic(expected = "wrong cache")]
    fn test_release_by_wrong_cache_aborts() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 1, 64);
        let other = OpenCache::new(8, 1, 64);
        let (fh, hash) = test_fh(11);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        do_acquire(&cache, &thread, &fs, &fh, hash, 1, OpenFlags::empty(), false, &results);
        let handle = results.lock().unwrap()[0].1.clone().unwrap();

        other.release(&thread, &handle, Ok(()));
    }

    #[test]
    fn test_mount_mark_and_count() {
        let (_vfs, thread, fs) = setup();
        let cache = OpenCache::new(7, 4, 64);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        let mount_a = [0x42u8; 16];
        let mut fh_a = [0x42u8; 20];
        fh_a[16..].copy_from_slice(&[1, 2, 3, 4]);
        let fh_a = Fh::new(&fh_a);
        let hash_a = fh_hash(fh_a.as_bytes());

        let mut fh_b = [0x43u8; 20];
        fh_b[0] = 0x42; // same module, different mount
        let fh_b = Fh::new(&fh_b);
        let hash_b = fh_hash(fh_b.as_bytes());

        do_acquire(&cache, &thread, &fs, &fh_a, hash_a, 1, OpenFlags::empty(), false, &results);
        do_acquire(&cache, &thread, &fs, &fh_b, hash_b, 2, OpenFlags::empty(), false, &results);

        assert_eq!(cache.count_by_mount(&mount_a), 1);

        let handle_a = results.lock().unwrap()[0].1.clone().unwrap();
        cache.release(&thread, &handle_a, Ok(()));
        assert_eq!(cache.count_by_mount(&mount_a), 0);

        // Marking zeroes the timestamp, so a sweep with any minimum age
        // takes the handle even though it was just released.
        assert_eq!(cache.mark_for_close_by_mount(&mount_a), 1);
        let now = reef_common::clock::monotonic_ns();
        let (victims, _) = cache.defer_close(now, now);
        assert_eq!(victims.len(), 1);
        assert!(Arc::ptr_eq(&victims[0], &handle_a));
    }

    #[test]
    fn test_cross_thread_unblock_rings_doorbell() {
        let (vfs, thread_a, fs) = setup();
        let cache = Arc::new(OpenCache::new(7, 1, 64));
        let (fh, hash) = test_fh(12);
        let results: Results = Arc::new(StdMutex::new(Vec::new()));

        do_acquire(&cache, &thread_a, &fs, &fh, hash, VFS_PRIVATE_UNSET, OpenFlags::empty(), false, &results);
        let owner = results.lock().unwrap()[0].1.clone().unwrap();

        do_acquire(&cache, &thread_a, &fs, &fh, hash, VFS_PRIVATE_UNSET, OpenFlags::empty(), false, &results);
        assert_eq!(results.lock().unwrap().len(), 1);

        // Populate from a foreign thread: the waiter must come home through
        // thread A's inbox rather than completing over there.
        let remote_cache = cache.clone();
        let remote_owner = owner.clone();
        std::thread::spawn(move || {
            let thread_b = vfs.thread();
            remote_cache.populate(&thread_b, &remote_owner, 42);
        })
        .join()
        .unwrap();

        assert_eq!(results.lock().unwrap().len(), 1);

        let ran = thread_a.poll();
        assert_eq!(ran, 1);

        let got = results.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].1.as_ref().unwrap().vfs_private(), 42);
    }
}

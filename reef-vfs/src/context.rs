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

//! The VFS context: the four process-wide caches, the backend module table,
//! and the deferred-close sweeper. One context per daemon; no cross-context
//! sharing.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tracing::debug;

use reef_common::{clock, fh::Fh};

use crate::{
    attr_cache::AttrCache,
    error::{VfsError, VfsResult},
    module::Module,
    name_cache::NameCache,
    open_cache::{OpenCache, OpenHandleRef},
    proc::close::close_handle,
    shards::open_cache_geometry,
    sweeper::CloseSweeper,
    thread::VfsThread,
};

pub const FILE_CACHE_ID: u8 = 1;
pub const PATH_CACHE_ID: u8 = 2;

/// Sizing of a TTL cache: all dimensions are powers of two given as bit
/// counts.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TtlCacheConfig {
    pub shard_bits: u8,
    pub slot_bits: u8,
    pub entry_bits: u8,
    pub ttl_secs: u64,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            shard_bits: 3,
            slot_bits: 10,
            entry_bits: 2,
            ttl_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Shard-count bits for the open caches; widened by four internally.
    pub open_cache_shard_bits: u8,
    /// Bound on cached open handles, split across shards with a per-shard
    /// floor of four (so an accidental zero still yields a working cache).
    pub max_open_files: u32,
    pub attr_cache: TtlCacheConfig,
    pub name_cache: TtlCacheConfig,
    /// Handles younger than this stay on pending-close between sweeps.
    pub close_min_age_ms: u64,
    pub close_interval_ms: u64,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            open_cache_shard_bits: 2,
            max_open_files: 65536,
            attr_cache: TtlCacheConfig::default(),
            name_cache: TtlCacheConfig::default(),
            close_min_age_ms: 1000,
            close_interval_ms: 250,
        }
    }
}

pub(crate) struct VfsInner {
    config: VfsConfig,
    open_file_cache: OpenCache,
    open_path_cache: OpenCache,
    attr_cache: AttrCache,
    name_cache: NameCache,
    modules: RwLock<HashMap<u8, Arc<dyn Module>>>,
    sweeper: Mutex<Option<CloseSweeper>>,
    next_thread_id: AtomicU64,
}

/// Handle to the VFS context. Cheap to clone.
#[derive(Clone)]
pub struct Vfs {
    inner: Arc<VfsInner>,
}

#[derive(Clone)]
pub(crate) struct WeakVfs {
    inner: Weak<VfsInner>,
}

impl WeakVfs {
    pub(crate) fn upgrade(&self) -> Option<Vfs> {
        self.inner.upgrade().map(|inner| Vfs { inner })
    }
}

impl Vfs {
    pub fn new(config: VfsConfig) -> Self {
        let (num_shards, _) = open_cache_geometry(config.open_cache_shard_bits, config.max_open_files);

        let inner = VfsInner {
            open_file_cache: OpenCache::new(FILE_CACHE_ID, num_shards, config.max_open_files),
            open_path_cache: OpenCache::new(PATH_CACHE_ID, num_shards, config.max_open_files),
            attr_cache: AttrCache::new(
                config.attr_cache.shard_bits,
                config.attr_cache.slot_bits,
                config.attr_cache.entry_bits,
                config.attr_cache.ttl_secs,
            ),
            name_cache: NameCache::new(
                config.name_cache.shard_bits,
                config.name_cache.slot_bits,
                config.name_cache.entry_bits,
                config.name_cache.ttl_secs,
            ),
            modules: RwLock::new(HashMap::new()),
            sweeper: Mutex::new(None),
            next_thread_id: AtomicU64::new(0),
            config,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &VfsConfig {
        &self.inner.config
    }

    /// Register a backend module under its FH magic byte.
    pub fn register_module(&self, module: Arc<dyn Module>) {
        let magic = module.fh_magic();
        let prev = self.inner.modules.write().insert(magic, module);
        assert!(prev.is_none(), "duplicate module magic {magic:#x}");
    }

    /// Resolve the module owning a file handle by its magic byte.
    pub fn module_by_fh(&self, fh: &Fh) -> VfsResult<Arc<dyn Module>> {
        if fh.is_empty() {
            return Err(VfsError::Stale);
        }
        self.inner
            .modules
            .read()
            .get(&fh.magic())
            .cloned()
            .ok_or(VfsError::Stale)
    }

    /// Mint a worker thread bound to the calling OS thread.
    pub fn thread(&self) -> VfsThread {
        let id = self.inner.next_thread_id.fetch_add(1, Ordering::Relaxed);
        VfsThread::new(self.clone(), id)
    }

    pub fn open_file_cache(&self) -> &OpenCache {
        &self.inner.open_file_cache
    }

    pub fn open_path_cache(&self) -> &OpenCache {
        &self.inner.open_path_cache
    }

    pub fn attr_cache(&self) -> &AttrCache {
        &self.inner.attr_cache
    }

    pub fn name_cache(&self) -> &NameCache {
        &self.inner.name_cache
    }

    pub(crate) fn cache_for_handle(&self, handle: &OpenHandleRef) -> &OpenCache {
        match handle.cache_id() {
            FILE_CACHE_ID => &self.inner.open_file_cache,
            PATH_CACHE_ID => &self.inner.open_path_cache,
            id => panic!("open handle belongs to unknown cache {id}"),
        }
    }

    /// Drop one reference on a handle obtained from open / open-at.
    pub fn release(&self, thread: &VfsThread, handle: OpenHandleRef) {
        if handle.is_synthetic() {
            return;
        }
        self.cache_for_handle(&handle).release(thread, &handle, Ok(()));
    }

    /// Clone one logical reference of an acquired handle.
    pub fn dup(&self, handle: &OpenHandleRef) -> OpenHandleRef {
        self.cache_for_handle(handle).dup(handle);
        handle.clone()
    }

    /// Start the background deferred-close sweeper.
    pub fn start_sweeper(&self) {
        let mut slot = self.inner.sweeper.lock();
        if slot.is_none() {
            *slot = Some(CloseSweeper::spawn(
                self.downgrade(),
                std::time::Duration::from_millis(self.inner.config.close_interval_ms),
                self.inner.config.close_min_age_ms * 1_000_000,
            ));
        }
    }

    pub fn stop_sweeper(&self) {
        self.inner.sweeper.lock().take();
    }

    pub(crate) fn downgrade(&self) -> WeakVfs {
        WeakVfs {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// One sweep of both open caches, closing every handle older than
    /// `min_age_ns` on the pending-close queues.
    pub fn sweep_once(&self, thread: &VfsThread, min_age_ns: u64) {
        let now = clock::monotonic_ns();
        for cache in [&self.inner.open_file_cache, &self.inner.open_path_cache] {
            let (victims, open_handles) = cache.defer_close(now, min_age_ns);
            if !victims.is_empty() {
                debug!(
                    cache_id = cache.cache_id(),
                    victims = victims.len(),
                    open_handles,
                    "deferred close sweep"
                );
            }
            for victim in victims {
                close_handle(thread, victim, |_| {});
            }
        }
    }

    /// Sweep with no age threshold; used by teardown and tests.
    pub fn sweep_now(&self, thread: &VfsThread) {
        self.sweep_once(thread, 0);
    }

    /// Accelerate unmount: mark every handle of `mount_id` for close on the
    /// next sweep. Returns the number of handles marked.
    pub fn mark_mount_for_close(&self, mount_id: &[u8]) -> u64 {
        self.inner.open_file_cache.mark_for_close_by_mount(mount_id)
            + self.inner.open_path_cache.mark_for_close_by_mount(mount_id)
    }

    /// Actively referenced handles still pinning `mount_id`.
    pub fn mount_open_count(&self, mount_id: &[u8]) -> u64 {
        self.inner.open_file_cache.count_by_mount(mount_id)
            + self.inner.open_path_cache.count_by_mount(mount_id)
    }

    /// Orderly teardown: stop the sweeper and close everything parked on
    /// pending-close.
    pub fn shutdown(&self, thread: &VfsThread) {
        self.stop_sweeper();
        self.sweep_now(thread);
    }

    /// Whether any cached handle exists for `fh` in the open-file cache.
    pub fn file_is_open(&self, fh: &Fh) -> bool {
        let hash = reef_common::hash::fh_hash(fh.as_bytes());
        self.inner.open_file_cache.exists(fh, hash)
    }
}

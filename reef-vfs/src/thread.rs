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

//! Per-worker-thread state and the cross-thread unblock path.
//!
//! Each worker owns an inbound queue of resume tasks; the sender side is the
//! doorbell. When blocked requests are released, same-thread waiters resume
//! inline and cross-thread waiters are posted to their owner's inbox, to be
//! drained on the owner's next loop iteration.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use reef_common::{fh::Fh, hash::fh_hash};
use tracing::debug;

use crate::{
    context::Vfs,
    error::{Status, VfsResult},
    module::Module,
    open_cache::{BlockedRequest, OpenCallback, OpenHandleRef},
    request::{Cred, Request},
};

const REQUEST_POOL_CAP: usize = 128;

/// A resume task posted to a worker's inbox.
pub(crate) enum ResumeTask {
    /// A request unblocked from an open-handle wait.
    Unblock {
        request: Box<Request>,
        callback: OpenCallback,
        handle: Option<OpenHandleRef>,
    },
    /// A request completed by a module on a foreign thread.
    Complete(Box<Request>),
}

struct ThreadShared {
    id: u64,
    os_thread: std::thread::ThreadId,
    vfs: Vfs,
    doorbell: flume::Sender<ResumeTask>,
    inbox: flume::Receiver<ResumeTask>,
    pool: Mutex<Vec<Box<Request>>>,
    anon_key: AtomicU64,
}

/// A VFS worker thread.
///
/// Cheap to clone; clones share the same identity and inbox. Requests are
/// allocated from and recycled to the thread's pool, and their completions
/// always run here.
#[derive(Clone)]
pub struct VfsThread {
    shared: Arc<ThreadShared>,
}

impl VfsThread {
    pub(crate) fn new(vfs: Vfs, id: u64) -> Self {
        let (doorbell, inbox) = flume::unbounded();
        Self {
            shared: Arc::new(ThreadShared {
                id,
                os_thread: std::thread::current().id(),
                vfs,
                doorbell,
                inbox,
                pool: Mutex::new(Vec::new()),
                anon_key: AtomicU64::new(1),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn vfs(&self) -> &Vfs {
        &self.shared.vfs
    }

    /// Whether the calling OS thread is this worker.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.shared.os_thread
    }

    /// Post a resume task and ring the doorbell.
    pub(crate) fn post(&self, task: ResumeTask) {
        let _ = self.shared.doorbell.send(task);
    }

    /// Drain the inbox without waiting. Returns the number of tasks run.
    pub fn poll(&self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.shared.inbox.try_recv() {
            self.run_task(task);
            count += 1;
        }
        count
    }

    /// Wait up to `timeout` for one inbound task, then drain the rest.
    pub fn poll_wait(&self, timeout: Duration) -> usize {
        match self.shared.inbox.recv_timeout(timeout) {
            Ok(task) => {
                self.run_task(task);
                1 + self.poll()
            }
            Err(_) => 0,
        }
    }

    fn run_task(&self, task: ResumeTask) {
        match task {
            ResumeTask::Unblock {
                request,
                callback,
                handle,
            } => {
                debug!(request = request.op.opcode(), "running unblocked request");
                callback(request, handle);
            }
            ResumeTask::Complete(request) => request.run_completion(),
        }
    }

    /// Monotonic per-thread key for anonymous (unlinked) creations.
    pub(crate) fn next_anon_key(&self) -> u64 {
        let seq = self.shared.anon_key.fetch_add(1, Ordering::Relaxed);
        (self.shared.id << 32) | seq
    }

    pub(crate) fn request_alloc(&self, cred: &Cred, fh: &Fh) -> VfsResult<Box<Request>> {
        let module = self.vfs().module_by_fh(fh)?;
        Ok(self.request_alloc_for_module(cred, fh, module))
    }

    pub(crate) fn request_alloc_by_handle(&self, cred: &Cred, handle: &OpenHandleRef) -> Box<Request> {
        self.request_alloc_for_module(cred, handle.fh(), handle.module().clone())
    }

    pub(crate) fn request_alloc_for_module(
        &self,
        cred: &Cred,
        fh: &Fh,
        module: Arc<dyn Module>,
    ) -> Box<Request> {
        let mut request = match self.shared.pool.lock().pop() {
            Some(request) => request,
            None => Request::new(self.clone(), module.clone()),
        };
        request.thread = self.clone();
        request.cred = *cred;
        request.fh = *fh;
        request.fh_hash = fh_hash(fh.as_bytes());
        request.module = module;
        request.status = Ok(());
        request
    }

    /// Return a completed request to the pool.
    pub(crate) fn request_recycle(&self, mut request: Box<Request>) {
        request.reset();
        let mut pool = self.shared.pool.lock();
        if pool.len() < REQUEST_POOL_CAP {
            pool.push(request);
        }
    }
}

/// Wake a detached list of blocked requests.
///
/// Same-thread requests resume inline; the rest are posted home and the
/// owner's doorbell rung. On an error status the waiters' pending handle is
/// withheld so they never release it themselves.
pub(crate) fn release_blocked(current: &VfsThread, waiters: Vec<BlockedRequest>, status: Status) {
    let count = waiters.len();

    for BlockedRequest {
        mut request,
        callback,
        handle,
    } in waiters
    {
        request.status = status;

        let handle = if status.is_err() { None } else { Some(handle) };
        let owner = request.thread.clone();

        if owner.is_current() {
            debug!(
                request = request.op.opcode(),
                "unblocking request on its own thread"
            );
            callback(request, handle);
        } else {
            debug!(
                request = request.op.opcode(),
                owner = owner.id(),
                current = current.id(),
                "unblocking request on a foreign thread, posting home"
            );
            owner.post(ResumeTask::Unblock {
                request,
                callback,
                handle,
            });
        }
    }

    if count > 0 {
        debug!(count, "released blocked requests");
    }
}

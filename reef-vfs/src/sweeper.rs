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

//! The deferred-close sweeper.
//!
//! A dedicated thread wakes on an interval and closes pending-close handles
//! older than the minimum age. The age threshold keeps a hot handle's close
//! from racing its next acquire.

use std::{thread::JoinHandle, time::Duration};

use tracing::debug;

use crate::context::WeakVfs;

pub(crate) struct CloseSweeper {
    shutdown: flume::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl CloseSweeper {
    pub(crate) fn spawn(vfs: WeakVfs, interval: Duration, min_age_ns: u64) -> Self {
        let (shutdown, rx) = flume::bounded::<()>(1);

        let join = std::thread::Builder::new()
            .name("reef-close-sweeper".to_string())
            .spawn(move || {
                debug!(?interval, min_age_ns, "close sweeper running");
                loop {
                    match rx.recv_timeout(interval) {
                        Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => break,
                        Err(flume::RecvTimeoutError::Timeout) => {}
                    }

                    // Holding only a weak reference lets context teardown
                    // proceed while the sweeper is idle.
                    let Some(vfs) = vfs.upgrade() else { break };
                    let thread = vfs.thread();
                    vfs.sweep_once(&thread, min_age_ns);
                }
                debug!("close sweeper stopped");
            })
            .expect("spawn close sweeper");

        Self {
            shutdown,
            join: Some(join),
        }
    }
}

impl Drop for CloseSweeper {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            // The final context reference can die inside a sweep tick, which
            // lands this drop on the sweeper thread itself. Joining there
            // would never return; the shutdown signal already parked the
            // loop, so detaching is enough.
            if join.thread().id() == std::thread::current().id() {
                return;
            }
            let _ = join.join();
        }
    }
}

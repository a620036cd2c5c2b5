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

//! A module wrapper that queues dispatches while its gate is closed.
//!
//! Lets tests hold backend opens in flight (exercising PENDING handles and
//! blocked-request queues) and then complete them, possibly from another
//! thread to drive the doorbell path.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    module::{Capabilities, Module},
    request::Request,
};

pub struct GatedModule {
    inner: Arc<dyn Module>,
    gate: Mutex<GateState>,
}

struct GateState {
    open: bool,
    queued: Vec<Box<Request>>,
}

impl GatedModule {
    pub fn new(inner: Arc<dyn Module>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gate: Mutex::new(GateState {
                open: true,
                queued: Vec::new(),
            }),
        })
    }

    /// Queue subsequent dispatches instead of forwarding them.
    pub fn close_gate(&self) {
        self.gate.lock().open = false;
    }

    /// Forward everything queued and resume direct dispatch.
    ///
    /// May be called from any thread; completions route home through the
    /// owning threads' inboxes.
    pub fn open_gate(&self) {
        let queued = {
            let mut gate = self.gate.lock();
            gate.open = true;
            std::mem::take(&mut gate.queued)
        };
        for request in queued {
            self.inner.dispatch(request);
        }
    }

    pub fn queued_len(&self) -> usize {
        self.gate.lock().queued.len()
    }
}

impl Module for GatedModule {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn fh_magic(&self) -> u8 {
        self.inner.fh_magic()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn dispatch(&self, request: Box<Request>) {
        {
            let mut gate = self.gate.lock();
            if !gate.open {
                gate.queued.push(request);
                return;
            }
        }
        self.inner.dispatch(request);
    }
}

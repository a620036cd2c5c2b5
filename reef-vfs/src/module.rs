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

use bitflags::bitflags;

use crate::request::Request;

bitflags! {
    /// What a backend module can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// The module needs a real open handle for file I/O; inferred opens
        /// cannot be satisfied with a synthetic handle.
        const OPEN_FILE_REQUIRED = 1 << 0;
        /// The module can create orphaned files with no directory entry.
        const CREATE_UNLINKED = 1 << 1;
    }
}

/// A VFS backend.
///
/// Every operation is asynchronous: `dispatch` takes ownership of the
/// request, fills in its result fields and status, and hands it back through
/// [`Request::complete`] — possibly later and possibly from another thread.
/// The core never holds a shard lock across a dispatch.
pub trait Module: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// The magic byte tagging file handles minted by this module. Root
    /// handles are looked up by this byte.
    fn fh_magic(&self) -> u8;

    fn capabilities(&self) -> Capabilities;

    fn dispatch(&self, request: Box<Request>);
}

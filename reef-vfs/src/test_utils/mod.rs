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

//! Test fixtures: an in-memory backend module, a gate that defers dispatch,
//! and a synchronous client facade. Production backends live out of tree;
//! these exist so the core can be driven end to end.

mod client;
mod gate;
mod memory;

pub use client::Client;
pub use gate::GatedModule;
pub use memory::MemoryFs;

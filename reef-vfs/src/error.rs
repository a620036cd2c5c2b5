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

use thiserror::Error;

/// The canonical error codes backends and peers report.
///
/// Remote protocol status codes map 1:1 onto this enum; transport-level
/// failures collapse into [`VfsError::Fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VfsError {
    #[error("stale file handle")]
    Stale,
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    Exists,
    #[error("permission denied")]
    Access,
    #[error("invalid argument")]
    Inval,
    #[error("operation not supported")]
    NotSupported,
    #[error("not a directory")]
    NotDir,
    #[error("is a directory")]
    IsDir,
    #[error("directory not empty")]
    NotEmpty,
    #[error("no space left on device")]
    NoSpace,
    #[error("disk quota exceeded")]
    Quota,
    #[error("value too large")]
    Overflow,
    #[error("backend fault")]
    Fault,
}

/// Per-request status. `Ok(())` until a backend reports otherwise.
pub type Status = Result<(), VfsError>;

pub type VfsResult<T> = Result<T, VfsError>;

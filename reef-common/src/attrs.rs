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

use crate::fh::Fh;

bitflags! {
    /// Which attribute fields a caller requests (`req_mask`) or a backend
    /// returned (`set_mask`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttrMask: u64 {
        const FH         = 1 << 0;
        const TYPE       = 1 << 1;
        const MODE       = 1 << 2;
        const NLINK      = 1 << 3;
        const UID        = 1 << 4;
        const GID        = 1 << 5;
        const SIZE       = 1 << 6;
        const SPACE_USED = 1 << 7;
        const INO        = 1 << 8;
        const ATIME      = 1 << 9;
        const MTIME      = 1 << 10;
        const CTIME      = 1 << 11;
        const RDEV       = 1 << 12;

        /// The full stat set. Attribute-cache inserts require all of these.
        const STAT = Self::TYPE.bits()
            | Self::MODE.bits()
            | Self::NLINK.bits()
            | Self::UID.bits()
            | Self::GID.bits()
            | Self::SIZE.bits()
            | Self::SPACE_USED.bits()
            | Self::INO.bits()
            | Self::ATIME.bits()
            | Self::MTIME.bits()
            | Self::CTIME.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
    #[default]
    Regular,
    Directory,
    Symlink,
    Fifo,
    CharDevice,
    BlockDevice,
    Socket,
}

/// An attribute set with request/set masks.
///
/// `req_mask` is what the caller wants filled in; `set_mask` is what was
/// actually returned. A field is only meaningful when its bit is set in
/// `set_mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attrs {
    pub req_mask: AttrMask,
    pub set_mask: AttrMask,

    pub fh: Fh,
    pub file_type: FileType,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub space_used: u64,
    pub ino: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub rdev: u64,
}

impl Default for Attrs {
    fn default() -> Self {
        Self {
            req_mask: AttrMask::empty(),
            set_mask: AttrMask::empty(),
            fh: Fh::empty(),
            file_type: FileType::Regular,
            mode: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            size: 0,
            space_used: 0,
            ino: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            rdev: 0,
        }
    }
}

impl Attrs {
    /// An empty result slot requesting `mask`.
    pub fn request(mask: AttrMask) -> Self {
        Self {
            req_mask: mask,
            ..Default::default()
        }
    }

    /// Whether the full stat set was returned.
    pub fn stat_complete(&self) -> bool {
        self.set_mask.contains(AttrMask::STAT)
    }

    /// Whether everything requested was returned.
    pub fn satisfies(&self, mask: AttrMask) -> bool {
        self.set_mask.contains(mask)
    }

    /// Stamp the handle into the attrs, marking `FH` set.
    pub fn set_fh(&mut self, fh: &Fh) {
        self.fh = *fh;
        self.set_mask |= AttrMask::FH;
    }
}

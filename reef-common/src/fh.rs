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

use std::fmt;

/// Maximum length of a file handle in bytes.
pub const FH_MAX: usize = 128;

/// Length of the mount-id prefix of a file handle.
///
/// The first [`MOUNT_ID_SIZE`] bytes of every handle identify the mount that
/// owns the object; the remainder is backend-private.
pub const MOUNT_ID_SIZE: usize = 16;

/// An opaque file handle.
///
/// Handles are fixed-capacity inline buffers so they can be copied freely and
/// embedded in cache entries without allocation. Equality is byte equality of
/// the used prefix.
#[derive(Clone, Copy)]
pub struct Fh {
    len: u8,
    buf: [u8; FH_MAX],
}

impl Fh {
    /// Build a handle from raw bytes.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` exceeds [`FH_MAX`].
    pub fn new(bytes: &[u8]) -> Self {
        assert!(bytes.len() <= FH_MAX, "file handle too long: {}", bytes.len());
        let mut buf = [0u8; FH_MAX];
        buf[..bytes.len()].copy_from_slice(bytes);
        Self {
            len: bytes.len() as u8,
            buf,
        }
    }

    pub fn empty() -> Self {
        Self {
            len: 0,
            buf: [0u8; FH_MAX],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The module magic byte tagging which backend minted the handle.
    pub fn magic(&self) -> u8 {
        self.buf[0]
    }

    /// The mount-id prefix, truncated if the handle is shorter.
    pub fn mount_id(&self) -> &[u8] {
        let n = MOUNT_ID_SIZE.min(self.len as usize);
        &self.buf[..n]
    }

    /// Whether this handle belongs to the mount identified by `mount_id`.
    pub fn in_mount(&self, mount_id: &[u8]) -> bool {
        self.len as usize >= mount_id.len() && &self.buf[..mount_id.len()] == mount_id
    }

    /// Render the handle as lowercase hex.
    pub fn hex(&self) -> String {
        let mut out = String::with_capacity(self.len as usize * 2);
        for b in self.as_bytes() {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

impl PartialEq for Fh {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Fh {}

impl std::hash::Hash for Fh {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(self.as_bytes());
    }
}

impl fmt::Debug for Fh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fh({})", self.hex())
    }
}

impl From<&[u8]> for Fh {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fh_equality_is_prefix_equality() {
        let a = Fh::new(&[1, 2, 3]);
        let b = Fh::new(&[1, 2, 3]);
        let c = Fh::new(&[1, 2, 3, 4]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_fh_mount_id() {
        let mut bytes = [0u8; 32];
        bytes[..MOUNT_ID_SIZE].copy_from_slice(&[7u8; MOUNT_ID_SIZE]);
        let fh = Fh::new(&bytes);
        assert!(fh.in_mount(&[7u8; MOUNT_ID_SIZE]));
        assert!(!fh.in_mount(&[8u8; MOUNT_ID_SIZE]));
    }

    #[test]
    fn test_fh_hex() {
        let fh = Fh::new(&[0xde, 0xad, 0x01]);
        assert_eq!(fh.hex(), "dead01");
    }
}

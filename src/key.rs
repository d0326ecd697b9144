//! Cache key — the identity of one columnlet.
//!
//! # Wire encoding (12 bytes, big-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   block_id      storage-assigned file identifier (BE u64)
//!    8      2   row_group_id  row group within the file (BE u16)
//!   10      2   column_id     column within the row group (BE u16)
//! ```
//!
//! The encoding doubles as the radix search key, matched MSB first so that
//! keys sharing a block id share a tree prefix.  Every key is exactly
//! [`KEY_SIZE`] bytes; there are no short keys.

use std::fmt;

/// Byte length of an encoded key.
pub const KEY_SIZE: usize = 12;

/// `(block, row group, column)` triple addressing one columnlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    pub block_id: u64,
    pub row_group_id: u16,
    pub column_id: u16,
}

impl CacheKey {
    pub fn new(block_id: u64, row_group_id: u16, column_id: u16) -> Self {
        Self { block_id, row_group_id, column_id }
    }

    /// Big-endian concatenation of the three fields.
    pub fn encode(&self) -> [u8; KEY_SIZE] {
        let mut buf = [0u8; KEY_SIZE];
        buf[0..8].copy_from_slice(&self.block_id.to_be_bytes());
        buf[8..10].copy_from_slice(&self.row_group_id.to_be_bytes());
        buf[10..12].copy_from_slice(&self.column_id.to_be_bytes());
        buf
    }

    /// Inverse of [`CacheKey::encode`].  Used only in diagnostics.
    pub fn decode(bytes: &[u8; KEY_SIZE]) -> Self {
        Self {
            block_id: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
            row_group_id: u16::from_be_bytes(bytes[8..10].try_into().unwrap()),
            column_id: u16::from_be_bytes(bytes[10..12].try_into().unwrap()),
        }
    }

    /// Encoded key as lowercase hex, for log lines.
    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.block_id, self.row_group_id, self.column_id)
    }
}

//! Radix index region — global header plus a packed tree, searched in place.
//!
//! # Region layout (offsets absolute from the mapping base)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic          = "RXC1"  (4 ASCII bytes)
//!    4      4   format_version = 1       (LE u32)
//!    8      8   generation     writer publication counter (LE u64)
//!   16      8   tree_size      bytes of tree image after RADIX_OFFSET (LE u64)
//!   24      4   header_crc32   CRC32 of bytes [0, 24)  (LE u32)
//!   28      4   zero padding to RADIX_OFFSET
//!   32      …   radix tree, root node first (see `node`)
//! ```
//!
//! The header is validated once, at attach time.  Lookups touch only the
//! tree: they descend from the root by matching one child leader byte per
//! hop and the node's edge bytes after each hop, until all 12 key bytes are
//! consumed.  A node marked `isKey` then yields its 12-byte leaf payload —
//! a `(offset, length)` address into the data region.
//!
//! # Corruption
//! A corrupt tree can send the descent anywhere inside the region, so every
//! dereference is bounds-checked and the descent carries a step cap.  Any
//! violation surfaces as [`IndexError`]; the reader above degrades it to a
//! miss.  The index is never trusted beyond what these checks establish.

pub mod node;

use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::key::{CacheKey, KEY_SIZE};
use crate::region::{MappedRegion, RegionError};
use node::{ChildEntry, NodeError, NodeHeader, CHILD_ENTRY_SIZE, LEAF_PAYLOAD_SIZE, NODE_HEADER_SIZE};

/// On-disk magic of an index region.
pub const INDEX_MAGIC: &[u8; 4] = b"RXC1";
/// Current index header layout version.
pub const INDEX_FORMAT_VERSION: u32 = 1;
/// Byte offset of the root node.  Fixed, shared with the offline writer.
pub const RADIX_OFFSET: u64 = 32;
/// Descent step cap.  A well-formed tree is at most `KEY_SIZE + 1` nodes
/// deep; the slack absorbs legal zero-length edges.  Hitting the cap means
/// the tree contains a cycle.
pub const MAX_DESCENT_STEPS: u32 = 64;

const CRC_COVERED: usize = 24;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("invalid index magic — not a columnlet cache index")]
    InvalidMagic,
    #[error("unsupported index format version {0} (this build reads v{INDEX_FORMAT_VERSION})")]
    UnsupportedVersion(u32),
    #[error("index header_crc32 mismatch — index region is corrupted")]
    Crc32Mismatch,
    #[error("corrupt index: {0}")]
    Corrupt(String),
    #[error("corrupt index: {0}")]
    Node(#[from] NodeError),
    #[error("region error: {0}")]
    Region(#[from] RegionError),
}

// ── Global header ────────────────────────────────────────────────────────────

/// The validated 32-byte header at the front of the index region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub format_version: u32,
    /// Writer publication counter.  Strictly increasing across republications;
    /// the layer above compares it to detect a swap it missed.
    pub generation: u64,
    /// Bytes of tree image following [`RADIX_OFFSET`].
    pub tree_size: u64,
}

impl IndexHeader {
    /// Read and validate the header: magic, version, CRC32, tree bound.
    pub fn read(region: &MappedRegion) -> Result<Self, IndexError> {
        let buf = region.slice(0, RADIX_OFFSET as usize)?;

        if &buf[0..4] != INDEX_MAGIC {
            return Err(IndexError::InvalidMagic);
        }

        let format_version = LittleEndian::read_u32(&buf[4..8]);
        if format_version != INDEX_FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(format_version));
        }

        let stored_crc = LittleEndian::read_u32(&buf[24..28]);
        if crc32fast::hash(&buf[..CRC_COVERED]) != stored_crc {
            return Err(IndexError::Crc32Mismatch);
        }

        let generation = LittleEndian::read_u64(&buf[8..16]);
        let tree_size = LittleEndian::read_u64(&buf[16..24]);
        let limit = region.len() as u64 - RADIX_OFFSET;
        if tree_size > limit {
            return Err(IndexError::Corrupt(format!(
                "tree_size {tree_size} exceeds the {limit} B after the header"
            )));
        }

        Ok(Self { format_version, generation, tree_size })
    }
}

// ── Leaf payload ─────────────────────────────────────────────────────────────

/// The 12-byte leaf payload: an address into the data region.
///
/// Pure value type; equality and ordering are field-wise.  It has no meaning
/// outside the reader that owns the matching data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheIdx {
    /// Byte offset of the columnlet in the data region (LE u64 on disk).
    pub offset: u64,
    /// Byte length of the columnlet (LE u32 on disk).
    pub length: u32,
}

impl CacheIdx {
    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            offset: LittleEndian::read_u64(&buf[0..8]),
            length: LittleEndian::read_u32(&buf[8..12]),
        }
    }

    /// One past the last data-region byte this entry addresses.  Saturates
    /// instead of wrapping so a corrupt payload fails range checks rather
    /// than passing them.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(u64::from(self.length))
    }
}

// ── Lookup statistics ────────────────────────────────────────────────────────

/// Aggregate descent counters, updated with relaxed atomics on every search.
///
/// Observability only: reading or resetting them never changes a lookup
/// result.  Counters restart from zero when a fresh pair is attached.
#[derive(Debug, Default)]
pub struct IndexStats {
    nodes_visited: AtomicU64,
    deepest_descent: AtomicU64,
}

impl IndexStats {
    fn record(&self, visited: u64, depth: u64) {
        self.nodes_visited.fetch_add(visited, Ordering::Relaxed);
        self.deepest_descent.fetch_max(depth, Ordering::Relaxed);
    }

    /// Total nodes dereferenced across all lookups.
    pub fn nodes_visited(&self) -> u64 {
        self.nodes_visited.load(Ordering::Relaxed)
    }

    /// Deepest descent (in child hops) seen so far.
    pub fn deepest_descent(&self) -> u64 {
        self.deepest_descent.load(Ordering::Relaxed)
    }
}

// ── Radix index ──────────────────────────────────────────────────────────────

/// The index region interpreted as a searchable radix tree.
///
/// Shareable across threads; a search needs no locks and no per-instance
/// scratch state — everything it touches is either on its stack or the
/// immutable mapping.
#[derive(Debug)]
pub struct RadixIndex {
    region: MappedRegion,
    header: IndexHeader,
    stats: IndexStats,
}

impl RadixIndex {
    /// Validate the header and root, then expose the region as a tree.
    ///
    /// A root that advertises a non-empty edge is rejected here: consuming
    /// edge bytes out of the root's own children table is how a corrupt
    /// header turns into garbage lookups.
    pub fn attach(region: MappedRegion) -> Result<Self, IndexError> {
        let header = IndexHeader::read(&region)?;

        let root = NodeHeader::from_raw(region.get_u32(RADIX_OFFSET)?)?;
        if root.edge_len() != 0 {
            return Err(IndexError::Corrupt(format!(
                "root node advertises a {}-byte edge; the root edge is empty by contract",
                root.edge_len()
            )));
        }

        Ok(Self { region, header, stats: IndexStats::default() })
    }

    pub fn generation(&self) -> u64 {
        self.header.generation
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Point lookup: follow `key` from the root and return the leaf payload
    /// of the node that consumed all 12 key bytes, if that node is a key.
    ///
    /// Errors describe a structurally broken tree, never a plain miss; the
    /// caller is expected to treat them as a miss and fall back to storage.
    pub fn search(&self, key: &CacheKey) -> Result<Option<CacheIdx>, IndexError> {
        let mut visited = 0u64;
        let mut depth = 0u64;
        let outcome = self.descend(key, &mut visited, &mut depth);
        self.stats.record(visited, depth);
        outcome
    }

    fn descend(
        &self,
        key: &CacheKey,
        visited: &mut u64,
        depth: &mut u64,
    ) -> Result<Option<CacheIdx>, IndexError> {
        let key = key.encode();

        let mut current = RADIX_OFFSET;
        let mut header = self.node_header(current)?;
        *visited += 1;

        // An all-zero root word is the writer's encoding of an empty tree.
        if header.child_count() == 0 && header.edge_len() == 0 && !header.is_key() {
            return Ok(None);
        }

        let mut matched = 0usize;
        let mut steps = 0u32;
        while matched < KEY_SIZE {
            steps += 1;
            if steps > MAX_DESCENT_STEPS {
                return Err(IndexError::Corrupt(format!(
                    "descent did not terminate within {MAX_DESCENT_STEPS} steps"
                )));
            }

            // Scan this node's children for the one whose leader byte is the
            // next unmatched key byte.  Leaders are unique within a node, so
            // the first match is the only match.
            let child_count = header.child_count() as usize;
            if child_count == 0 {
                return Ok(None);
            }
            let children = self
                .region
                .slice(current + NODE_HEADER_SIZE, child_count * CHILD_ENTRY_SIZE as usize)?;
            let want = key[matched];
            let next = children
                .chunks_exact(CHILD_ENTRY_SIZE as usize)
                .map(|raw| ChildEntry::from_raw(u64::from_ne_bytes(raw.try_into().unwrap())))
                .find(|entry| entry.leader() == want);
            let Some(child) = next else {
                return Ok(None);
            };

            // Jump.  A child offset pointing back into the header cannot be
            // a node; everything further out is caught by the bounds checks.
            current = child.offset();
            if current < RADIX_OFFSET {
                return Err(IndexError::Corrupt(format!(
                    "child offset {current} points inside the index header"
                )));
            }
            header = self.node_header(current)?;
            *visited += 1;
            *depth += 1;

            // Match the node's edge against the key, leader byte included.
            let edge_len = header.edge_len() as usize;
            if edge_len > 0 {
                if edge_len > KEY_SIZE - matched {
                    // The stored key under this node is longer than ours can
                    // ever be; nothing below here matches a 12-byte key.
                    return Ok(None);
                }
                let edge = self.region.slice(current + header.edge_start(), edge_len)?;
                if edge != &key[matched..matched + edge_len] {
                    return Ok(None);
                }
                matched += edge_len;
            }
            // A zero-length edge contributes no key bytes; continue with the
            // node's children (or accept below if the key is consumed).
        }

        // All 12 bytes matched and the final edge was fully consumed.  Only
        // a key node carries a payload; a pure interior match is a miss.
        if !header.is_key() {
            return Ok(None);
        }
        let payload_off = current + header.edge_start() + u64::from(header.edge_len());
        let payload = self.region.slice(payload_off, LEAF_PAYLOAD_SIZE as usize)?;
        Ok(Some(CacheIdx::from_bytes(payload)))
    }

    fn node_header(&self, offset: u64) -> Result<NodeHeader, IndexError> {
        Ok(NodeHeader::from_raw(self.region.get_u32(offset)?)?)
    }
}

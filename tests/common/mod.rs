//! Fixture writer — builds (index, data) region files in the exact layout
//! the reader consumes.  Test stand-in for the offline cache writer.
//!
//! Keys go into an in-memory trie, single-child chains collapse into edges
//! (the root never collapses — its edge stays empty), nodes get absolute
//! offsets in one preorder pass, and the image is serialized with the same
//! field widths and byte orders the reader expects: LE node headers and
//! leaf payloads, native-order child entries, LE global header with CRC32.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::mem;
use std::path::Path;

use byteorder::{LittleEndian, NativeEndian, WriteBytesExt};
use colcache::{CacheConfig, CacheKey, KEY_SIZE, RADIX_OFFSET};

const HEADER_LEN: usize = RADIX_OFFSET as usize;

/// Builds one publication: a set of `key -> bytes` entries.
#[derive(Default)]
pub struct CacheImageBuilder {
    entries: BTreeMap<[u8; KEY_SIZE], (u64, u32)>,
    data: Vec<u8>,
    generation: u64,
}

/// Where a built publication landed on disk.
pub struct BuiltCache {
    pub config: CacheConfig,
    pub index_size: u64,
    pub data_size: u64,
}

impl CacheImageBuilder {
    pub fn new() -> Self {
        Self { generation: 1, ..Self::default() }
    }

    pub fn generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Append `bytes` to the data region and index them under `key`.
    pub fn append(&mut self, key: CacheKey, bytes: &[u8]) -> &mut Self {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        self.entries.insert(key.encode(), (offset, bytes.len() as u32));
        self
    }

    /// Index `key` at an explicit `(offset, length)` without appending data.
    pub fn insert_raw(&mut self, key: CacheKey, offset: u64, length: u32) -> &mut Self {
        self.entries.insert(key.encode(), (offset, length));
        self
    }

    /// Replace the whole data region.
    pub fn set_data(&mut self, bytes: &[u8]) -> &mut Self {
        self.data = bytes.to_vec();
        self
    }

    /// Serialize the index region image (header + tree).
    pub fn index_image(&self) -> Vec<u8> {
        let arena = self.flatten();

        // Absolute offsets, arena order.
        let mut offsets = Vec::with_capacity(arena.len());
        let mut at = RADIX_OFFSET;
        for node in &arena {
            offsets.push(at);
            at += node.image_len();
        }
        let tree_size = at - RADIX_OFFSET;

        let mut image = Vec::with_capacity(at as usize);
        write_header(&mut image, self.generation, tree_size);
        for node in &arena {
            let header = (u32::from(node.leaf.is_some()) << 31)
                | ((node.edge.len() as u32) << 9)
                | node.children.len() as u32;
            image.write_u32::<LittleEndian>(header).unwrap();
            for &(leader, child) in &node.children {
                let entry = (u64::from(leader) << 56) | offsets[child];
                image.write_u64::<NativeEndian>(entry).unwrap();
            }
            image.extend_from_slice(&node.edge);
            if let Some((offset, length)) = node.leaf {
                image.write_u64::<LittleEndian>(offset).unwrap();
                image.write_u32::<LittleEndian>(length).unwrap();
            }
        }
        image
    }

    /// Write both region files into `dir` and return a config addressing them.
    pub fn write_to(&self, dir: &Path) -> io::Result<BuiltCache> {
        let index_path = dir.join("cache.index");
        let data_path = dir.join("cache.data");

        let index = self.index_image();
        fs::write(&index_path, &index)?;

        // The writer preallocates the data file; an empty publication still
        // produces a mappable file.
        let mut data = self.data.clone();
        if data.is_empty() {
            data.resize(16, 0);
        }
        fs::write(&data_path, &data)?;

        Ok(BuiltCache {
            config: CacheConfig::new(
                data_path,
                data.len() as u64,
                index_path,
                index.len() as u64,
            ),
            index_size: index.len() as u64,
            data_size: data.len() as u64,
        })
    }

    fn flatten(&self) -> Vec<FlatNode> {
        let mut trie = TrieNode::default();
        for (key, &idx) in &self.entries {
            let mut node = &mut trie;
            for &b in key {
                node = node.children.entry(b).or_default();
            }
            node.leaf = Some(idx);
        }

        let mut arena = vec![FlatNode::default()]; // root, empty edge
        let kids = trie
            .children
            .into_iter()
            .map(|(b, child)| (b, add_subtree(&mut arena, vec![b], child)))
            .collect();
        arena[0].children = kids;
        arena
    }
}

#[derive(Default)]
struct TrieNode {
    children: BTreeMap<u8, TrieNode>,
    leaf: Option<(u64, u32)>,
}

#[derive(Default)]
struct FlatNode {
    edge: Vec<u8>,
    leaf: Option<(u64, u32)>,
    children: Vec<(u8, usize)>,
}

impl FlatNode {
    fn image_len(&self) -> u64 {
        4 + 8 * self.children.len() as u64
            + self.edge.len() as u64
            + if self.leaf.is_some() { 12 } else { 0 }
    }
}

/// Collapse a single-child chain into one edge, then recurse.  Returns the
/// arena slot of the subtree root.
fn add_subtree(arena: &mut Vec<FlatNode>, mut edge: Vec<u8>, mut node: TrieNode) -> usize {
    while node.leaf.is_none() && node.children.len() == 1 {
        let children = mem::take(&mut node.children);
        let (b, next) = children.into_iter().next().unwrap();
        edge.push(b);
        node = next;
    }

    let slot = arena.len();
    arena.push(FlatNode { edge, leaf: node.leaf, children: Vec::new() });
    let kids = mem::take(&mut node.children)
        .into_iter()
        .map(|(b, child)| (b, add_subtree(arena, vec![b], child)))
        .collect();
    arena[slot].children = kids;
    slot
}

fn write_header(image: &mut Vec<u8>, generation: u64, tree_size: u64) {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(b"RXC1");
    header[4..8].copy_from_slice(&1u32.to_le_bytes());
    header[8..16].copy_from_slice(&generation.to_le_bytes());
    header[16..24].copy_from_slice(&tree_size.to_le_bytes());
    let crc = crc32fast::hash(&header[..24]);
    header[24..28].copy_from_slice(&crc.to_le_bytes());
    image.extend_from_slice(&header);
}

//! Mapped region — a file viewed as a bounds-checked byte array.
//!
//! Both cache regions (index and data) are attached through this type.  The
//! mapping is read-only and immutable for the lifetime of the value; any
//! number of threads may read it concurrently without synchronization.
//!
//! # Read primitives
//! Every read verifies `offset + width <= size` before touching the mapping
//! and fails with [`RegionError::OutOfBounds`] on overrun.  There is no
//! unchecked entry point — the safe primitives are the contract.
//!
//! # Endianness
//! Fixed-width reads come in two flavours: [`MappedRegion::get_u32`] is
//! little-endian (node headers, leaf payloads), while
//! [`MappedRegion::get_u64_ne`] is native order.  Child entries inside the
//! radix tree are written in the native order of the machine that built the
//! file, so index files are NOT portable across endianness-different
//! writer/reader pairs.
//!
//! # Teardown
//! Dropping the region unmaps it.  Dropping while another thread is inside a
//! read is excluded by the borrow checker; the higher-level teardown contract
//! lives on [`crate::reader::CacheReader::close`].

use std::fs::File;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, NativeEndian};
use memmap2::{Advice, Mmap, MmapOptions};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("cannot map region file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("region file {path:?} holds {actual} B, cannot map {requested} B")]
    SizeMismatch {
        path: PathBuf,
        requested: u64,
        actual: u64,
    },
    #[error("read of {len} B at offset {offset} overruns region of {size} B")]
    OutOfBounds { offset: u64, len: usize, size: usize },
}

/// A read-only memory mapping of exactly `size` bytes of one file.
pub struct MappedRegion {
    mmap: Mmap,
    size: usize,
    path: PathBuf,
}

impl MappedRegion {
    /// Map the first `size` bytes of the file at `path`.
    ///
    /// Fails if the file cannot be opened, is shorter than `size`, or the
    /// mapping call itself fails.  The mapping is advised for random access
    /// — lookups touch scattered pages, never sequential runs.
    pub fn open<P: AsRef<Path>>(path: P, size: u64) -> Result<Self, RegionError> {
        fn io(path: &Path, source: std::io::Error) -> RegionError {
            RegionError::Io { path: path.to_owned(), source }
        }
        let path = path.as_ref().to_owned();

        let file = File::open(&path).map_err(|e| io(&path, e))?;
        let actual = file.metadata().map_err(|e| io(&path, e))?.len();
        if actual < size {
            return Err(RegionError::SizeMismatch { path, requested: size, actual });
        }

        let mmap = unsafe { MmapOptions::new().len(size as usize).map(&file) }
            .map_err(|e| io(&path, e))?;
        mmap.advise(Advice::Random).map_err(|e| io(&path, e))?;

        Ok(Self { mmap, size: size as usize, path })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Path the region was mapped from (diagnostics only).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow `len` bytes at `offset`.
    ///
    /// This is the primitive the others are built on; the returned slice is
    /// valid for as long as the region lives and costs no copy.
    #[inline]
    pub fn slice(&self, offset: u64, len: usize) -> Result<&[u8], RegionError> {
        let end = offset.checked_add(len as u64).filter(|&e| e <= self.size as u64);
        match end {
            Some(_) => Ok(&self.mmap[offset as usize..offset as usize + len]),
            None => Err(RegionError::OutOfBounds { offset, len, size: self.size }),
        }
    }

    /// Read 4 little-endian bytes at `offset`.
    #[inline]
    pub fn get_u32(&self, offset: u64) -> Result<u32, RegionError> {
        Ok(LittleEndian::read_u32(self.slice(offset, 4)?))
    }

    /// Read 8 bytes at `offset` in native byte order.
    ///
    /// Matches the writer, which emits child entries in its own native
    /// order; see the module docs for the portability caveat.
    #[inline]
    pub fn get_u64_ne(&self, offset: u64) -> Result<u64, RegionError> {
        Ok(NativeEndian::read_u64(self.slice(offset, 8)?))
    }

    /// Copy `dst.len()` bytes starting at `offset` into a caller-owned buffer.
    #[inline]
    pub fn read_into(&self, offset: u64, dst: &mut [u8]) -> Result<(), RegionError> {
        dst.copy_from_slice(self.slice(offset, dst.len())?);
        Ok(())
    }
}

// The mapping is read-only after construction; concurrent readers are fine.
// Mmap is already Send + Sync, this is just the documented contract.

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn region_with(bytes: &[u8]) -> (NamedTempFile, MappedRegion) {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        let region = MappedRegion::open(f.path(), bytes.len() as u64).unwrap();
        (f, region)
    }

    #[test]
    fn reads_fixed_width_fields() {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        bytes[4..12].copy_from_slice(&0x0102_0304_0506_0708u64.to_ne_bytes());
        let (_f, r) = region_with(&bytes);

        assert_eq!(r.get_u32(0).unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.get_u64_ne(4).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn bounds_are_enforced() {
        let (_f, r) = region_with(&[1, 2, 3, 4]);
        assert!(r.get_u32(0).is_ok());
        assert!(matches!(r.get_u32(1), Err(RegionError::OutOfBounds { .. })));
        assert!(matches!(r.get_u64_ne(0), Err(RegionError::OutOfBounds { .. })));
        assert!(matches!(r.slice(4, 1), Err(RegionError::OutOfBounds { .. })));
        // Zero-length read at the end boundary is fine.
        assert_eq!(r.slice(4, 0).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn offset_overflow_is_out_of_bounds() {
        let (_f, r) = region_with(&[0; 8]);
        assert!(matches!(r.slice(u64::MAX, 8), Err(RegionError::OutOfBounds { .. })));
    }

    #[test]
    fn rejects_short_file() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&[0u8; 10]).unwrap();
        f.flush().unwrap();
        let err = MappedRegion::open(f.path(), 100).unwrap_err();
        assert!(matches!(err, RegionError::SizeMismatch { requested: 100, actual: 10, .. }));
    }

    #[test]
    fn read_into_copies() {
        let (_f, r) = region_with(b"HELLOWORLD");
        let mut buf = [0u8; 5];
        r.read_into(5, &mut buf).unwrap();
        assert_eq!(&buf, b"WORLD");
    }
}

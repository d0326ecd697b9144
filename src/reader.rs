//! Cache reader — the consumer-facing façade over the two mapped regions.
//!
//! A [`CacheReader`] composes the radix index with the data region: `get`
//! encodes the key, descends the index, and copies the addressed columnlet
//! bytes out of the data region.  The cache is an optimisation — a lookup
//! NEVER fails a query.  Misses return `None`; structural errors inside the
//! index are logged, counted, and degraded to `None` so the caller falls
//! back to storage.
//!
//! # Concurrency
//! All lookup paths take `&self` and keep their scratch on the stack, so any
//! number of threads may call `get`/`batch_get` on one shared reader.
//! `close` and `reattach` take `&mut self`: the caller must quiesce lookups
//! before swapping or tearing down, exactly once, after all reader threads
//! are joined.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;
use thiserror::Error;

use crate::config::CacheConfig;
use crate::index::{CacheIdx, IndexError, RadixIndex};
use crate::key::CacheKey;
use crate::region::{MappedRegion, RegionError};

/// Ranges closer than this merge into one data-region copy in `batch_get`.
/// Matches the page-ish granularity below which a second copy costs more
/// than the gap bytes it skips.
pub const BATCH_MERGE_GAP: u64 = 4096;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("index region: {0}")]
    Index(#[from] IndexError),
    #[error("data region: {0}")]
    Region(#[from] RegionError),
}

// ── Statistics ───────────────────────────────────────────────────────────────

/// Lookup outcome counters, updated with relaxed atomics.
///
/// `errors` counts miss-from-error separately from plain `misses`
/// (miss-from-absence) so operators can tell a cold key from a broken index.
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    #[inline]
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of the reader's counters.
///
/// Tree-shape gauges (`nodes_visited`, `deepest_descent`) restart from zero
/// on `reattach`; outcome counters span the reader's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub nodes_visited: u64,
    pub deepest_descent: u64,
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// One attached (index, data) pair.  Swapped as a unit on republication.
struct Attached {
    index: RadixIndex,
    data: MappedRegion,
}

/// Read-only columnlet cache over a mapped (index, data) region pair.
pub struct CacheReader {
    attached: Option<Arc<Attached>>,
    counters: Counters,
}

impl CacheReader {
    /// Map both regions named by `config` and attach to them.
    ///
    /// With `enabled = false` no file is opened and no mapping is created;
    /// the reader short-circuits every lookup to `None`.
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let index_region = MappedRegion::open(&config.index_location, config.index_size)?;
        let data_region = MappedRegion::open(&config.cache_location, config.cache_size)?;
        Self::attach(index_region, data_region)
    }

    /// Attach to a pair of already-mapped regions.
    ///
    /// Validates the index header and root node; the data region is opaque
    /// and accepted as-is.
    pub fn attach(index_region: MappedRegion, data_region: MappedRegion) -> Result<Self, CacheError> {
        let index = RadixIndex::attach(index_region)?;
        Ok(Self {
            attached: Some(Arc::new(Attached { index, data: data_region })),
            counters: Counters::default(),
        })
    }

    /// A reader with no regions that answers `None` to every lookup.
    pub fn disabled() -> Self {
        Self { attached: None, counters: Counters::default() }
    }

    /// Whether a region pair is currently attached.
    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    /// Generation of the attached index, if any.
    pub fn generation(&self) -> Option<u64> {
        self.attached.as_ref().map(|a| a.index.generation())
    }

    /// Look up one columnlet and copy its bytes out of the data region.
    ///
    /// `None` means miss, disabled cache, or a lookup error that was logged
    /// and swallowed — the caller falls back to storage in every case.
    pub fn get(&self, block_id: u64, row_group_id: u16, column_id: u16) -> Option<Vec<u8>> {
        self.get_key(&CacheKey::new(block_id, row_group_id, column_id))
    }

    /// [`CacheReader::get`] with a pre-built key.
    pub fn get_key(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let attached = self.attached.as_ref()?;
        match attached.index.search(key) {
            // Bounds are checked before any allocation: a corrupt leaf must
            // not get to size a buffer.
            Ok(Some(idx)) => match attached.data.slice(idx.offset, idx.length as usize) {
                Ok(bytes) => {
                    self.counters.hit();
                    Some(bytes.to_vec())
                }
                Err(e) => {
                    warn!("columnlet {key} ({}) addresses bytes outside the data region: {e}", key.to_hex());
                    self.counters.error();
                    None
                }
            },
            Ok(None) => {
                self.counters.miss();
                None
            }
            Err(e) => {
                warn!("cache lookup failed for columnlet {key} ({}): {e}", key.to_hex());
                self.counters.error();
                None
            }
        }
    }

    /// Look up many columnlets with one data-region copy per merged range.
    ///
    /// Hits whose data ranges overlap or sit within [`BATCH_MERGE_GAP`]
    /// bytes of each other are copied out together and sliced per key.
    /// `results[i]` always answers `keys[i]`, misses included.
    pub fn batch_get(&self, keys: &[CacheKey]) -> Vec<Option<Vec<u8>>> {
        let mut results: Vec<Option<Vec<u8>>> = (0..keys.len()).map(|_| None).collect();
        let Some(attached) = self.attached.as_ref() else {
            return results;
        };

        // Resolve all keys up front; hits keep their input position so the
        // copies below can land in input order.
        let mut hits: Vec<(usize, CacheIdx)> = Vec::with_capacity(keys.len());
        for (pos, key) in keys.iter().enumerate() {
            match attached.index.search(key) {
                Ok(Some(idx)) => {
                    if idx.end() <= attached.data.len() as u64 {
                        hits.push((pos, idx));
                    } else {
                        warn!("columnlet {key} ({}) addresses bytes outside the data region", key.to_hex());
                        self.counters.error();
                    }
                }
                Ok(None) => self.counters.miss(),
                Err(e) => {
                    warn!("cache lookup failed for columnlet {key} ({}): {e}", key.to_hex());
                    self.counters.error();
                }
            }
        }

        hits.sort_unstable_by_key(|&(_, idx)| idx);

        let mut i = 0;
        while i < hits.len() {
            let run_start = hits[i].1.offset;
            let mut run_end = hits[i].1.end();
            let mut j = i + 1;
            while j < hits.len() && hits[j].1.offset <= run_end.saturating_add(BATCH_MERGE_GAP) {
                run_end = run_end.max(hits[j].1.end());
                j += 1;
            }

            match attached.data.slice(run_start, (run_end - run_start) as usize) {
                Ok(run) => {
                    for &(pos, idx) in &hits[i..j] {
                        let start = (idx.offset - run_start) as usize;
                        results[pos] = Some(run[start..start + idx.length as usize].to_vec());
                        self.counters.hit();
                    }
                }
                Err(e) => {
                    // Every range was validated against the region length, so
                    // this only fires if the mapping itself is inconsistent.
                    warn!("batch copy of data range [{run_start}, {run_end}) failed: {e}");
                    for _ in i..j {
                        self.counters.error();
                    }
                }
            }
            i = j;
        }

        results
    }

    /// Counter snapshot.  Reading it never perturbs lookup results.
    pub fn stats(&self) -> CacheStats {
        let (nodes_visited, deepest_descent) = match self.attached.as_ref() {
            Some(a) => (a.index.stats().nodes_visited(), a.index.stats().deepest_descent()),
            None => (0, 0),
        };
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            nodes_visited,
            deepest_descent,
        }
    }

    /// Swap in a freshly published (index, data) pair without restarting.
    ///
    /// The old pair unmaps when its last in-flight borrow ends; the swap
    /// itself is one pointer-width store.  Outcome counters carry across.
    pub fn reattach(
        &mut self,
        index_region: MappedRegion,
        data_region: MappedRegion,
    ) -> Result<(), CacheError> {
        let index = RadixIndex::attach(index_region)?;
        self.attached = Some(Arc::new(Attached { index, data: data_region }));
        Ok(())
    }

    /// Unmap both regions.  Idempotent; must happen after all reader threads
    /// are joined.  Lookups after `close` answer `None`.
    pub fn close(&mut self) {
        self.attached = None;
    }
}

impl std::fmt::Debug for CacheReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheReader")
            .field("attached", &self.is_attached())
            .field("generation", &self.generation())
            .finish()
    }
}

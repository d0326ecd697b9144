//! Cache configuration — the options this crate consumes.
//!
//! Config loading belongs to the embedding system; this type is only the
//! typed landing spot.  The serde field names match the option keys the
//! external configuration uses, so a deserializer can map a section of the
//! system config straight into a [`CacheConfig`].

use std::path::PathBuf;

use serde::Deserialize;

/// Locations and sizes of the two mapped regions, plus the kill switch.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Path of the data region file.
    #[serde(rename = "cache.location")]
    pub cache_location: PathBuf,
    /// Bytes of the data region file to map.
    #[serde(rename = "cache.size")]
    pub cache_size: u64,
    /// Path of the index region file.
    #[serde(rename = "index.location")]
    pub index_location: PathBuf,
    /// Bytes of the index region file to map.
    #[serde(rename = "index.size")]
    pub index_size: u64,
    /// When false, the reader answers `None` to every lookup without ever
    /// touching (or even mapping) the regions.
    #[serde(rename = "cache.enabled", default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl CacheConfig {
    pub fn new<P: Into<PathBuf>>(
        cache_location: P,
        cache_size: u64,
        index_location: P,
        index_size: u64,
    ) -> Self {
        Self {
            cache_location: cache_location.into(),
            cache_size,
            index_location: index_location.into(),
            index_size,
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

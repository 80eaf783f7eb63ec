//! Bounded in-memory TTL caches.
//!
//! Every cache in the proxy (images, subtitles, Alist API responses,
//! resolved HTTP STRM URLs) is a [`BoundedCache`]: a sharded TTL cache
//! with a hard memory ceiling and a per-entry size cap. Entries larger
//! than [`MAX_ENTRY_SIZE`] are rejected before insertion so callers can
//! log and skip.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::config::CacheConfig;

/// No entry with a payload above this many bytes is ever cached.
pub const MAX_ENTRY_SIZE: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry of {size} bytes exceeds the {limit} byte limit")]
    EntryTooLarge { size: usize, limit: usize },
}

/// A TTL cache of opaque bytes with a hard memory ceiling.
///
/// Weight accounting covers key and value bytes; eviction is handled by
/// the backing `moka` cache once the ceiling is reached.
#[derive(Clone, Debug)]
pub struct BoundedCache {
    inner: moka::future::Cache<String, Bytes>,
}

impl BoundedCache {
    pub fn new(settings: &CacheConfig, ttl: Duration) -> Self {
        let max_bytes = settings.max_memory_mb.max(1) as u64 * 1024 * 1024;
        let inner = moka::future::CacheBuilder::new(max_bytes)
            .weigher(|key: &String, value: &Bytes| {
                (key.len() + value.len()).min(u32::MAX as usize) as u32
            })
            .time_to_live(ttl)
            .build();
        Self { inner }
    }

    /// Look up a key. A miss is `None`, never an error.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.inner.get(key).await
    }

    /// Insert a value, rejecting oversized payloads.
    pub async fn insert(&self, key: impl Into<String>, value: Bytes) -> Result<(), CacheError> {
        if value.len() > MAX_ENTRY_SIZE {
            return Err(CacheError::EntryTooLarge {
                size: value.len(),
                limit: MAX_ENTRY_SIZE,
            });
        }
        self.inner.insert(key.into(), value).await;
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    /// Number of resident entries (approximate, for diagnostics).
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

/// Build a cache for the given TTL (seconds), honoring the master switch.
///
/// Returns `None` when caching is globally disabled or the TTL is 0.
pub fn maybe_cache(settings: &CacheConfig, ttl_secs: u64) -> Option<BoundedCache> {
    if !settings.enable || ttl_secs == 0 {
        return None;
    }
    Some(BoundedCache::new(settings, Duration::from_secs(ttl_secs)))
}

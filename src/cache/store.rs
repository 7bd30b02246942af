//! Asset store contract and the process-local implementation.
//!
//! The gateway only talks to [`AssetStore`]; the memory store here and the
//! Postgres store in `infra::db` are interchangeable behind it.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";
const METRIC_MEMORY_EVICT: &str = "vitrine_memory_store_evict_total";

/// A resolved asset as held by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsset {
    pub body: Bytes,
    pub content_type: String,
    /// Set when the bytes came from the placeholder generator.
    pub placeholder: bool,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store operation timed out")]
    Timeout,
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Key/value blob storage with per-entry lifetimes.
///
/// Concurrent `set` calls for one key are last-write-wins; callers never need
/// more coordination than the backend itself provides.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Short backend name used in logs and metric labels.
    fn backend(&self) -> &'static str;

    /// Fetch a live entry. Expired entries are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<CachedAsset>, StoreError>;

    /// Insert or replace an entry that expires after `ttl`.
    async fn set(&self, key: &str, asset: CachedAsset, ttl: Duration) -> Result<(), StoreError>;

    /// Remove expired entries, returning how many were dropped.
    async fn sweep_expired(&self) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemoryEntry {
    asset: CachedAsset,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local store bounded by entry count with LRU eviction.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.memory_entry_limit_non_zero())),
        }
    }

    /// Number of entries currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CachedAsset>, StoreError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let live = match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.asset.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if live.is_none() {
            entries.pop(key);
        }
        Ok(live)
    }

    async fn set(&self, key: &str, asset: CachedAsset, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| {
                StoreError::backend(format!("ttl of {}s is out of range", ttl.as_secs()))
            })?;
        let entry = MemoryEntry { asset, expires_at };
        let evicted = rw_write(&self.entries, SOURCE, "set").push(key.to_string(), entry);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            counter!(METRIC_MEMORY_EVICT).increment(1);
        }
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "sweep_expired");
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        Ok(expired.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;

    use super::*;

    fn asset(body: &'static str) -> CachedAsset {
        CachedAsset {
            body: Bytes::from_static(body.as_bytes()),
            content_type: "image/png".to_string(),
            placeholder: false,
        }
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new(&CacheConfig::default());

        assert!(store.get("cover-art-a").await.expect("get").is_none());

        store
            .set("cover-art-a", asset("bytes"), HOUR)
            .await
            .expect("set");

        let cached = store.get("cover-art-a").await.expect("get").expect("hit");
        assert_eq!(cached, asset("bytes"));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = MemoryStore::new(&CacheConfig::default());
        store
            .set("user-photo-1", asset("old"), Duration::ZERO)
            .await
            .expect("set");

        assert!(store.get("user-photo-1").await.expect("get").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = MemoryStore::new(&CacheConfig::default());
        store.set("k", asset("first"), HOUR).await.expect("set");
        store.set("k", asset("second"), HOUR).await.expect("set");

        let cached = store.get("k").await.expect("get").expect("hit");
        assert_eq!(cached.body, Bytes::from_static(b"second"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn lru_eviction_respects_limit() {
        let config = CacheConfig {
            memory_entry_limit: 2,
            ..Default::default()
        };
        let store = MemoryStore::new(&config);

        store.set("a", asset("a"), HOUR).await.expect("set");
        store.set("b", asset("b"), HOUR).await.expect("set");
        store.set("c", asset("c"), HOUR).await.expect("set");

        assert!(store.get("a").await.expect("get").is_none());
        assert!(store.get("b").await.expect("get").is_some());
        assert!(store.get("c").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_entries() {
        let store = MemoryStore::new(&CacheConfig::default());
        store.set("live", asset("live"), HOUR).await.expect("set");
        store
            .set("dead", asset("dead"), Duration::ZERO)
            .await
            .expect("set");

        let swept = store.sweep_expired().await.expect("sweep");
        assert_eq!(swept, 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("live").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn overflowing_ttl_is_an_error_not_a_panic() {
        let store = MemoryStore::new(&CacheConfig::default());

        let err = store
            .set("cover-art-a", asset("bytes"), Duration::MAX)
            .await
            .expect_err("ttl overflows");
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.is_empty());

        store.set("cover-art-a", asset("bytes"), HOUR).await.expect("set");
        assert!(store.get("cover-art-a").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn concurrent_writers_to_one_key_leave_a_readable_entry() {
        let store = Arc::new(MemoryStore::new(&CacheConfig::default()));
        let mut handles = Vec::new();
        for idx in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let body = if idx % 2 == 0 { "even" } else { "odd" };
                store.set("shared", asset(body), HOUR).await.expect("set");
            }));
        }
        for handle in handles {
            handle.await.expect("writer task");
        }

        let cached = store.get("shared").await.expect("get").expect("hit");
        assert!(
            cached.body == Bytes::from_static(b"even") || cached.body == Bytes::from_static(b"odd")
        );
    }

    #[tokio::test]
    async fn memory_store_recovers_from_poisoned_lock() {
        let store = MemoryStore::new(&CacheConfig::default());

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.set("k", asset("v"), HOUR).await.expect("set");
        assert!(store.get("k").await.expect("get").is_some());
    }
}

//! Extensible cache storage trait and the in-memory reference backend
//!
//! [`CacheProvider`] is the single abstraction the engine persists through.
//! A provider is a durable mapping from string keys to JSON values with an
//! optional per-key TTL. Values must survive process restarts for durable
//! resume to work; with an ephemeral backend resume is best-effort.
//!
//! Implementations must be `Send + Sync` and safe for concurrent use;
//! atomicity at the single-key level is sufficient - the engine never
//! requires multi-key transactions.
//!
//! [`InMemoryCacheProvider`] is the reference implementation used in
//! tests, development, and single-process deployments. Backing the engine
//! with Redis, PostgreSQL, or an object store is a matter of implementing
//! the four methods against that system.

use crate::error::{CheckpointError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Durable key -> value store consumed by the checkpoint manager, the
/// sandbox cache API, and the executor's durable execution records.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Fetch the value stored at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` at `key`. A `ttl` of `None` means the entry does not
    /// expire.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Remove the entry at `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether a live (non-expired) entry exists at `key`.
    async fn has(&self, key: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Thread-safe in-memory cache provider.
///
/// Entries live in an `Arc<RwLock<HashMap>>`; clones share storage. TTLs
/// are honored lazily on read and can be reclaimed with
/// [`purge_expired`](Self::purge_expired).
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheProvider {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryCacheProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries (expired entries are not counted).
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry. Useful for test isolation.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Remove expired entries and return how many were reclaimed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }
}

#[async_trait]
impl CacheProvider for InMemoryCacheProvider {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = match ttl {
            Some(ttl) => {
                let delta = chrono::Duration::from_std(ttl)
                    .map_err(|e| CheckpointError::Storage(format!("ttl out of range: {}", e)))?;
                Some(Utc::now() + delta)
            }
            None => None,
        };
        self.entries
            .write()
            .await
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(matches!(entries.get(key), Some(e) if !e.is_expired(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_roundtrip() {
        let cache = InMemoryCacheProvider::new();
        cache.set("k", json!({"a": 1}), None).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"a": 1})));
        assert!(cache.has("k").await.unwrap());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let cache = InMemoryCacheProvider::new();
        assert_eq!(cache.get("absent").await.unwrap(), None);
        assert!(!cache.has("absent").await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = InMemoryCacheProvider::new();
        cache.set("k", json!(1), None).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() {
        let cache = InMemoryCacheProvider::new();
        cache
            .set("k", json!("v"), Some(Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn long_ttl_survives() {
        let cache = InMemoryCacheProvider::new();
        cache
            .set("k", json!("v"), Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn purge_reclaims_expired_entries() {
        let cache = InMemoryCacheProvider::new();
        cache
            .set("dead", json!(1), Some(Duration::ZERO))
            .await
            .unwrap();
        cache.set("live", json!(2), None).await.unwrap();

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("live").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let cache = InMemoryCacheProvider::new();
        let other = cache.clone();
        cache.set("k", json!(true), None).await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), Some(json!(true)));
    }
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/cache.rs
*
* Read-through cache of `ConfigurationRecord`s keyed by namespace.
*
* Architecture:
* - The map sits behind a `tokio::sync::RwLock`: concurrent event tasks read in
*   parallel, and a refresh takes the write lock for the whole map.
* - Expiry is lazy. An entry older than the TTL is treated as absent by `get`
*   and is only replaced by the next `set`; there is no background sweeper.
*   Entries for namespaces that stop sending events are therefore never
*   reclaimed, which is bounded by the number of namespaces in the cluster.
* - Ages are measured with `tokio::time::Instant` so the paused test clock
*   drives expiry in tests.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::config::ConfigurationRecord;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    record: Arc<ConfigurationRecord>,
    stored_at: Instant,
}

#[derive(Debug)]
pub struct ConfigCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ConfigCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the record for `namespace` if it was stored less than one TTL
    /// ago. A miss has no side effects.
    pub async fn get(&self, namespace: &str) -> Option<Arc<ConfigurationRecord>> {
        let entries = self.entries.read().await;
        let entry = entries.get(namespace)?;
        if entry.stored_at.elapsed() < self.ttl {
            Some(entry.record.clone())
        } else {
            debug!(namespace = %namespace, "Cached configuration expired");
            None
        }
    }

    /// Inserts or replaces the record for `namespace`, stamped with the
    /// current time.
    pub async fn set(&self, namespace: &str, record: ConfigurationRecord) -> Arc<ConfigurationRecord> {
        let record = Arc::new(record);
        let mut entries = self.entries.write().await;
        entries.insert(
            namespace.to_string(),
            CacheEntry {
                record: record.clone(),
                stored_at: Instant::now(),
            },
        );
        record
    }

    /// Drops every entry. Not used on the hot path.
    pub async fn invalidate_all(&self) {
        let mut entries = self.entries.write().await;
        debug!(entries = entries.len(), "Invalidating configuration cache");
        entries.clear();
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task: &str) -> ConfigurationRecord {
        ConfigurationRecord {
            task_name: task.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_set_hits() {
        let cache = ConfigCache::new(Duration::from_secs(60));
        cache.set("ns1", record("verify")).await;

        let hit = cache.get("ns1").await.unwrap();
        assert_eq!(hit.task_name, "verify");
        assert!(cache.get("ns2").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ConfigCache::new(Duration::from_secs(60));
        cache.set("ns1", record("verify")).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("ns1").await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("ns1").await.is_none());
        // Lazy expiry: the stale entry is still stored until replaced.
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_replaces_and_restamps() {
        let cache = ConfigCache::new(Duration::from_secs(60));
        cache.set("ns1", record("old")).await;
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.set("ns1", record("new")).await;
        tokio::time::advance(Duration::from_secs(45)).await;

        assert_eq!(cache.get("ns1").await.unwrap().task_name, "new");
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = ConfigCache::default();
        assert_eq!(cache.ttl(), DEFAULT_CACHE_TTL);
        cache.set("ns1", record("a")).await;
        cache.set("ns2", record("b")).await;
        assert_eq!(cache.len().await, 2);

        cache.invalidate_all().await;
        assert!(cache.is_empty().await);
        assert!(cache.get("ns1").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_readers() {
        let cache = Arc::new(ConfigCache::default());
        cache.set("ns1", record("verify")).await;

        let readers = (0..16).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("ns1").await.map(|r| r.task_name.clone()) })
        });
        for result in futures::future::join_all(readers).await {
            assert_eq!(result.unwrap().as_deref(), Some("verify"));
        }
    }
}

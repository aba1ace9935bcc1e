use super::{CacheError, CacheStore};
use ahash::HashMap;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Writes between full sweeps of expired entries
const SWEEP_INTERVAL: usize = 1024;

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Process-local cache store
///
/// Expired entries read as absent. They are evicted when a read touches them,
/// by a full sweep every [`SWEEP_INTERVAL`] writes, or by
/// [`MemoryCache::purge_expired`].
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    writes: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        sweep(&mut entries, now)
    }

    async fn evict(&self, stale: &[&String], now: Instant) {
        let mut entries = self.entries.write().await;
        for key in stale {
            // A writer may have refreshed it since the read
            if entries.get(*key).is_some_and(|entry| entry.expires_at <= now) {
                entries.remove(*key);
            }
        }
    }
}

fn sweep(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    before - entries.len()
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let key = key.to_string();
        self.evict(&[&key], now).await;
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CacheError::Backend(format!("TTL out of range: {:?}", ttl)))?;

        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry { value, expires_at });

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            let dropped = sweep(&mut entries, Instant::now());
            if dropped > 0 {
                tracing::debug!("Swept {} expired cache entries", dropped);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Value>>, CacheError> {
        let now = Instant::now();
        let mut stale = Vec::new();
        let values: Vec<Option<Value>> = {
            let entries = self.entries.read().await;
            keys.iter()
                .map(|key| match entries.get(key) {
                    Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
                    Some(_) => {
                        stale.push(key);
                        None
                    }
                    None => None,
                })
                .collect()
        };

        if !stale.is_empty() {
            self.evict(&stale, now).await;
        }
        Ok(values)
    }
}

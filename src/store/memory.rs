use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::CounterStore;
use crate::error::StoreError;

// Counter with an optional deadline, like a redis key with or without TTL
#[derive(Clone, Debug)]
struct CounterEntry {
    count: u64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Single-process counter store.
///
/// Each key lives in one dashmap shard, so an increment holds that shard's
/// lock for the read-modify-write and concurrent increments never lose updates.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, CounterEntry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Drop entries whose TTL has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(CounterEntry {
                count: 0,
                expires_at: None,
            });

        // expired? start over like redis would after evicting the key
        if entry.is_expired(now) {
            entry.count = 0;
            entry.expires_at = None;
        }

        entry.count += 1;
        Ok(entry.count)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|item| item.key().starts_with(prefix) && !item.value().is_expired(now))
            .map(|item| item.key().clone())
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, StoreError> {
        Ok(keys
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count())
    }
}

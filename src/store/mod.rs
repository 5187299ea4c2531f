//! Shared counter store used by the rate limiter.
//!
//! Any backend has to provide atomic increment on arbitrary string keys plus a
//! per-key expiry that is set by the caller when a key is first created.

use async_trait::async_trait;

use crate::error::StoreError;

mod memory;
mod redis_store;

pub use self::memory::MemoryCounterStore;
pub use self::redis_store::RedisCounterStore;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one to `key`, creating it at 1 if absent or expired.
    /// Returns the value after the increment.
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;

    /// Set the time-to-live of `key` in seconds.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Current value of `key`, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// All live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remove the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize, StoreError>;
}

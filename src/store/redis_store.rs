use async_trait::async_trait;
use redis::{FromRedisValue, aio::ConnectionManager};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::CounterStore;
use crate::error::StoreError;

const SCAN_BATCH: usize = 100;

// After a connect attempt, callers fail fast for this long instead of
// queueing behind another attempt
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ConnectionSlot {
    manager: Option<ConnectionManager>,
    last_attempt: Option<Instant>,
}

/// Redis-backed counter store shared by every instance of the service.
///
/// The connection is opened on first use and reused afterwards. A failed
/// connect is not cached, but calls within a second of the last
/// attempt return [`StoreError::Unavailable`] straight away. Every round trip,
/// including waiting for another caller's connect, is bounded by `timeout`.
pub struct RedisCounterStore {
    client: redis::Client,
    connection: Mutex<ConnectionSlot>,
    timeout: Duration,
}

impl RedisCounterStore {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!("Failed to create Redis client for rate limiting: {}", e);
            StoreError::Redis(e)
        })?;

        Ok(Self {
            client,
            connection: Mutex::new(ConnectionSlot::default()),
            timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        tokio::time::timeout(self.timeout, self.connect())
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    async fn connect(&self) -> Result<ConnectionManager, StoreError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.manager.as_ref() {
            return Ok(conn.clone());
        }
        if slot
            .last_attempt
            .is_some_and(|at| at.elapsed() < RECONNECT_BACKOFF)
        {
            return Err(StoreError::Unavailable(
                "redis connect failed recently, backing off".to_string(),
            ));
        }

        // recorded before connecting so an attempt cut short by the caller's
        // timeout still counts
        slot.last_attempt = Some(Instant::now());
        let conn = ConnectionManager::new(self.client.clone()).await?;

        debug!("Connected to Redis counter store");
        slot.manager = Some(conn.clone());
        slot.last_attempt = None;
        Ok(conn)
    }

    async fn query<T: FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T, StoreError> {
        let mut conn = self.connection().await?;
        match tokio::time::timeout(self.timeout, cmd.query_async::<T>(&mut conn)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    // Drop the shared connection. Later calls reconnect lazily.
    pub async fn close(&self) {
        let mut slot = self.connection.lock().await;
        slot.last_attempt = None;
        if slot.manager.take().is_some() {
            info!("Closed Redis counter store connection");
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);
        self.query::<u64>(cmd).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(ttl_secs);
        self.query::<i64>(cmd).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query::<Option<u64>>(cmd).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}*", prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, batch): (u64, Vec<String>) = self.query(cmd).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may hand back the same key twice
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        let removed: i64 = self.query(cmd).await?;
        Ok(removed.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisCounterStore::new("not a url", Duration::from_millis(100)).is_err());
    }

    #[tokio::test]
    async fn unreachable_store_errors_instead_of_hanging() {
        // nothing listens on port 1
        let store =
            RedisCounterStore::new("redis://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();
        assert!(store.incr("k").await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    // accepts connections and never answers
    async fn silent_listener() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        port
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_during_outage_each_finish_within_timeout() {
        let port = silent_listener().await;
        let timeout = Duration::from_millis(200);
        let store = Arc::new(
            RedisCounterStore::new(&format!("redis://:pw@127.0.0.1:{}", port), timeout).unwrap(),
        );

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..10 {
            let store = store.clone();
            tasks.spawn(async move {
                let started = std::time::Instant::now();
                let result = store.incr("k").await;
                (result.is_err(), started.elapsed())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (failed, waited) = joined.unwrap();
            assert!(failed);
            assert!(waited < Duration::from_millis(700), "call waited {:?}", waited);
        }
    }

    #[tokio::test]
    async fn calls_right_after_failed_connect_fail_fast() {
        let port = silent_listener().await;
        let store = RedisCounterStore::new(
            &format!("redis://:pw@127.0.0.1:{}", port),
            Duration::from_millis(200),
        )
        .unwrap();

        assert!(matches!(store.incr("k").await, Err(StoreError::Timeout(_))));

        let started = std::time::Instant::now();
        assert!(matches!(
            store.incr("k").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn close_without_connection_is_a_no_op() {
        let store =
            RedisCounterStore::new("redis://127.0.0.1:1", Duration::from_millis(50)).unwrap();
        store.close().await;
        store.close().await;
    }
}

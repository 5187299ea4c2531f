use axum::http::HeaderMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Environment;
use crate::error::StoreError;
use crate::metrics::{RATE_LIMIT_DECISIONS, RATE_LIMIT_STORE_ERRORS};
use crate::store::CounterStore;

// Identity used when nothing better can be resolved from the request
pub const LOOPBACK_IDENTITY: &str = "127.0.0.1";

// Quota pool a counter belongs to. Pools never share counts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Auth,
    Api,
    Custom,
    Named(String),
}

impl Scope {
    pub fn as_str(&self) -> &str {
        match self {
            Scope::Auth => "auth",
            Scope::Api => "api",
            Scope::Custom => "custom",
            Scope::Named(name) => name,
        }
    }

    pub fn key_prefix(&self) -> String {
        format!("{}_rate_limit:", self.as_str())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store key for one identity in one fixed window:
/// `<scope>_rate_limit:<identity>:<window index>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitKey {
    pub scope: Scope,
    pub identity: String,
    pub window_index: u64,
}

impl RateLimitKey {
    pub fn new(scope: Scope, identity: impl Into<String>, now_ms: u64, window_ms: u64) -> Self {
        Self {
            scope,
            identity: identity.into(),
            window_index: now_ms / window_ms.max(1),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}",
            self.scope.key_prefix(),
            self.identity,
            self.window_index
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub scope: Scope,
    pub limit: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);

    // tight: login attempts per client
    pub fn auth(limit: u64, window: Duration) -> Self {
        Self {
            scope: Scope::Auth,
            limit,
            window,
        }
    }

    // loose: general API traffic per client
    pub fn api(limit: u64, window: Duration) -> Self {
        Self {
            scope: Scope::Api,
            limit,
            window,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::api(100, Self::DEFAULT_WINDOW)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub limit: u64,
    // seconds until the current window closes
    pub reset_after_secs: u64,
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Fixed-window request counter over a shared [`CounterStore`].
///
/// A client can get up to `2 * limit` requests through by straddling a window
/// boundary. Store failures never reach the caller: the request is let through
/// with `remaining = 0` and the error is logged.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    bypass: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, environment: Environment) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            bypass: environment.is_test(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    pub async fn check(
        &self,
        scope: &Scope,
        identity: &str,
        limit: u64,
        window: Duration,
    ) -> RateLimitDecision {
        let window_ms = (window.as_millis() as u64).max(1);

        // test configuration never touches the store
        if self.bypass {
            return RateLimitDecision {
                allowed: true,
                remaining: limit,
                limit,
                reset_after_secs: 0,
            };
        }

        let now_ms = self.clock.now_ms();
        let key = RateLimitKey::new(scope.clone(), identity, now_ms, window_ms);
        let window_end_ms = (key.window_index + 1) * window_ms;
        let reset_after_secs = (window_end_ms - now_ms).div_ceil(1000);

        match self.increment(&key, window_ms).await {
            Ok(count) => {
                let allowed = count <= limit;
                RATE_LIMIT_DECISIONS
                    .with_label_values(&[scope.as_str(), if allowed { "allowed" } else { "denied" }])
                    .inc();
                debug!(key = %key, count, limit, allowed, "Rate limit checked");
                RateLimitDecision {
                    allowed,
                    remaining: limit.saturating_sub(count),
                    limit,
                    reset_after_secs,
                }
            }
            Err(e) => {
                RATE_LIMIT_STORE_ERRORS.inc();
                warn!(key = %key, error = %e, "Rate limit check failed, allowing request");
                RateLimitDecision {
                    allowed: true,
                    remaining: 0,
                    limit,
                    reset_after_secs,
                }
            }
        }
    }

    async fn increment(&self, key: &RateLimitKey, window_ms: u64) -> Result<u64, StoreError> {
        let key = key.to_string();
        let count = self.store.incr(&key).await?;
        // first hit in this window owns the TTL
        if count == 1 {
            self.store.expire(&key, window_ms.div_ceil(1000)).await?;
        }
        Ok(count)
    }

    pub async fn check_policy(&self, policy: &RateLimitPolicy, identity: &str) -> RateLimitDecision {
        self.check(&policy.scope, identity, policy.limit, policy.window)
            .await
    }

    // Ad-hoc limit for call sites outside the built-in policies
    pub async fn check_rate_limit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> RateLimitDecision {
        self.check(&Scope::Custom, key, limit, window).await
    }

    /// Remove the counters recorded for `identity` under the auth, api and
    /// custom pools. Loopback identities clear every counter since local
    /// development traffic all arrives from there.
    pub async fn clear(&self, identity: &str) -> Result<usize, StoreError> {
        let everything = is_loopback(identity);
        let mut cleared = 0;

        for scope in [Scope::Auth, Scope::Api, Scope::Custom] {
            let prefix = scope.key_prefix();
            let keys: Vec<String> = self
                .store
                .keys_with_prefix(&prefix)
                .await?
                .into_iter()
                .filter(|key| everything || key_identity(key, &prefix) == Some(identity))
                .collect();

            if keys.is_empty() {
                debug!(scope = %scope, identity, "No rate limit keys to clear");
                continue;
            }
            cleared += self.store.delete(&keys).await?;
        }

        Ok(cleared)
    }
}

fn is_loopback(identity: &str) -> bool {
    matches!(identity, "127.0.0.1" | "::1" | "localhost")
}

// "<prefix><identity>:<window>" -> identity. Identities may contain ':' (IPv6).
fn key_identity<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?;
    let (identity, window) = rest.rsplit_once(':')?;
    window.parse::<u64>().ok()?;
    Some(identity)
}

/// Best-effort client address: first `x-forwarded-for` entry, then
/// `x-real-ip`, then the socket peer, then loopback.
pub fn client_identity(headers: &HeaderMap, remote: Option<IpAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        })
        .or_else(|| remote.map(|ip| ip.to_string()))
        .unwrap_or_else(|| LOOPBACK_IDENTITY.to_string())
}

//! Fixed-window request counters per route group and client.

use ::redis::aio::ConnectionManager;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info_span, Instrument};

#[cfg(test)]
mod memory;
mod middleware;

#[cfg(test)]
pub(crate) use self::memory::MemoryRateLimiter;
pub use self::middleware::{client_identity, enforce, RateLimitPolicy, RateLimitState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window closes.
    pub reset_in: Duration,
}

impl RateLimitStatus {
    #[must_use]
    pub fn from_count(count: u64, limit: u32, reset_in: Duration) -> Self {
        let remaining = u64::from(limit).saturating_sub(count);
        Self {
            allowed: count <= u64::from(limit),
            limit,
            remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
            reset_in,
        }
    }
}

#[must_use]
pub fn counter_key(group: &str, identity: &str) -> String {
    format!("rate_limit:{group}:{identity}")
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request for `(group, identity)` and report whether it fits in
    /// the window. The window starts at the first request and is not extended
    /// by later ones.
    async fn check(
        &self,
        group: &str,
        identity: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<RateLimitStatus>;
}

/// Redis counter: `INCR`, `EXPIRE NX` and `TTL` in one `MULTI` block, so the
/// counter can never exist without an expiry.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: ConnectionManager,
}

impl RedisRateLimiter {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(
        &self,
        group: &str,
        identity: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<RateLimitStatus> {
        let key = counter_key(group, identity);
        let window_seconds = window.as_secs().max(1);
        let mut conn = self.conn.clone();

        let span = info_span!("redis.command", db.system = "redis", db.operation = "MULTI");
        let (count, ttl): (u64, i64) = ::redis::pipe()
            .atomic()
            .incr(&key, 1)
            .cmd("EXPIRE")
            .arg(&key)
            .arg(window_seconds)
            .arg("NX")
            .ignore()
            .ttl(&key)
            .query_async(&mut conn)
            .instrument(span)
            .await
            .with_context(|| format!("rate limit check failed for group {group}"))?;

        let reset_in = u64::try_from(ttl)
            .ok()
            .filter(|seconds| *seconds > 0)
            .map_or(Duration::from_secs(window_seconds), Duration::from_secs);

        Ok(RateLimitStatus::from_count(count, max_requests, reset_in))
    }
}

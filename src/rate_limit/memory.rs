use super::{counter_key, RateLimitStatus, RateLimiter};
use anyhow::Result;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Process-local counter with the same fixed-window semantics as Redis.
///
/// Closed windows are dropped on every check.
#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tracked(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(
        &self,
        group: &str,
        identity: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<RateLimitStatus> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.retain(|_, (_, closes_at)| *closes_at > now);

        let entry = windows
            .entry(counter_key(group, identity))
            .or_insert((0, now + window));
        entry.0 += 1;
        Ok(RateLimitStatus::from_count(
            entry.0,
            max_requests,
            entry.1.saturating_duration_since(now),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sixth_request_in_window_is_denied() {
        let limiter = MemoryRateLimiter::new();
        let window = Duration::from_secs(60);
        for expected_remaining in (0..5).rev() {
            let status = limiter.check("auth", "1.2.3.4", 5, window).await.expect("check");
            assert!(status.allowed);
            assert_eq!(status.remaining, expected_remaining);
        }
        let status = limiter.check("auth", "1.2.3.4", 5, window).await.expect("check");
        assert!(!status.allowed);
        assert_eq!(status.remaining, 0);

        let other = limiter.check("auth", "5.6.7.8", 5, window).await.expect("check");
        assert!(other.allowed);
    }

    #[tokio::test]
    async fn new_window_allows_again() {
        let limiter = MemoryRateLimiter::new();
        let window = Duration::from_millis(50);
        for _ in 0..3 {
            let _ = limiter.check("auth", "ip", 2, window).await.expect("check");
        }
        assert!(!limiter.check("auth", "ip", 2, window).await.expect("check").allowed);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let status = limiter.check("auth", "ip", 2, window).await.expect("check");
        assert!(status.allowed);
        assert_eq!(status.remaining, 1);
    }

    #[tokio::test]
    async fn closed_windows_are_evicted() {
        let limiter = MemoryRateLimiter::new();
        let window = Duration::from_millis(50);
        for client in ["a", "b", "c", "d"] {
            limiter.check("auth", client, 5, window).await.expect("check");
        }
        assert_eq!(limiter.tracked(), 4);

        tokio::time::sleep(Duration::from_millis(80)).await;
        limiter.check("auth", "e", 5, window).await.expect("check");
        assert_eq!(limiter.tracked(), 1);
    }
}

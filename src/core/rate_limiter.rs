use dashmap::DashMap;
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::core::error::AppError;

/// Request counter for one client identity.
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    /// Requests admitted since `started_at`
    count: u32,
    /// Start of the current window
    started_at: Instant,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self { count: 0, started_at: now }
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.duration_since(self.started_at) >= window
    }
}

/// Rate limiter for retrieval-triggering requests.
///
/// Fixed window per client identity: at most `max_requests` requests are
/// admitted per `window`. Windows are created lazily on the first request from
/// an identity and reset lazily on the next access after they expire, so no
/// timer is ever spawned. Expired entries are swept from `allow` at most once
/// per window.
///
/// Constructed once per server and shared through `Arc`; every mutation of one
/// identity's counter happens under that entry's shard lock.
///
/// # Example
///
/// ```
/// use mediagate::core::rate_limiter::RateLimiter;
/// use std::time::Duration;
///
/// let limiter = RateLimiter::new(2, Duration::from_secs(60));
/// assert!(limiter.allow("10.0.0.1").is_ok());
/// assert!(limiter.allow("10.0.0.1").is_ok());
/// assert!(limiter.allow("10.0.0.1").is_err());
/// assert!(limiter.allow("10.0.0.2").is_ok());
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    max_requests: u32,
    window: Duration,
    last_sweep: Mutex<Instant>,
}

impl RateLimiter {
    /// Creates a limiter admitting `max_requests` per identity per `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Admits or rejects one request from `identity`.
    ///
    /// # Returns
    ///
    /// `Ok(())` when the request fits in the current window, otherwise
    /// `AppError::RateLimited` carrying the time left in the window.
    pub fn allow(&self, identity: &str) -> Result<(), AppError> {
        let now = Instant::now();
        self.maybe_sweep(now);

        let mut entry = self
            .windows
            .entry(identity.to_string())
            .or_insert_with(|| RateWindow::new(now));

        if entry.is_expired(now, self.window) {
            *entry = RateWindow::new(now);
        }

        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.started_at);
            let retry_after = self.window.saturating_sub(elapsed);
            log::debug!(
                "Rate limited {}: {} requests in window, retry in {:?}",
                identity,
                entry.count,
                retry_after
            );
            return Err(AppError::RateLimited { retry_after });
        }

        entry.count += 1;
        Ok(())
    }

    /// Number of identities currently tracked.
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }

    /// Removes expired windows, at most once per window length.
    fn maybe_sweep(&self, now: Instant) {
        let Ok(mut last_sweep) = self.last_sweep.try_lock() else {
            // Another request is sweeping right now.
            return;
        };
        if now.duration_since(*last_sweep) < self.window {
            return;
        }
        *last_sweep = now;
        drop(last_sweep);

        let window = self.window;
        self.windows.retain(|_, w| !w.is_expired(now, window));
        log::debug!("Rate limiter sweep: {} identities remaining", self.tracked_identities());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_limit_and_recovery_after_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(limiter.allow("client").is_ok());
        }

        match limiter.allow("client") {
            Err(AppError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(20)).await;
        match limiter.allow("client") {
            Err(AppError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(40));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(limiter.allow("client").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identities_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));

        assert!(limiter.allow("a").is_ok());
        assert!(limiter.allow("a").is_err());
        assert!(limiter.allow("b").is_ok());
        assert_eq!(limiter.tracked_identities(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_windows_are_swept() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));

        limiter.allow("a").unwrap();
        limiter.allow("b").unwrap();
        assert_eq!(limiter.tracked_identities(), 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        limiter.allow("c").unwrap();

        assert_eq!(limiter.tracked_identities(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_exceed_limit() {
        let limiter = std::sync::Arc::new(RateLimiter::new(10, Duration::from_secs(60)));
        let mut handles = Vec::new();

        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.allow("shared").is_ok() }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
    }
}

use crate::error::{EngineError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Sliding-window request limiter for one protected resource
///
/// Accepts or rejects; never queues or delays.
#[derive(Debug)]
pub struct RateLimiter {
    /// Resource name, used in errors and logs
    name: String,

    /// Requests allowed per window
    max_requests: usize,

    /// Window length
    window: Duration,

    /// Timestamps of accepted requests, oldest first
    requests: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new RateLimiter
    pub fn new(name: impl Into<String>, max_requests: usize, window: Duration) -> Self {
        Self {
            name: name.into(),
            max_requests,
            window,
            requests: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Resource name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a request if the window has room
    pub fn check_rate_limit(&self) -> Result<()> {
        let now = Instant::now();
        let mut requests = self.requests.lock();

        // Remove requests outside the window
        while let Some(&front) = requests.front() {
            if now.duration_since(front) >= self.window {
                requests.pop_front();
            } else {
                break;
            }
        }

        if requests.len() >= self.max_requests {
            warn!(
                resource = %self.name,
                requests = requests.len(),
                window = ?self.window,
                "Rate limit exceeded"
            );
            return Err(EngineError::RateLimitExceeded {
                resource: self.name.clone(),
                max_requests: self.max_requests,
                window: self.window,
            });
        }

        requests.push_back(now);
        Ok(())
    }

    /// Run `operation` if the window has room
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        self.check_rate_limit()?;
        operation()
            .await
            .map_err(|e| EngineError::OperationFailed(e.to_string()))
    }

    /// Requests currently counted in the window
    pub fn current_count(&self) -> usize {
        let now = Instant::now();
        self.requests
            .lock()
            .iter()
            .filter(|&&at| now.duration_since(at) < self.window)
            .count()
    }

    /// Forget all recorded requests
    pub fn clear(&self) {
        self.requests.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn counted(counter: &AtomicU32) -> std::result::Result<u32, String> {
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rolls() {
        let limiter = RateLimiter::new("telegraph", 2, Duration::from_millis(1000));
        let calls = AtomicU32::new(0);

        assert!(limiter.execute(|| counted(&calls)).await.is_ok());
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.execute(|| counted(&calls)).await.is_ok());

        tokio::time::advance(Duration::from_millis(100)).await;
        let rejected = limiter.execute(|| counted(&calls)).await;
        assert!(matches!(rejected, Err(EngineError::RateLimitExceeded { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(limiter.execute(|| counted(&calls)).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_resets_after_quiet_window() {
        let limiter = RateLimiter::new("openai", 3, Duration::from_secs(1));
        for _ in 0..3 {
            limiter.check_rate_limit().unwrap();
        }
        assert_eq!(limiter.current_count(), 3);
        assert!(limiter.check_rate_limit().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.current_count(), 0);
        assert!(limiter.check_rate_limit().is_ok());
    }

    #[tokio::test]
    async fn test_operation_error_is_wrapped() {
        let limiter = RateLimiter::new("rytr", 5, Duration::from_secs(60));
        let result = limiter
            .execute(|| async { Err::<(), _>("quota exhausted") })
            .await;
        assert!(matches!(result, Err(EngineError::OperationFailed(msg)) if msg == "quota exhausted"));
        // failed operations still consume quota
        assert_eq!(limiter.current_count(), 1);
    }

    #[test]
    fn test_clear() {
        let limiter = RateLimiter::new("deepai", 1, Duration::from_secs(60));
        limiter.check_rate_limit().unwrap();
        assert!(limiter.check_rate_limit().is_err());
        limiter.clear();
        assert!(limiter.check_rate_limit().is_ok());
    }
}

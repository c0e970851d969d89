use crate::error::{EngineError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default consecutive failures before opening
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cooldown before a trial call
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected
    Open,
    /// One trial call is permitted
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

/// Per-resource failure-counting gate
///
/// Opens after `threshold` consecutive failures and rejects calls until
/// `reset_timeout` has elapsed since the last failure. The first call after
/// the cooldown runs as a trial; its outcome closes or re-opens the circuit.
/// While the trial is in flight every other caller is rejected.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker with default limits
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }

    /// Create a breaker with custom limits
    pub fn with_config(name: impl Into<String>, threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Protected resource name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures recorded
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Run `operation` unless the circuit is open
    ///
    /// The operation's error is converted with `to_string` into
    /// [`EngineError::OperationFailed`].
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let trial = self.try_acquire()?;
        // Re-opens the circuit if a trial is dropped before it finishes
        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };

        let outcome = operation().await;
        guard.armed = false;

        match outcome {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(EngineError::OperationFailed(e.to_string()))
            }
        }
    }

    /// Admit or reject a call, moving open to half-open once the cooldown passed
    ///
    /// Returns whether the admitted call is the half-open trial.
    fn try_acquire(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_time
                    .map_or(true, |last| last.elapsed() >= self.reset_timeout);
                if cooled_down {
                    info!(circuit = %self.name, "Circuit breaker half-open, admitting trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(true)
                } else {
                    debug!(circuit = %self.name, "Circuit breaker open, rejecting call");
                    Err(EngineError::CircuitOpen(self.name.clone()))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(EngineError::CircuitOpen(self.name.clone()))
                } else {
                    inner.trial_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    /// Record a success: reset failures and close
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(circuit = %self.name, "Circuit breaker closed after successful call");
        }
        inner.failure_count = 0;
        inner.state = CircuitState::Closed;
        inner.trial_in_flight = false;
    }

    /// Record a failure, opening once the threshold is reached
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(Instant::now());
        inner.trial_in_flight = false;

        if inner.failure_count >= self.threshold {
            if inner.state != CircuitState::Open {
                warn!(
                    circuit = %self.name,
                    failures = inner.failure_count,
                    threshold = self.threshold,
                    "Circuit breaker opened"
                );
            }
            inner.state = CircuitState::Open;
        } else if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
        }
    }

    /// Trial that never reported an outcome counts as a failure
    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::HalfOpen || !inner.trial_in_flight {
            return;
        }
        inner.trial_in_flight = false;
        inner.state = CircuitState::Open;
        inner.last_failure_time = Some(Instant::now());
        warn!(circuit = %self.name, "Half-open trial abandoned, circuit re-opened");
    }

    /// Open the circuit immediately, as if the threshold had been reached
    pub fn trip(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.max(self.threshold);
        inner.last_failure_time = Some(Instant::now());
        inner.state = CircuitState::Open;
        inner.trial_in_flight = false;
        warn!(circuit = %self.name, "Circuit breaker forced open");
    }

    /// Close and forget all failures
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.trial_in_flight = false;
    }
}

struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn fail(counter: &AtomicU32) -> std::result::Result<(), String> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err("upstream 500".to_string())
    }

    async fn succeed(counter: &AtomicU32) -> std::result::Result<(), String> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_short_circuits() {
        let breaker = CircuitBreaker::with_config("openai", 3, Duration::from_secs(30));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let result = breaker.execute(|| fail(&calls)).await;
            assert!(matches!(result, Err(EngineError::OperationFailed(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.execute(|| fail(&calls)).await;
        assert!(matches!(result, Err(EngineError::CircuitOpen(_))));
        assert_eq!(result.unwrap_err().to_string(), "Circuit breaker is open for openai");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes() {
        let breaker = CircuitBreaker::with_config("telegraph", 2, Duration::from_secs(30));
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _ = breaker.execute(|| fail(&calls)).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(breaker.execute(|| succeed(&calls)).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_reopens() {
        let breaker = CircuitBreaker::with_config("stripe", 2, Duration::from_secs(30));
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _ = breaker.execute(|| fail(&calls)).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        let _ = breaker.execute(|| fail(&calls)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // cooldown restarts from the trial failure
        let result = breaker.execute(|| succeed(&calls)).await;
        assert!(matches!(result, Err(EngineError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_trial_while_half_open() {
        let breaker = Arc::new(CircuitBreaker::with_config("netlify", 1, Duration::from_secs(5)));
        let calls = Arc::new(AtomicU32::new(0));
        let _ = breaker.execute(|| fail(&calls)).await;
        tokio::time::advance(Duration::from_secs(6)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = Arc::clone(&breaker);
        let trial = tokio::spawn(async move {
            trial_breaker
                .execute(|| async move {
                    let _ = release_rx.await;
                    Ok::<(), String>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let rejected = breaker.execute(|| succeed(&calls)).await;
        assert!(matches!(rejected, Err(EngineError::CircuitOpen(_))));

        release_tx.send(()).unwrap();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_reopens_circuit() {
        let breaker = CircuitBreaker::with_config("openai", 1, Duration::from_secs(30));
        let calls = AtomicU32::new(0);
        let _ = breaker.execute(|| fail(&calls)).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let timed_out = tokio::time::timeout(
            Duration::from_secs(1),
            breaker.execute(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<(), String>(())
            }),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        // still cooling down from the abandoned trial
        let result = breaker.execute(|| succeed(&calls)).await;
        assert!(matches!(result, Err(EngineError::CircuitOpen(_))));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.execute(|| succeed(&calls)).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_trial_reopens_circuit() {
        let breaker = Arc::new(CircuitBreaker::with_config("rytr", 1, Duration::from_secs(5)));
        let calls = Arc::new(AtomicU32::new(0));
        let _ = breaker.execute(|| fail(&calls)).await;
        tokio::time::advance(Duration::from_secs(6)).await;

        let trial_breaker = Arc::clone(&breaker);
        let trial = tokio::spawn(async move {
            trial_breaker
                .execute(|| async {
                    if true {
                        panic!("driver bug");
                    }
                    Ok::<(), String>(())
                })
                .await
        });
        assert!(trial.await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(breaker.execute(|| succeed(&calls)).await.is_ok());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::with_config("db", 3, Duration::from_secs(30));
        let calls = AtomicU32::new(0);
        let _ = breaker.execute(|| fail(&calls)).await;
        let _ = breaker.execute(|| fail(&calls)).await;
        assert_eq!(breaker.failure_count(), 2);
        let _ = breaker.execute(|| succeed(&calls)).await;
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_trip_and_reset() {
        let breaker = CircuitBreaker::new("posting");
        breaker.trip();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), DEFAULT_FAILURE_THRESHOLD);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}

//! Subsystem health probes
//!
//! Every checker wraps a [`Probe`] supplied by the host application (a trivial
//! database read, an API ping, a queue depth query, ...) and turns its outcome
//! into a [`HealthCheck`]. Checkers never return errors: probe failures, panics
//! and timeouts all become `unhealthy` records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default probe deadline
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Health tri-state, plus unknown for never-checked components
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Operational with reduced capacity
    Degraded,
    /// No result
    Unknown,
    /// Not operational
    Unhealthy,
}

/// Details block of a health check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthDetails {
    /// Seconds since the checker was created
    pub uptime_secs: u64,
    /// Engine version
    pub version: String,
    /// Probe metrics
    pub metrics: HashMap<String, f64>,
    /// Problems found
    pub errors: Vec<String>,
    /// Non-fatal observations
    pub warnings: Vec<String>,
}

/// Result of one health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Component name
    pub component: String,
    /// Derived status
    pub status: HealthStatus,
    /// Probe latency
    pub response_time_ms: u64,
    /// When the probe finished
    pub timestamp: DateTime<Utc>,
    /// Details block
    pub details: HealthDetails,
    /// Components this one depends on
    pub dependencies: Vec<String>,
}

/// Raw outcome of a successful probe
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    /// Named numeric metrics
    pub metrics: HashMap<String, f64>,
    /// Soft failures; any entry downgrades status to degraded
    pub errors: Vec<String>,
    /// Observations that leave status untouched
    pub warnings: Vec<String>,
}

impl ProbeReport {
    /// Add a metric
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Add a soft failure
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }
}

/// Minimal liveness probe against a subsystem
#[async_trait]
pub trait Probe: Send + Sync {
    /// Run the probe; `Err` means the subsystem could not be reached at all
    async fn probe(&self) -> Result<ProbeReport, String>;
}

/// Health checker for one named subsystem
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Component name
    fn component(&self) -> &str;

    /// Probe and report; never fails
    async fn check(&self) -> HealthCheck;
}

/// Probe task that is aborted once nobody awaits it
///
/// Timing out, or dropping the `check()` future, stops the probe instead of
/// leaving it running detached.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Shared probe runner used by all checkers
struct ProbeRunner {
    component: String,
    dependencies: Vec<String>,
    probe: Arc<dyn Probe>,
    timeout: Duration,
    created: Instant,
}

impl ProbeRunner {
    fn new(component: &str, dependencies: &[&str], probe: Arc<dyn Probe>) -> Self {
        Self {
            component: component.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            probe,
            timeout: DEFAULT_PROBE_TIMEOUT,
            created: Instant::now(),
        }
    }

    /// Run the probe and apply `degrade` to a successful report
    async fn run<F>(&self, degrade: F) -> HealthCheck
    where
        F: FnOnce(&ProbeReport) -> Option<String>,
    {
        let started = Instant::now();
        let probe = Arc::clone(&self.probe);
        // Spawned so a panicking probe surfaces as a JoinError
        let handle = AbortOnDrop(tokio::spawn(async move { probe.probe().await }));

        let mut details = HealthDetails {
            uptime_secs: self.created.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Default::default()
        };

        let status = match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(Ok(report))) => {
                let mut status = if report.errors.is_empty() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                };
                if let Some(warning) = degrade(&report) {
                    details.warnings.push(warning);
                    status = status.max(HealthStatus::Degraded);
                }
                details.metrics = report.metrics;
                details.errors = report.errors;
                details.warnings.extend(report.warnings);
                status
            }
            Ok(Ok(Err(e))) => {
                details.errors.push(e);
                HealthStatus::Unhealthy
            }
            Ok(Err(join_error)) => {
                details
                    .errors
                    .push(format!("probe aborted unexpectedly: {}", join_error));
                HealthStatus::Unhealthy
            }
            Err(_) => {
                details
                    .errors
                    .push(format!("probe timed out after {:?}", self.timeout));
                HealthStatus::Unhealthy
            }
        };

        let response_time_ms = started.elapsed().as_millis() as u64;
        match status {
            HealthStatus::Healthy => debug!(component = %self.component, response_time_ms, "Health probe passed"),
            _ => warn!(
                component = %self.component,
                status = ?status,
                errors = ?details.errors,
                "Health probe reported problems"
            ),
        }

        HealthCheck {
            component: self.component.clone(),
            status,
            response_time_ms,
            timestamp: Utc::now(),
            details,
            dependencies: self.dependencies.clone(),
        }
    }
}

macro_rules! with_timeout_builder {
    ($ty:ty) => {
        impl $ty {
            /// Override the probe deadline
            pub fn with_timeout(mut self, timeout: Duration) -> Self {
                self.runner.timeout = timeout;
                self
            }
        }
    };
}

/// Database checker; degraded when the connection pool is saturated
pub struct DatabaseHealthChecker {
    runner: ProbeRunner,
    max_connections: f64,
}

impl DatabaseHealthChecker {
    /// Probe reports `connections` against `max_connections`
    pub fn new(probe: Arc<dyn Probe>, max_connections: u32) -> Self {
        Self {
            runner: ProbeRunner::new("database", &[], probe),
            max_connections: f64::from(max_connections),
        }
    }
}

#[async_trait]
impl HealthChecker for DatabaseHealthChecker {
    fn component(&self) -> &str {
        &self.runner.component
    }

    async fn check(&self) -> HealthCheck {
        let max = self.max_connections;
        self.runner
            .run(|report| {
                let used = report.metrics.get("connections").copied()?;
                (used >= max).then(|| format!("connection pool saturated ({} of {})", used, max))
            })
            .await
    }
}

/// External API checker; degraded when the probe is slow
pub struct ApiHealthChecker {
    runner: ProbeRunner,
    slow_threshold: Duration,
}

impl ApiHealthChecker {
    /// Checker for the API called `name`
    pub fn new(name: &str, probe: Arc<dyn Probe>, slow_threshold: Duration) -> Self {
        Self {
            runner: ProbeRunner::new(name, &["network"], probe),
            slow_threshold,
        }
    }
}

#[async_trait]
impl HealthChecker for ApiHealthChecker {
    fn component(&self) -> &str {
        &self.runner.component
    }

    async fn check(&self) -> HealthCheck {
        let mut check = self.runner.run(|_| None).await;
        if check.status == HealthStatus::Healthy
            && check.response_time_ms > self.slow_threshold.as_millis() as u64
        {
            check.status = HealthStatus::Degraded;
            check.details.warnings.push(format!(
                "response time {}ms above {}ms",
                check.response_time_ms,
                self.slow_threshold.as_millis()
            ));
        }
        check
    }
}

/// Job queue checker; degraded when the backlog is too deep
pub struct QueueHealthChecker {
    runner: ProbeRunner,
    max_depth: f64,
}

impl QueueHealthChecker {
    /// Probe reports `queue_length`
    pub fn new(probe: Arc<dyn Probe>, max_depth: u64) -> Self {
        Self {
            runner: ProbeRunner::new("queue", &["database"], probe),
            max_depth: max_depth as f64,
        }
    }
}

#[async_trait]
impl HealthChecker for QueueHealthChecker {
    fn component(&self) -> &str {
        &self.runner.component
    }

    async fn check(&self) -> HealthCheck {
        let max = self.max_depth;
        self.runner
            .run(|report| {
                let depth = report.metrics.get("queue_length").copied()?;
                (depth > max).then(|| format!("queue backlog {} exceeds {}", depth, max))
            })
            .await
    }
}

/// Content generation checker; degraded when provider quota runs low
pub struct ContentGenerationHealthChecker {
    runner: ProbeRunner,
    min_quota: f64,
}

impl ContentGenerationHealthChecker {
    /// Probe reports `quota_remaining`
    pub fn new(probe: Arc<dyn Probe>, min_quota: u64) -> Self {
        Self {
            runner: ProbeRunner::new("content_generation", &["external_api", "queue"], probe),
            min_quota: min_quota as f64,
        }
    }
}

#[async_trait]
impl HealthChecker for ContentGenerationHealthChecker {
    fn component(&self) -> &str {
        &self.runner.component
    }

    async fn check(&self) -> HealthCheck {
        let min = self.min_quota;
        self.runner
            .run(|report| {
                let quota = report.metrics.get("quota_remaining").copied()?;
                (quota < min).then(|| format!("generation quota low: {} remaining", quota))
            })
            .await
    }
}

/// Link discovery checker; degraded when the crawl success rate drops
pub struct LinkDiscoveryHealthChecker {
    runner: ProbeRunner,
    min_success_rate: f64,
}

impl LinkDiscoveryHealthChecker {
    /// Probe reports `success_rate` in `0.0..=1.0`
    pub fn new(probe: Arc<dyn Probe>, min_success_rate: f64) -> Self {
        Self {
            runner: ProbeRunner::new("link_discovery", &["network", "database"], probe),
            min_success_rate,
        }
    }
}

#[async_trait]
impl HealthChecker for LinkDiscoveryHealthChecker {
    fn component(&self) -> &str {
        &self.runner.component
    }

    async fn check(&self) -> HealthCheck {
        let min = self.min_success_rate;
        self.runner
            .run(|report| {
                let rate = report.metrics.get("success_rate").copied()?;
                (rate < min).then(|| format!("discovery success rate {:.2} below {:.2}", rate, min))
            })
            .await
    }
}

with_timeout_builder!(DatabaseHealthChecker);
with_timeout_builder!(ApiHealthChecker);
with_timeout_builder!(QueueHealthChecker);
with_timeout_builder!(ContentGenerationHealthChecker);
with_timeout_builder!(LinkDiscoveryHealthChecker);

/// Worst status of a set of checks; unknown when empty
pub fn overall_status(checks: &[HealthCheck]) -> HealthStatus {
    checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedProbe(Result<ProbeReport, String>);

    #[async_trait]
    impl Probe for FixedProbe {
        async fn probe(&self) -> Result<ProbeReport, String> {
            self.0.clone()
        }
    }

    struct PanickingProbe;

    #[async_trait]
    impl Probe for PanickingProbe {
        async fn probe(&self) -> Result<ProbeReport, String> {
            panic!("driver bug")
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl Probe for HangingProbe {
        async fn probe(&self) -> Result<ProbeReport, String> {
            std::future::pending::<()>().await;
            Ok(ProbeReport::default())
        }
    }

    /// Counts every 350ms until cancelled
    struct TickingProbe(Arc<AtomicU32>);

    #[async_trait]
    impl Probe for TickingProbe {
        async fn probe(&self) -> Result<ProbeReport, String> {
            loop {
                tokio::time::sleep(Duration::from_millis(350)).await;
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn fixed(result: Result<ProbeReport, String>) -> Arc<dyn Probe> {
        Arc::new(FixedProbe(result))
    }

    #[tokio::test]
    async fn test_database_healthy() {
        let checker = DatabaseHealthChecker::new(
            fixed(Ok(ProbeReport::default().with_metric("connections", 3.0))),
            10,
        );
        let check = checker.check().await;
        assert_eq!(check.component, "database");
        assert_eq!(check.status, HealthStatus::Healthy);
        assert_eq!(check.details.metrics.get("connections"), Some(&3.0));
    }

    #[tokio::test]
    async fn test_database_pool_saturated() {
        let checker = DatabaseHealthChecker::new(
            fixed(Ok(ProbeReport::default().with_metric("connections", 10.0))),
            10,
        );
        let check = checker.check().await;
        assert_eq!(check.status, HealthStatus::Degraded);
        assert_eq!(check.details.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_errors_degrade() {
        let checker = QueueHealthChecker::new(
            fixed(Ok(ProbeReport::default().with_error("one worker stalled"))),
            100,
        );
        let check = checker.check().await;
        assert_eq!(check.status, HealthStatus::Degraded);
        assert_eq!(check.details.errors, vec!["one worker stalled".to_string()]);
        assert_eq!(check.dependencies, vec!["database".to_string()]);
    }

    #[tokio::test]
    async fn test_probe_error_is_unhealthy() {
        let checker = ContentGenerationHealthChecker::new(fixed(Err("401 from OpenAI".into())), 10);
        let check = checker.check().await;
        assert_eq!(check.status, HealthStatus::Unhealthy);
        assert_eq!(check.details.errors, vec!["401 from OpenAI".to_string()]);
    }

    #[tokio::test]
    async fn test_panicking_probe_is_unhealthy() {
        let checker = LinkDiscoveryHealthChecker::new(Arc::new(PanickingProbe), 0.5);
        let check = checker.check().await;
        assert_eq!(check.status, HealthStatus::Unhealthy);
        assert!(check.details.errors[0].contains("aborted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_times_out() {
        let checker = ApiHealthChecker::new("telegraph", Arc::new(HangingProbe), Duration::from_secs(2))
            .with_timeout(Duration::from_secs(1));
        let check = checker.check().await;
        assert_eq!(check.status, HealthStatus::Unhealthy);
        assert!(check.details.errors[0].contains("timed out"));
        assert!(check.response_time_ms >= 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_probe_stops_running() {
        let ticks = Arc::new(AtomicU32::new(0));
        let checker = ApiHealthChecker::new(
            "telegraph",
            Arc::new(TickingProbe(Arc::clone(&ticks))),
            Duration::from_secs(5),
        )
        .with_timeout(Duration::from_millis(1200));

        let check = checker.check().await;
        assert_eq!(check.status, HealthStatus::Unhealthy);
        let at_timeout = ticks.load(Ordering::SeqCst);
        assert_eq!(at_timeout, 3);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), at_timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_check_stops_probe() {
        let ticks = Arc::new(AtomicU32::new(0));
        let checker = ApiHealthChecker::new(
            "telegraph",
            Arc::new(TickingProbe(Arc::clone(&ticks))),
            Duration::from_secs(5),
        )
        .with_timeout(Duration::from_secs(60));

        let outer = tokio::time::timeout(Duration::from_millis(1200), checker.check()).await;
        assert!(outer.is_err());
        let at_drop = ticks.load(Ordering::SeqCst);
        assert_eq!(at_drop, 3);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), at_drop);
    }

    #[tokio::test]
    async fn test_link_discovery_success_rate() {
        let checker = LinkDiscoveryHealthChecker::new(
            fixed(Ok(ProbeReport::default().with_metric("success_rate", 0.2))),
            0.5,
        );
        assert_eq!(checker.check().await.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_overall_status() {
        assert_eq!(overall_status(&[]), HealthStatus::Unknown);
        let make = |status| HealthCheck {
            component: "x".into(),
            status,
            response_time_ms: 0,
            timestamp: Utc::now(),
            details: HealthDetails::default(),
            dependencies: vec![],
        };
        assert_eq!(
            overall_status(&[make(HealthStatus::Healthy), make(HealthStatus::Degraded)]),
            HealthStatus::Degraded
        );
        assert_eq!(
            overall_status(&[make(HealthStatus::Unhealthy), make(HealthStatus::Degraded)]),
            HealthStatus::Unhealthy
        );
    }
}

//! Error handling engine
//!
//! Coordinates everything that happens after an application error is reported:
//! - Classification and recording
//! - Durable persistence with a write-ahead fallback
//! - Pattern tracking and alert evaluation
//! - Background recovery with severity-scaled retries and a single escalation
//! - Guarded execution through circuit breakers and rate limiters
//! - Periodic health checks and log maintenance
//!
//! The engine is a cheap-to-clone handle; clones share all state.

use crate::alerting::{AlertEngine, AlertRule, ChannelKind, Notifier};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::classifier::classify;
use crate::config::EngineConfig;
use crate::context::{
    ErrorContext, RecoveryState, ReportContext, ReportedError, StaticStateProvider, SystemState,
    SystemStateProvider,
};
use crate::error::{EngineError, Result};
use crate::error_log::{ErrorLog, ErrorSummary};
use crate::health::{overall_status, HealthCheck, HealthChecker, HealthDetails, HealthStatus};
use crate::patterns::{ErrorPattern, PatternTracker};
use crate::persistence::{save_with_timeout, ErrorLogRecord, ErrorStore, FallbackQueue, InMemoryErrorStore};
use crate::rate_limiter::RateLimiter;
use crate::recovery::{
    backoff_delay, missing_handler_resolution, select_strategy, CommandSink, ErrorResolution,
    PendingReceiver, RecoveryCommand, RecoveryHandler, RecoveryOperation, RecoveryRegistry,
    RecoveryStrategy,
};
use crate::statistics::{compute_statistics, ErrorStatistics, TimeRange};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Health of every registered subsystem
#[derive(Debug, Clone)]
pub struct SystemHealth {
    /// Worst status among all checks
    pub overall: HealthStatus,
    /// One check per registered checker
    pub checks: Vec<HealthCheck>,
}

/// Outcome of one monitoring cycle
#[derive(Debug, Clone)]
pub struct MonitoringReport {
    /// Health of all subsystems
    pub health: SystemHealth,
    /// Log entries dropped for age
    pub pruned_errors: usize,
    /// Components over the hourly threshold, busiest first
    pub hot_components: Vec<(String, usize)>,
    /// Parked records written to the store
    pub drained_fallback: usize,
}

/// Error handling engine
#[derive(Clone)]
pub struct ErrorHandlingEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    log: ErrorLog,
    patterns: PatternTracker,
    alerts: AlertEngine,
    registry: RecoveryRegistry,
    command_rx: Mutex<Option<PendingReceiver>>,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    limiters: DashMap<String, Arc<RateLimiter>>,
    health_checkers: RwLock<Vec<Arc<dyn HealthChecker>>>,
    store: RwLock<Arc<dyn ErrorStore>>,
    fallback: FallbackQueue,
    state_provider: RwLock<Arc<dyn SystemStateProvider>>,
    operations: DashMap<String, RecoveryOperation>,
    recoveries: Mutex<HashMap<String, JoinHandle<()>>>,
    active_recoveries: AtomicU64,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ErrorHandlingEngine {
    /// Create an engine with an in-memory store and no health checkers
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let (commands, command_rx) = CommandSink::pending(config.command_buffer);
        let breakers = Arc::new(DashMap::new());
        let registry = RecoveryRegistry::standard(
            commands,
            Arc::clone(&breakers),
            config.retry_base_delay,
            config.backoff_base,
            config.max_backoff,
            config.circuit_breaker_threshold,
            config.circuit_breaker_reset_timeout,
        );

        let alerts = AlertEngine::new(config.notification_timeout);
        if config.install_default_alert_rules {
            for rule in crate::alerting::default_alert_rules() {
                alerts.add_rule(rule)?;
            }
        }

        let inner = EngineInner {
            log: ErrorLog::new(config.max_log_size),
            patterns: PatternTracker::new(config.pattern_window),
            alerts,
            registry,
            command_rx: Mutex::new(Some(command_rx)),
            breakers,
            limiters: DashMap::new(),
            health_checkers: RwLock::new(Vec::new()),
            store: RwLock::new(Arc::new(InMemoryErrorStore::new())),
            fallback: FallbackQueue::new(config.fallback_capacity),
            state_provider: RwLock::new(Arc::new(StaticStateProvider::default())),
            operations: DashMap::new(),
            recoveries: Mutex::new(HashMap::new()),
            active_recoveries: AtomicU64::new(0),
            monitor: Mutex::new(None),
            config,
        };

        info!("Error handling engine initialized");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Use `store` for durable error records
    pub fn with_store(self, store: Arc<dyn ErrorStore>) -> Self {
        *self.inner.store.write() = store;
        self
    }

    /// Use `provider` for system state snapshots
    pub fn with_state_provider(self, provider: Arc<dyn SystemStateProvider>) -> Self {
        *self.inner.state_provider.write() = provider;
        self
    }

    /// Deliver alerts for `kind` through `notifier`
    pub fn with_notifier(self, kind: ChannelKind, notifier: Arc<dyn Notifier>) -> Self {
        self.inner.alerts.register_notifier(kind, notifier);
        self
    }

    /// Add a health checker to the monitoring cycle
    pub fn register_health_checker(&self, checker: Arc<dyn HealthChecker>) {
        info!(component = checker.component(), "Health checker registered");
        self.inner.health_checkers.write().push(checker);
    }

    /// Replace the handler for a strategy
    pub fn register_recovery_handler(&self, handler: Arc<dyn RecoveryHandler>) {
        self.inner.registry.register(handler);
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Report an error; recovery continues in the background
    ///
    /// Returns the context as recorded, before any recovery attempt.
    pub async fn handle_error(&self, error: ReportedError, report: ReportContext) -> ErrorContext {
        self.report(error, report, None).await
    }

    /// Report an error whose operation the retry strategies may re-run
    pub async fn handle_error_with_operation(
        &self,
        error: ReportedError,
        report: ReportContext,
        operation: RecoveryOperation,
    ) -> ErrorContext {
        self.report(error, report, Some(operation)).await
    }

    async fn report(
        &self,
        error: ReportedError,
        report: ReportContext,
        operation: Option<RecoveryOperation>,
    ) -> ErrorContext {
        let inner = &self.inner;
        let (severity, category) = classify(&error, &report);
        let context = ErrorContext::new(error, report, severity, category, inner.system_state());
        let error_id = context.error_id.clone();

        inner.log.record(context.clone());
        inner.persist(&context).await;

        let window = inner.log.snapshot();
        let pattern = inner.patterns.record(&context, &window);
        debug!(
            error_id = %error_id,
            pattern = %pattern.key,
            frequency = pattern.frequency,
            trend = ?pattern.trend,
            "Error pattern updated"
        );

        for report in inner.alerts.evaluate(&context, &window).await {
            info!(
                error_id = %error_id,
                rule = %report.rule_id,
                delivered = report.delivered,
                failed = report.failed,
                "Alert rule fired"
            );
        }

        if let Some(operation) = &operation {
            inner.operations.insert(error_id.clone(), Arc::clone(operation));
        }

        {
            // held across spawn so the task's own removal cannot run before the insert
            let mut recoveries = inner.recoveries.lock();
            let handle = tokio::spawn(Arc::clone(inner).run_recovery(error_id.clone(), operation));
            recoveries.insert(error_id, handle);
        }

        context
    }

    /// Run one strategy against a recorded error, outside the automatic loop
    ///
    /// A successful outcome resolves the error. Attempt counts are untouched.
    pub async fn recover_with(&self, error_id: &str, strategy: RecoveryStrategy) -> Result<ErrorResolution> {
        let inner = &self.inner;
        let context = inner
            .log
            .get(error_id)
            .ok_or_else(|| EngineError::ErrorNotFound(error_id.to_string()))?;
        let operation = inner.operations.get(error_id).map(|op| Arc::clone(op.value()));

        info!(error_id = %error_id, strategy = %strategy, "Operator-invoked recovery");
        let resolution = inner.attempt(&context, strategy, operation).await;

        if resolution.success && !context.resolved {
            inner.resolve(error_id, resolution.clone()).await;
        }
        Ok(resolution)
    }

    /// Wait for the background recovery of `error_id` and return its final context
    pub async fn await_recovery(&self, error_id: &str) -> Result<ErrorContext> {
        let handle = self.inner.recoveries.lock().remove(error_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error_id = %error_id, error = %e, "Recovery task aborted");
            }
        }
        self.get_error(error_id)
            .ok_or_else(|| EngineError::ErrorNotFound(error_id.to_string()))
    }

    /// Take the receiving half of the recovery command channel
    ///
    /// Only the first call returns `Some`. Until then, strategies that need an
    /// executor fail their attempt instead of queueing commands nobody reads.
    pub fn take_command_receiver(&self) -> Option<mpsc::Receiver<RecoveryCommand>> {
        self.inner.command_rx.lock().take().map(PendingReceiver::attach)
    }

    /// Run `operation` behind the breaker for `resource`
    ///
    /// The breaker is created with configured defaults on first use.
    pub async fn execute_with_circuit_breaker<T, E, F, Fut>(&self, resource: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        self.inner.breaker(resource).execute(operation).await
    }

    /// Run `operation` behind the rate limiter for `resource`
    ///
    /// The limiter is created with configured defaults on first use.
    pub async fn execute_with_rate_limit<T, E, F, Fut>(&self, resource: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        self.inner.limiter(resource).execute(operation).await
    }

    /// Install a breaker with custom limits for `resource`
    pub fn register_circuit_breaker(&self, resource: &str, threshold: u32, reset_timeout: Duration) {
        self.inner.breakers.insert(
            resource.to_string(),
            Arc::new(CircuitBreaker::with_config(resource, threshold, reset_timeout)),
        );
    }

    /// Install a rate limiter with custom limits for `resource`
    pub fn register_rate_limiter(&self, resource: &str, max_requests: usize, window: Duration) {
        self.inner.limiters.insert(
            resource.to_string(),
            Arc::new(RateLimiter::new(resource, max_requests, window)),
        );
    }

    /// State of the breaker for `resource`, if one exists
    pub fn circuit_state(&self, resource: &str) -> Option<CircuitState> {
        self.inner.breakers.get(resource).map(|b| b.state())
    }

    /// Probe every registered subsystem
    pub async fn check_health(&self) -> SystemHealth {
        self.inner.check_health().await
    }

    /// Run one monitoring cycle now
    pub async fn run_monitoring_cycle(&self) -> MonitoringReport {
        self.inner.run_monitoring_cycle().await
    }

    /// Start the periodic monitoring loop; no-op when already running
    pub fn start_monitoring(&self) {
        let mut monitor = self.inner.monitor.lock();
        if monitor.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let period = inner.config.monitoring_interval;
        *monitor = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                inner.run_monitoring_cycle().await;
            }
        }));
        info!(interval = ?period, "Monitoring started");
    }

    /// Stop the monitoring loop
    ///
    /// Recoveries already in flight keep running.
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.monitor.lock().take() {
            handle.abort();
            info!("Monitoring stopped");
        }
    }

    /// Aggregate the error log over `range`
    pub fn get_error_statistics(&self, range: TimeRange) -> ErrorStatistics {
        compute_statistics(
            &self.inner.log.snapshot(),
            range,
            self.inner.patterns.all(),
            self.inner.config.top_patterns,
        )
    }

    /// Lifetime counters
    pub fn error_summary(&self) -> ErrorSummary {
        self.inner.log.metrics().summary()
    }

    /// Context by id
    pub fn get_error(&self, error_id: &str) -> Option<ErrorContext> {
        self.inner.log.get(error_id)
    }

    /// Last `count` reported errors, oldest first
    pub fn recent_errors(&self, count: usize) -> Vec<ErrorContext> {
        self.inner.log.recent(count)
    }

    /// All patterns, most frequent first
    pub fn error_patterns(&self) -> Vec<ErrorPattern> {
        self.inner.patterns.all()
    }

    /// Records waiting for the store
    pub fn fallback_len(&self) -> usize {
        self.inner.fallback.len()
    }

    /// Install or replace an alert rule
    pub fn add_alert_rule(&self, rule: AlertRule) -> Result<()> {
        self.inner.alerts.add_rule(rule)
    }

    /// Remove an alert rule
    pub fn remove_alert_rule(&self, rule_id: &str) -> bool {
        self.inner.alerts.remove_rule(rule_id)
    }

    /// Enable or disable an alert rule
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        self.inner.alerts.set_enabled(rule_id, enabled)
    }

    /// Installed alert rules
    pub fn alert_rules(&self) -> Vec<AlertRule> {
        self.inner.alerts.rules()
    }
}

impl EngineInner {
    /// Provider snapshot plus the engine's own in-flight recoveries
    fn system_state(&self) -> SystemState {
        let mut state = self.state_provider.read().snapshot();
        state.active_operations += self.active_recoveries.load(Ordering::Relaxed);
        state
    }

    fn breaker(&self, resource: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_config(
                    resource,
                    self.config.circuit_breaker_threshold,
                    self.config.circuit_breaker_reset_timeout,
                ))
            })
            .clone()
    }

    fn limiter(&self, resource: &str) -> Arc<RateLimiter> {
        self.limiters
            .entry(resource.to_string())
            .or_insert_with(|| {
                Arc::new(RateLimiter::new(
                    resource,
                    self.config.rate_limit_max_requests,
                    self.config.rate_limit_window,
                ))
            })
            .clone()
    }

    /// Write `context` to the store, parking it on failure
    async fn persist(&self, context: &ErrorContext) {
        let record = match ErrorLogRecord::from_context(context) {
            Ok(record) => record,
            Err(e) => {
                error!(error_id = %context.error_id, error = %e, "Error record could not be encoded");
                return;
            }
        };

        let store = Arc::clone(&*self.store.read());
        match save_with_timeout(store.as_ref(), &record, self.config.persistence_timeout).await {
            Ok(()) => {
                if !self.fallback.is_empty() {
                    let drained = self
                        .fallback
                        .drain_into(store.as_ref(), self.config.persistence_timeout)
                        .await;
                    if drained > 0 {
                        info!(drained, "Store reachable again, replayed parked records");
                    }
                }
            }
            Err(e) => {
                warn!(
                    error_id = %context.error_id,
                    error = %e,
                    key = %record.fallback_key(),
                    "Error log write failed, parking record"
                );
                self.fallback.push(record);
            }
        }
    }

    /// Run one strategy and stamp the resulting system state
    async fn attempt(
        &self,
        context: &ErrorContext,
        strategy: RecoveryStrategy,
        operation: Option<RecoveryOperation>,
    ) -> ErrorResolution {
        let mut resolution = match self.registry.get(strategy) {
            Some(handler) => handler.recover(context, operation).await,
            None => {
                error!(strategy = %strategy, "No recovery handler registered");
                missing_handler_resolution(strategy)
            }
        };
        resolution.system_state = self.system_state();
        resolution
    }

    async fn resolve(&self, error_id: &str, resolution: ErrorResolution) {
        let strategy = resolution.strategy;
        let updated = self.log.update(error_id, |c| c.mark_resolved(resolution));
        if let Some(context) = updated {
            self.log.metrics().record_resolved();
            self.operations.remove(error_id);
            info!(
                error_id = %error_id,
                strategy = %strategy,
                attempts = context.recovery_attempts,
                "Error resolved"
            );
            self.persist(&context).await;
        }
    }

    /// Retry with backoff until resolved or the attempt budget is spent
    async fn run_recovery(self: Arc<Self>, error_id: String, operation: Option<RecoveryOperation>) {
        self.active_recoveries.fetch_add(1, Ordering::Relaxed);

        loop {
            let context = self.log.update(&error_id, |c| {
                if !c.state.is_terminal() {
                    c.recovery_attempts += 1;
                    c.state = RecoveryState::Recovering;
                }
            });
            let Some(context) = context else {
                warn!(error_id = %error_id, "Error evicted from log, abandoning recovery");
                break;
            };
            if context.state.is_terminal() {
                break;
            }

            let strategy = select_strategy(context.category, context.severity, context.recovery_attempts);
            debug!(
                error_id = %error_id,
                attempt = context.recovery_attempts,
                max_attempts = context.max_recovery_attempts,
                strategy = %strategy,
                "Recovery attempt"
            );

            let resolution = self.attempt(&context, strategy, operation.clone()).await;
            if resolution.success {
                self.resolve(&error_id, resolution).await;
                break;
            }

            warn!(
                error_id = %error_id,
                attempt = context.recovery_attempts,
                strategy = %strategy,
                status = %resolution.system_status,
                "Recovery attempt failed"
            );

            if context.attempts_exhausted() {
                self.escalate(&error_id).await;
                break;
            }

            let delay = backoff_delay(
                context.recovery_attempts,
                self.config.backoff_base,
                self.config.max_backoff,
            );
            tokio::time::sleep(delay).await;
        }

        self.recoveries.lock().remove(&error_id);
        self.active_recoveries.fetch_sub(1, Ordering::Relaxed);
    }

    async fn escalate(&self, error_id: &str) {
        let mut newly_escalated = false;
        let updated = self.log.update(error_id, |c| {
            if c.state != RecoveryState::Escalated && !c.resolved {
                c.state = RecoveryState::Escalated;
                newly_escalated = true;
            }
        });

        let Some(context) = updated else { return };
        if !newly_escalated {
            return;
        }

        self.log.metrics().record_escalated();
        self.persist(&context).await;
        let report = self.alerts.escalate(&context, &self.config.escalation_channels).await;
        if report.delivered == 0 {
            error!(error_id = %error_id, "Escalation alert reached no channel");
        }
    }

    async fn check_health(&self) -> SystemHealth {
        let checkers: Vec<_> = self.health_checkers.read().clone();
        let deadline = self.config.health_check_timeout;

        let checks = futures::future::join_all(checkers.iter().map(|checker| async move {
            match tokio::time::timeout(deadline, checker.check()).await {
                Ok(check) => check,
                Err(_) => HealthCheck {
                    component: checker.component().to_string(),
                    status: HealthStatus::Unhealthy,
                    response_time_ms: deadline.as_millis() as u64,
                    timestamp: Utc::now(),
                    details: HealthDetails {
                        errors: vec![format!("health check timed out after {:?}", deadline)],
                        ..Default::default()
                    },
                    dependencies: Vec::new(),
                },
            }
        }))
        .await;

        let overall = overall_status(&checks);
        for check in checks.iter().filter(|c| c.status != HealthStatus::Healthy) {
            warn!(
                component = %check.component,
                status = ?check.status,
                errors = ?check.details.errors,
                "Component not healthy"
            );
        }
        SystemHealth { overall, checks }
    }

    async fn run_monitoring_cycle(&self) -> MonitoringReport {
        let health = self.check_health().await;

        let retention = ChronoDuration::from_std(self.config.retention).unwrap_or_else(|_| ChronoDuration::days(7));
        let pruned_errors = self.log.prune_older_than(Utc::now() - retention);
        if pruned_errors > 0 {
            info!(pruned = pruned_errors, "Pruned expired errors");
            let live: HashSet<String> = self.log.snapshot().into_iter().map(|c| c.error_id).collect();
            self.operations.retain(|id, _| live.contains(id));
        }

        let mut hot_components: Vec<(String, usize)> = self
            .log
            .component_counts_since(Utc::now() - ChronoDuration::hours(1))
            .into_iter()
            .filter(|(_, count)| *count > self.config.component_hourly_threshold)
            .collect();
        hot_components.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (component, count) in &hot_components {
            warn!(
                component = %component,
                errors_last_hour = count,
                threshold = self.config.component_hourly_threshold,
                "High error rate for component"
            );
        }

        let store = Arc::clone(&*self.store.read());
        let drained_fallback = self
            .fallback
            .drain_into(store.as_ref(), self.config.persistence_timeout)
            .await;

        debug!(
            overall = ?health.overall,
            pruned = pruned_errors,
            hot = hot_components.len(),
            drained = drained_fallback,
            "Monitoring cycle complete"
        );

        MonitoringReport {
            health,
            pruned_errors,
            hot_components,
            drained_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ErrorCategory, ErrorSeverity};
    use std::sync::atomic::AtomicU32;

    fn quiet_config() -> EngineConfig {
        EngineConfig::default().with_default_alert_rules(false)
    }

    fn operation(calls: Arc<AtomicU32>, succeed_on: u32) -> RecoveryOperation {
        Arc::new(move || {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= succeed_on {
                    Ok(())
                } else {
                    Err(format!("attempt {} failed", n))
                }
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_error_classifies_and_records() {
        let engine = ErrorHandlingEngine::new(quiet_config()).unwrap();
        let context = engine
            .handle_error(
                ReportedError::new("Network timeout while calling API"),
                ReportContext::new("content_generation", "generate_article"),
            )
            .await;

        assert_eq!(context.severity, ErrorSeverity::High);
        assert_eq!(context.category, ErrorCategory::Network);
        assert_eq!(context.state, RecoveryState::Reported);
        assert_eq!(context.recovery_attempts, 0);
        assert!(engine.get_error(&context.error_id).is_some());
        assert_eq!(engine.error_patterns().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_resolves_with_operation() {
        let engine = ErrorHandlingEngine::new(quiet_config()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let context = engine
            .handle_error_with_operation(
                ReportedError::new("connection reset by peer"),
                ReportContext::new("posting", "publish_article"),
                operation(Arc::clone(&calls), 2),
            )
            .await;

        let done = engine.await_recovery(&context.error_id).await.unwrap();
        assert!(done.resolved);
        assert_eq!(done.state, RecoveryState::Resolved);
        assert_eq!(done.recovery_attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.error_summary().resolved_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_recoveries_release_their_handles() {
        let engine = ErrorHandlingEngine::new(quiet_config()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let mut ids = Vec::new();
        for i in 0..20 {
            let context = engine
                .handle_error_with_operation(
                    ReportedError::new("connection reset by peer"),
                    ReportContext::new("posting", format!("publish_{}", i)),
                    operation(Arc::clone(&calls), 1),
                )
                .await;
            ids.push(context.error_id);
        }

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 20);
        assert!(ids.iter().all(|id| engine.get_error(id).unwrap().resolved));
        assert!(engine.inner.recoveries.lock().is_empty());
        assert_eq!(engine.inner.active_recoveries.load(Ordering::Relaxed), 0);

        // nothing left to wait on, the final context is still returned
        let done = engine.await_recovery(&ids[0]).await.unwrap();
        assert_eq!(done.state, RecoveryState::Resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_with_runs_unselected_strategy() {
        let engine = ErrorHandlingEngine::new(quiet_config()).unwrap();
        let mut commands = engine.take_command_receiver().unwrap();
        assert!(engine.take_command_receiver().is_none());

        let context = engine
            .handle_error(
                ReportedError::new("bad deploy"),
                ReportContext::new("posting", "publish").with_severity(ErrorSeverity::Critical),
            )
            .await;
        let resolution = engine
            .recover_with(&context.error_id, RecoveryStrategy::Rollback)
            .await
            .unwrap();
        assert!(resolution.success);
        assert_eq!(resolution.system_status, "rolled_back");

        let mut saw_rollback = false;
        while let Ok(command) = commands.try_recv() {
            saw_rollback |= command.strategy == RecoveryStrategy::Rollback;
        }
        assert!(saw_rollback);
        assert!(engine.get_error(&context.error_id).unwrap().resolved);

        let missing = engine.recover_with("nope", RecoveryStrategy::Retry).await;
        assert!(matches!(missing, Err(EngineError::ErrorNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_execution_registries() {
        let engine = ErrorHandlingEngine::new(quiet_config()).unwrap();
        engine.register_circuit_breaker("openai", 2, Duration::from_secs(30));
        engine.register_rate_limiter("telegraph", 1, Duration::from_secs(1));

        for _ in 0..2 {
            let result = engine
                .execute_with_circuit_breaker("openai", || async { Err::<(), _>("503") })
                .await;
            assert!(matches!(result, Err(EngineError::OperationFailed(_))));
        }
        assert_eq!(engine.circuit_state("openai"), Some(CircuitState::Open));
        assert_eq!(engine.circuit_state("unknown"), None);

        let first = engine
            .execute_with_rate_limit("telegraph", || async { Ok::<_, String>(1) })
            .await;
        assert_eq!(first.unwrap(), 1);
        let second = engine
            .execute_with_rate_limit("telegraph", || async { Ok::<_, String>(2) })
            .await;
        assert!(matches!(second, Err(EngineError::RateLimitExceeded { .. })));
    }

    #[tokio::test]
    async fn test_monitoring_with_no_checkers() {
        let engine = ErrorHandlingEngine::new(quiet_config()).unwrap();
        let report = engine.run_monitoring_cycle().await;
        assert_eq!(report.health.overall, HealthStatus::Unknown);
        assert!(report.health.checks.is_empty());
        assert_eq!(report.pruned_errors, 0);
        assert!(report.hot_components.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = quiet_config().with_escalation_channels(vec![]);
        assert!(ErrorHandlingEngine::new(config).is_err());
    }
}

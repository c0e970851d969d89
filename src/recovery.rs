//! Recovery strategies and mechanisms
//!
//! Provides the recovery strategy family:
//! - Strategy selection by category, severity and attempt count
//! - Retry and rate-limit backoff that re-invoke the failed operation
//! - In-process circuit opening for failing components
//! - Recovery commands for actions an external executor must carry out
//!
//! Handlers never fail outward; every outcome is an [`ErrorResolution`].

use crate::circuit_breaker::CircuitBreaker;
use crate::context::{ErrorCategory, ErrorContext, ErrorSeverity, SystemState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Re-invocable handle on the operation that failed
pub type RecoveryOperation =
    Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<(), String>> + Send + Sync>;

/// Recovery strategy family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Wait, then run the operation again
    Retry,
    /// Switch to an alternative provider or credential
    Fallback,
    /// Stop calling the failing component
    CircuitBreaker,
    /// Back off exponentially, then run again
    RateLimitBackoff,
    /// Add capacity
    ResourceScaling,
    /// Disable non-essential features
    GracefulDegradation,
    /// Move to a standby replica
    Failover,
    /// Revert the last change
    Rollback,
}

impl RecoveryStrategy {
    /// All strategies
    pub const ALL: [RecoveryStrategy; 8] = [
        RecoveryStrategy::Retry,
        RecoveryStrategy::Fallback,
        RecoveryStrategy::CircuitBreaker,
        RecoveryStrategy::RateLimitBackoff,
        RecoveryStrategy::ResourceScaling,
        RecoveryStrategy::GracefulDegradation,
        RecoveryStrategy::Failover,
        RecoveryStrategy::Rollback,
    ];

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::CircuitBreaker => "circuit_breaker",
            RecoveryStrategy::RateLimitBackoff => "rate_limit_backoff",
            RecoveryStrategy::ResourceScaling => "resource_scaling",
            RecoveryStrategy::GracefulDegradation => "graceful_degradation",
            RecoveryStrategy::Failover => "failover",
            RecoveryStrategy::Rollback => "rollback",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick a strategy for the given attempt (1-based)
pub fn select_strategy(category: ErrorCategory, severity: ErrorSeverity, attempts: u32) -> RecoveryStrategy {
    if attempts > 3 {
        return RecoveryStrategy::CircuitBreaker;
    }

    match category {
        ErrorCategory::Network | ErrorCategory::Timeout => RecoveryStrategy::Retry,
        ErrorCategory::RateLimit => RecoveryStrategy::RateLimitBackoff,
        ErrorCategory::Authentication => RecoveryStrategy::Fallback,
        ErrorCategory::Database if severity == ErrorSeverity::Critical => RecoveryStrategy::Failover,
        ErrorCategory::Database => RecoveryStrategy::Retry,
        ErrorCategory::ResourceExhaustion => RecoveryStrategy::ResourceScaling,
        ErrorCategory::ExternalApi => RecoveryStrategy::CircuitBreaker,
        _ => RecoveryStrategy::Retry,
    }
}

/// `base * 2^attempt`, capped at `max`
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

/// One step taken while recovering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryActionRecord {
    /// Action name
    pub action: String,
    /// When the action finished
    pub timestamp: DateTime<Utc>,
    /// Whether it worked
    pub success: bool,
    /// How long it took
    pub duration_ms: u64,
    /// Free-text outcome
    pub details: Option<String>,
}

/// Outcome of one recovery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResolution {
    /// Strategy that produced this outcome
    pub strategy: RecoveryStrategy,
    /// Actions in execution order
    pub actions: Vec<RecoveryActionRecord>,
    /// Wall time of the whole attempt
    pub total_duration_ms: u64,
    /// Overall outcome
    pub success: bool,
    /// Strategy-specific status label, e.g. `failover_active`
    pub system_status: String,
    /// Runtime snapshot after the attempt
    pub system_state: SystemState,
    /// What the incident taught
    pub lessons_learned: Vec<String>,
    /// What would prevent a repeat
    pub preventive_measures: Vec<String>,
}

/// Action an external executor should carry out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryDirective {
    /// Re-run the failed operation
    RetryOperation,
    /// Switch provider or credential
    SwitchToFallback,
    /// Stop routing work to the component
    OpenCircuit,
    /// Add workers, connections or quota
    ScaleResources,
    /// Turn off non-essential features
    EnableDegradedMode,
    /// Promote a standby
    FailoverToStandby,
    /// Revert the latest deployment or data change
    RollbackLastChange,
}

/// Recovery command published for a downstream executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryCommand {
    /// Error being recovered
    pub error_id: String,
    /// Issuing strategy
    pub strategy: RecoveryStrategy,
    /// What to do
    pub directive: RecoveryDirective,
    /// Failing component
    pub component: String,
    /// Failing operation
    pub operation: String,
    /// Attempt number that issued the command
    pub attempt: u32,
    /// Issue time
    pub issued_at: DateTime<Utc>,
}

/// Sending half of the recovery command channel
#[derive(Debug, Clone)]
pub struct CommandSink {
    sender: mpsc::Sender<RecoveryCommand>,
    attached: Arc<AtomicBool>,
}

/// Receiving half that nobody has claimed yet
///
/// Commands are refused until [`PendingReceiver::attach`] hands the receiver
/// to an executor.
#[derive(Debug)]
pub struct PendingReceiver {
    receiver: mpsc::Receiver<RecoveryCommand>,
    attached: Arc<AtomicBool>,
}

impl PendingReceiver {
    /// Claim the receiver; the sink starts accepting commands
    pub fn attach(self) -> mpsc::Receiver<RecoveryCommand> {
        self.attached.store(true, Ordering::SeqCst);
        self.receiver
    }
}

impl CommandSink {
    /// Create a bounded command channel with its executor already attached
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RecoveryCommand>) {
        let (sink, pending) = Self::pending(capacity);
        (sink, pending.attach())
    }

    /// Create a bounded command channel whose receiver is not yet claimed
    pub fn pending(capacity: usize) -> (Self, PendingReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let attached = Arc::new(AtomicBool::new(false));
        (
            Self {
                sender,
                attached: Arc::clone(&attached),
            },
            PendingReceiver { receiver, attached },
        )
    }

    /// Whether an executor has claimed the receiving half
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Publish without waiting; fails when no executor is attached, it is gone or behind
    pub fn dispatch(
        &self,
        context: &ErrorContext,
        strategy: RecoveryStrategy,
        directive: RecoveryDirective,
    ) -> std::result::Result<(), String> {
        if !self.is_attached() {
            return Err("no recovery executor attached".to_string());
        }
        let command = RecoveryCommand {
            error_id: context.error_id.clone(),
            strategy,
            directive,
            component: context.component.clone(),
            operation: context.operation.clone(),
            attempt: context.recovery_attempts,
            issued_at: Utc::now(),
        };
        self.sender.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => "recovery command queue full".to_string(),
            mpsc::error::TrySendError::Closed(_) => "recovery executor disconnected".to_string(),
        })
    }
}

/// Collects actions for one attempt
struct ResolutionBuilder {
    strategy: RecoveryStrategy,
    started: Instant,
    actions: Vec<RecoveryActionRecord>,
}

impl ResolutionBuilder {
    fn new(strategy: RecoveryStrategy) -> Self {
        Self {
            strategy,
            started: Instant::now(),
            actions: Vec::new(),
        }
    }

    fn record(&mut self, action: &str, started: Instant, outcome: &std::result::Result<(), String>) {
        self.actions.push(RecoveryActionRecord {
            action: action.to_string(),
            timestamp: Utc::now(),
            success: outcome.is_ok(),
            duration_ms: started.elapsed().as_millis() as u64,
            details: outcome.as_ref().err().cloned(),
        });
    }

    fn finish(
        self,
        success: bool,
        system_status: &str,
        lessons_learned: &[&str],
        preventive_measures: &[&str],
    ) -> ErrorResolution {
        ErrorResolution {
            strategy: self.strategy,
            actions: self.actions,
            total_duration_ms: self.started.elapsed().as_millis() as u64,
            success,
            system_status: system_status.to_string(),
            system_state: SystemState::default(),
            lessons_learned: lessons_learned.iter().map(|s| s.to_string()).collect(),
            preventive_measures: preventive_measures.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Common contract of all strategies
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    /// Strategy implemented
    fn strategy(&self) -> RecoveryStrategy;

    /// Attempt recovery; never fails outward
    async fn recover(
        &self,
        context: &ErrorContext,
        operation: Option<RecoveryOperation>,
    ) -> ErrorResolution;
}

/// Wait, then re-run the operation or ask the executor to
async fn rerun_or_dispatch(
    builder: &mut ResolutionBuilder,
    context: &ErrorContext,
    operation: Option<RecoveryOperation>,
    commands: &CommandSink,
) -> bool {
    let started = Instant::now();
    let outcome = match operation {
        Some(operation) => {
            let outcome = operation().await;
            builder.record("reinvoke_operation", started, &outcome);
            outcome
        }
        None => {
            let outcome = commands.dispatch(context, builder.strategy, RecoveryDirective::RetryOperation);
            builder.record("dispatch_retry_command", started, &outcome);
            outcome
        }
    };
    outcome.is_ok()
}

/// Linear-delay retry
pub struct RetryHandler {
    base_delay: Duration,
    commands: CommandSink,
}

impl RetryHandler {
    /// Waits `base_delay * attempts` before each retry
    pub fn new(base_delay: Duration, commands: CommandSink) -> Self {
        Self { base_delay, commands }
    }
}

#[async_trait]
impl RecoveryHandler for RetryHandler {
    fn strategy(&self) -> RecoveryStrategy {
        RecoveryStrategy::Retry
    }

    async fn recover(
        &self,
        context: &ErrorContext,
        operation: Option<RecoveryOperation>,
    ) -> ErrorResolution {
        let mut builder = ResolutionBuilder::new(RecoveryStrategy::Retry);
        let delay = self.base_delay.saturating_mul(context.recovery_attempts.max(1));

        debug!(error_id = %context.error_id, delay_ms = delay.as_millis() as u64, "Retrying after delay");
        let started = Instant::now();
        tokio::time::sleep(delay).await;
        builder.record("wait", started, &Ok(()));

        let success = rerun_or_dispatch(&mut builder, context, operation, &self.commands).await;
        builder.finish(
            success,
            if success { "operational" } else { "failing" },
            &["Transient failures clear within a few seconds"],
            &["Add request-level timeouts and idempotency keys"],
        )
    }
}

/// Exponential backoff for quota errors
pub struct RateLimitBackoffHandler {
    base_delay: Duration,
    max_delay: Duration,
    commands: CommandSink,
}

impl RateLimitBackoffHandler {
    /// Waits `base_delay * 2^attempts`, capped at `max_delay`
    pub fn new(base_delay: Duration, max_delay: Duration, commands: CommandSink) -> Self {
        Self {
            base_delay,
            max_delay,
            commands,
        }
    }
}

#[async_trait]
impl RecoveryHandler for RateLimitBackoffHandler {
    fn strategy(&self) -> RecoveryStrategy {
        RecoveryStrategy::RateLimitBackoff
    }

    async fn recover(
        &self,
        context: &ErrorContext,
        operation: Option<RecoveryOperation>,
    ) -> ErrorResolution {
        let mut builder = ResolutionBuilder::new(RecoveryStrategy::RateLimitBackoff);
        let delay = backoff_delay(context.recovery_attempts, self.base_delay, self.max_delay);

        info!(
            error_id = %context.error_id,
            component = %context.component,
            delay_ms = delay.as_millis() as u64,
            "Backing off for rate limit"
        );
        let started = Instant::now();
        tokio::time::sleep(delay).await;
        builder.record("exponential_backoff", started, &Ok(()));

        let success = rerun_or_dispatch(&mut builder, context, operation, &self.commands).await;
        builder.finish(
            success,
            if success { "throttled" } else { "rate_limited" },
            &["Upstream quota is lower than the campaign's request rate"],
            &["Spread requests across the quota window", "Cache provider responses"],
        )
    }
}

/// Opens the engine's breaker for the failing component
pub struct CircuitBreakerHandler {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    threshold: u32,
    reset_timeout: Duration,
    commands: CommandSink,
}

impl CircuitBreakerHandler {
    /// New breakers are created with `threshold` and `reset_timeout`
    pub fn new(
        breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
        threshold: u32,
        reset_timeout: Duration,
        commands: CommandSink,
    ) -> Self {
        Self {
            breakers,
            threshold,
            reset_timeout,
            commands,
        }
    }
}

#[async_trait]
impl RecoveryHandler for CircuitBreakerHandler {
    fn strategy(&self) -> RecoveryStrategy {
        RecoveryStrategy::CircuitBreaker
    }

    async fn recover(
        &self,
        context: &ErrorContext,
        _operation: Option<RecoveryOperation>,
    ) -> ErrorResolution {
        let mut builder = ResolutionBuilder::new(RecoveryStrategy::CircuitBreaker);

        let started = Instant::now();
        let breaker = self
            .breakers
            .entry(context.component.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_config(
                    context.component.clone(),
                    self.threshold,
                    self.reset_timeout,
                ))
            })
            .clone();
        breaker.trip();
        builder.record("open_circuit", started, &Ok(()));

        let started = Instant::now();
        let notified = self
            .commands
            .dispatch(context, RecoveryStrategy::CircuitBreaker, RecoveryDirective::OpenCircuit);
        if let Err(e) = &notified {
            warn!(error_id = %context.error_id, error = %e, "Circuit command not delivered");
        }
        builder.record("dispatch_open_circuit_command", started, &notified);

        builder.finish(
            true,
            "protected",
            &["Repeated failures against one component cascade without isolation"],
            &["Tune breaker thresholds per provider"],
        )
    }
}

/// Strategy carried out entirely by the downstream executor
pub struct DirectiveHandler {
    strategy: RecoveryStrategy,
    directive: RecoveryDirective,
    status: &'static str,
    lessons: &'static [&'static str],
    measures: &'static [&'static str],
    commands: CommandSink,
}

impl DirectiveHandler {
    /// Standard handler for `strategy`
    ///
    /// Strategies with dedicated handlers (retry, rate-limit backoff,
    /// circuit breaker) fall back to a retry directive.
    pub fn for_strategy(strategy: RecoveryStrategy, commands: CommandSink) -> Self {
        let (directive, status, lessons, measures): (_, _, &'static [&'static str], &'static [&'static str]) =
            match strategy {
                RecoveryStrategy::Fallback => (
                    RecoveryDirective::SwitchToFallback,
                    "degraded",
                    &["Primary credential or provider rejected the request"],
                    &["Rotate credentials before expiry", "Keep a secondary provider configured"],
                ),
                RecoveryStrategy::ResourceScaling => (
                    RecoveryDirective::ScaleResources,
                    "scaling",
                    &["Capacity was exhausted under campaign load"],
                    &["Alert on resource usage before exhaustion"],
                ),
                RecoveryStrategy::GracefulDegradation => (
                    RecoveryDirective::EnableDegradedMode,
                    "degraded",
                    &["Non-essential features amplified the failure"],
                    &["Gate optional features behind health checks"],
                ),
                RecoveryStrategy::Failover => (
                    RecoveryDirective::FailoverToStandby,
                    "failover_active",
                    &["Primary database became unavailable"],
                    &["Test failover regularly", "Monitor replication lag"],
                ),
                RecoveryStrategy::Rollback => (
                    RecoveryDirective::RollbackLastChange,
                    "rolled_back",
                    &["A recent change introduced the failure"],
                    &["Canary deployments before full rollout"],
                ),
                _ => (
                    RecoveryDirective::RetryOperation,
                    "operational",
                    &["Failure handed to the executor for a retry"],
                    &[],
                ),
            };

        Self {
            strategy,
            directive,
            status,
            lessons,
            measures,
            commands,
        }
    }
}

#[async_trait]
impl RecoveryHandler for DirectiveHandler {
    fn strategy(&self) -> RecoveryStrategy {
        self.strategy
    }

    async fn recover(
        &self,
        context: &ErrorContext,
        _operation: Option<RecoveryOperation>,
    ) -> ErrorResolution {
        let mut builder = ResolutionBuilder::new(self.strategy);
        let started = Instant::now();
        let outcome = self.commands.dispatch(context, self.strategy, self.directive);
        builder.record(&format!("dispatch_{}", self.strategy), started, &outcome);

        match &outcome {
            Ok(()) => info!(
                error_id = %context.error_id,
                strategy = %self.strategy,
                directive = ?self.directive,
                "Recovery command dispatched"
            ),
            Err(e) => warn!(
                error_id = %context.error_id,
                strategy = %self.strategy,
                error = %e,
                "Recovery command not delivered"
            ),
        }

        let success = outcome.is_ok();
        builder.finish(
            success,
            if success { self.status } else { "unrecovered" },
            self.lessons,
            self.measures,
        )
    }
}

/// Handlers by strategy
pub struct RecoveryRegistry {
    handlers: RwLock<HashMap<RecoveryStrategy, Arc<dyn RecoveryHandler>>>,
}

impl RecoveryRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with a handler for every strategy
    pub fn standard(
        commands: CommandSink,
        breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
        retry_base_delay: Duration,
        backoff_base: Duration,
        max_backoff: Duration,
        breaker_threshold: u32,
        breaker_reset_timeout: Duration,
    ) -> Self {
        let registry = Self::new();
        registry.register(Arc::new(RetryHandler::new(retry_base_delay, commands.clone())));
        registry.register(Arc::new(RateLimitBackoffHandler::new(
            backoff_base,
            max_backoff,
            commands.clone(),
        )));
        registry.register(Arc::new(CircuitBreakerHandler::new(
            breakers,
            breaker_threshold,
            breaker_reset_timeout,
            commands.clone(),
        )));
        for strategy in [
            RecoveryStrategy::Fallback,
            RecoveryStrategy::ResourceScaling,
            RecoveryStrategy::GracefulDegradation,
            RecoveryStrategy::Failover,
            RecoveryStrategy::Rollback,
        ] {
            registry.register(Arc::new(DirectiveHandler::for_strategy(strategy, commands.clone())));
        }
        registry
    }

    /// Install or replace the handler for its strategy
    pub fn register(&self, handler: Arc<dyn RecoveryHandler>) {
        self.handlers.write().insert(handler.strategy(), handler);
    }

    /// Handler for `strategy`
    pub fn get(&self, strategy: RecoveryStrategy) -> Option<Arc<dyn RecoveryHandler>> {
        self.handlers.read().get(&strategy).cloned()
    }
}

impl Default for RecoveryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Failed resolution used when no handler is registered
pub fn missing_handler_resolution(strategy: RecoveryStrategy) -> ErrorResolution {
    let mut builder = ResolutionBuilder::new(strategy);
    builder.record(
        "lookup_handler",
        Instant::now(),
        &Err(format!("no handler registered for {}", strategy)),
    );
    builder.finish(false, "unrecovered", &[], &["Register a handler for every strategy"])
}

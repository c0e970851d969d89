//! # Backlink Recovery
//!
//! Error handling and recovery engine for backlink automation campaigns.
//!
//! This crate provides:
//! - Error classification (severity and category)
//! - Recovery strategies with retry, backoff and escalation
//! - Circuit breakers and rate limiters for external calls
//! - Health checks for campaign subsystems
//! - Alert rules with email, Slack, webhook and SMS delivery
//! - Error statistics and pattern tracking

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

/// Alert rules, notifiers and dispatch
pub mod alerting;

/// Circuit breaker for failing resources
pub mod circuit_breaker;

/// Heuristic severity and category classification
pub mod classifier;

/// Engine configuration
pub mod config;

/// Error contexts and classification taxonomy
pub mod context;

/// Error handling engine
pub mod engine;

/// Error types for engine operations
pub mod error;

/// In-memory error log and lifetime counters
pub mod error_log;

/// Subsystem health checks
pub mod health;

/// Tracing subscriber setup
pub mod logging;

/// Error pattern tracking
pub mod patterns;

/// Durable error records and the write-ahead fallback
pub mod persistence;

/// Sliding-window rate limiter
pub mod rate_limiter;

/// Recovery strategies and mechanisms
pub mod recovery;

/// Error statistics
pub mod statistics;

pub use alerting::{
    AlertCondition, AlertEngine, AlertMetric, AlertOperator, AlertRule, AlertThreshold, ChannelKind,
    DispatchReport, EmailNotifier, NotificationChannel, Notifier, SlackNotifier, SmsNotifier,
    SuppressionRule, TextTransport, WebhookNotifier,
};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use classifier::{categorize_error, classify, classify_error_severity};
pub use config::EngineConfig;
pub use context::{
    ErrorCategory, ErrorContext, ErrorSeverity, RecoveryState, ReportContext, ReportedError,
    StaticStateProvider, SystemState, SystemStateProvider,
};
pub use engine::{ErrorHandlingEngine, MonitoringReport, SystemHealth};
pub use error::{EngineError, Result};
pub use error_log::{ErrorLog, ErrorMetrics, ErrorSummary};
pub use health::{
    ApiHealthChecker, ContentGenerationHealthChecker, DatabaseHealthChecker, HealthCheck,
    HealthChecker, HealthStatus, LinkDiscoveryHealthChecker, Probe, ProbeReport,
    QueueHealthChecker,
};
pub use patterns::{ErrorPattern, Trend};
pub use persistence::{ErrorLogRecord, ErrorStore, InMemoryErrorStore};
pub use rate_limiter::RateLimiter;
pub use recovery::{
    ErrorResolution, RecoveryCommand, RecoveryDirective, RecoveryHandler, RecoveryOperation,
    RecoveryStrategy,
};
pub use statistics::{ErrorStatistics, TimeRange};

//! Error occurrence model
//!
//! An [`ErrorContext`] is created for every error handed to the engine. It
//! carries the caller's association data, the classification, a snapshot of
//! runtime state, and the recovery bookkeeping that the background recovery
//! loop mutates in place.

use crate::recovery::ErrorResolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Severity of a reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Cosmetic or self-healing
    Low,
    /// Degrades a single operation
    Medium,
    /// Degrades a subsystem
    High,
    /// Stops a subsystem
    Critical,
    /// Threatens the whole deployment
    Catastrophic,
}

impl ErrorSeverity {
    /// Recovery attempts allowed before escalation
    pub fn max_recovery_attempts(self) -> u32 {
        match self {
            ErrorSeverity::Low => 3,
            ErrorSeverity::Medium => 5,
            ErrorSeverity::High => 8,
            ErrorSeverity::Critical => 10,
            ErrorSeverity::Catastrophic => 15,
        }
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
            ErrorSeverity::Catastrophic => "catastrophic",
        }
    }

    /// Critical or worse
    pub fn is_critical(self) -> bool {
        self >= ErrorSeverity::Critical
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category tag assigned to a reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connectivity failures
    Network,
    /// Credentials rejected or missing
    Authentication,
    /// Caller lacks permission
    Authorization,
    /// Upstream quota exhausted
    RateLimit,
    /// AI content generation failures
    ContentGeneration,
    /// Backlink discovery failures
    LinkDiscovery,
    /// Publishing failures
    Posting,
    /// Link verification failures
    Verification,
    /// Database failures
    Database,
    /// Third-party API failures
    ExternalApi,
    /// Rejected input
    Validation,
    /// Misconfiguration
    Configuration,
    /// Memory, disk or pool exhaustion
    ResourceExhaustion,
    /// Deadline exceeded
    Timeout,
    /// Security violations
    Security,
    /// Corrupted or inconsistent data
    DataCorruption,
    /// Everything else
    Infrastructure,
}

impl ErrorCategory {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::ContentGeneration => "content_generation",
            ErrorCategory::LinkDiscovery => "link_discovery",
            ErrorCategory::Posting => "posting",
            ErrorCategory::Verification => "verification",
            ErrorCategory::Database => "database",
            ErrorCategory::ExternalApi => "external_api",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::ResourceExhaustion => "resource_exhaustion",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Security => "security",
            ErrorCategory::DataCorruption => "data_corruption",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw error as raised by a collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedError {
    /// Human readable message
    pub message: String,

    /// Machine readable code, e.g. `ETIMEDOUT` or `429`
    pub code: Option<String>,

    /// Stack or source chain
    pub stack: Option<String>,
}

impl ReportedError {
    /// Create from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack: None,
        }
    }

    /// Attach an error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach a stack trace
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Capture any std error, recording its source chain as the stack
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        Self {
            message: error.to_string(),
            code: None,
            stack: (!chain.is_empty()).then(|| chain.join("\ncaused by: ")),
        }
    }
}

/// Call-site information supplied alongside a reported error
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportContext {
    /// Campaign the failing work belongs to
    pub campaign_id: Option<String>,

    /// User the failing work belongs to
    pub user_id: Option<String>,

    /// Reporting subsystem
    pub component: String,

    /// Attempted action
    pub operation: String,

    /// Explicit severity, bypasses keyword classification
    pub severity: Option<ErrorSeverity>,

    /// Explicit category, bypasses keyword classification
    pub category: Option<ErrorCategory>,

    /// Arbitrary caller metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ReportContext {
    /// Create a context for `operation` inside `component`
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Associate with a campaign
    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    /// Associate with a user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Force a severity
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Force a category
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Point-in-time runtime figures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// Pending jobs in the campaign queue
    pub queue_length: u64,
    /// In-flight operations, including recoveries
    pub active_operations: u64,
    /// Load average or utilization ratio
    pub system_load: f64,
    /// Open database connections
    pub db_connections: u32,
    /// Remaining third-party API quota, when known
    pub api_quota_remaining: Option<u64>,
    /// Resident memory in MiB
    pub memory_usage_mb: f64,
    /// Disk usage percentage
    pub disk_usage_percent: f64,
    /// Observed network latency
    pub network_latency_ms: f64,
}

/// Source of [`SystemState`] snapshots
pub trait SystemStateProvider: Send + Sync {
    /// Take a snapshot
    fn snapshot(&self) -> SystemState;
}

impl<F> SystemStateProvider for F
where
    F: Fn() -> SystemState + Send + Sync,
{
    fn snapshot(&self) -> SystemState {
        self()
    }
}

/// Provider that always reports the same figures
#[derive(Debug, Clone, Default)]
pub struct StaticStateProvider(pub SystemState);

impl SystemStateProvider for StaticStateProvider {
    fn snapshot(&self) -> SystemState {
        self.0.clone()
    }
}

/// Host and resource metadata captured when an error is reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Operating system
    pub os: String,
    /// CPU architecture
    pub arch: String,
    /// Host name, when exported by the environment
    pub hostname: Option<String>,
    /// Reporting process
    pub process_id: u32,
    /// Engine version
    pub engine_version: String,
    /// Network latency at report time
    pub network_latency_ms: f64,
    /// Memory usage at report time
    pub memory_usage_mb: f64,
    /// Disk usage at report time
    pub disk_usage_percent: f64,
}

impl EnvironmentInfo {
    /// Capture host metadata, taking resource figures from `state`
    pub fn capture(state: &SystemState) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: std::env::var("HOSTNAME").ok(),
            process_id: std::process::id(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            network_latency_ms: state.network_latency_ms,
            memory_usage_mb: state.memory_usage_mb,
            disk_usage_percent: state.disk_usage_percent,
        }
    }
}

/// Error payload stored on a context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Message
    pub message: String,
    /// Code
    pub code: Option<String>,
    /// Stack
    pub stack: Option<String>,
    /// Caller metadata
    pub context: HashMap<String, serde_json::Value>,
    /// Environment at report time
    pub environment: EnvironmentInfo,
}

/// Lifecycle of an error context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    /// Recorded, no recovery attempted yet
    Reported,
    /// At least one recovery attempt made
    Recovering,
    /// A strategy reported success
    Resolved,
    /// Attempts exhausted, escalation sent
    Escalated,
}

impl RecoveryState {
    /// Resolved or escalated
    pub fn is_terminal(self) -> bool {
        matches!(self, RecoveryState::Resolved | RecoveryState::Escalated)
    }
}

/// One recorded error occurrence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique id generated at report time
    pub error_id: String,
    /// Owning campaign
    pub campaign_id: Option<String>,
    /// Owning user
    pub user_id: Option<String>,
    /// Reporting subsystem
    pub component: String,
    /// Attempted action
    pub operation: String,
    /// Severity
    pub severity: ErrorSeverity,
    /// Category
    pub category: ErrorCategory,
    /// Error payload
    pub error: ErrorDetails,
    /// Runtime snapshot at report time
    pub system_state: SystemState,
    /// Attempts made so far
    pub recovery_attempts: u32,
    /// Cap derived from severity at creation
    pub max_recovery_attempts: u32,
    /// Whether a strategy succeeded
    pub resolved: bool,
    /// Set only on success
    pub resolution: Option<ErrorResolution>,
    /// Lifecycle state
    pub state: RecoveryState,
    /// Report time
    pub created_at: DateTime<Utc>,
}

impl ErrorContext {
    /// Build a fresh context in the `reported` state
    pub fn new(
        error: ReportedError,
        report: ReportContext,
        severity: ErrorSeverity,
        category: ErrorCategory,
        system_state: SystemState,
    ) -> Self {
        let environment = EnvironmentInfo::capture(&system_state);
        Self {
            error_id: Uuid::new_v4().to_string(),
            campaign_id: report.campaign_id,
            user_id: report.user_id,
            component: report.component,
            operation: report.operation,
            severity,
            category,
            error: ErrorDetails {
                message: error.message,
                code: error.code,
                stack: error.stack,
                context: report.metadata,
                environment,
            },
            system_state,
            recovery_attempts: 0,
            max_recovery_attempts: severity.max_recovery_attempts(),
            resolved: false,
            resolution: None,
            state: RecoveryState::Reported,
            created_at: Utc::now(),
        }
    }

    /// Override the report time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Key of the [`crate::patterns::ErrorPattern`] this error belongs to
    pub fn pattern_key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.component,
            self.category,
            self.error.code.as_deref().unwrap_or("unknown")
        )
    }

    /// Whether the recovery budget is spent
    pub fn attempts_exhausted(&self) -> bool {
        self.recovery_attempts >= self.max_recovery_attempts
    }

    /// Mark resolved with the winning resolution
    pub fn mark_resolved(&mut self, resolution: ErrorResolution) {
        self.resolved = true;
        self.resolution = Some(resolution);
        self.state = RecoveryState::Resolved;
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}/{} {} ({}): {}",
            self.error_id,
            self.component,
            self.operation,
            self.severity,
            self.category,
            self.error.message
        )
    }
}

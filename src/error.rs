use std::time::Duration;
use thiserror::Error;

/// Errors raised by the recovery engine and its guards
///
/// Reported application errors are never represented here; those travel as
/// [`crate::context::ReportedError`]. This enum covers failures of the engine's
/// own machinery: guarded executions, persistence, notification delivery and
/// configuration.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Circuit breaker rejected the call without running it
    #[error("Circuit breaker is open for {0}")]
    CircuitOpen(String),

    /// Rate limiter rejected the call without running it
    #[error("Rate limit exceeded for {resource}: {max_requests} requests per {window:?}")]
    RateLimitExceeded {
        /// Protected resource name
        resource: String,
        /// Quota for the window
        max_requests: usize,
        /// Window length
        window: Duration,
    },

    /// Wrapped operation returned an error
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// Durable error store rejected a write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Notification channel failed to deliver
    #[error("Notification error: {0}")]
    Notification(String),

    /// No adapter registered for a channel kind
    #[error("No notifier registered for channel {0}")]
    NoNotifier(String),

    /// An external call exceeded its deadline
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// What was being awaited
        operation: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Alert rule carries a regular expression that does not compile
    #[error("Invalid alert pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Unknown error id
    #[error("Error context not found: {0}")]
    ErrorNotFound(String),

    /// JSON encoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// Check if retrying the same call later can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::CircuitOpen(_)
                | EngineError::RateLimitExceeded { .. }
                | EngineError::Timeout { .. }
                | EngineError::Persistence(_)
                | EngineError::Notification(_)
                | EngineError::Http(_)
        )
    }

    /// Check if error needs operator attention
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfiguration(_) | EngineError::InvalidPattern(_)
        )
    }

    /// Build a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        EngineError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

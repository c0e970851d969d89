use crate::alerting::{ChannelKind, NotificationChannel};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between monitoring cycles
    pub monitoring_interval: Duration,

    /// Errors older than this are pruned from the in-memory log
    pub retention: Duration,

    /// Maximum contexts held in the in-memory log
    pub max_log_size: usize,

    /// Last-hour error count above which a component is reported hot
    pub component_hourly_threshold: usize,

    /// Window used for pattern trends
    pub pattern_window: Duration,

    /// Consecutive failures that open a circuit breaker
    pub circuit_breaker_threshold: u32,

    /// Cooldown before an open breaker admits a trial call
    pub circuit_breaker_reset_timeout: Duration,

    /// Default rate limiter quota per window
    pub rate_limit_max_requests: usize,

    /// Default rate limiter window
    pub rate_limit_window: Duration,

    /// Retry strategy delay per attempt
    pub retry_base_delay: Duration,

    /// Base of the exponential backoff between recovery attempts
    pub backoff_base: Duration,

    /// Cap on any backoff delay
    pub max_backoff: Duration,

    /// Deadline for a single health probe
    pub health_check_timeout: Duration,

    /// Deadline for a single notification send
    pub notification_timeout: Duration,

    /// Deadline for a single error log write
    pub persistence_timeout: Duration,

    /// Rows kept while the error store is unavailable
    pub fallback_capacity: usize,

    /// Recovery commands buffered for the executor
    pub command_buffer: usize,

    /// Patterns included in statistics
    pub top_patterns: usize,

    /// Install the built-in alert rules at construction
    pub install_default_alert_rules: bool,

    /// Channels receiving escalation alerts
    pub escalation_channels: Vec<NotificationChannel>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            monitoring_interval: Duration::from_secs(60),
            retention: Duration::from_secs(7 * 24 * 3600), // 7 days
            max_log_size: 10_000,
            component_hourly_threshold: 5,
            pattern_window: Duration::from_secs(3600),
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_timeout: Duration::from_secs(30),
            rate_limit_max_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            retry_base_delay: Duration::from_millis(1000),
            backoff_base: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(300),
            health_check_timeout: Duration::from_secs(10),
            notification_timeout: Duration::from_secs(10),
            persistence_timeout: Duration::from_secs(10),
            fallback_capacity: 1000,
            command_buffer: 256,
            top_patterns: 10,
            install_default_alert_rules: true,
            escalation_channels: vec![NotificationChannel::new(
                ChannelKind::Slack,
                "#ops-escalations",
                1,
            )],
        }
    }
}

impl EngineConfig {
    /// Load from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the monitoring interval
    pub fn with_monitoring_interval(mut self, interval: Duration) -> Self {
        self.monitoring_interval = interval;
        self
    }

    /// Set circuit breaker defaults
    pub fn with_circuit_breaker(mut self, threshold: u32, reset_timeout: Duration) -> Self {
        self.circuit_breaker_threshold = threshold;
        self.circuit_breaker_reset_timeout = reset_timeout;
        self
    }

    /// Set rate limiter defaults
    pub fn with_rate_limit(mut self, max_requests: usize, window: Duration) -> Self {
        self.rate_limit_max_requests = max_requests;
        self.rate_limit_window = window;
        self
    }

    /// Set retry and backoff timing
    pub fn with_backoff(mut self, retry_base_delay: Duration, backoff_base: Duration, max_backoff: Duration) -> Self {
        self.retry_base_delay = retry_base_delay;
        self.backoff_base = backoff_base;
        self.max_backoff = max_backoff;
        self
    }

    /// Enable or disable the built-in alert rules
    pub fn with_default_alert_rules(mut self, enabled: bool) -> Self {
        self.install_default_alert_rules = enabled;
        self
    }

    /// Replace the escalation channels
    pub fn with_escalation_channels(mut self, channels: Vec<NotificationChannel>) -> Self {
        self.escalation_channels = channels;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(EngineError::InvalidConfiguration(msg.to_string()));

        if self.monitoring_interval.is_zero() {
            return invalid("monitoring_interval must be > 0");
        }

        if self.max_log_size == 0 {
            return invalid("max_log_size must be > 0");
        }

        if self.circuit_breaker_threshold == 0 {
            return invalid("circuit_breaker_threshold must be > 0");
        }

        if self.rate_limit_max_requests == 0 || self.rate_limit_window.is_zero() {
            return invalid("rate limit quota and window must be > 0");
        }

        if self.max_backoff < self.backoff_base {
            return invalid("max_backoff must be >= backoff_base");
        }

        if self.health_check_timeout.is_zero()
            || self.notification_timeout.is_zero()
            || self.persistence_timeout.is_zero()
        {
            return invalid("timeouts must be > 0");
        }

        if self.command_buffer == 0 || self.fallback_capacity == 0 {
            return invalid("command_buffer and fallback_capacity must be > 0");
        }

        if self.escalation_channels.is_empty() {
            return invalid("at least one escalation channel is required");
        }

        Ok(())
    }
}

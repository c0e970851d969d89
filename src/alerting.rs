//! Alert rules and notification dispatch
//!
//! Rules are evaluated against the error log window for every reported error.
//! A firing, unsuppressed rule is dispatched to each of its channels through
//! the [`Notifier`] registered for that channel kind. Channel failures are
//! logged per channel and never propagate.

use crate::context::{ErrorCategory, ErrorContext, ErrorSeverity};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Metric an alert condition counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    /// Every error
    ErrorCount,
    /// Critical and catastrophic errors
    CriticalErrors,
    /// Database category
    DatabaseErrors,
    /// Network category
    NetworkErrors,
    /// Any single category
    Category(ErrorCategory),
    /// Errors from one component
    Component(String),
}

impl AlertMetric {
    /// Whether `context` counts toward this metric
    pub fn matches(&self, context: &ErrorContext) -> bool {
        match self {
            AlertMetric::ErrorCount => true,
            AlertMetric::CriticalErrors => context.severity.is_critical(),
            AlertMetric::DatabaseErrors => context.category == ErrorCategory::Database,
            AlertMetric::NetworkErrors => context.category == ErrorCategory::Network,
            AlertMetric::Category(category) => context.category == *category,
            AlertMetric::Component(component) => context.component == *component,
        }
    }
}

/// Comparison applied by a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOperator {
    /// Count above threshold
    Gt,
    /// Count below threshold
    Lt,
    /// Count equal to threshold
    Eq,
    /// Current message contains threshold text
    Contains,
    /// Current message matches threshold regex
    Pattern,
}

/// Threshold value: a count for comparisons, text for matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertThreshold {
    /// Count
    Count(u64),
    /// Substring or regular expression
    Text(String),
}

/// When a rule fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCondition {
    /// Which errors count
    pub metric: AlertMetric,
    /// Comparison
    pub operator: AlertOperator,
    /// Value compared against
    pub threshold: AlertThreshold,
    /// Window of the error log considered
    pub time_window: Duration,
    /// Matching errors required in the window before the operator is applied
    pub frequency: u64,
}

/// Notification channel kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Email
    Email,
    /// Slack
    Slack,
    /// HTTP webhook
    Webhook,
    /// SMS
    Sms,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Email => "email",
            ChannelKind::Slack => "slack",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Sms => "sms",
        };
        f.write_str(name)
    }
}

/// Notification target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannel {
    /// Kind
    pub kind: ChannelKind,
    /// Address, Slack channel, URL or phone number
    pub target: String,
    /// Lower is more urgent
    pub priority: u8,
}

impl NotificationChannel {
    /// Create a channel
    pub fn new(kind: ChannelKind, target: impl Into<String>, priority: u8) -> Self {
        Self {
            kind,
            target: target.into(),
            priority,
        }
    }
}

/// Suppresses a rule for matching components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionRule {
    /// Substring matched against the error's component
    pub condition: String,
    /// How long the suppression is meant to last
    pub duration: Duration,
    /// Why
    pub reason: String,
}

/// Static alert configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique id
    pub id: String,
    /// Display name
    pub name: String,
    /// Firing condition
    pub condition: AlertCondition,
    /// Alert severity
    pub severity: ErrorSeverity,
    /// Targets
    pub channels: Vec<NotificationChannel>,
    /// Disabled rules never fire
    pub enabled: bool,
    /// Suppressions
    pub suppression_rules: Vec<SuppressionRule>,
}

impl AlertRule {
    /// Check the rule can be evaluated
    pub fn validate(&self) -> Result<()> {
        match (&self.condition.operator, &self.condition.threshold) {
            (AlertOperator::Pattern, AlertThreshold::Text(pattern)) => {
                Regex::new(pattern)?;
                Ok(())
            }
            (AlertOperator::Contains | AlertOperator::Pattern, AlertThreshold::Count(_)) => {
                Err(EngineError::InvalidConfiguration(format!(
                    "rule {} needs a text threshold",
                    self.id
                )))
            }
            (AlertOperator::Gt | AlertOperator::Lt | AlertOperator::Eq, AlertThreshold::Text(_)) => {
                Err(EngineError::InvalidConfiguration(format!(
                    "rule {} needs a count threshold",
                    self.id
                )))
            }
            _ => Ok(()),
        }
    }

    /// Whether the condition holds for `context` against the log
    pub fn condition_met(&self, context: &ErrorContext, log: &[ErrorContext], now: DateTime<Utc>) -> bool {
        let condition = &self.condition;
        let window = ChronoDuration::from_std(condition.time_window).unwrap_or_else(|_| ChronoDuration::zero());
        let cutoff = now - window;
        let count = log
            .iter()
            .filter(|c| c.created_at >= cutoff && condition.metric.matches(c))
            .count() as u64;

        if count < condition.frequency {
            return false;
        }

        match (&condition.operator, &condition.threshold) {
            (AlertOperator::Gt, AlertThreshold::Count(threshold)) => count > *threshold,
            (AlertOperator::Lt, AlertThreshold::Count(threshold)) => count < *threshold,
            (AlertOperator::Eq, AlertThreshold::Count(threshold)) => count == *threshold,
            (AlertOperator::Contains, AlertThreshold::Text(text)) => context.error.message.contains(text.as_str()),
            (AlertOperator::Pattern, AlertThreshold::Text(pattern)) => match Regex::new(pattern) {
                Ok(regex) => regex.is_match(&context.error.message),
                Err(e) => {
                    warn!(rule = %self.id, error = %e, "Alert pattern does not compile");
                    false
                }
            },
            _ => {
                debug!(rule = %self.id, "Operator and threshold kinds do not match");
                false
            }
        }
    }

    /// Suppression matching the error's component, if any
    pub fn suppression_for(&self, context: &ErrorContext) -> Option<&SuppressionRule> {
        self.suppression_rules
            .iter()
            .find(|s| context.component.contains(s.condition.as_str()))
    }
}

/// Rules installed unless disabled in configuration
pub fn default_alert_rules() -> Vec<AlertRule> {
    let ops_email = NotificationChannel::new(ChannelKind::Email, "ops@localhost", 2);
    let ops_slack = NotificationChannel::new(ChannelKind::Slack, "#ops-alerts", 1);

    let rule = |id: &str, name: &str, condition, severity, channels| AlertRule {
        id: id.to_string(),
        name: name.to_string(),
        condition,
        severity,
        channels,
        enabled: true,
        suppression_rules: Vec::new(),
    };

    vec![
        rule(
            "high_error_rate",
            "High error rate",
            AlertCondition {
                metric: AlertMetric::ErrorCount,
                operator: AlertOperator::Gt,
                threshold: AlertThreshold::Count(10),
                time_window: Duration::from_secs(300),
                frequency: 1,
            },
            ErrorSeverity::High,
            vec![ops_email.clone(), ops_slack.clone()],
        ),
        rule(
            "critical_errors",
            "Critical error reported",
            AlertCondition {
                metric: AlertMetric::CriticalErrors,
                operator: AlertOperator::Gt,
                threshold: AlertThreshold::Count(0),
                time_window: Duration::from_secs(60),
                frequency: 1,
            },
            ErrorSeverity::Critical,
            vec![ops_slack.clone(), NotificationChannel::new(ChannelKind::Sms, "oncall", 0)],
        ),
        rule(
            "database_errors",
            "Database errors",
            AlertCondition {
                metric: AlertMetric::DatabaseErrors,
                operator: AlertOperator::Gt,
                threshold: AlertThreshold::Count(3),
                time_window: Duration::from_secs(300),
                frequency: 1,
            },
            ErrorSeverity::High,
            vec![ops_slack.clone()],
        ),
        rule(
            "network_errors",
            "Network errors",
            AlertCondition {
                metric: AlertMetric::NetworkErrors,
                operator: AlertOperator::Gt,
                threshold: AlertThreshold::Count(5),
                time_window: Duration::from_secs(600),
                frequency: 1,
            },
            ErrorSeverity::Medium,
            vec![ops_email.clone()],
        ),
        rule(
            "data_corruption",
            "Possible data corruption",
            AlertCondition {
                metric: AlertMetric::ErrorCount,
                operator: AlertOperator::Pattern,
                threshold: AlertThreshold::Text("(?i)corrupt|integrity|checksum".to_string()),
                time_window: Duration::from_secs(3600),
                frequency: 1,
            },
            ErrorSeverity::Critical,
            vec![ops_slack, ops_email],
        ),
    ]
}

/// Text body used by email, Slack and SMS channels
pub fn format_alert_message(rule: &AlertRule, context: &ErrorContext) -> String {
    format!(
        "[{}] {}\nComponent: {}\nOperation: {}\nCategory: {}\nError: {}\nError ID: {}\nTime: {}",
        rule.severity.as_str().to_uppercase(),
        rule.name,
        context.component,
        context.operation,
        context.category,
        context.error.message,
        context.error_id,
        context.created_at.to_rfc3339()
    )
}

/// Channel adapter
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert to `channel`
    async fn send(
        &self,
        channel: &NotificationChannel,
        rule: &AlertRule,
        context: &ErrorContext,
    ) -> Result<()>;
}

/// Delivery backend for text channels (SMTP relay, SMS gateway, ...)
#[async_trait]
pub trait TextTransport: Send + Sync {
    /// Deliver `body` to `recipient`
    async fn deliver(&self, recipient: &str, subject: &str, body: &str) -> Result<()>;
}

/// Email adapter over a host-provided transport
pub struct EmailNotifier {
    transport: Arc<dyn TextTransport>,
}

impl EmailNotifier {
    /// Create an email adapter
    pub fn new(transport: Arc<dyn TextTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, channel: &NotificationChannel, rule: &AlertRule, context: &ErrorContext) -> Result<()> {
        let subject = format!("[{}] {}", rule.severity.as_str().to_uppercase(), rule.name);
        self.transport
            .deliver(&channel.target, &subject, &format_alert_message(rule, context))
            .await
    }
}

/// SMS adapter; messages are cut to a single segment
pub struct SmsNotifier {
    transport: Arc<dyn TextTransport>,
}

impl SmsNotifier {
    /// Create an SMS adapter
    pub fn new(transport: Arc<dyn TextTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    async fn send(&self, channel: &NotificationChannel, rule: &AlertRule, context: &ErrorContext) -> Result<()> {
        let body: String = format!(
            "{}: {} in {}",
            rule.severity.as_str().to_uppercase(),
            context.error.message,
            context.component
        )
        .chars()
        .take(160)
        .collect();
        self.transport.deliver(&channel.target, &rule.name, &body).await
    }
}

/// Slack incoming-webhook adapter
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    /// Post to the incoming webhook at `webhook_url`
    pub fn new(client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, channel: &NotificationChannel, rule: &AlertRule, context: &ErrorContext) -> Result<()> {
        let payload = serde_json::json!({
            "channel": channel.target,
            "text": format_alert_message(rule, context),
        });
        let response = self.client.post(&self.webhook_url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(EngineError::Notification(format!(
                "slack webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Webhook adapter; posts the raw error context as JSON to the channel target
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a webhook adapter
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, channel: &NotificationChannel, _rule: &AlertRule, context: &ErrorContext) -> Result<()> {
        let response = self.client.post(&channel.target).json(context).send().await?;
        if !response.status().is_success() {
            return Err(EngineError::Notification(format!(
                "webhook {} returned {}",
                channel.target,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Outcome of dispatching one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Rule dispatched
    pub rule_id: String,
    /// Channels that accepted the alert
    pub delivered: usize,
    /// Channels that failed
    pub failed: usize,
}

/// Rule store and dispatcher
pub struct AlertEngine {
    rules: RwLock<Vec<AlertRule>>,
    notifiers: RwLock<HashMap<ChannelKind, Arc<dyn Notifier>>>,
    send_timeout: Duration,
}

impl AlertEngine {
    /// Engine with no rules and no adapters
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            notifiers: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Install or replace a rule by id
    pub fn add_rule(&self, rule: AlertRule) -> Result<()> {
        rule.validate()?;
        let mut rules = self.rules.write();
        rules.retain(|r| r.id != rule.id);
        rules.push(rule);
        Ok(())
    }

    /// Remove a rule, returning whether it existed
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        rules.len() != before
    }

    /// Enable or disable a rule, returning whether it exists
    pub fn set_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        self.rules
            .write()
            .iter_mut()
            .find(|r| r.id == rule_id)
            .map(|r| r.enabled = enabled)
            .is_some()
    }

    /// All rules
    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().clone()
    }

    /// Register the adapter for a channel kind
    pub fn register_notifier(&self, kind: ChannelKind, notifier: Arc<dyn Notifier>) {
        self.notifiers.write().insert(kind, notifier);
    }

    /// Enabled, unsuppressed rules whose condition holds
    pub fn firing_rules(&self, context: &ErrorContext, log: &[ErrorContext], now: DateTime<Utc>) -> Vec<AlertRule> {
        self.rules
            .read()
            .iter()
            .filter(|rule| rule.enabled)
            .filter(|rule| rule.condition_met(context, log, now))
            .filter(|rule| match rule.suppression_for(context) {
                Some(suppression) => {
                    info!(
                        rule = %rule.id,
                        component = %context.component,
                        reason = %suppression.reason,
                        "Alert suppressed"
                    );
                    false
                }
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Evaluate all rules for `context` and dispatch those that fire
    pub async fn evaluate(&self, context: &ErrorContext, log: &[ErrorContext]) -> Vec<DispatchReport> {
        let firing = self.firing_rules(context, log, Utc::now());
        let mut reports = Vec::with_capacity(firing.len());
        for rule in &firing {
            reports.push(self.dispatch(rule, context).await);
        }
        reports
    }

    /// Send `rule` for `context` to every channel, in priority order
    pub async fn dispatch(&self, rule: &AlertRule, context: &ErrorContext) -> DispatchReport {
        let mut channels = rule.channels.clone();
        channels.sort_by_key(|c| c.priority);

        let mut report = DispatchReport {
            rule_id: rule.id.clone(),
            delivered: 0,
            failed: 0,
        };

        for channel in &channels {
            match self.send_one(channel, rule, context).await {
                Ok(()) => {
                    report.delivered += 1;
                    debug!(rule = %rule.id, channel = %channel.kind, target = %channel.target, "Alert delivered");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        rule = %rule.id,
                        channel = %channel.kind,
                        target = %channel.target,
                        error = %e,
                        "Alert delivery failed"
                    );
                }
            }
        }

        report
    }

    async fn send_one(&self, channel: &NotificationChannel, rule: &AlertRule, context: &ErrorContext) -> Result<()> {
        let notifier = self
            .notifiers
            .read()
            .get(&channel.kind)
            .cloned()
            .ok_or_else(|| EngineError::NoNotifier(channel.kind.to_string()))?;

        tokio::time::timeout(self.send_timeout, notifier.send(channel, rule, context))
            .await
            .map_err(|_| EngineError::timeout(format!("{} notification", channel.kind), self.send_timeout))?
    }

    /// Forced critical alert for an error whose recovery is exhausted
    pub async fn escalate(&self, context: &ErrorContext, channels: &[NotificationChannel]) -> DispatchReport {
        let rule = AlertRule {
            id: format!("escalation_{}", context.error_id),
            name: format!(
                "Recovery exhausted after {} attempts",
                context.recovery_attempts
            ),
            condition: AlertCondition {
                metric: AlertMetric::ErrorCount,
                operator: AlertOperator::Gt,
                threshold: AlertThreshold::Count(0),
                time_window: Duration::ZERO,
                frequency: 0,
            },
            severity: ErrorSeverity::Critical,
            channels: channels.to_vec(),
            enabled: true,
            suppression_rules: Vec::new(),
        };

        error!(
            error_id = %context.error_id,
            component = %context.component,
            attempts = context.recovery_attempts,
            "ESCALATION - automated recovery exhausted, operator intervention required"
        );
        self.dispatch(&rule, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ReportContext, ReportedError, SystemState};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, channel: &NotificationChannel, rule: &AlertRule, _context: &ErrorContext) -> Result<()> {
            self.sent.lock().push((channel.target.clone(), rule.id.clone()));
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _: &NotificationChannel, _: &AlertRule, _: &ErrorContext) -> Result<()> {
            Err(EngineError::Notification("smtp down".into()))
        }
    }

    fn ctx(component: &str, message: &str, severity: ErrorSeverity, category: ErrorCategory) -> ErrorContext {
        ErrorContext::new(
            ReportedError::new(message),
            ReportContext::new(component, "op"),
            severity,
            category,
            SystemState::default(),
        )
    }

    fn count_rule(id: &str, metric: AlertMetric, operator: AlertOperator, threshold: u64) -> AlertRule {
        AlertRule {
            id: id.to_string(),
            name: id.to_string(),
            condition: AlertCondition {
                metric,
                operator,
                threshold: AlertThreshold::Count(threshold),
                time_window: Duration::from_secs(300),
                frequency: 1,
            },
            severity: ErrorSeverity::High,
            channels: vec![NotificationChannel::new(ChannelKind::Slack, "#alerts", 1)],
            enabled: true,
            suppression_rules: vec![],
        }
    }

    #[test]
    fn test_count_operators() {
        let log: Vec<_> = (0..3)
            .map(|_| ctx("posting", "x", ErrorSeverity::Low, ErrorCategory::Database))
            .collect();
        let current = &log[2];
        let now = Utc::now();

        assert!(count_rule("a", AlertMetric::DatabaseErrors, AlertOperator::Gt, 2).condition_met(current, &log, now));
        assert!(!count_rule("b", AlertMetric::DatabaseErrors, AlertOperator::Gt, 3).condition_met(current, &log, now));
        assert!(count_rule("c", AlertMetric::DatabaseErrors, AlertOperator::Eq, 3).condition_met(current, &log, now));
        assert!(count_rule("d", AlertMetric::DatabaseErrors, AlertOperator::Lt, 4).condition_met(current, &log, now));
        // no network errors at all: frequency gate stops the rule
        assert!(!count_rule("e", AlertMetric::NetworkErrors, AlertOperator::Lt, 4).condition_met(current, &log, now));
    }

    #[test]
    fn test_window_excludes_old_errors() {
        let old = ctx("posting", "x", ErrorSeverity::Low, ErrorCategory::Network)
            .with_created_at(Utc::now() - ChronoDuration::hours(1));
        let fresh = ctx("posting", "x", ErrorSeverity::Low, ErrorCategory::Network);
        let log = vec![old, fresh.clone()];
        let rule = count_rule("net", AlertMetric::NetworkErrors, AlertOperator::Gt, 1);
        assert!(!rule.condition_met(&fresh, &log, Utc::now()));
    }

    #[test]
    fn test_critical_metric() {
        let critical = ctx("db", "x", ErrorSeverity::Catastrophic, ErrorCategory::Database);
        let low = ctx("db", "x", ErrorSeverity::Low, ErrorCategory::Database);
        assert!(AlertMetric::CriticalErrors.matches(&critical));
        assert!(!AlertMetric::CriticalErrors.matches(&low));
    }

    #[test]
    fn test_text_operators() {
        let current = ctx("posting", "Checksum mismatch on article", ErrorSeverity::Low, ErrorCategory::Posting);
        let log = vec![current.clone()];
        let mut rule = count_rule("t", AlertMetric::ErrorCount, AlertOperator::Contains, 0);
        rule.condition.threshold = AlertThreshold::Text("mismatch".into());
        assert!(rule.condition_met(&current, &log, Utc::now()));

        rule.condition.operator = AlertOperator::Pattern;
        rule.condition.threshold = AlertThreshold::Text("(?i)^checksum".into());
        assert!(rule.condition_met(&current, &log, Utc::now()));

        rule.condition.threshold = AlertThreshold::Text("^article".into());
        assert!(!rule.condition_met(&current, &log, Utc::now()));
    }

    #[test]
    fn test_validate_rejects_bad_rules() {
        let mut rule = count_rule("bad", AlertMetric::ErrorCount, AlertOperator::Pattern, 1);
        assert!(matches!(rule.validate(), Err(EngineError::InvalidConfiguration(_))));
        rule.condition.threshold = AlertThreshold::Text("(unclosed".into());
        assert!(matches!(rule.validate(), Err(EngineError::InvalidPattern(_))));
        assert!(default_alert_rules().iter().all(|r| r.validate().is_ok()));
    }

    #[tokio::test]
    async fn test_suppressed_rule_never_dispatches() {
        let engine = AlertEngine::new(Duration::from_secs(1));
        let notifier = Arc::new(RecordingNotifier::default());
        engine.register_notifier(ChannelKind::Slack, notifier.clone());

        let mut rule = count_rule("any", AlertMetric::ErrorCount, AlertOperator::Gt, 0);
        rule.suppression_rules.push(SuppressionRule {
            condition: "link_discovery".into(),
            duration: Duration::from_secs(3600),
            reason: "crawler maintenance".into(),
        });
        engine.add_rule(rule).unwrap();

        let suppressed = ctx("link_discovery", "x", ErrorSeverity::Critical, ErrorCategory::LinkDiscovery);
        let reports = engine.evaluate(&suppressed, &[suppressed.clone()]).await;
        assert!(reports.is_empty());
        assert!(notifier.sent.lock().is_empty());

        let other = ctx("posting", "x", ErrorSeverity::Critical, ErrorCategory::Posting);
        let reports = engine.evaluate(&other, &[other.clone()]).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(notifier.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_rule_never_fires() {
        let engine = AlertEngine::new(Duration::from_secs(1));
        engine
            .add_rule(count_rule("any", AlertMetric::ErrorCount, AlertOperator::Gt, 0))
            .unwrap();
        assert!(engine.set_enabled("any", false));
        let c = ctx("posting", "x", ErrorSeverity::Low, ErrorCategory::Posting);
        assert!(engine.firing_rules(&c, &[c.clone()], Utc::now()).is_empty());
        assert!(!engine.set_enabled("missing", true));
    }

    #[tokio::test]
    async fn test_channel_failure_does_not_stop_other_channels() {
        let engine = AlertEngine::new(Duration::from_secs(1));
        let slack = Arc::new(RecordingNotifier::default());
        engine.register_notifier(ChannelKind::Slack, slack.clone());
        engine.register_notifier(ChannelKind::Email, Arc::new(FailingNotifier));

        let mut rule = count_rule("multi", AlertMetric::ErrorCount, AlertOperator::Gt, 0);
        rule.channels = vec![
            NotificationChannel::new(ChannelKind::Email, "ops@example.com", 0),
            NotificationChannel::new(ChannelKind::Sms, "+15550100", 1),
            NotificationChannel::new(ChannelKind::Slack, "#alerts", 2),
        ];
        let c = ctx("posting", "x", ErrorSeverity::Low, ErrorCategory::Posting);
        let report = engine.dispatch(&rule, &c).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(slack.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_escalation_bypasses_rules() {
        let engine = AlertEngine::new(Duration::from_secs(1));
        let slack = Arc::new(RecordingNotifier::default());
        engine.register_notifier(ChannelKind::Slack, slack.clone());

        let c = ctx("posting", "x", ErrorSeverity::Low, ErrorCategory::Posting);
        let report = engine
            .escalate(&c, &[NotificationChannel::new(ChannelKind::Slack, "#ops", 1)])
            .await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.rule_id, format!("escalation_{}", c.error_id));
    }

    #[test]
    fn test_format_alert_message() {
        let rule = count_rule("fmt", AlertMetric::ErrorCount, AlertOperator::Gt, 0);
        let c = ctx("posting", "Telegraph returned 502", ErrorSeverity::High, ErrorCategory::Posting);
        let message = format_alert_message(&rule, &c);
        assert!(message.starts_with("[HIGH] fmt"));
        assert!(message.contains("Telegraph returned 502"));
        assert!(message.contains(&c.error_id));
    }

    #[test]
    fn test_rule_serde_shape() {
        let rule = count_rule("json", AlertMetric::Component("posting".into()), AlertOperator::Gt, 5);
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["condition"]["threshold"], serde_json::json!(5));
        assert_eq!(value["condition"]["operator"], serde_json::json!("gt"));
        let back: AlertRule = serde_json::from_value(value).unwrap();
        assert_eq!(back, rule);
    }
}

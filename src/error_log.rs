//! In-memory error log
//!
//! Provides the engine's working set of error contexts:
//! - Bounded history, oldest evicted first
//! - In-place updates by the recovery loop
//! - Time-window queries for alerting and statistics
//! - Retention pruning
//! - Lifetime counters

use crate::context::ErrorContext;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Lifetime counters
#[derive(Debug, Default)]
pub struct ErrorMetrics {
    /// Errors reported
    pub total_errors: AtomicU64,

    /// Critical or catastrophic errors reported
    pub critical_errors: AtomicU64,

    /// Errors a strategy resolved
    pub resolved_errors: AtomicU64,

    /// Errors escalated after exhausting recovery
    pub escalated_errors: AtomicU64,

    /// Entries evicted by the size bound or retention
    pub evicted_errors: AtomicU64,
}

impl ErrorMetrics {
    /// Record a reported error
    pub fn record_error(&self, context: &ErrorContext) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        if context.severity.is_critical() {
            self.critical_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a resolution
    pub fn record_resolved(&self) {
        self.resolved_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an escalation
    pub fn record_escalated(&self) {
        self.escalated_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of all counters
    pub fn summary(&self) -> ErrorSummary {
        ErrorSummary {
            total_errors: self.total_errors.load(Ordering::Relaxed),
            critical_errors: self.critical_errors.load(Ordering::Relaxed),
            resolved_errors: self.resolved_errors.load(Ordering::Relaxed),
            escalated_errors: self.escalated_errors.load(Ordering::Relaxed),
            evicted_errors: self.evicted_errors.load(Ordering::Relaxed),
        }
    }
}

/// Lifetime counter snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSummary {
    /// Errors reported
    pub total_errors: u64,
    /// Critical or catastrophic errors reported
    pub critical_errors: u64,
    /// Errors resolved
    pub resolved_errors: u64,
    /// Errors escalated
    pub escalated_errors: u64,
    /// Entries dropped from the log
    pub evicted_errors: u64,
}

impl ErrorSummary {
    /// Percentage of reported errors that were resolved
    pub fn recovery_rate(&self) -> f64 {
        if self.total_errors == 0 {
            0.0
        } else {
            (self.resolved_errors as f64 / self.total_errors as f64) * 100.0
        }
    }
}

/// Bounded, time-ordered log of error contexts
pub struct ErrorLog {
    history: Mutex<VecDeque<ErrorContext>>,
    max_history_size: usize,
    metrics: Arc<ErrorMetrics>,
}

impl ErrorLog {
    /// Create a log holding at most `max_history_size` contexts
    pub fn new(max_history_size: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(max_history_size.min(1024))),
            max_history_size: max_history_size.max(1),
            metrics: Arc::new(ErrorMetrics::default()),
        }
    }

    /// Append a newly reported context
    pub fn record(&self, context: ErrorContext) {
        self.metrics.record_error(&context);

        if context.severity.is_critical() {
            error!(
                error_id = %context.error_id,
                component = %context.component,
                operation = %context.operation,
                severity = %context.severity,
                category = %context.category,
                message = %context.error.message,
                "Critical error reported"
            );
        } else {
            warn!(
                error_id = %context.error_id,
                component = %context.component,
                operation = %context.operation,
                severity = %context.severity,
                category = %context.category,
                message = %context.error.message,
                "Error reported"
            );
        }

        let mut history = self.history.lock();
        if history.len() >= self.max_history_size {
            history.pop_front();
            self.metrics.evicted_errors.fetch_add(1, Ordering::Relaxed);
        }
        history.push_back(context);
    }

    /// Mutate a context in place; `None` when it was evicted
    pub fn update<F>(&self, error_id: &str, f: F) -> Option<ErrorContext>
    where
        F: FnOnce(&mut ErrorContext),
    {
        let mut history = self.history.lock();
        let context = history.iter_mut().find(|c| c.error_id == error_id)?;
        f(context);
        Some(context.clone())
    }

    /// Context by id
    pub fn get(&self, error_id: &str) -> Option<ErrorContext> {
        self.history
            .lock()
            .iter()
            .find(|c| c.error_id == error_id)
            .cloned()
    }

    /// Full copy of the log
    pub fn snapshot(&self) -> Vec<ErrorContext> {
        self.history.lock().iter().cloned().collect()
    }

    /// Contexts reported at or after `since`
    pub fn since(&self, since: DateTime<Utc>) -> Vec<ErrorContext> {
        self.history
            .lock()
            .iter()
            .filter(|c| c.created_at >= since)
            .cloned()
            .collect()
    }

    /// Last `count` contexts, oldest first
    pub fn recent(&self, count: usize) -> Vec<ErrorContext> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(count);
        history.iter().skip(skip).cloned().collect()
    }

    /// Per-component counts of contexts reported at or after `since`
    pub fn component_counts_since(&self, since: DateTime<Utc>) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for context in self.history.lock().iter().filter(|c| c.created_at >= since) {
            *counts.entry(context.component.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Drop contexts reported before `cutoff`, returning how many were removed
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut history = self.history.lock();
        let before = history.len();
        history.retain(|c| c.created_at >= cutoff);
        let pruned = before - history.len();
        self.metrics
            .evicted_errors
            .fetch_add(pruned as u64, Ordering::Relaxed);
        pruned
    }

    /// Number of contexts held
    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }

    /// Lifetime counters
    pub fn metrics(&self) -> Arc<ErrorMetrics> {
        Arc::clone(&self.metrics)
    }
}

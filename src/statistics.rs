use crate::context::ErrorContext;
use crate::patterns::{ErrorPattern, Trend};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Half-open interval `[start, end)` of report times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Range between two instants
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The last `duration`, ending now
    pub fn last(duration: std::time::Duration) -> Self {
        let end = Utc::now() + ChronoDuration::milliseconds(1);
        let span = ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(365));
        Self { start: end - span, end }
    }

    /// Whether `at` falls in the range
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Aggregate view of the error log over a time range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    /// Errors in range
    pub total_errors: usize,
    /// Counts by severity name
    pub errors_by_severity: HashMap<String, usize>,
    /// Counts by category name
    pub errors_by_category: HashMap<String, usize>,
    /// Counts by component
    pub errors_by_component: HashMap<String, usize>,
    /// Errors marked resolved
    pub resolved_errors: usize,
    /// Mean resolution duration in milliseconds over resolved errors carrying a resolution
    pub average_resolution_time: f64,
    /// Most frequent patterns
    pub top_error_patterns: Vec<ErrorPattern>,
    /// First-half against second-half hourly average
    pub trend: Trend,
}

/// Aggregate `log` over `range`
///
/// `patterns` should already be sorted most frequent first; it is cut to `top`.
pub fn compute_statistics(
    log: &[ErrorContext],
    range: TimeRange,
    patterns: Vec<ErrorPattern>,
    top: usize,
) -> ErrorStatistics {
    let in_range: Vec<&ErrorContext> = log.iter().filter(|c| range.contains(c.created_at)).collect();

    let mut errors_by_severity = HashMap::new();
    let mut errors_by_category = HashMap::new();
    let mut errors_by_component = HashMap::new();
    for context in &in_range {
        *errors_by_severity.entry(context.severity.as_str().to_string()).or_insert(0) += 1;
        *errors_by_category.entry(context.category.as_str().to_string()).or_insert(0) += 1;
        *errors_by_component.entry(context.component.clone()).or_insert(0) += 1;
    }

    let resolved_errors = in_range.iter().filter(|c| c.resolved).count();
    let durations: Vec<u64> = in_range
        .iter()
        .filter(|c| c.resolved)
        .filter_map(|c| c.resolution.as_ref())
        .map(|r| r.total_duration_ms)
        .collect();
    let average_resolution_time = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<u64>() as f64 / durations.len() as f64
    };

    let mut top_error_patterns = patterns;
    top_error_patterns.truncate(top);

    ErrorStatistics {
        total_errors: in_range.len(),
        errors_by_severity,
        errors_by_category,
        errors_by_component,
        resolved_errors,
        average_resolution_time,
        top_error_patterns,
        trend: hourly_trend(&in_range),
    }
}

/// Compare the mean hourly count of the first and second half of the range
fn hourly_trend(contexts: &[&ErrorContext]) -> Trend {
    let Some(first) = contexts.iter().map(|c| c.created_at).min() else {
        return Trend::Stable;
    };

    let mut buckets: Vec<u64> = Vec::new();
    for context in contexts {
        let hour = (context.created_at - first).num_hours().max(0) as usize;
        if buckets.len() <= hour {
            buckets.resize(hour + 1, 0);
        }
        buckets[hour] += 1;
    }

    if buckets.len() < 2 {
        return Trend::Stable;
    }

    let (earlier, later) = buckets.split_at(buckets.len() / 2);
    let mean = |half: &[u64]| half.iter().sum::<u64>() as f64 / half.len() as f64;
    let (earlier, later) = (mean(earlier), mean(later));

    if later > earlier * 1.1 {
        Trend::Increasing
    } else if later < earlier * 0.9 {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ErrorCategory, ErrorSeverity, ReportContext, ReportedError, SystemState};
    use crate::recovery::{ErrorResolution, RecoveryStrategy};

    fn ctx(component: &str, severity: ErrorSeverity, minutes_ago: i64) -> ErrorContext {
        ErrorContext::new(
            ReportedError::new("failed"),
            ReportContext::new(component, "op"),
            severity,
            ErrorCategory::Posting,
            SystemState::default(),
        )
        .with_created_at(Utc::now() - ChronoDuration::minutes(minutes_ago))
    }

    fn resolution(duration_ms: u64) -> ErrorResolution {
        ErrorResolution {
            strategy: RecoveryStrategy::Retry,
            actions: vec![],
            total_duration_ms: duration_ms,
            success: true,
            system_status: "operational".into(),
            system_state: SystemState::default(),
            lessons_learned: vec![],
            preventive_measures: vec![],
        }
    }

    #[test]
    fn test_resolved_average() {
        let mut log: Vec<_> = (0..10).map(|i| ctx("posting", ErrorSeverity::Medium, i)).collect();
        for (context, ms) in log.iter_mut().zip([1000, 1400, 1200, 900, 1500, 1200]) {
            context.mark_resolved(resolution(ms));
        }

        let stats = compute_statistics(&log, TimeRange::last(std::time::Duration::from_secs(86_400)), vec![], 10);
        assert_eq!(stats.total_errors, 10);
        assert_eq!(stats.resolved_errors, 6);
        assert_eq!(stats.average_resolution_time, 1200.0);
        assert_eq!(stats.errors_by_component.get("posting"), Some(&10));
        assert_eq!(stats.errors_by_severity.get("medium"), Some(&10));
    }

    #[test]
    fn test_range_filters_errors() {
        let log = vec![
            ctx("posting", ErrorSeverity::Low, 30),
            ctx("posting", ErrorSeverity::Low, 180),
        ];
        let stats = compute_statistics(&log, TimeRange::last(std::time::Duration::from_secs(3600)), vec![], 10);
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.average_resolution_time, 0.0);
    }

    #[test]
    fn test_hourly_trend() {
        // one error in the first hour, five in the last
        let mut log = vec![ctx("a", ErrorSeverity::Low, 119)];
        log.extend((0..5).map(|i| ctx("a", ErrorSeverity::Low, i)));
        let stats = compute_statistics(&log, TimeRange::last(std::time::Duration::from_secs(86_400)), vec![], 10);
        assert_eq!(stats.trend, Trend::Increasing);

        let mut log: Vec<_> = (0..5).map(|i| ctx("a", ErrorSeverity::Low, 119 - i)).collect();
        log.push(ctx("a", ErrorSeverity::Low, 1));
        let stats = compute_statistics(&log, TimeRange::last(std::time::Duration::from_secs(86_400)), vec![], 10);
        assert_eq!(stats.trend, Trend::Decreasing);

        let log: Vec<_> = (0..5).map(|i| ctx("a", ErrorSeverity::Low, i)).collect();
        let stats = compute_statistics(&log, TimeRange::last(std::time::Duration::from_secs(86_400)), vec![], 10);
        assert_eq!(stats.trend, Trend::Stable);
    }

    #[test]
    fn test_top_patterns_truncated() {
        let pattern = |key: &str, frequency| ErrorPattern {
            key: key.to_string(),
            frequency,
            impact: ErrorSeverity::Low,
            trend: Trend::Stable,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
        };
        let stats = compute_statistics(
            &[],
            TimeRange::last(std::time::Duration::from_secs(60)),
            vec![pattern("a", 3), pattern("b", 2), pattern("c", 1)],
            2,
        );
        assert_eq!(stats.top_error_patterns.len(), 2);
        assert_eq!(stats.trend, Trend::Stable);
    }
}

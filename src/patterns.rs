use crate::context::{ErrorContext, ErrorSeverity};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Direction of an error count over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Getting worse
    Increasing,
    /// Getting better
    Decreasing,
    /// No clear direction
    Stable,
}

/// Aggregate of errors sharing `component_category_code`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    /// Pattern key
    pub key: String,
    /// Occurrences over the process lifetime
    pub frequency: u64,
    /// Severity of the latest occurrence
    pub impact: ErrorSeverity,
    /// Recent direction
    pub trend: Trend,
    /// First occurrence
    pub first_seen: DateTime<Utc>,
    /// Latest occurrence
    pub last_seen: DateTime<Utc>,
}

/// Trend of a pattern seen `frequency` times, `recent` of them in the last window
pub fn pattern_trend(frequency: u64, recent: u64) -> Trend {
    if frequency <= 1 {
        Trend::Stable
    } else if recent.saturating_mul(2) > frequency {
        Trend::Increasing
    } else if recent.saturating_mul(10) < frequency {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Tracks error patterns
#[derive(Debug)]
pub struct PatternTracker {
    patterns: DashMap<String, ErrorPattern>,
    window: ChronoDuration,
}

impl PatternTracker {
    /// Tracker comparing the last `window` against lifetime frequency
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            patterns: DashMap::new(),
            window: ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(1)),
        }
    }

    /// Count `context` and recompute its trend against `log`
    ///
    /// `log` is the current error log; it should already contain `context`.
    pub fn record(&self, context: &ErrorContext, log: &[ErrorContext]) -> ErrorPattern {
        let key = context.pattern_key();
        let cutoff = context.created_at - self.window;
        let recent = log
            .iter()
            .filter(|c| c.created_at >= cutoff && c.pattern_key() == key)
            .count() as u64;

        let mut entry = self.patterns.entry(key.clone()).or_insert_with(|| ErrorPattern {
            key,
            frequency: 0,
            impact: context.severity,
            trend: Trend::Stable,
            first_seen: context.created_at,
            last_seen: context.created_at,
        });

        entry.frequency += 1;
        entry.impact = context.severity;
        entry.last_seen = context.created_at;
        entry.trend = pattern_trend(entry.frequency, recent.max(1));
        entry.clone()
    }

    /// Pattern by key
    pub fn get(&self, key: &str) -> Option<ErrorPattern> {
        self.patterns.get(key).map(|p| p.clone())
    }

    /// All patterns, most frequent first
    pub fn all(&self) -> Vec<ErrorPattern> {
        let mut patterns: Vec<_> = self.patterns.iter().map(|p| p.clone()).collect();
        patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.key.cmp(&b.key)));
        patterns
    }

    /// The `n` most frequent patterns
    pub fn top(&self, n: usize) -> Vec<ErrorPattern> {
        let mut patterns = self.all();
        patterns.truncate(n);
        patterns
    }

    /// Number of distinct patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no pattern was seen yet
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

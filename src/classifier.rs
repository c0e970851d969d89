//! Heuristic error classification
//!
//! Both functions are pure and total. Explicit error codes are consulted
//! before message keywords; keyword tables are checked in priority order and
//! the first match wins.

use crate::context::{ErrorCategory, ErrorSeverity, ReportContext, ReportedError};

const CRITICAL_KEYWORDS: &[&str] = &["critical", "fatal", "database"];
const HIGH_KEYWORDS: &[&str] = &["timeout", "network", "auth"];
const MEDIUM_KEYWORDS: &[&str] = &["validation", "rate limit"];

const NETWORK_KEYWORDS: &[&str] = &["network", "connection", "econnrefused", "econnreset", "dns"];
const AUTH_KEYWORDS: &[&str] = &["auth", "unauthorized", "credential", "invalid token"];
const RATE_LIMIT_KEYWORDS: &[&str] = &["rate limit", "too many requests", "quota"];
const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out", "deadline"];
const DATABASE_KEYWORDS: &[&str] = &["database", "sql", "query", "supabase"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Map an error message to a severity
pub fn classify_error_severity(error: &ReportedError) -> ErrorSeverity {
    let message = error.message.to_lowercase();

    if contains_any(&message, CRITICAL_KEYWORDS) {
        ErrorSeverity::Critical
    } else if contains_any(&message, HIGH_KEYWORDS) {
        ErrorSeverity::High
    } else if contains_any(&message, MEDIUM_KEYWORDS) {
        ErrorSeverity::Medium
    } else {
        ErrorSeverity::Low
    }
}

fn category_from_code(code: &str) -> Option<ErrorCategory> {
    match code.trim().to_ascii_uppercase().as_str() {
        "ETIMEDOUT" | "ECONNRESET" | "ECONNREFUSED" | "ENOTFOUND" | "EAI_AGAIN" => {
            Some(ErrorCategory::Network)
        }
        "401" | "403" | "UNAUTHORIZED" | "FORBIDDEN" => Some(ErrorCategory::Authentication),
        "429" | "RATE_LIMITED" => Some(ErrorCategory::RateLimit),
        "408" | "504" => Some(ErrorCategory::Timeout),
        _ => None,
    }
}

fn category_from_component(component: &str) -> Option<ErrorCategory> {
    let normalized = component.trim().to_lowercase().replace(['-', ' '], "_");
    match normalized.as_str() {
        "content_generation" => Some(ErrorCategory::ContentGeneration),
        "link_discovery" => Some(ErrorCategory::LinkDiscovery),
        "posting" => Some(ErrorCategory::Posting),
        _ => None,
    }
}

/// Map an error and its call site to a category
pub fn categorize_error(error: &ReportedError, context: &ReportContext) -> ErrorCategory {
    if let Some(category) = error.code.as_deref().and_then(category_from_code) {
        return category;
    }

    let message = error.message.to_lowercase();
    let code = error.code.as_deref().unwrap_or_default().to_lowercase();
    let matches = |needles: &[&str]| contains_any(&message, needles) || contains_any(&code, needles);

    if matches(NETWORK_KEYWORDS) {
        ErrorCategory::Network
    } else if matches(AUTH_KEYWORDS) {
        ErrorCategory::Authentication
    } else if matches(RATE_LIMIT_KEYWORDS) {
        ErrorCategory::RateLimit
    } else if matches(TIMEOUT_KEYWORDS) {
        ErrorCategory::Timeout
    } else if matches(DATABASE_KEYWORDS) {
        ErrorCategory::Database
    } else {
        category_from_component(&context.component).unwrap_or(ErrorCategory::Infrastructure)
    }
}

/// Severity and category for a report, honoring explicit overrides
pub fn classify(error: &ReportedError, context: &ReportContext) -> (ErrorSeverity, ErrorCategory) {
    let severity = context
        .severity
        .unwrap_or_else(|| classify_error_severity(error));
    let category = context
        .category
        .unwrap_or_else(|| categorize_error(error, context));
    (severity, category)
}

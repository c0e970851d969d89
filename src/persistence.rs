//! Durable error log storage
//!
//! The engine writes every reported error through an [`ErrorStore`]. A write
//! that fails or times out is parked in the [`FallbackQueue`] and replayed on
//! the next monitoring cycle.

use crate::context::{ErrorCategory, ErrorContext, ErrorSeverity};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

/// Row written to the error log table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogRecord {
    /// Error id
    pub id: String,
    /// Campaign, if any
    pub campaign_id: Option<String>,
    /// User, if any
    pub user_id: Option<String>,
    /// Failing component
    pub component: String,
    /// Failing operation
    pub operation: String,
    /// Severity
    pub severity: ErrorSeverity,
    /// Category
    pub category: ErrorCategory,
    /// Message, code, stack, metadata and environment as JSON
    pub error_details: serde_json::Value,
    /// Runtime snapshot as JSON
    pub system_state: serde_json::Value,
    /// Attempts made when the row was written
    pub recovery_attempts: u32,
    /// Whether recovery succeeded
    pub resolved: bool,
    /// Report time
    pub created_at: DateTime<Utc>,
}

impl ErrorLogRecord {
    /// Flatten a context into a row
    pub fn from_context(context: &ErrorContext) -> Result<Self> {
        Ok(Self {
            id: context.error_id.clone(),
            campaign_id: context.campaign_id.clone(),
            user_id: context.user_id.clone(),
            component: context.component.clone(),
            operation: context.operation.clone(),
            severity: context.severity,
            category: context.category,
            error_details: serde_json::to_value(&context.error)?,
            system_state: serde_json::to_value(&context.system_state)?,
            recovery_attempts: context.recovery_attempts,
            resolved: context.resolved,
            created_at: context.created_at,
        })
    }

    /// Key used while the row waits in the fallback queue
    pub fn fallback_key(&self) -> String {
        format!("error_{}", self.id)
    }
}

/// Durable error log backend
#[async_trait]
pub trait ErrorStore: Send + Sync {
    /// Insert or replace a row by id
    async fn save(&self, record: &ErrorLogRecord) -> Result<()>;
}

/// Store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryErrorStore {
    records: RwLock<HashMap<String, ErrorLogRecord>>,
}

impl InMemoryErrorStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Row by id
    pub fn get(&self, id: &str) -> Option<ErrorLogRecord> {
        self.records.read().get(id).cloned()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no rows
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ErrorStore for InMemoryErrorStore {
    async fn save(&self, record: &ErrorLogRecord) -> Result<()> {
        self.records.write().insert(record.id.clone(), record.clone());
        Ok(())
    }
}

/// Bounded queue of rows whose write failed
///
/// A row re-queued under the same key replaces the older copy in place.
/// When full, the oldest row is dropped.
pub struct FallbackQueue {
    entries: Mutex<VecDeque<(String, ErrorLogRecord)>>,
    capacity: usize,
}

impl FallbackQueue {
    /// Queue holding at most `capacity` rows
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Park a row
    pub fn push(&self, record: ErrorLogRecord) {
        let key = record.fallback_key();
        let mut entries = self.entries.lock();

        if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = record;
            return;
        }

        if entries.len() >= self.capacity {
            if let Some((dropped, _)) = entries.pop_front() {
                warn!(key = %dropped, capacity = self.capacity, "Fallback queue full, dropping oldest entry");
            }
        }
        entries.push_back((key, record));
    }

    /// Rows waiting
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Keys waiting, oldest first
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Replay parked rows into `store`, returning how many were written
    ///
    /// Rows that fail again stay queued, keeping their order.
    pub async fn drain_into(&self, store: &dyn ErrorStore, timeout: Duration) -> usize {
        let pending: Vec<(String, ErrorLogRecord)> = self.entries.lock().drain(..).collect();
        let mut written = 0;
        let mut failed = Vec::new();

        for (key, record) in pending {
            match save_with_timeout(store, &record, timeout).await {
                Ok(()) => {
                    debug!(key = %key, "Replayed parked error record");
                    written += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Parked error record still not writable");
                    failed.push(record);
                }
            }
        }

        // New rows may have been parked while draining; re-queued rows go first
        // unless a newer copy with the same key already arrived.
        let mut entries = self.entries.lock();
        for record in failed.into_iter().rev() {
            let key = record.fallback_key();
            if entries.iter().any(|(k, _)| *k == key) {
                continue;
            }
            entries.push_front((key, record));
        }
        while entries.len() > self.capacity {
            entries.pop_back();
        }

        written
    }
}

/// Save under a deadline
pub async fn save_with_timeout(store: &dyn ErrorStore, record: &ErrorLogRecord, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, store.save(record)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::timeout("error log write", timeout)),
    }
}

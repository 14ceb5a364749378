//! Per-job diagnostic trace.
//!
//! The remote steps give no live visibility, so every pipeline event is
//! appended here and the full list is returned with the job result. The
//! trace is owned by one job and handed explicitly to each component.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// One timestamped trace line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: Timestamp,
    pub message: String,
}

/// Append-only, cheaply cloneable trace handle.
///
/// Clones share the same entry list, so a component can record into the
/// trace while the orchestrator still holds it.
#[derive(Debug, Clone)]
pub struct DebugTrace {
    job_id: JobId,
    entries: Arc<Mutex<Vec<TraceEntry>>>,
}

impl DebugTrace {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append `{now, message}` and mirror it to the process log.
    pub fn record(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(job_id = %self.job_id, "{message}");
        self.lock().push(TraceEntry {
            timestamp: chrono::Utc::now(),
            message,
        });
    }

    /// Append a line and log it at WARN.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(job_id = %self.job_id, "{message}");
        self.lock().push(TraceEntry {
            timestamp: chrono::Utc::now(),
            message,
        });
    }

    /// Ordered copy of every entry recorded so far.
    pub fn snapshot(&self) -> Vec<TraceEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TraceEntry>> {
        // A panic while holding the lock cannot leave a half-pushed entry.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

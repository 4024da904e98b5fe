//! Progress events for long-running imports
//!
//! The ingestion loop publishes events on a channel instead of mutating
//! shared UI state; any observer (CLI, test harness) consumes the receiver
//! independently of the loop. Status messages are human-readable Norwegian,
//! matching what operators see in the application.

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::ImportResult;

/// Event stream of one import run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImportEvent {
    /// File parsing started (the first 10% of the progress bar).
    Parsing { message: String },

    /// Estimated API usage may brush the hourly quota; informational only.
    RateLimitWarning {
        estimated_calls: u32,
        hourly_quota: u32,
        estimated_minutes: u64,
        message: String,
    },

    /// Overall progress, 0-100.
    Progress { percent: u8, message: String },

    /// One batch fully submitted (or skipped after exhausted retries).
    BatchComplete {
        batch: usize,
        total_batches: usize,
        imported: u64,
        errors: u64,
    },

    /// Terminal: the run finished, possibly with per-batch errors.
    Completed { result: ImportResult },

    /// Terminal: the run failed before any batch was submitted.
    Failed { session_id: Option<Uuid>, message: String },
}

/// Sender half handed to the coordinator.
///
/// Sending never fails the import: a dropped receiver just means nobody is
/// watching.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<ImportEvent>>,
}

impl ProgressSender {
    /// A sender whose events go nowhere.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: ImportEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Create a connected progress channel.
pub fn progress_channel() -> (ProgressSender, mpsc::UnboundedReceiver<ImportEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx: Some(tx) }, rx)
}

//! Import session lifecycle
//!
//! One session tracks one bulk-import run: start, per-batch offset updates,
//! aggregation on finish. Status is an explicit enum with checked
//! transitions, so an invalid transition is an error instead of a silently
//! overwritten status string. A crash mid-import leaves the session in
//! `Running`/`Recoverable`; the recovery check is the documented resume
//! path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;

/// Session status, terminal on `Completed`/`Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Running,
    Completed,
    Failed,
    /// The client disconnected mid-import; progress is persisted and the
    /// session can be resumed from its last batch offset.
    Recoverable,
}

impl SessionStatus {
    fn allows(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Running, Completed)
                | (Running, Failed)
                | (Running, Recoverable)
                | (Recoverable, Running)
                | (Recoverable, Completed)
                | (Recoverable, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Recoverable => "recoverable",
        }
    }
}

/// Persisted state of one bulk-import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSession {
    pub session_id: Uuid,
    pub year: i32,
    /// Whether the import targets the global registry rather than one
    /// client's scoped snapshot.
    pub is_global: bool,
    pub status: SessionStatus,
    pub rows_processed: u64,
    pub error_count: u64,
    /// Index of the last successfully ingested batch (1-based); resuming
    /// starts after this offset instead of restarting.
    pub last_batch_offset: u64,
    /// Whether post-ingestion aggregation has run.
    pub aggregated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportSession {
    pub fn start(year: i32, is_global: bool) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            year,
            is_global,
            status: SessionStatus::Running,
            rows_processed: 0,
            error_count: 0,
            last_batch_offset: 0,
            aggregated: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checked status transition.
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), SessionError> {
        if !self.status.allows(next) {
            return Err(SessionError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record one successfully submitted batch.
    pub fn record_batch(&mut self, batch_index: u64, imported: u64, errors: u64) {
        self.rows_processed += imported + errors;
        self.error_count += errors;
        self.last_batch_offset = batch_index;
        self.updated_at = Utc::now();
    }
}

/// Result of a recovery check for a possibly interrupted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub can_recover: bool,
    /// Aggregation is itself heavy and separately batched; it may still be
    /// pending even when all row batches landed.
    pub needs_aggregation: bool,
    /// Not part of the recover response on older service versions; resuming
    /// from batch 0 is always safe since the holding upsert is idempotent.
    #[serde(default)]
    pub last_batch_offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_lifecycle() {
        let mut session = ImportSession::start(2024, false);
        assert_eq!(session.status, SessionStatus::Running);
        session.record_batch(1, 500, 0);
        session.record_batch(2, 480, 20);
        assert_eq!(session.rows_processed, 1000);
        assert_eq!(session.error_count, 20);
        assert_eq!(session.last_batch_offset, 2);
        session.transition(SessionStatus::Completed).unwrap();
        assert!(session.status.is_terminal());
    }

    #[test]
    fn recoverable_can_resume() {
        let mut session = ImportSession::start(2024, true);
        session.transition(SessionStatus::Recoverable).unwrap();
        session.transition(SessionStatus::Running).unwrap();
        session.transition(SessionStatus::Completed).unwrap();
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut session = ImportSession::start(2024, false);
        session.transition(SessionStatus::Completed).unwrap();
        let err = session.transition(SessionStatus::Running).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));

        let mut failed = ImportSession::start(2024, false);
        failed.transition(SessionStatus::Failed).unwrap();
        assert!(failed.transition(SessionStatus::Completed).is_err());
    }

    #[test]
    fn running_to_running_is_invalid() {
        let mut session = ImportSession::start(2024, false);
        assert!(session.transition(SessionStatus::Running).is_err());
    }
}

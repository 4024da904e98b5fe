//! Registry storage backend
//!
//! The persistent store (sessions, companies, entities, holdings) is
//! consumed through the [`RegistryBackend`] trait: the coordinator writes
//! batches through it, the graph builder reads holdings through it.
//! [`HttpBackend`] talks to the remote registry service; [`MemoryBackend`]
//! implements the same semantics in-process for tests and offline runs.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackendError;
use crate::registry::session::{ImportSession, RecoveryStatus};
use crate::registry::types::{Company, EntityKey, ShareEntity, ShareHolding, ShareholderRow};

pub use http::HttpBackend;
pub use memory::MemoryBackend;

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Position of a batch within its run, for logging and resume bookkeeping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatchInfo {
    /// 1-based batch index.
    pub current: usize,
    pub total: usize,
}

/// One batch submission to the ingestion endpoint.
///
/// Serde renames follow the service's wire field names (`rows`, `isGlobal`,
/// `batchInfo`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestBatchRequest {
    pub session_id: Uuid,
    pub year: i32,
    #[serde(rename = "isGlobal")]
    pub is_global: bool,
    #[serde(rename = "batchInfo")]
    pub batch_info: BatchInfo,
    #[serde(rename = "rows")]
    pub data: Vec<ShareholderRow>,
}

/// Outcome of one batch: rows written vs rows rejected by the backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub imported: u64,
    pub errors: u64,
}

/// Summary returned when a session finishes and aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishSummary {
    pub session_id: Uuid,
    pub year: i32,
    pub companies_aggregated: u64,
    pub holdings: u64,
    /// Companies whose summed holdings do not reconcile with the issuer's
    /// registered share count. Data-quality signal, not an error.
    pub capital_mismatches: u64,
}

/// Outcome of one paginated aggregation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishBatchOutcome {
    pub processed: u64,
    pub done: bool,
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// The registry store, as seen by ingestion and graph traversal.
///
/// Write operations (`start_session` through `check_recovery`) map 1:1 onto
/// the session endpoints of the remote service. Read operations are the
/// table accesses the ownership graph builder traverses over; they are
/// read-only and safe to call concurrently.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    async fn start_session(
        &self,
        year: i32,
        is_global: bool,
    ) -> Result<ImportSession, BackendError>;

    /// Ingest one batch of normalized rows. All-or-nothing per submitted
    /// row-set; updates the session's counters and last batch offset.
    async fn ingest_batch(&self, req: IngestBatchRequest) -> Result<BatchOutcome, BackendError>;

    /// Aggregate per-company/per-year totals and complete the session.
    async fn finish_import(
        &self,
        session_id: Uuid,
        year: i32,
        is_global: bool,
    ) -> Result<FinishSummary, BackendError>;

    /// Paginated variant of [`finish_import`](Self::finish_import) for runs
    /// where aggregation would exceed a single request timeout.
    async fn finish_import_batch(
        &self,
        session_id: Uuid,
        year: i32,
        batch_size: u32,
        offset: u64,
    ) -> Result<FinishBatchOutcome, BackendError>;

    /// Whether an interrupted session can resume, and whether aggregation
    /// still needs to run.
    async fn check_recovery(
        &self,
        session_id: Uuid,
        year: i32,
        is_global: bool,
    ) -> Result<RecoveryStatus, BackendError>;

    async fn company_by_orgnr(&self, orgnr: &str) -> Result<Option<Company>, BackendError>;

    /// Holdings in the given company for one year (who owns it).
    async fn holdings_of_company(
        &self,
        orgnr: &str,
        year: i32,
    ) -> Result<Vec<ShareHolding>, BackendError>;

    /// Holdings held by the given entity for one year (what it owns).
    async fn holdings_of_holder(
        &self,
        holder: &EntityKey,
        year: i32,
    ) -> Result<Vec<ShareHolding>, BackendError>;

    async fn entities_by_keys(
        &self,
        keys: &[EntityKey],
    ) -> Result<Vec<ShareEntity>, BackendError>;
}

//! In-memory registry backend
//!
//! Implements the full [`RegistryBackend`] contract against in-process
//! tables: the same idempotent holding upsert, session bookkeeping and
//! aggregation semantics as the remote service, minus the network. Used by
//! the test suite and by the CLI's offline mode.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BackendError, SessionError};
use crate::registry::resolve::EntityResolver;
use crate::registry::session::{ImportSession, RecoveryStatus, SessionStatus};
use crate::registry::types::{Company, EntityKey, ShareEntity, ShareHolding};

use super::{
    BatchOutcome, FinishBatchOutcome, FinishSummary, IngestBatchRequest, RegistryBackend,
};

/// Composite holding identity: (company_orgnr, holder, share_class, year).
type HoldingKey = (String, EntityKey, String, i32);

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, ImportSession>,
    resolver: EntityResolver,
    /// Holding facts; upsert on the composite key makes re-ingestion of the
    /// same file idempotent.
    holdings: BTreeMap<HoldingKey, u64>,
    /// Aggregated totals per (company_orgnr, year), written on finish.
    aggregates: HashMap<(String, i32), u64>,
}

/// In-process registry store behind a single mutex.
///
/// Lock scopes are short and synchronous; the async trait surface exists
/// only to match the remote backend.
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // Lock poisoning only happens if a holder panicked; the tables are
        // still structurally valid, so recover the guard.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sorted companies that have holdings in the given year.
    fn companies_for_year(tables: &Tables, year: i32) -> Vec<String> {
        let mut orgnrs: Vec<String> = tables
            .holdings
            .keys()
            .filter(|(_, _, _, y)| *y == year)
            .map(|(orgnr, _, _, _)| orgnr.clone())
            .collect();
        orgnrs.sort();
        orgnrs.dedup();
        orgnrs
    }

    /// Aggregate one company-year and report whether it reconciles with the
    /// issuer's registered share count.
    fn aggregate_company(tables: &mut Tables, orgnr: &str, year: i32) -> bool {
        let total: u64 = tables
            .holdings
            .iter()
            .filter(|((c, _, _, y), _)| c == orgnr && *y == year)
            .map(|(_, shares)| shares)
            .sum();
        tables.aggregates.insert((orgnr.to_string(), year), total);

        let registered = tables.resolver.company(orgnr).and_then(|c| c.total_shares);
        match registered {
            Some(expected) if expected != total => {
                warn!(
                    orgnr,
                    year,
                    expected,
                    actual = total,
                    "holdings do not reconcile with registered share capital"
                );
                false
            }
            _ => true,
        }
    }

    fn session_for_ingest<'a>(
        tables: &'a mut Tables,
        session_id: Uuid,
        year: i32,
    ) -> Result<&'a mut ImportSession, BackendError> {
        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        if session.year != year {
            return Err(SessionError::YearMismatch {
                session_id,
                actual: session.year,
                requested: year,
            }
            .into());
        }
        // Resuming a recoverable session flips it back to running.
        if session.status == SessionStatus::Recoverable {
            session.transition(SessionStatus::Running)?;
        }
        if session.status != SessionStatus::Running {
            return Err(SessionError::InvalidTransition {
                from: session.status.as_str().to_string(),
                to: SessionStatus::Running.as_str().to_string(),
            }
            .into());
        }
        Ok(session)
    }

    /// Aggregated total for a (company, year), if aggregation has run.
    pub fn aggregate_total(&self, orgnr: &str, year: i32) -> Option<u64> {
        self.lock().aggregates.get(&(orgnr.to_string(), year)).copied()
    }

    /// Mark a session recoverable, simulating a client disconnect. Test and
    /// recovery-drill helper.
    pub fn interrupt_session(&self, session_id: Uuid) -> Result<(), BackendError> {
        let mut tables = self.lock();
        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        session.transition(SessionStatus::Recoverable)?;
        Ok(())
    }

    pub fn session(&self, session_id: Uuid) -> Option<ImportSession> {
        self.lock().sessions.get(&session_id).cloned()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryBackend for MemoryBackend {
    async fn start_session(
        &self,
        year: i32,
        is_global: bool,
    ) -> Result<ImportSession, BackendError> {
        let session = ImportSession::start(year, is_global);
        self.lock().sessions.insert(session.session_id, session.clone());
        debug!(session_id = %session.session_id, year, "started import session");
        Ok(session)
    }

    async fn ingest_batch(&self, req: IngestBatchRequest) -> Result<BatchOutcome, BackendError> {
        let mut tables = self.lock();
        Self::session_for_ingest(&mut tables, req.session_id, req.year)?;

        // Stage the whole row-set before touching the tables so a batch is
        // never partially written.
        let mut staged: Vec<(HoldingKey, u64)> = Vec::with_capacity(req.data.len());
        for row in &req.data {
            let holder = tables.resolver.resolve(row);
            tables.resolver.resolve_company(row);
            staged.push((
                (
                    row.company_orgnr.clone(),
                    holder,
                    row.share_class.clone(),
                    req.year,
                ),
                row.shares,
            ));
        }
        let imported = staged.len() as u64;
        for (key, shares) in staged {
            tables.holdings.insert(key, shares);
        }

        let session = tables
            .sessions
            .get_mut(&req.session_id)
            .expect("session checked above");
        session.record_batch(req.batch_info.current as u64, imported, 0);
        debug!(
            session_id = %req.session_id,
            batch = req.batch_info.current,
            total = req.batch_info.total,
            imported,
            "batch ingested"
        );
        Ok(BatchOutcome { imported, errors: 0 })
    }

    async fn finish_import(
        &self,
        session_id: Uuid,
        year: i32,
        _is_global: bool,
    ) -> Result<FinishSummary, BackendError> {
        let mut tables = self.lock();
        let orgnrs = Self::companies_for_year(&tables, year);

        let mut mismatches = 0u64;
        for orgnr in &orgnrs {
            if !Self::aggregate_company(&mut tables, orgnr, year) {
                mismatches += 1;
            }
        }
        let holdings = tables
            .holdings
            .keys()
            .filter(|(_, _, _, y)| *y == year)
            .count() as u64;

        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        session.aggregated = true;
        session.transition(SessionStatus::Completed)?;

        Ok(FinishSummary {
            session_id,
            year,
            companies_aggregated: orgnrs.len() as u64,
            holdings,
            capital_mismatches: mismatches,
        })
    }

    async fn finish_import_batch(
        &self,
        session_id: Uuid,
        year: i32,
        batch_size: u32,
        offset: u64,
    ) -> Result<FinishBatchOutcome, BackendError> {
        let mut tables = self.lock();
        let orgnrs = Self::companies_for_year(&tables, year);

        let start = offset as usize;
        let end = (start + batch_size as usize).min(orgnrs.len());
        for orgnr in orgnrs.iter().take(end).skip(start) {
            Self::aggregate_company(&mut tables, orgnr, year);
        }
        let done = end >= orgnrs.len();

        if done {
            let session = tables
                .sessions
                .get_mut(&session_id)
                .ok_or(SessionError::NotFound(session_id))?;
            session.aggregated = true;
            if !session.status.is_terminal() {
                session.transition(SessionStatus::Completed)?;
            }
        }

        Ok(FinishBatchOutcome {
            processed: (end - start) as u64,
            done,
        })
    }

    async fn check_recovery(
        &self,
        session_id: Uuid,
        year: i32,
        _is_global: bool,
    ) -> Result<RecoveryStatus, BackendError> {
        let tables = self.lock();
        let session = tables
            .sessions
            .get(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        if session.year != year {
            return Err(SessionError::YearMismatch {
                session_id,
                actual: session.year,
                requested: year,
            }
            .into());
        }
        Ok(RecoveryStatus {
            can_recover: !session.status.is_terminal(),
            needs_aggregation: !session.aggregated,
            last_batch_offset: session.last_batch_offset,
        })
    }

    async fn company_by_orgnr(&self, orgnr: &str) -> Result<Option<Company>, BackendError> {
        Ok(self.lock().resolver.company(orgnr).cloned())
    }

    async fn holdings_of_company(
        &self,
        orgnr: &str,
        year: i32,
    ) -> Result<Vec<ShareHolding>, BackendError> {
        let tables = self.lock();
        Ok(tables
            .holdings
            .iter()
            .filter(|((c, _, _, y), _)| c == orgnr && *y == year)
            .map(|((c, holder, class, y), shares)| ShareHolding {
                company_orgnr: c.clone(),
                holder: holder.clone(),
                share_class: class.clone(),
                year: *y,
                shares: *shares,
            })
            .collect())
    }

    async fn holdings_of_holder(
        &self,
        holder: &EntityKey,
        year: i32,
    ) -> Result<Vec<ShareHolding>, BackendError> {
        let tables = self.lock();
        Ok(tables
            .holdings
            .iter()
            .filter(|((_, h, _, y), _)| h == holder && *y == year)
            .map(|((c, h, class, y), shares)| ShareHolding {
                company_orgnr: c.clone(),
                holder: h.clone(),
                share_class: class.clone(),
                year: *y,
                shares: *shares,
            })
            .collect())
    }

    async fn entities_by_keys(
        &self,
        keys: &[EntityKey],
    ) -> Result<Vec<ShareEntity>, BackendError> {
        let tables = self.lock();
        Ok(keys
            .iter()
            .filter_map(|k| tables.resolver.entity(k).cloned())
            .collect())
    }
}

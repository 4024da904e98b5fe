//! Batch ingestion coordinator
//!
//! Drives one bulk import end to end: parse the whole file first (so no
//! rate-limited quota is spent on a file that cannot be imported), then
//! submit fixed-size batches strictly sequentially with an inter-batch
//! delay. Sequential submission is required by the external rate limit,
//! not a performance choice. A batch that exhausts its retries is skipped
//! and its rows counted as errors; partial success is reported, never
//! fatal.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{BatchInfo, IngestBatchRequest, RegistryBackend};
use crate::error::{ImportError, RegistryError, SessionError};

use super::normalize::map_row_to_shareholder_data;
use super::progress::{ImportEvent, ProgressSender};
use super::reader::read_registry_file;
use super::retry::RetryPolicy;
use super::types::{ImportResult, ShareholderRow};

/// Rows per batch. Sized so that a multi-hundred-thousand-row registry
/// stays well under the backend's hourly call quota: 500k rows is 1000
/// calls at this size.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Pause between successful batches, independent of per-call latency.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(750);

/// Known hourly quota of the ingestion endpoint.
pub const DEFAULT_HOURLY_QUOTA: u32 = 1000;

/// Tuning knobs for one import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub retry: RetryPolicy,
    pub hourly_call_quota: u32,
    /// Import into the global registry rather than a client-scoped one.
    pub is_global: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            retry: RetryPolicy::default(),
            hourly_call_quota: DEFAULT_HOURLY_QUOTA,
            is_global: false,
        }
    }
}

/// Number of batches for `rows` rows at `batch_size`.
pub fn batch_count(rows: usize, batch_size: usize) -> usize {
    rows.div_ceil(batch_size)
}

/// Progress percentage for `done` of `total` batches.
///
/// The first 10% is reserved for parsing and the last 5% for finalization,
/// so batch progress spans 10-90.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 10;
    }
    (10 + done * 80 / total) as u8
}

/// Parse a registry file into normalized rows, counting drops.
///
/// Fatal on unsupported files and on files with zero valid rows; row-level
/// problems only increment the dropped count.
pub fn parse_registry_file(path: &Path) -> Result<(Vec<ShareholderRow>, usize), ImportError> {
    let raw_rows = read_registry_file(path)?;
    let total = raw_rows.len();
    let rows: Vec<ShareholderRow> = raw_rows
        .iter()
        .filter_map(map_row_to_shareholder_data)
        .collect();
    let dropped = total - rows.len();
    if rows.is_empty() {
        return Err(ImportError::EmptyFile {
            path: path.display().to_string(),
            dropped,
        });
    }
    info!(
        path = %path.display(),
        rows = rows.len(),
        dropped,
        "parsed registry file"
    );
    Ok((rows, dropped))
}

/// Import one registry file for the given year.
///
/// Returns a summary with imported/error counts even when individual
/// batches were skipped; only pre-ingestion failures (unreadable file, zero
/// valid rows, session start) surface as `Err`.
pub async fn process_shareholder_file(
    path: &Path,
    year: i32,
    backend: &dyn RegistryBackend,
    config: &ImportConfig,
    progress: &ProgressSender,
) -> Result<ImportResult, RegistryError> {
    let started_at = Utc::now();
    progress.send(ImportEvent::Parsing {
        message: format!("Leser aksjonærregister fra {}...", path.display()),
    });

    let (rows, dropped_rows) = parse_registry_file(path)?;
    let total_rows = rows.len();
    let total_batches = batch_count(total_rows, config.batch_size);

    let session = match backend.start_session(year, config.is_global).await {
        Ok(session) => session,
        Err(e) => {
            progress.send(ImportEvent::Failed {
                session_id: None,
                message: format!("Kunne ikke starte importsesjon: {e}"),
            });
            return Err(e.into());
        }
    };
    let session_id = session.session_id;
    info!(%session_id, year, total_rows, total_batches, "import started");

    warn_if_quota_at_risk(total_batches, config, progress);

    let (imported, batch_errors) =
        submit_batches(&rows, 0, session_id, year, backend, config, progress).await;
    let errors = dropped_rows as u64 + batch_errors;

    finalize_import(
        RunTotals {
            session_id,
            year,
            total_rows,
            dropped_rows,
            imported,
            errors,
            batches: total_batches,
            started_at,
        },
        backend,
        config,
        progress,
    )
    .await
}

/// Resume an interrupted import into its existing session.
///
/// Batches up to the session's persisted last offset are skipped; the
/// remainder is submitted with the same retry/skip semantics as a fresh run.
/// Re-submitting an overlapping batch would be harmless (the holding upsert
/// is idempotent), but skipping avoids burning quota on rows that already
/// landed.
pub async fn resume_shareholder_file(
    path: &Path,
    session_id: Uuid,
    year: i32,
    backend: &dyn RegistryBackend,
    config: &ImportConfig,
    progress: &ProgressSender,
) -> Result<ImportResult, RegistryError> {
    let started_at = Utc::now();
    let recovery = backend
        .check_recovery(session_id, year, config.is_global)
        .await?;
    if !recovery.can_recover {
        return Err(SessionError::NotRecoverable(session_id).into());
    }

    progress.send(ImportEvent::Parsing {
        message: format!("Leser aksjonærregister fra {} på nytt...", path.display()),
    });
    let (rows, dropped_rows) = parse_registry_file(path)?;
    let total_rows = rows.len();
    let total_batches = batch_count(total_rows, config.batch_size);
    let skip = (recovery.last_batch_offset as usize).min(total_batches);
    info!(
        %session_id,
        year,
        skipped_batches = skip,
        total_batches,
        "resuming import session"
    );

    let (imported, batch_errors) =
        submit_batches(&rows, skip, session_id, year, backend, config, progress).await;
    let errors = dropped_rows as u64 + batch_errors;

    finalize_import(
        RunTotals {
            session_id,
            year,
            total_rows,
            dropped_rows,
            imported,
            errors,
            batches: total_batches,
            started_at,
        },
        backend,
        config,
        progress,
    )
    .await
}

/// Submit batches `skip_batches + 1 ..= total` sequentially, with per-batch
/// retry and skip-on-exhaustion. Returns (imported, errors).
async fn submit_batches(
    rows: &[ShareholderRow],
    skip_batches: usize,
    session_id: Uuid,
    year: i32,
    backend: &dyn RegistryBackend,
    config: &ImportConfig,
    progress: &ProgressSender,
) -> (u64, u64) {
    let total_batches = batch_count(rows.len(), config.batch_size);
    let mut imported = 0u64;
    let mut errors = 0u64;

    for (index, chunk) in rows.chunks(config.batch_size).enumerate() {
        let batch_no = index + 1;
        if batch_no <= skip_batches {
            continue;
        }
        let request = IngestBatchRequest {
            session_id,
            year,
            is_global: config.is_global,
            batch_info: BatchInfo {
                current: batch_no,
                total: total_batches,
            },
            data: chunk.to_vec(),
        };

        let outcome = config
            .retry
            .run(
                |_attempt| {
                    let request = request.clone();
                    async move { backend.ingest_batch(request).await }
                },
                |e| e.is_retryable(),
            )
            .await;

        match outcome {
            Ok(outcome) => {
                imported += outcome.imported;
                errors += outcome.errors;
            }
            Err(e) => {
                // Degraded, not fatal: the batch is skipped and its rows
                // counted as errors.
                warn!(
                    %session_id,
                    batch = batch_no,
                    rows = chunk.len(),
                    error = %e,
                    "batch skipped after exhausting retries"
                );
                errors += chunk.len() as u64;
            }
        }

        progress.send(ImportEvent::Progress {
            percent: progress_percent(batch_no, total_batches),
            message: format!("Importerer batch {batch_no} av {total_batches}..."),
        });
        progress.send(ImportEvent::BatchComplete {
            batch: batch_no,
            total_batches,
            imported,
            errors,
        });

        if batch_no < total_batches {
            tokio::time::sleep(config.batch_delay).await;
        }
    }
    (imported, errors)
}

struct RunTotals {
    session_id: Uuid,
    year: i32,
    total_rows: usize,
    dropped_rows: usize,
    imported: u64,
    errors: u64,
    batches: usize,
    started_at: DateTime<Utc>,
}

/// Finish the session (aggregation) and emit the terminal events.
async fn finalize_import(
    totals: RunTotals,
    backend: &dyn RegistryBackend,
    config: &ImportConfig,
    progress: &ProgressSender,
) -> Result<ImportResult, RegistryError> {
    let session_id = totals.session_id;
    progress.send(ImportEvent::Progress {
        percent: 95,
        message: "Fullfører import og aggregerer beholdninger...".to_string(),
    });

    match backend
        .finish_import(session_id, totals.year, config.is_global)
        .await
    {
        Ok(summary) => {
            if summary.capital_mismatches > 0 {
                warn!(
                    %session_id,
                    mismatches = summary.capital_mismatches,
                    "some companies do not reconcile with registered share capital"
                );
            }
        }
        Err(e) => {
            // The session stays running/recoverable server-side; the
            // recovery check is the documented way to resume aggregation.
            progress.send(ImportEvent::Failed {
                session_id: Some(session_id),
                message: format!("Aggregering feilet, sesjonen kan gjenopptas: {e}"),
            });
            return Err(e.into());
        }
    }

    let result = ImportResult {
        session_id,
        year: totals.year,
        total_rows: totals.total_rows,
        dropped_rows: totals.dropped_rows,
        imported: totals.imported,
        errors: totals.errors,
        batches: totals.batches,
        started_at: totals.started_at,
        finished_at: Utc::now(),
    };
    progress.send(ImportEvent::Progress {
        percent: 100,
        message: format!(
            "Import fullført: {} rader importert, {} feil.",
            result.imported, result.errors
        ),
    });
    progress.send(ImportEvent::Completed {
        result: result.clone(),
    });
    info!(%session_id, imported = result.imported, errors = result.errors, "import finished");
    Ok(result)
}

/// Surface rate-limit risk before the run starts: estimated calls against
/// the hourly quota, with an estimated completion time. A warning, never a
/// block.
fn warn_if_quota_at_risk(total_batches: usize, config: &ImportConfig, progress: &ProgressSender) {
    // start + finish + one call per batch
    let estimated_calls = total_batches as u32 + 2;
    if estimated_calls <= config.hourly_call_quota {
        return;
    }
    let per_batch = config.batch_delay + Duration::from_secs(1);
    let estimated_minutes = (per_batch.as_secs() * total_batches as u64) / 60;
    warn!(
        estimated_calls,
        quota = config.hourly_call_quota,
        estimated_minutes,
        "estimated API usage exceeds hourly quota"
    );
    progress.send(ImportEvent::RateLimitWarning {
        estimated_calls,
        hourly_quota: config.hourly_call_quota,
        estimated_minutes,
        message: format!(
            "Importen krever ca. {estimated_calls} API-kall (kvote {} per time). \
             Estimert varighet: {estimated_minutes} minutter.",
            config.hourly_call_quota
        ),
    });
}

/// Drive any pending aggregation for a recovered session to completion,
/// page by page, to avoid request timeouts on large registries.
pub async fn run_pending_aggregation(
    backend: &dyn RegistryBackend,
    session_id: Uuid,
    year: i32,
    page_size: u32,
) -> Result<u64, RegistryError> {
    let mut offset = 0u64;
    let mut processed = 0u64;
    loop {
        let outcome = backend
            .finish_import_batch(session_id, year, page_size, offset)
            .await?;
        processed += outcome.processed;
        if outcome.done {
            return Ok(processed);
        }
        offset += outcome.processed;
    }
}

//! Session lifecycle and crash-recovery tests

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use aksjebok::backend::{BatchInfo, IngestBatchRequest, MemoryBackend};
use aksjebok::registry::import::{resume_shareholder_file, run_pending_aggregation, ImportConfig};
use aksjebok::registry::progress::ProgressSender;
use aksjebok::registry::retry::RetryPolicy;
use aksjebok::registry::types::ShareholderRow;
use aksjebok::{BackendError, RegistryBackend, RegistryError, SessionError, SessionStatus};

fn row(company_orgnr: &str, holder_name: &str, shares: u64, total: Option<u64>) -> ShareholderRow {
    ShareholderRow {
        company_orgnr: company_orgnr.into(),
        company_name: format!("Selskap {company_orgnr}"),
        holder_name: holder_name.into(),
        holder_orgnr: None,
        holder_birth_year: Some(1970),
        holder_country: "NO".into(),
        share_class: "Ordinære aksjer".into(),
        shares,
        company_total_shares: total,
    }
}

fn batch(
    session_id: uuid::Uuid,
    current: usize,
    total: usize,
    data: Vec<ShareholderRow>,
) -> IngestBatchRequest {
    IngestBatchRequest {
        session_id,
        year: 2024,
        is_global: false,
        batch_info: BatchInfo { current, total },
        data,
    }
}

#[tokio::test]
async fn interrupted_session_resumes_from_last_offset() {
    let backend = MemoryBackend::new();
    let session = backend.start_session(2024, false).await.unwrap();
    let id = session.session_id;

    backend
        .ingest_batch(batch(id, 1, 2, vec![row("911111111", "Ola Nordmann", 100, None)]))
        .await
        .unwrap();

    // Client disconnects mid-import.
    backend.interrupt_session(id).unwrap();
    assert_eq!(
        backend.session(id).unwrap().status,
        SessionStatus::Recoverable
    );

    let status = backend.check_recovery(id, 2024, false).await.unwrap();
    assert!(status.can_recover);
    assert!(status.needs_aggregation);
    assert_eq!(status.last_batch_offset, 1);

    // Resuming: the next batch flips the session back to running.
    backend
        .ingest_batch(batch(id, 2, 2, vec![row("911111111", "Kari Nordmann", 200, None)]))
        .await
        .unwrap();
    assert_eq!(backend.session(id).unwrap().status, SessionStatus::Running);

    let summary = backend.finish_import(id, 2024, false).await.unwrap();
    assert_eq!(summary.holdings, 2);
    assert_eq!(
        backend.session(id).unwrap().status,
        SessionStatus::Completed
    );

    let status = backend.check_recovery(id, 2024, false).await.unwrap();
    assert!(!status.can_recover);
    assert!(!status.needs_aggregation);
}

fn registry_csv() -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    write!(
        file,
        "Orgnr;Selskap;Navn aksjonær;Fødselsår/Orgnr;Antall aksjer\n\
         911111111;Eksempel AS;A Hansen;1960;10\n\
         911111111;Eksempel AS;B Hansen;1961;20\n\
         911111111;Eksempel AS;C Hansen;1962;30\n\
         911111111;Eksempel AS;D Hansen;1963;40\n"
    )
    .unwrap();
    file
}

fn resume_config() -> ImportConfig {
    ImportConfig {
        batch_size: 2,
        batch_delay: Duration::from_millis(1),
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn resume_skips_already_ingested_batches() {
    let backend = MemoryBackend::new();
    let session = backend.start_session(2024, false).await.unwrap();
    let id = session.session_id;

    // Batch 1 of 2 landed before the client disconnected.
    backend
        .ingest_batch(batch(
            id,
            1,
            2,
            vec![
                row("911111111", "A Hansen", 10, None),
                row("911111111", "B Hansen", 20, None),
            ],
        ))
        .await
        .unwrap();
    backend.interrupt_session(id).unwrap();

    let file = registry_csv();
    let result = resume_shareholder_file(
        file.path(),
        id,
        2024,
        &backend,
        &resume_config(),
        &ProgressSender::disabled(),
    )
    .await
    .unwrap();

    // Only the second batch was submitted on resume.
    assert_eq!(result.imported, 2);
    let session = backend.session(id).unwrap();
    assert_eq!(session.rows_processed, 4);
    assert_eq!(session.status, SessionStatus::Completed);

    let holdings = backend.holdings_of_company("911111111", 2024).await.unwrap();
    assert_eq!(holdings.len(), 4);
}

#[tokio::test]
async fn completed_session_cannot_be_resumed() {
    let backend = MemoryBackend::new();
    let session = backend.start_session(2024, false).await.unwrap();
    let id = session.session_id;
    backend
        .ingest_batch(batch(id, 1, 1, vec![row("911111111", "A Hansen", 10, None)]))
        .await
        .unwrap();
    backend.finish_import(id, 2024, false).await.unwrap();

    let file = registry_csv();
    let err = resume_shareholder_file(
        file.path(),
        id,
        2024,
        &backend,
        &resume_config(),
        &ProgressSender::disabled(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Session(SessionError::NotRecoverable(_))
    ));
}

#[tokio::test]
async fn completed_session_rejects_further_batches() {
    let backend = MemoryBackend::new();
    let session = backend.start_session(2024, false).await.unwrap();
    let id = session.session_id;

    backend
        .ingest_batch(batch(id, 1, 1, vec![row("911111111", "Ola Nordmann", 100, None)]))
        .await
        .unwrap();
    backend.finish_import(id, 2024, false).await.unwrap();

    let err = backend
        .ingest_batch(batch(id, 2, 2, vec![row("911111111", "Kari Nordmann", 1, None)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BackendError::Session(SessionError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn unknown_session_is_reported() {
    let backend = MemoryBackend::new();
    let err = backend
        .check_recovery(uuid::Uuid::new_v4(), 2024, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BackendError::Session(SessionError::NotFound(_))
    ));
}

#[tokio::test]
async fn year_mismatch_is_rejected() {
    let backend = MemoryBackend::new();
    let session = backend.start_session(2024, false).await.unwrap();
    let err = backend
        .check_recovery(session.session_id, 2023, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BackendError::Session(SessionError::YearMismatch { .. })
    ));
}

#[tokio::test]
async fn paginated_aggregation_covers_all_companies() {
    let backend = MemoryBackend::new();
    let session = backend.start_session(2024, false).await.unwrap();
    let id = session.session_id;

    // Five issuers, one holding each.
    let rows: Vec<ShareholderRow> = (1..=5)
        .map(|i| row(&format!("91111111{i}"), "Ola Nordmann", i * 10, None))
        .collect();
    backend.ingest_batch(batch(id, 1, 1, rows)).await.unwrap();
    backend.interrupt_session(id).unwrap();

    // Aggregate two companies per page.
    let processed = run_pending_aggregation(&backend, id, 2024, 2).await.unwrap();
    assert_eq!(processed, 5);
    assert_eq!(
        backend.session(id).unwrap().status,
        SessionStatus::Completed
    );
    for i in 1..=5u64 {
        assert_eq!(
            backend.aggregate_total(&format!("91111111{i}"), 2024),
            Some(i * 10)
        );
    }
}

#[tokio::test]
async fn capital_mismatch_is_a_signal_not_an_error() {
    let backend = MemoryBackend::new();
    let session = backend.start_session(2024, false).await.unwrap();
    let id = session.session_id;

    // Registered total 1000, but holdings only sum to 900.
    backend
        .ingest_batch(batch(
            id,
            1,
            1,
            vec![
                row("911111111", "Ola Nordmann", 600, Some(1000)),
                row("911111111", "Kari Nordmann", 300, Some(1000)),
            ],
        ))
        .await
        .unwrap();

    let summary = backend.finish_import(id, 2024, false).await.unwrap();
    assert_eq!(summary.capital_mismatches, 1);
    assert_eq!(summary.companies_aggregated, 1);
    assert_eq!(backend.aggregate_total("911111111", 2024), Some(900));
}

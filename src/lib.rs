//! Aksjebok - shareholder registry ingestion and ownership graphs
//!
//! Bulk import of shareholder registry exports (CSV/Excel, hundreds of
//! thousands of rows), entity resolution across years, and on-demand
//! traversal of the resulting ownership graph.
//!
//! ## Pipeline
//! File -> row normalizer -> entity resolver -> batch ingestion coordinator
//! -> registry backend. Later, the ownership graph service reads the
//! persisted holdings to answer who-owns-whom queries to a bounded depth.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use aksjebok::backend::MemoryBackend;
//! use aksjebok::registry::import::{process_shareholder_file, ImportConfig};
//! use aksjebok::registry::progress::ProgressSender;
//!
//! # async fn run() -> Result<(), aksjebok::error::RegistryError> {
//! let backend = MemoryBackend::new();
//! let result = process_shareholder_file(
//!     std::path::Path::new("aksjonaerregister_2024.csv"),
//!     2024,
//!     &backend,
//!     &ImportConfig::default(),
//!     &ProgressSender::disabled(),
//! )
//! .await?;
//! println!("{} rader importert, {} feil", result.imported, result.errors);
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Storage backend (remote service + in-memory)
pub mod backend;

// Ingestion pipeline
pub mod registry;

// Ownership graph queries
pub mod graph;

// Public re-exports
pub use backend::{HttpBackend, MemoryBackend, RegistryBackend};
pub use error::{BackendError, ImportError, RegistryError, SessionError};
pub use graph::{Direction, GraphQuery, OwnershipGraph, OwnershipGraphService};
pub use registry::import::{process_shareholder_file, resume_shareholder_file, ImportConfig};
pub use registry::progress::{progress_channel, ImportEvent, ProgressSender};
pub use registry::session::{ImportSession, RecoveryStatus, SessionStatus};
pub use registry::types::{
    Company, CompanyShareholder, EntityKey, EntityType, ImportResult, ShareEntity, ShareHolding,
    ShareholderRow,
};

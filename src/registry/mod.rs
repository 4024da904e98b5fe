//! Shareholder registry ingestion
//!
//! File readers, row normalization, entity resolution and the batch
//! ingestion coordinator. The flow is: file → [`reader`] → [`normalize`] →
//! [`resolve`] → [`import`] (batched, rate-limited writes through the
//! backend), with session state tracked for crash recovery.

pub mod export;
pub mod import;
pub mod normalize;
pub mod progress;
pub mod reader;
pub mod resolve;
pub mod retry;
pub mod session;
pub mod types;

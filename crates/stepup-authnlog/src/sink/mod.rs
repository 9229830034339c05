//! Idempotent record sinks
//!
//! Every record is written under its fingerprint. Writing the same
//! fingerprint twice fully replaces the earlier row, which is what makes
//! re-reading part of a log after a crash harmless.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use stepup_common::Fingerprint;
use thiserror::Error;

use crate::extract::ExtractedRecord;

pub use memory::MemorySink;
pub use sql::{Dialect, SqlSink};

/// Result of a single upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row with this fingerprint existed
    Inserted,
    /// A row existed and was overwritten, whether or not its content differed
    Replaced,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unsupported database URL scheme: {0}")]
    UnsupportedDatabase(String),

    #[error("Invalid table name '{0}': only ASCII letters, digits and '_' are allowed")]
    InvalidTableName(String),

    #[error("Unexpected affected row count {0} from upsert")]
    UnexpectedRowCount(u64),
}

/// Destination for extracted records, keyed by fingerprint
#[async_trait]
pub trait RecordSink: Send {
    /// Insert the record, or replace the whole row if the fingerprint exists
    ///
    /// Must be atomic per call.
    async fn upsert(
        &mut self,
        fingerprint: &Fingerprint,
        record: &ExtractedRecord,
    ) -> Result<UpsertOutcome, SinkError>;
}

#[async_trait]
impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    async fn upsert(
        &mut self,
        fingerprint: &Fingerprint,
        record: &ExtractedRecord,
    ) -> Result<UpsertOutcome, SinkError> {
        (**self).upsert(fingerprint, record).await
    }
}

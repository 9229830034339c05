//! In-memory sink for tests and dry runs

use std::collections::HashMap;

use async_trait::async_trait;
use stepup_common::Fingerprint;

use super::{RecordSink, SinkError, UpsertOutcome};
use crate::extract::ExtractedRecord;

/// Keeps upserted records in a map, with optional failure injection
#[derive(Debug, Default)]
pub struct MemorySink {
    records: HashMap<Fingerprint, ExtractedRecord>,
    writes: u64,
    fail_at_write: Option<u64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th upsert (1-based, counted over the sink's lifetime) fail
    pub fn failing_at(n: u64) -> Self {
        Self {
            fail_at_write: Some(n),
            ..Self::default()
        }
    }

    /// Stop injecting failures
    pub fn heal(&mut self) {
        self.fail_at_write = None;
    }

    pub fn records(&self) -> &HashMap<Fingerprint, ExtractedRecord> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of upsert attempts, failed ones included
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn upsert(
        &mut self,
        fingerprint: &Fingerprint,
        record: &ExtractedRecord,
    ) -> Result<UpsertOutcome, SinkError> {
        self.writes += 1;
        if self.fail_at_write == Some(self.writes) {
            return Err(SinkError::Database(sqlx::Error::PoolClosed));
        }

        match self.records.insert(*fingerprint, record.clone()) {
            None => Ok(UpsertOutcome::Inserted),
            Some(_) => Ok(UpsertOutcome::Replaced),
        }
    }
}

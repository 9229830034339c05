//! Per-run ingestion counters

use serde::Serialize;
use tracing::{error, info};

/// What happened to a single line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Blank line
    Ignored,
    /// No JSON object, or malformed JSON
    ParseError,
    Inserted,
    /// A record with the same fingerprint was already stored
    Existed,
}

/// Counters accumulated over one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionStats {
    pub lines_read: u64,
    pub lines_ignored: u64,
    pub parse_errors: u64,
    pub records_inserted: u64,
    pub records_existed: u64,
}

impl IngestionStats {
    /// Count a line as read, before knowing what becomes of it
    pub fn line_read(&mut self) {
        self.lines_read += 1;
    }

    /// Account for the outcome of a line already counted as read
    pub fn record(&mut self, outcome: LineOutcome) {
        match outcome {
            LineOutcome::Ignored => self.lines_ignored += 1,
            LineOutcome::ParseError => self.parse_errors += 1,
            LineOutcome::Inserted => self.records_inserted += 1,
            LineOutcome::Existed => self.records_existed += 1,
        }
    }

    /// Lines that reached the sink successfully
    pub fn records_written(&self) -> u64 {
        self.records_inserted + self.records_existed
    }

    /// Emit the end-of-run summary; parse errors are raised to error level
    pub fn log_summary(&self) {
        info!(lines_read = self.lines_read, "Read {} line(s)", self.lines_read);
        info!(
            records_inserted = self.records_inserted,
            "Added {} new record(s) to the database", self.records_inserted
        );
        if self.parse_errors > 0 {
            error!(
                parse_errors = self.parse_errors,
                "Skipped {} line(s) because of parse errors", self.parse_errors
            );
        } else {
            info!(parse_errors = 0, "Skipped 0 line(s) because of parse errors");
        }
        info!(
            lines_ignored = self.lines_ignored,
            "Ignored {} empty line(s)", self.lines_ignored
        );
        info!(
            records_existed = self.records_existed,
            "{} record(s) already existed in the database", self.records_existed
        );
    }
}

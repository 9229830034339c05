//! Error types for log ingestion
//!
//! Everything here stops a run. Malformed lines are not errors; they are
//! counted in [`IngestionStats`](crate::pipeline::IngestionStats) and skipped.

use std::path::PathBuf;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::pipeline::{IngestReport, IngestionStats};
use crate::sink::SinkError;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The log file cannot be opened. Check the path and read permissions.
    #[error("Cannot open log file '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading failed midway through the file
    #[error("Read error at file position {offset}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint location cannot be written
    #[error("Checkpoint error: {0}. Check that the stat_file directory exists and is writable.")]
    Checkpoint(#[from] CheckpointError),

    /// Writing a record failed
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// A run stopped midway; `report` holds the progress made before `source`
    #[error(
        "Ingestion aborted at line {}, file position {}: {source}",
        report.position.line,
        report.position.offset
    )]
    Aborted {
        report: IngestReport,
        #[source]
        source: Box<IngestError>,
    },
}

impl IngestError {
    /// Statistics of the run, when it got far enough to collect any
    pub fn stats(&self) -> Option<&IngestionStats> {
        match self {
            IngestError::Aborted { report, .. } => Some(&report.stats),
            _ => None,
        }
    }
}

//! Resumable ingestion of an authentication log
//!
//! One run goes through these phases:
//!
//! 1. **Start**: open the log read-only. Failure is fatal.
//! 2. **Resume**: seek to the checkpoint for this file, if there is one,
//!    otherwise start at offset 0 / line 0. The resume position is written
//!    back immediately, which doubles as a writability check.
//! 3. **Read**: one line at a time, strictly sequentially. Blank lines are
//!    ignored, lines without (valid) JSON are counted and skipped, records are
//!    fingerprinted and upserted. Every `checkpoint_interval` lines read the
//!    start of the next unread line is checkpointed.
//! 4. **Finalize**: always runs. Writes the last checkpoint (best effort after
//!    a failure) and logs the statistics and the position reached.
//!
//! Sink and I/O errors abort the run; parse errors never do. Lines after the
//! last checkpoint may be read again by the next run, which the idempotent
//! upsert makes harmless.

pub mod scanner;
pub mod stats;

use serde::Serialize;
use std::path::PathBuf;
use stepup_common::Fingerprint;
use tracing::{debug, error, info, instrument, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::DEFAULT_CHECKPOINT_INTERVAL;
use crate::error::IngestError;
use crate::extract::{extract, Extraction};
use crate::sink::{RecordSink, UpsertOutcome};

pub use scanner::{LineScanner, LogLine, Position};
pub use stats::{IngestionStats, LineOutcome};

/// Tunables for a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Lines read between checkpoint writes
    pub checkpoint_interval: u64,
    /// Stop after this many lines in one run
    pub max_lines: Option<u64>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            max_lines: None,
        }
    }
}

/// Result of a finished (or aborted) run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub stats: IngestionStats,
    /// Where the next run will resume
    pub position: Position,
}

/// Moves records from one log file into a sink
pub struct Pipeline<S> {
    path: PathBuf,
    identity: String,
    sink: S,
    checkpoints: CheckpointStore,
    options: IngestOptions,
}

impl<S: RecordSink> Pipeline<S> {
    /// The path as given is the file identity used for checkpoints.
    pub fn new(path: impl Into<PathBuf>, sink: S, checkpoints: CheckpointStore) -> Self {
        let path = path.into();
        let identity = path.to_string_lossy().into_owned();
        Self {
            path,
            identity,
            sink,
            checkpoints,
            options: IngestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = IngestOptions {
            checkpoint_interval: options.checkpoint_interval.max(1),
            ..options
        };
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Ingest from the checkpointed position (or the start) to end of file
    ///
    /// Returns [`IngestError::Aborted`] with the partial report when a sink
    /// or I/O error stops the run midway.
    #[instrument(skip_all, fields(file = %self.identity))]
    pub async fn run(&mut self) -> Result<IngestReport, IngestError> {
        let start = self.resume_position().await?;

        let mut scanner = LineScanner::open(&self.path, start)
            .await
            .map_err(|source| IngestError::Open {
                path: self.path.clone(),
                source,
            })?;

        // Fails here, before any line is read, when the location is unwritable
        self.checkpoints.save(&self.checkpoint_at(start)).await?;
        if let Some(path) = self.checkpoints.path() {
            info!(
                stat_file = %path.display(),
                interval = self.options.checkpoint_interval,
                "Writing progress to checkpoint file"
            );
        }

        let mut stats = IngestionStats::default();
        let mut resume_at = start;
        let result = self.scan(&mut scanner, &mut stats, &mut resume_at).await;

        self.finalize(stats, resume_at, scanner.position(), result)
            .await
    }

    async fn resume_position(&self) -> Result<Position, IngestError> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|source| IngestError::Open {
                path: self.path.clone(),
                source,
            })?;

        let Some(checkpoint) = self.checkpoints.load(&self.identity).await else {
            return Ok(Position::default());
        };

        if checkpoint.pos > metadata.len() {
            warn!(
                pos = checkpoint.pos,
                file_len = metadata.len(),
                "Checkpoint lies beyond the end of the file; was it truncated or rotated?"
            );
        }

        info!(
            pos = checkpoint.pos,
            line = checkpoint.line,
            "Resuming from checkpoint"
        );
        Ok(Position {
            line: checkpoint.line,
            offset: checkpoint.pos,
        })
    }

    async fn scan<R>(
        &mut self,
        scanner: &mut LineScanner<R>,
        stats: &mut IngestionStats,
        resume_at: &mut Position,
    ) -> Result<(), IngestError>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        loop {
            if stats.lines_read > 0 && stats.lines_read % self.options.checkpoint_interval == 0 {
                self.checkpoints.save(&self.checkpoint_at(*resume_at)).await?;
            }

            if self
                .options
                .max_lines
                .is_some_and(|max| stats.lines_read >= max)
            {
                info!(lines_read = stats.lines_read, "Line limit reached");
                return Ok(());
            }

            let offset = scanner.position().offset;
            let line = scanner
                .next_line()
                .await
                .map_err(|source| IngestError::Read { offset, source })?;
            let Some(line) = line else {
                return Ok(());
            };
            stats.line_read();

            let outcome = self.process(&line).await?;
            stats.record(outcome);

            // An unterminated last line may still be growing, and its newline
            // is not read yet. Leave the checkpoint in front of it whether or
            // not it parsed; re-reading it upserts the same record again.
            *resume_at = if line.terminated {
                scanner.position()
            } else {
                line.start()
            };
        }
    }

    async fn process(&mut self, line: &LogLine) -> Result<LineOutcome, IngestError> {
        let parsed = match extract(&line.bytes) {
            Ok(Extraction::Blank) => return Ok(LineOutcome::Ignored),
            Ok(Extraction::Parsed(parsed)) => parsed,
            Err(e) => {
                info!(line = line.number, error = %e, "Ignoring line #{}", line.number);
                debug!(line = line.number, content = %line.lossy_content(), "Offending line");
                return Ok(LineOutcome::ParseError);
            },
        };

        let fingerprint = Fingerprint::of(&parsed.payload);
        let outcome = self.sink.upsert(&fingerprint, &parsed.record).await?;
        debug!(line = line.number, %fingerprint, ?outcome, "Stored record");

        Ok(match outcome {
            UpsertOutcome::Inserted => LineOutcome::Inserted,
            UpsertOutcome::Replaced => LineOutcome::Existed,
        })
    }

    async fn finalize(
        &self,
        stats: IngestionStats,
        resume_at: Position,
        reached: Position,
        result: Result<(), IngestError>,
    ) -> Result<IngestReport, IngestError> {
        let report = IngestReport {
            stats,
            position: resume_at,
        };
        let checkpoint = self.checkpoint_at(resume_at);

        let result = match result {
            Ok(()) => self
                .checkpoints
                .save(&checkpoint)
                .await
                .map_err(IngestError::from),
            Err(e) => {
                error!(
                    line = reached.line,
                    offset = resume_at.offset,
                    error = %e,
                    "Ingestion failed near line number {}, file position {}",
                    reached.line,
                    resume_at.offset
                );
                if let Err(save_err) = self.checkpoints.save(&checkpoint).await {
                    warn!(error = %save_err, "Could not write final checkpoint");
                }
                Err(e)
            },
        };

        stats.log_summary();
        info!(offset = reached.offset, "Current read position: {}", reached.offset);
        info!(line = reached.line, "Current line number: {}", reached.line);
        if resume_at != reached {
            info!(
                line = resume_at.line,
                offset = resume_at.offset,
                "Next run resumes before the incomplete last line"
            );
        }

        match result {
            Ok(()) => Ok(report),
            Err(source) => Err(IngestError::Aborted {
                report,
                source: Box::new(source),
            }),
        }
    }

    fn checkpoint_at(&self, position: Position) -> Checkpoint {
        Checkpoint {
            file: self.identity.clone(),
            line: position.line,
            pos: position.offset,
        }
    }
}

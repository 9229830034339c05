//! Resume points for re-running ingestion over the same log file
//!
//! A checkpoint is the small JSON object `{"file": ..., "line": ..., "pos": ...}`
//! where `pos` is the byte offset of the next unread line and `line` is the
//! number of lines before it. The file identity is the path as given on the
//! command line, so renaming or rotating the log defeats resumption.
//!
//! Two processes sharing one checkpoint location is unsupported; the last
//! writer wins.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to write checkpoint file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Position of the next unread line of a log file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identity of the log file this position belongs to
    pub file: String,
    /// Number of lines before `pos`
    pub line: u64,
    /// Byte offset of the start of the next unread line
    pub pos: u64,
}

/// Loads and atomically replaces the persisted checkpoint
///
/// Without a configured location every operation is a no-op and ingestion
/// always starts at the beginning of the file.
#[derive(Debug, Clone, Default)]
pub struct CheckpointStore {
    path: Option<PathBuf>,
}

impl CheckpointStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self::new(Some(path.into()))
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the persisted checkpoint regardless of which file it belongs to
    ///
    /// Missing, unreadable and malformed files all yield `None`.
    pub async fn read(&self) -> Option<Checkpoint> {
        let path = self.path.as_deref()?;

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No checkpoint file yet");
                return None;
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read checkpoint file, starting from the beginning");
                return None;
            },
        };

        match serde_json::from_slice::<Checkpoint>(&bytes) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed checkpoint file");
                None
            },
        }
    }

    /// Load the checkpoint for `file`, if one exists for that identity
    pub async fn load(&self, file: &str) -> Option<Checkpoint> {
        let checkpoint = self.read().await?;

        if checkpoint.file != file {
            info!(
                checkpoint_file = %checkpoint.file,
                log_file = %file,
                "Checkpoint belongs to a different log file, starting from the beginning"
            );
            return None;
        }

        Some(checkpoint)
    }

    /// Persist `checkpoint`, replacing any previous one
    ///
    /// The data goes to a sibling temporary file which is synced and renamed
    /// over the target, so an interrupted write leaves the old checkpoint intact.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(checkpoint)?;
        let tmp_path = temp_path(path);
        let io_err = |source: std::io::Error| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(&tmp_path).await.map_err(io_err)?;
        file.write_all(&bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(&tmp_path, path).await.map_err(io_err)?;

        debug!(
            path = %path.display(),
            line = checkpoint.line,
            pos = checkpoint.pos,
            "Wrote checkpoint"
        );
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "checkpoint".into());
    name.push(".tmp");
    path.with_file_name(name)
}

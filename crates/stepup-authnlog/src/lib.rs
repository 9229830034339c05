//! Stepup Authentication Log Importer
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Reads the Stepup authentication log, where every line carries a JSON
//! record after a free-form prefix, and upserts each record into a database
//! table keyed by a fingerprint of its content. Progress is checkpointed so
//! a later run resumes where the previous one stopped.
//!
//! # Modules
//!
//! - **extract**: Locates and decodes the JSON record in a line
//! - **sink**: Idempotent record storage (SQL and in-memory)
//! - **checkpoint**: Persisted resume points
//! - **pipeline**: The resumable read/extract/upsert loop
//! - **config**: File and environment configuration
//!
//! # Example
//!
//! ```no_run
//! use stepup_authnlog::checkpoint::CheckpointStore;
//! use stepup_authnlog::config::AppConfig;
//! use stepup_authnlog::pipeline::Pipeline;
//! use stepup_authnlog::sink::SqlSink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load("config_authnlog.json")?;
//!     let sink = SqlSink::connect(&config.database).await?;
//!
//!     let mut pipeline = Pipeline::new(
//!         "/var/log/stepup/authentication.log",
//!         sink,
//!         CheckpointStore::new(config.stat_file.clone()),
//!     );
//!     let report = pipeline.run().await?;
//!     println!("{} records written", report.stats.records_written());
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod sink;

// Re-export commonly used types
pub use error::{IngestError, Result};
pub use pipeline::{IngestOptions, IngestReport, IngestionStats, Pipeline};
pub use sink::{MemorySink, RecordSink, SqlSink};

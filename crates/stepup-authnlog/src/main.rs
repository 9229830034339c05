//! Stepup Tools - authentication log importer

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use stepup_authnlog::checkpoint::CheckpointStore;
use stepup_authnlog::config::{AppConfig, DEFAULT_CONFIG_FILE};
use stepup_authnlog::pipeline::{IngestOptions, Pipeline};
use stepup_authnlog::sink::{MemorySink, SqlSink};
use stepup_common::logging::{init_logging, LogConfig, LogLevel};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "stepup-tools")]
#[command(author, version, about = "Stepup maintenance tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import an authentication log into the database
    Authnlog {
        /// Log file to read
        file: PathBuf,

        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Lines between checkpoint writes (overrides the configuration)
        #[arg(long)]
        checkpoint_interval: Option<u64>,

        /// Stop after reading this many lines
        #[arg(long)]
        max_lines: Option<u64>,

        /// Create the record table if it does not exist
        #[arg(long)]
        create_table: bool,

        /// Parse and count without touching the database or the checkpoint
        #[arg(long, conflicts_with = "create_table")]
        dry_run: bool,
    },

    /// Create the record table
    InitDb {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Print the persisted checkpoint
    Checkpoint {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("stepup-tools")
        .build()
        .with_env_overrides()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Authnlog {
            file,
            config,
            checkpoint_interval,
            max_lines,
            create_table,
            dry_run,
        } => {
            let config = load_config(&config)?;
            let options = IngestOptions {
                checkpoint_interval: checkpoint_interval.unwrap_or(config.checkpoint_interval),
                max_lines,
            };
            if dry_run {
                dry_run_log(&file, options).await?;
            } else {
                import_log(&file, &config, options, create_table).await?;
            }
        },
        Command::InitDb { config } => {
            let config = load_config(&config)?;
            let sink = SqlSink::connect(&config.database).await?;
            sink.ensure_schema().await?;
            sink.close().await;
            info!(table = %config.database.table, "Record table is ready");
        },
        Command::Checkpoint { config } => {
            let config = load_config(&config)?;
            let store = CheckpointStore::new(config.stat_file);
            match store.read().await {
                Some(checkpoint) => println!("{}", serde_json::to_string_pretty(&checkpoint)?),
                None => println!("none"),
            }
        },
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig> {
    info!(config = %path.display(), "Loading configuration");
    AppConfig::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
}

async fn import_log(
    file: &Path,
    config: &AppConfig,
    options: IngestOptions,
    create_table: bool,
) -> Result<()> {
    info!(file = %file.display(), "Importing authentication log");

    let sink = SqlSink::connect(&config.database).await?;
    if create_table {
        sink.ensure_schema().await?;
    }

    let checkpoints = CheckpointStore::new(config.stat_file.clone());
    let mut pipeline = Pipeline::new(file, sink, checkpoints).with_options(options);
    let result = pipeline.run().await;
    pipeline.sink().close().await;

    let report = result?;
    info!(
        records_written = report.stats.records_written(),
        "Import complete"
    );
    Ok(())
}

async fn dry_run_log(file: &Path, options: IngestOptions) -> Result<()> {
    info!(file = %file.display(), "Dry run: records are kept in memory only");

    let mut pipeline =
        Pipeline::new(file, MemorySink::new(), CheckpointStore::disabled()).with_options(options);
    let report = pipeline.run().await?;

    info!(
        distinct_records = pipeline.sink().len(),
        records_written = report.stats.records_written(),
        "Dry run complete"
    );
    Ok(())
}

//! Shared helpers for the importer integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use std::path::{Path, PathBuf};
use stepup_authnlog::config::DatabaseConfig;
use stepup_authnlog::sink::SqlSink;
use tempfile::TempDir;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stepup_authnlog=debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A log line as the gateway writes it: a monolog-style prefix, then JSON
pub fn authn_line(request_id: &str, second_factor_id: &str) -> String {
    format!(
        "[2015-06-01 12:00:00] authentication.INFO: intrinsic loa {{\"second_factor_id\":\"{second_factor_id}\",\"second_factor_type\":\"yubikey\",\"institution\":\"institution-a.example.com\",\"authentication_result\":\"OK\",\"resulting_loa\":\"http://stepup.example.com/assurance/loa2\",\"identity_id\":\"8b5cdd14-74b0-4b6c-8b49-29b9e1b3a8ad\",\"authenticating_idp\":\"https://idp.example.com/metadata\",\"requesting_sp\":\"https://sp.example.com/metadata\",\"request_id\":\"{request_id}\",\"datetime\":\"2015-06-01T12:00:00+02:00\"}}"
    )
}

/// `count` distinct authentication lines
pub fn authn_lines(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| authn_line(&format!("req-{i:04}"), &format!("sf-{}", i % 7)))
        .collect()
}

/// Write `lines`, each newline-terminated, to `name` inside `dir`
pub fn write_log(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    let contents: String = lines.iter().map(|l| format!("{l}\n")).collect();
    std::fs::write(&path, contents).unwrap();
    path
}

/// File-backed SQLite database in a temporary directory
pub struct TestDatabase {
    pub dir: TempDir,
    pub config: DatabaseConfig,
}

impl TestDatabase {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("stepup.db").display());
        Ok(Self {
            dir,
            config: DatabaseConfig::from_url(url),
        })
    }

    /// Connected sink with the record table in place
    pub async fn sink(&self) -> Result<SqlSink> {
        let sink = SqlSink::connect(&self.config).await?;
        sink.ensure_schema().await?;
        Ok(sink)
    }
}

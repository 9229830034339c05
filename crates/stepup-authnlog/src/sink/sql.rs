//! Relational sink backed by sqlx
//!
//! The SQL dialect follows the connection URL scheme. SQLite and PostgreSQL
//! use `INSERT .. ON CONFLICT (id) DO UPDATE .. RETURNING revision`: the
//! `revision` column starts at 0 and is bumped on every replacement, so one
//! statement both writes the row and reports whether it already existed.
//! MySQL has no `RETURNING`, so it uses `REPLACE INTO` and the affected-row
//! count (1 for a fresh insert, 2 for delete-then-insert).
//!
//! `revision` is bookkeeping for the importer only. It is the one column an
//! identical replacement changes; readers of the record columns see no
//! difference, and [`SqlSink::fetch`] does not return it.

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::time::Duration;
use stepup_common::Fingerprint;
use tracing::{debug, info};

use super::{RecordSink, SinkError, UpsertOutcome};
use crate::config::DatabaseConfig;
use crate::extract::{ExtractedRecord, Field};

/// SQL flavour spoken by the connected database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    /// Derive the dialect from a sqlx connection URL
    pub fn from_url(url: &str) -> Result<Self, SinkError> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            _ => Err(SinkError::UnsupportedDatabase(scheme)),
        }
    }

    fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{n}"),
            Dialect::Postgres => format!("${n}"),
            Dialect::MySql => "?".to_string(),
        }
    }

    fn placeholders(self, count: usize) -> String {
        (1..=count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Single-statement upsert writing the fingerprint and every mapped column
    pub fn upsert_sql(self, table: &str) -> String {
        let columns: Vec<&str> = Field::ALL.iter().map(|f| f.column()).collect();
        let values = self.placeholders(columns.len() + 1);

        match self {
            Dialect::Sqlite | Dialect::Postgres => {
                let updates = columns
                    .iter()
                    .map(|c| format!("{c} = excluded.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "INSERT INTO {table} (id, {cols}, revision) VALUES ({values}, 0) \
                     ON CONFLICT (id) DO UPDATE SET {updates}, revision = {table}.revision + 1 \
                     RETURNING revision",
                    cols = columns.join(", "),
                )
            },
            Dialect::MySql => format!(
                "REPLACE INTO {table} (id, {cols}) VALUES ({values})",
                cols = columns.join(", "),
            ),
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for the record table
    pub fn create_table_sql(self, table: &str) -> String {
        let (id_type, text_type, counter_type) = match self {
            Dialect::Sqlite => ("BLOB", "TEXT", "INTEGER"),
            Dialect::Postgres => ("BYTEA", "TEXT", "BIGINT"),
            Dialect::MySql => ("BINARY(16)", "VARCHAR(255)", "BIGINT"),
        };
        let columns = Field::ALL
            .iter()
            .map(|f| format!("{} {text_type} NULL", f.column()))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "CREATE TABLE IF NOT EXISTS {table} (id {id_type} NOT NULL PRIMARY KEY, {columns}, \
             revision {counter_type} NOT NULL DEFAULT 0)"
        )
    }
}

/// Table names end up in SQL text, so only plain identifiers are accepted
pub fn validate_table_name(table: &str) -> Result<(), SinkError> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && table.len() <= 64 {
        Ok(())
    } else {
        Err(SinkError::InvalidTableName(table.to_string()))
    }
}

/// Upserts records into a relational table over a sqlx pool
#[derive(Debug, Clone)]
pub struct SqlSink {
    pool: AnyPool,
    dialect: Dialect,
    table: String,
    upsert_sql: String,
}

impl SqlSink {
    /// Connect using the database section of the configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, SinkError> {
        let url = config.connection_url();
        let dialect = Dialect::from_url(&url)?;
        validate_table_name(&config.table)?;

        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&url)
            .await?;

        info!(dialect = ?dialect, table = %config.table, "Connected to database");
        Self::from_pool(pool, dialect, &config.table)
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: AnyPool, dialect: Dialect, table: &str) -> Result<Self, SinkError> {
        validate_table_name(table)?;
        let upsert_sql = dialect.upsert_sql(table);
        debug!(sql = %upsert_sql, "Prepared upsert statement");

        Ok(Self {
            pool,
            dialect,
            table: table.to_string(),
            upsert_sql,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Create the record table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        let sql = self.dialect.create_table_sql(&self.table);
        debug!(sql = %sql, "Ensuring record table");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Read a stored record back by fingerprint
    pub async fn fetch(&self, fingerprint: &Fingerprint) -> Result<Option<ExtractedRecord>, SinkError> {
        let columns: Vec<&str> = Field::ALL.iter().map(|f| f.column()).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE id = {}",
            columns.join(", "),
            self.table,
            self.dialect.placeholder(1)
        );

        let row = sqlx::query(&sql)
            .bind(fingerprint.as_bytes().to_vec())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<i64, SinkError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn record_from_row(row: &AnyRow) -> Result<ExtractedRecord, SinkError> {
    let mut record = ExtractedRecord::default();
    for field in Field::ALL {
        if let Some(value) = row.try_get::<Option<String>, _>(field.column())? {
            record = record.with(field, value);
        }
    }
    Ok(record)
}

#[async_trait]
impl RecordSink for SqlSink {
    async fn upsert(
        &mut self,
        fingerprint: &Fingerprint,
        record: &ExtractedRecord,
    ) -> Result<UpsertOutcome, SinkError> {
        let mut query = sqlx::query(&self.upsert_sql).bind(fingerprint.as_bytes().to_vec());
        for (_, value) in record.iter() {
            query = query.bind(value.map(str::to_owned));
        }

        match self.dialect {
            Dialect::Sqlite | Dialect::Postgres => {
                let revision: i64 = query.fetch_one(&self.pool).await?.try_get(0)?;
                Ok(if revision == 0 {
                    UpsertOutcome::Inserted
                } else {
                    UpsertOutcome::Replaced
                })
            },
            Dialect::MySql => match query.execute(&self.pool).await?.rows_affected() {
                1 => Ok(UpsertOutcome::Inserted),
                2 => Ok(UpsertOutcome::Replaced),
                n => Err(SinkError::UnexpectedRowCount(n)),
            },
        }
    }
}

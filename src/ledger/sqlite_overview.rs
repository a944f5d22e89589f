//! Overview kept in a local SQLite database.
//!
//! The database lives next to the artifacts and is versioned with
//! forward-only migrations. Upserts use `ON CONFLICT` on the output key.

use super::migrations;
use super::overview::OverviewSink;
use super::{OverviewRow, RecordStatus};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// File name of the overview database inside the output directory.
pub const OVERVIEW_DB_FILE: &str = "overview.db";

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;

const UPSERT_SQL: &str = r#"
    INSERT INTO query_overview
    (output_key, name, description, query_type, statement, status,
     record_count, duration_secs, created_at, error, location)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(output_key) DO UPDATE SET
        name = excluded.name,
        description = excluded.description,
        query_type = excluded.query_type,
        statement = excluded.statement,
        status = excluded.status,
        record_count = excluded.record_count,
        duration_secs = excluded.duration_secs,
        created_at = excluded.created_at,
        error = excluded.error,
        location = excluded.location
"#;

/// Raw database row for an overview entry.
#[derive(Debug, Clone, FromRow)]
struct OverviewDbRow {
    output_key: String,
    name: String,
    description: String,
    query_type: String,
    statement: String,
    status: String,
    record_count: i64,
    duration_secs: f64,
    created_at: String,
    error: Option<String>,
    location: String,
}

impl From<OverviewDbRow> for OverviewRow {
    fn from(row: OverviewDbRow) -> Self {
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_default();
        Self {
            output_key: row.output_key,
            name: row.name,
            description: row.description,
            query_type: row.query_type,
            statement: row.statement,
            status: RecordStatus::from_str(&row.status),
            record_count: row.record_count.max(0) as u64,
            duration_secs: row.duration_secs,
            created_at,
            error: row.error,
            location: row.location,
        }
    }
}

/// Overview sink backed by the `query_overview` table.
pub struct SqliteOverview {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteOverview {
    /// Opens or creates the overview database at the specified path.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::ensure_parent_dirs(path)?;

        let mut last_error = None;
        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * 2u64.pow(attempt)))
                    .await;
            }

            match Self::connect(path).await {
                Ok(pool) => {
                    migrations::run_migrations(&pool).await?;
                    info!("Overview database opened at {}", path.display());
                    return Ok(Self {
                        pool,
                        db_path: path.to_path_buf(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open overview database (attempt {}): {e}", attempt + 1);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LedgerError::ledger_write("Failed to open overview database after retries")
        }))
    }

    /// Opens an overview on an existing pool, running migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        migrations::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            db_path: PathBuf::from(":memory:"),
        })
    }

    async fn connect(path: &Path) -> Result<SqlitePool> {
        let conn_str = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&conn_str)
            .map_err(|e| LedgerError::ledger_write(format!("Invalid overview path: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                LedgerError::ledger_write(format!("Failed to connect to overview database: {e}"))
            })
    }

    fn ensure_parent_dirs(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LedgerError::ledger_write(format!(
                    "Failed to create output directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn begin(&self) -> Result<Transaction<'_, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| LedgerError::ledger_write(format!("Failed to start transaction: {e}")))
    }
}

async fn upsert_row(tx: &mut Transaction<'_, Sqlite>, row: &OverviewRow) -> Result<()> {
    sqlx::query(UPSERT_SQL)
        .bind(&row.output_key)
        .bind(&row.name)
        .bind(&row.description)
        .bind(&row.query_type)
        .bind(&row.statement)
        .bind(row.status.as_str())
        .bind(row.record_count as i64)
        .bind(row.duration_secs)
        .bind(row.created_at.to_rfc3339())
        .bind(&row.error)
        .bind(&row.location)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            LedgerError::ledger_write(format!(
                "Failed to upsert overview row '{}': {e}",
                row.output_key
            ))
        })?;
    Ok(())
}

async fn commit(tx: Transaction<'_, Sqlite>) -> Result<()> {
    tx.commit()
        .await
        .map_err(|e| LedgerError::ledger_write(format!("Failed to commit overview: {e}")))
}

#[async_trait]
impl OverviewSink for SqliteOverview {
    async fn load_all(&self) -> Result<Vec<OverviewRow>> {
        let rows: Vec<OverviewDbRow> = sqlx::query_as(
            r#"
            SELECT output_key, name, description, query_type, statement, status,
                   record_count, duration_secs, created_at, error, location
            FROM query_overview
            ORDER BY created_at, output_key
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::ledger_write(format!("Failed to load overview: {e}")))?;

        Ok(rows.into_iter().map(OverviewRow::from).collect())
    }

    async fn save_all(&self, rows: &[OverviewRow]) -> Result<()> {
        let mut tx = self.begin().await?;
        sqlx::query("DELETE FROM query_overview")
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::ledger_write(format!("Failed to clear overview: {e}")))?;
        for row in rows {
            upsert_row(&mut tx, row).await?;
        }
        commit(tx).await
    }

    async fn upsert_many(&self, rows: &[OverviewRow]) -> Result<()> {
        let mut tx = self.begin().await?;
        for row in rows {
            upsert_row(&mut tx, row).await?;
        }
        commit(tx).await
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.db_path.display())
    }
}

//! Schema versioning and migrations for the overview database.
//!
//! Manages database schema evolution with forward-only migrations.

use crate::error::{LedgerError, Result};
use sqlx::sqlite::SqlitePool;
use tracing::info;

const CURRENT_VERSION: i32 = 1;

/// Runs all pending migrations on the database.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    ensure_schema_versions_table(pool).await?;

    let current = get_current_version(pool).await?;

    if current > CURRENT_VERSION {
        return Err(LedgerError::ledger_write(format!(
            "Overview schema version ({current}) is newer than supported version \
             ({CURRENT_VERSION}). Please upgrade query-ledger."
        )));
    }

    if current < CURRENT_VERSION {
        info!(
            "Migrating overview database from version {} to {}",
            current, CURRENT_VERSION
        );
        run_pending_migrations(pool, current).await?;
    }

    Ok(())
}

async fn ensure_schema_versions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        LedgerError::ledger_write(format!("Failed to create schema_versions table: {e}"))
    })?;

    Ok(())
}

async fn get_current_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM schema_versions")
        .fetch_optional(pool)
        .await
        .map_err(|e| LedgerError::ledger_write(format!("Failed to get schema version: {e}")))?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

async fn run_pending_migrations(pool: &SqlitePool, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=CURRENT_VERSION {
        run_migration(pool, version).await?;
        record_version(pool, version).await?;
        info!("Applied overview migration v{}", version);
    }
    Ok(())
}

async fn record_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_versions (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(|e| LedgerError::ledger_write(format!("Failed to record migration: {e}")))?;
    Ok(())
}

async fn run_migration(pool: &SqlitePool, version: i32) -> Result<()> {
    match version {
        1 => migration_v1(pool).await,
        _ => Err(LedgerError::ledger_write(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: the overview table.
async fn migration_v1(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_overview (
            output_key TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            query_type TEXT NOT NULL DEFAULT '',
            statement TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('success', 'failure')),
            record_count INTEGER NOT NULL DEFAULT 0,
            duration_secs REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            error TEXT,
            location TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        LedgerError::ledger_write(format!("Failed to create query_overview table: {e}"))
    })?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_query_overview_name
        ON query_overview(name)
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| LedgerError::ledger_write(format!("Failed to create overview index: {e}")))?;

    Ok(())
}

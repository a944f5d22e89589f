//! SQLite database client implementation.
//!
//! Opens SQLite sources read-only. Useful for local extracts and for
//! exercising whole batches without a server.

use crate::config::ConnectionConfig;
use crate::db::{ClientOptions, ColumnInfo, DatabaseClient, QueryResult, Row, Value};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as SqlxColumn, Executor as _, Row as SqlxRow, Statement as _, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// SQLite database client.
#[derive(Debug)]
pub struct SqliteClient {
    pool: SqlitePool,
    query_timeout: Option<Duration>,
}

impl SqliteClient {
    /// Creates a new SqliteClient from an existing connection pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            query_timeout: None,
        }
    }

    /// Opens the database file named in the configuration.
    pub async fn connect(config: &ConnectionConfig, options: ClientOptions) -> Result<Self> {
        let conn_str = config.to_connection_string()?;
        let connect_options = SqliteConnectOptions::from_str(&conn_str)
            .map_err(|e| LedgerError::connection(format!("Invalid SQLite path: {e}")))?
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options)
            .await
            .map_err(|e| {
                LedgerError::connection(format!(
                    "Cannot open {}: {e}",
                    config.display_string()
                ))
            })?;

        debug!("Opened {}", config.display_string());
        Ok(Self {
            pool,
            query_timeout: options.query_timeout,
        })
    }

    /// Fetches column metadata for a statement that returned no rows.
    async fn fetch_column_metadata(&self, sql: &str) -> Vec<ColumnInfo> {
        match (&self.pool).prepare(sql).await {
            Ok(statement) => statement
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            Err(e) => {
                debug!("Could not describe empty result set: {e}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl DatabaseClient for SqliteClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {

        let fetch = sqlx::query(sql).fetch_all(&self.pool);
        let result = match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch).await.map_err(|_| {
                LedgerError::statement(format!(
                    "Query timed out after {} seconds",
                    limit.as_secs()
                ))
            })?,
            None => fetch.await,
        }
        .map_err(|e| LedgerError::statement(e.to_string()))?;

        let columns: Vec<ColumnInfo> = match result.first() {
            Some(first_row) => first_row
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                .collect(),
            None => self.fetch_column_metadata(sql).await,
        };

        let rows: Vec<Row> = result.iter().map(convert_row).collect();
        Ok(QueryResult::with_data(columns, rows))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Converts a sqlx SqliteRow to our Row type.
fn convert_row(row: &SqliteRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single value, preferring the declared column type and falling
/// back to the value's storage class.
fn convert_value(row: &SqliteRow, index: usize, declared: &str) -> Value {
    let storage = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_uppercase(),
        Err(_) => return Value::Null,
    };

    match declared.to_uppercase().as_str() {
        "BOOLEAN" => {
            if let Ok(v) = row.try_get::<bool, _>(index) {
                return Value::Bool(v);
            }
        }
        "DATE" => {
            if let Ok(v) = row.try_get::<NaiveDate, _>(index) {
                return Value::Date(v);
            }
        }
        "DATETIME" | "TIMESTAMP" => {
            if let Ok(v) = row.try_get::<NaiveDateTime, _>(index) {
                return Value::Timestamp(v);
            }
        }
        _ => {}
    }

    match storage.as_str() {
        "INTEGER" => row
            .try_get::<i64, _>(index)
            .map(Value::Int)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<f64, _>(index)
            .map(Value::Float)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(Value::Bytes)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

//! Database abstraction layer for query-ledger.
//!
//! Provides a trait-based interface for database operations, allowing
//! different database backends to be used interchangeably.

mod mock;
mod postgres;
mod sqlite;
mod types;

pub use mock::{FailingConnector, MockConnector, MockDatabaseClient};
pub use postgres::PostgresClient;
pub use sqlite::SqliteClient;
pub use types::{ColumnInfo, QueryResult, Row, Value};

use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    Sqlite,
}

impl DatabaseBackend {
    /// Returns the backend as a string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Returns the default port for this backend.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Sqlite => 0,
        }
    }

    /// Returns the URL scheme for this backend.
    pub fn url_scheme(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Client-side settings applied when opening a connection.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Sessions the client may hold open at once.
    pub max_connections: u32,
    /// Optional statement timeout enforced by the client.
    pub query_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_connections: 1,
            query_timeout: None,
        }
    }
}

/// Creates a database client for the given backend and configuration.
///
/// This is the central factory function for database connections.
pub async fn connect(
    config: &ConnectionConfig,
    options: ClientOptions,
) -> Result<Arc<dyn DatabaseClient>> {
    match config.backend {
        DatabaseBackend::Postgres => {
            let client = PostgresClient::connect(config, options).await?;
            Ok(Arc::new(client))
        }
        DatabaseBackend::Sqlite => {
            let client = SqliteClient::connect(config, options).await?;
            Ok(Arc::new(client))
        }
    }
}

/// Trait defining the interface for database clients.
///
/// All database operations are async and return Results with LedgerError.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Executes a SQL statement and returns every row it produces.
    async fn execute_query(&self, sql: &str) -> Result<QueryResult>;

    /// Closes the database connection.
    async fn close(&self) -> Result<()>;
}

/// Hands out database clients to batch workers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new client.
    async fn connect(&self, options: ClientOptions) -> Result<Arc<dyn DatabaseClient>>;

    /// Human-readable target, without credentials.
    fn describe(&self) -> String;
}

/// Connector backed by a [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct ConfigConnector {
    config: ConnectionConfig,
}

impl ConfigConnector {
    /// Creates a connector for the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for ConfigConnector {
    async fn connect(&self, options: ClientOptions) -> Result<Arc<dyn DatabaseClient>> {
        connect(&self.config, options).await
    }

    fn describe(&self) -> String {
        self.config.display_string()
    }
}

//! Mock database client for testing.
//!
//! Provides an in-memory database implementation with scripted responses.

use super::{ClientOptions, ColumnInfo, Connector, DatabaseClient, QueryResult, Row, Value};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A scripted reply for statements containing a given fragment.
#[derive(Debug, Clone)]
enum MockReply {
    Rows(QueryResult),
    Error(String),
}

/// A mock database client that returns predefined results.
///
/// Statements are matched against registered fragments in registration
/// order; unmatched SELECTs return a single mock row.
#[derive(Debug, Default)]
pub struct MockDatabaseClient {
    replies: Vec<(String, MockReply)>,
    latency: Duration,
    executed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockDatabaseClient {
    /// Creates a new mock database client with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies to statements containing `fragment` with the given rows.
    pub fn with_rows(mut self, fragment: &str, columns: &[&str], rows: Vec<Row>) -> Self {
        let columns = columns
            .iter()
            .map(|name| ColumnInfo::new(*name, "text"))
            .collect();
        self.replies.push((
            fragment.to_string(),
            MockReply::Rows(QueryResult::with_data(columns, rows)),
        ));
        self
    }

    /// Fails statements containing `fragment` with the given message.
    pub fn with_error(mut self, fragment: &str, message: &str) -> Self {
        self.replies
            .push((fragment.to_string(), MockReply::Error(message.to_string())));
        self
    }

    /// Delays every statement by the given duration.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of statements executed so far.
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    /// Highest number of statements observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn reply_for(&self, sql: &str) -> Result<QueryResult> {
        let scripted = self
            .replies
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()));

        match scripted {
            Some((_, MockReply::Rows(result))) => Ok(result.clone()),
            Some((_, MockReply::Error(message))) => Err(LedgerError::statement(message.clone())),
            None if sql.trim_start().to_uppercase().starts_with("SELECT") => {
                Ok(QueryResult::with_data(
                    vec![ColumnInfo::new("result", "text")],
                    vec![vec![Value::String(format!("Mock result for: {}", sql))]],
                ))
            }
            None => Ok(QueryResult::new()),
        }
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.executed.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.reply_for(sql)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Connector that hands out the same mock client to every caller.
#[derive(Debug, Clone)]
pub struct MockConnector {
    client: Arc<MockDatabaseClient>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    /// Creates a connector around the given client.
    pub fn new(client: MockDatabaseClient) -> Self {
        Self {
            client: Arc::new(client),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The shared client, for inspecting counters.
    pub fn client(&self) -> &MockDatabaseClient {
        &self.client
    }

    /// Number of times `connect` was called.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _options: ClientOptions) -> Result<Arc<dyn DatabaseClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.clone())
    }

    fn describe(&self) -> String {
        "mock database".to_string()
    }
}

/// Connector whose every connection attempt fails.
#[derive(Debug, Clone, Default)]
pub struct FailingConnector;

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self, _options: ClientOptions) -> Result<Arc<dyn DatabaseClient>> {
        Err(LedgerError::connection("Cannot connect to localhost:5432"))
    }

    fn describe(&self) -> String {
        "unreachable database".to_string()
    }
}

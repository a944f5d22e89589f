//! Bounded-concurrency batch runner.

use super::{ConnectionPolicy, OverviewUpdate, PlannedQuery};
use crate::config::{BatchConfig, DEFAULT_MAX_WORKERS};
use crate::db::{ClientOptions, Connector, DatabaseClient};
use crate::error::{LedgerError, Result};
use crate::ledger::{Ledger, OverviewRow, ResultRecord};
use crate::query::{ExecutionOutcome, QueryExecutor};
use crate::template::QueryDefinition;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settings for one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Upper bound on queries running at the same time.
    pub max_workers: usize,
    pub connection_policy: ConnectionPolicy,
    pub overview_update: OverviewUpdate,
    pub query_timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            connection_policy: ConnectionPolicy::default(),
            overview_update: OverviewUpdate::default(),
            query_timeout: None,
        }
    }
}

impl From<&BatchConfig> for BatchOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            connection_policy: config.connection_policy,
            overview_update: config.overview_update,
            query_timeout: config.query_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// A ledger or task error that did not become part of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// Affected output key; `None` for the overview write or a lost task.
    pub output_key: Option<String>,
    pub error: LedgerError,
}

/// Everything a batch produced.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Records in completion order.
    pub records: Vec<ResultRecord>,
    pub errors: Vec<BatchError>,
    /// Output keys skipped because the batch was cancelled.
    pub skipped: Vec<String>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.records.len() - self.succeeded()
    }

    /// True when every record and the overview were persisted.
    pub fn is_persisted(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} succeeded, {} failed in {:.1}s",
            self.succeeded(),
            self.failed(),
            self.elapsed.as_secs_f64()
        );
        if !self.skipped.is_empty() {
            summary.push_str(&format!(", {} skipped", self.skipped.len()));
        }
        if !self.errors.is_empty() {
            summary.push_str(&format!(", {} ledger error(s)", self.errors.len()));
        }
        summary
    }
}

/// What one task handed back to the coordinator.
enum TaskOutput {
    Skipped {
        output_key: String,
    },
    Finished {
        record: ResultRecord,
        /// Overview row awaiting the deferred write.
        pending_row: Option<OverviewRow>,
        ledger_error: Option<LedgerError>,
    },
}

/// Shared state handed to every task.
#[derive(Clone)]
struct TaskContext {
    connector: Arc<dyn Connector>,
    ledger: Arc<Ledger>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    shared_client: Option<std::result::Result<Arc<dyn DatabaseClient>, LedgerError>>,
    options: BatchOptions,
}

/// Runs planned queries against a data source and records every outcome.
pub struct BatchRunner {
    connector: Arc<dyn Connector>,
    ledger: Arc<Ledger>,
    options: BatchOptions,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(connector: Arc<dyn Connector>, ledger: Arc<Ledger>, options: BatchOptions) -> Self {
        Self {
            connector,
            ledger,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` to stop starting new queries.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs the batch to completion.
    ///
    /// Individual query failures never abort the batch; they become failed
    /// records. Ledger problems are collected in [`BatchReport::errors`].
    pub async fn run(&self, plan: Vec<PlannedQuery>) -> Result<BatchReport> {
        let start = Instant::now();
        let workers = self.options.max_workers.max(1);
        info!(
            queries = plan.len(),
            workers,
            target = %self.connector.describe(),
            "Starting batch"
        );

        let shared_client = match self.options.connection_policy {
            ConnectionPolicy::Shared => {
                let options = ClientOptions {
                    max_connections: u32::try_from(workers).unwrap_or(u32::MAX),
                    query_timeout: self.options.query_timeout,
                };
                let client = self.connector.connect(options).await;
                if let Err(e) = &client {
                    error!("Shared connection failed: {e}");
                }
                Some(client)
            }
            ConnectionPolicy::PerTask => None,
        };

        let context = TaskContext {
            connector: self.connector.clone(),
            ledger: self.ledger.clone(),
            semaphore: Arc::new(Semaphore::new(workers)),
            cancel: self.cancel.clone(),
            shared_client,
            options: self.options,
        };

        let mut join_set = JoinSet::new();
        for planned in plan {
            join_set.spawn(run_task(context.clone(), planned));
        }

        let mut report = BatchReport::default();
        let mut pending_rows = Vec::new();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(TaskOutput::Skipped { output_key }) => report.skipped.push(output_key),
                Ok(TaskOutput::Finished {
                    record,
                    pending_row,
                    ledger_error,
                }) => {
                    pending_rows.extend(pending_row);
                    if let Some(error) = ledger_error {
                        report.errors.push(BatchError {
                            output_key: Some(record.output_key.clone()),
                            error,
                        });
                    }
                    report.records.push(record);
                }
                Err(e) => {
                    error!("Query task panicked: {e}");
                    report.errors.push(BatchError {
                        output_key: None,
                        error: LedgerError::internal(format!("Query task failed: {e}")),
                    });
                }
            }
        }

        if self.options.overview_update == OverviewUpdate::Deferred {
            if let Err(error) = self.ledger.upsert_overview(&pending_rows).await {
                error!("Overview update failed: {error}");
                report.errors.push(BatchError {
                    output_key: None,
                    error,
                });
            }
        }

        if let Some(Ok(client)) = &context.shared_client {
            if let Err(e) = client.close().await {
                debug!("Failed to close shared connection: {e}");
            }
        }

        report.elapsed = start.elapsed();
        info!("Batch finished: {}", report.summary());
        Ok(report)
    }
}

async fn run_task(context: TaskContext, planned: PlannedQuery) -> TaskOutput {
    let output_key = planned.output_key().to_string();

    let _permit = tokio::select! {
        _ = context.cancel.cancelled() => return TaskOutput::Skipped { output_key },
        permit = context.semaphore.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return TaskOutput::Skipped { output_key },
        },
    };
    if context.cancel.is_cancelled() {
        return TaskOutput::Skipped { output_key };
    }

    let (definition, outcome) = match planned {
        PlannedQuery::Resolved(definition) => {
            info!(key = %definition.output_key, "Running query");
            let outcome = execute_with_policy(&context, &definition).await;
            (definition, outcome)
        }
        PlannedQuery::Unresolved {
            name,
            output_key,
            parameters,
            error,
        } => {
            warn!(key = %output_key, "Query not resolved: {error}");
            let definition = QueryDefinition {
                name,
                output_key,
                statement: String::new(),
                result_columns: None,
                deduplicate: false,
                description: String::new(),
                query_type: String::new(),
                parameters,
            };
            (definition, ExecutionOutcome::not_run(error))
        }
    };

    info!(
        key = %definition.output_key,
        success = outcome.is_success(),
        rows = outcome.record_count(),
        elapsed_ms = outcome.elapsed().as_millis() as u64,
        "Query finished"
    );

    let record = ResultRecord::new(&definition, outcome);
    let ledger = &context.ledger;

    match context.options.overview_update {
        OverviewUpdate::Immediate => {
            let ledger_error = ledger.persist_record(&record).await.err();
            TaskOutput::Finished {
                record,
                pending_row: None,
                ledger_error,
            }
        }
        OverviewUpdate::Deferred => match ledger.store(&record).await {
            Ok((_, row)) => TaskOutput::Finished {
                record,
                pending_row: Some(row),
                ledger_error: None,
            },
            Err(error) => TaskOutput::Finished {
                record,
                pending_row: None,
                ledger_error: Some(error),
            },
        },
    }
}

/// Obtains a client per the connection policy and runs the definition.
async fn execute_with_policy(
    context: &TaskContext,
    definition: &QueryDefinition,
) -> ExecutionOutcome {
    match &context.shared_client {
        Some(Ok(client)) => QueryExecutor::new(client.as_ref()).execute(definition).await,
        Some(Err(error)) => ExecutionOutcome::not_run(error.clone()),
        None => {
            let options = ClientOptions {
                max_connections: 1,
                query_timeout: context.options.query_timeout,
            };
            let client = match context.connector.connect(options).await {
                Ok(client) => client,
                Err(error) => return ExecutionOutcome::not_run(error),
            };
            let outcome = QueryExecutor::new(client.as_ref()).execute(definition).await;
            if let Err(e) = client.close().await {
                debug!("Failed to close connection: {e}");
            }
            outcome
        }
    }
}

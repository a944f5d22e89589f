//! Result ledger for query-ledger.
//!
//! Every execution produces a [`ResultRecord`]. The full record is written to
//! a keyed artifact store and a summary [`OverviewRow`] is upserted into the
//! overview, so the overview holds exactly one row per output key.

mod artifacts;
mod migrations;
mod overview;
mod sqlite_overview;

pub use artifacts::{ArtifactStore, JsonArtifactStore};
pub use overview::{JsonOverview, OverviewSink, OVERVIEW_FILE};
pub use sqlite_overview::{SqliteOverview, OVERVIEW_DB_FILE};

use crate::error::Result;
use crate::query::ExecutionOutcome;
use crate::template::{ParameterMap, QueryDefinition, ResultColumn};
use crate::db::Row;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Where overview rows are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverviewBackend {
    /// Pretty-printed JSON file next to the artifacts.
    #[default]
    Json,
    /// `query_overview` table in a SQLite file next to the artifacts.
    Sqlite,
}

/// Outcome of an execution, as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Failure,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            _ => Self::Failure,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted execution: definition metadata, outcome and rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub output_key: String,
    pub name: String,
    pub description: String,
    pub query_type: String,
    pub statement: String,
    pub parameters: ParameterMap,
    pub status: RecordStatus,
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Row>,
    pub record_count: usize,
    pub duration_secs: f64,
    /// Verbatim failure message.
    pub error: Option<String>,
    pub error_category: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    /// Wraps an outcome with the definition it came from.
    pub fn new(definition: &QueryDefinition, outcome: ExecutionOutcome) -> Self {
        let duration_secs = outcome.elapsed().as_secs_f64();
        let record_count = outcome.record_count();

        let (status, columns, rows, error, error_category) = match outcome {
            ExecutionOutcome::Success { columns, rows, .. } => {
                (RecordStatus::Success, columns, rows, None, None)
            }
            ExecutionOutcome::Failure { error, .. } => (
                RecordStatus::Failure,
                Vec::new(),
                Vec::new(),
                Some(error.to_string()),
                Some(error.category().to_string()),
            ),
        };

        Self {
            output_key: definition.output_key.clone(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            query_type: definition.query_type.clone(),
            statement: definition.statement.clone(),
            parameters: definition.parameters.clone(),
            status,
            columns,
            rows,
            record_count,
            duration_secs,
            error,
            error_category,
            created_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RecordStatus::Success
    }

    /// Summary row for the overview.
    pub fn overview_row(&self, location: &StorageLocation) -> OverviewRow {
        OverviewRow {
            output_key: self.output_key.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            query_type: self.query_type.clone(),
            statement: self.statement.clone(),
            status: self.status,
            record_count: self.record_count as u64,
            duration_secs: self.duration_secs,
            created_at: self.created_at,
            error: self.error.clone(),
            location: location.to_string(),
        }
    }
}

/// One row of the overview table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewRow {
    pub output_key: String,
    pub name: String,
    pub description: String,
    pub query_type: String,
    pub statement: String,
    pub status: RecordStatus,
    pub record_count: u64,
    pub duration_secs: f64,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
    /// Artifact location.
    pub location: String,
}

/// Where an artifact was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation(PathBuf);

impl StorageLocation {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Artifact store plus overview, with overview updates serialized.
pub struct Ledger {
    artifacts: Arc<dyn ArtifactStore>,
    overview: Arc<dyn OverviewSink>,
    overview_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, overview: Arc<dyn OverviewSink>) -> Self {
        Self {
            artifacts,
            overview,
            overview_lock: Mutex::new(()),
        }
    }

    /// Opens the ledger rooted at `output_dir`, creating it if needed.
    pub async fn open(output_dir: &Path, backend: OverviewBackend) -> Result<Self> {
        let artifacts = Arc::new(JsonArtifactStore::new(output_dir));
        let overview: Arc<dyn OverviewSink> = match backend {
            OverviewBackend::Json => Arc::new(JsonOverview::new(output_dir.join(OVERVIEW_FILE))),
            OverviewBackend::Sqlite => {
                Arc::new(SqliteOverview::open(&output_dir.join(OVERVIEW_DB_FILE)).await?)
            }
        };
        debug!(
            output = %output_dir.display(),
            overview = %overview.describe(),
            "Opened ledger"
        );
        Ok(Self::new(artifacts, overview))
    }

    /// Writes the record's artifact without touching the overview.
    pub async fn store(&self, record: &ResultRecord) -> Result<(StorageLocation, OverviewRow)> {
        let location = self.artifacts.write(&record.output_key, record).await?;
        let row = record.overview_row(&location);
        Ok((location, row))
    }

    /// Records an execution: artifact first, then the overview upsert.
    pub async fn persist(
        &self,
        definition: &QueryDefinition,
        outcome: ExecutionOutcome,
    ) -> Result<StorageLocation> {
        let record = ResultRecord::new(definition, outcome);
        self.persist_record(&record).await
    }

    /// [`persist`](Self::persist) for an already built record.
    pub async fn persist_record(&self, record: &ResultRecord) -> Result<StorageLocation> {
        let (location, row) = self.store(record).await?;
        self.upsert_overview(std::slice::from_ref(&row)).await?;
        Ok(location)
    }

    /// Upserts overview rows by output key as one critical section.
    pub async fn upsert_overview(&self, rows: &[OverviewRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let _guard = self.overview_lock.lock().await;
        self.overview.upsert_many(rows).await
    }

    /// All overview rows.
    pub async fn overview(&self) -> Result<Vec<OverviewRow>> {
        self.overview.load_all().await
    }

    /// Reads a stored record back.
    pub async fn read(&self, output_key: &str) -> Result<ResultRecord> {
        self.artifacts.read(output_key).await
    }

    /// Lists stored output keys, optionally filtered by prefix.
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        self.artifacts.list(prefix).await
    }
}

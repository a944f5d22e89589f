//! Overview sinks.

use super::artifacts::write_atomic;
use super::OverviewRow;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the JSON overview inside the output directory.
pub const OVERVIEW_FILE: &str = "_queries_overview_.json";

/// Table of one summary row per output key.
///
/// Callers serialize updates; implementations need not be safe against
/// concurrent read-modify-write.
#[async_trait]
pub trait OverviewSink: Send + Sync {
    /// Loads every row; empty when nothing was stored yet.
    async fn load_all(&self) -> Result<Vec<OverviewRow>>;

    /// Replaces the stored table with `rows`.
    async fn save_all(&self, rows: &[OverviewRow]) -> Result<()>;

    /// Drops rows sharing a key with `rows`, appends `rows`, rewrites in full.
    async fn upsert_many(&self, rows: &[OverviewRow]) -> Result<()> {
        let mut all = self.load_all().await?;
        for row in rows {
            all.retain(|existing| existing.output_key != row.output_key);
            all.push(row.clone());
        }
        self.save_all(&all).await
    }

    async fn upsert(&self, row: &OverviewRow) -> Result<()> {
        self.upsert_many(std::slice::from_ref(row)).await
    }

    /// Human-readable location.
    fn describe(&self) -> String;
}

/// Overview kept as a pretty-printed JSON array.
#[derive(Debug, Clone)]
pub struct JsonOverview {
    path: PathBuf,
}

impl JsonOverview {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OverviewSink for JsonOverview {
    async fn load_all(&self) -> Result<Vec<OverviewRow>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LedgerError::ledger_write(format!(
                    "Failed to read overview {}: {e}",
                    self.path.display()
                )))
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            LedgerError::ledger_write(format!(
                "Failed to parse overview {}: {e}",
                self.path.display()
            ))
        })
    }

    async fn save_all(&self, rows: &[OverviewRow]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LedgerError::ledger_write(format!(
                    "Failed to create output directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let json = serde_json::to_vec_pretty(rows)
            .map_err(|e| LedgerError::ledger_write(format!("Failed to serialize overview: {e}")))?;
        write_atomic(&self.path, &json).await?;
        debug!(rows = rows.len(), path = %self.path.display(), "Saved overview");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

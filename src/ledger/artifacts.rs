//! Keyed artifact storage.

use super::{ResultRecord, StorageLocation, OVERVIEW_FILE};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

const ARTIFACT_EXTENSION: &str = "json";

/// Stores one full result record per output key.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes the record, replacing any earlier one with the same key.
    async fn write(&self, key: &str, record: &ResultRecord) -> Result<StorageLocation>;

    /// Reads the record stored under `key`.
    async fn read(&self, key: &str) -> Result<ResultRecord>;

    /// Lists stored keys starting with `prefix`, sorted.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>>;
}

/// Stores records as `<root>/<key>.json`.
///
/// A `/` in the key maps to a subdirectory.
#[derive(Debug, Clone)]
pub struct JsonArtifactStore {
    root: PathBuf,
}

impl JsonArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        let segments: Vec<&str> = key.split('/').collect();

        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() || *segment == "." || *segment == ".." {
                return Err(LedgerError::ledger_write(format!(
                    "Invalid output key '{key}'"
                )));
            }
            let segment = sanitize_segment(segment);
            if i + 1 == segments.len() {
                let file_name = format!("{segment}.{ARTIFACT_EXTENSION}");
                // The overview file shares the root directory.
                if segments.len() == 1 && file_name == OVERVIEW_FILE {
                    return Err(LedgerError::ledger_write(format!(
                        "Output key '{key}' collides with the overview file"
                    )));
                }
                path.push(file_name);
            } else {
                path.push(segment);
            }
        }
        Ok(path)
    }
}

/// Replaces characters that are unsafe in file names.
fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[async_trait]
impl ArtifactStore for JsonArtifactStore {
    async fn write(&self, key: &str, record: &ResultRecord) -> Result<StorageLocation> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LedgerError::ledger_write(format!(
                    "Failed to create output directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let json = serde_json::to_vec_pretty(record).map_err(|e| {
            LedgerError::ledger_write(format!("Failed to serialize result '{key}': {e}"))
        })?;
        write_atomic(&path, &json).await?;

        debug!(key, path = %path.display(), "Wrote artifact");
        Ok(StorageLocation::new(path))
    }

    async fn read(&self, key: &str) -> Result<ResultRecord> {
        let path = self.path_for(key)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            LedgerError::ledger_write(format!("Failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            LedgerError::ledger_write(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(keys);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
                LedgerError::ledger_write(format!("Failed to list {}: {e}", dir.display()))
            })?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                LedgerError::ledger_write(format!("Failed to list {}: {e}", dir.display()))
            })? {
                let path = entry.path();
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION)
                    || path == self.root.join(OVERVIEW_FILE)
                {
                    continue;
                }
                if let Some(key) = key_for(&self.root, &path) {
                    keys.push(key);
                }
            }
        }

        if let Some(prefix) = prefix {
            keys.retain(|k| k.starts_with(prefix));
        }
        keys.sort();
        Ok(keys)
    }
}

/// Output key for an artifact path under `root`.
fn key_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.with_extension("");
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Writes to a sibling temp file, then renames over the target.
pub(super) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::write(&tmp, contents).await.map_err(|e| {
        LedgerError::ledger_write(format!("Failed to write {}: {e}", tmp.display()))
    })?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        LedgerError::ledger_write(format!("Failed to replace {}: {e}", path.display()))
    })
}

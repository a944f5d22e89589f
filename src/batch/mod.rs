//! Batch execution of query definitions.
//!
//! A batch is a list of [`PlannedQuery`] entries run with bounded
//! concurrency. Every entry ends up in the ledger, whether it succeeded,
//! failed, or never resolved in the first place.

mod plan;
mod runner;

pub use plan::{plan_query, plan_set};
pub use runner::{BatchError, BatchOptions, BatchReport, BatchRunner};

use crate::error::LedgerError;
use crate::template::{ParameterMap, QueryDefinition};
use serde::{Deserialize, Serialize};

/// How batch workers obtain database handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPolicy {
    /// Every worker opens and closes its own client.
    #[default]
    PerTask,
    /// One pooled client; each worker checks out its own session.
    Shared,
}

/// When overview rows are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverviewUpdate {
    /// Once, by the coordinator, after every worker finished.
    #[default]
    Deferred,
    /// By each worker as soon as its artifact is written.
    Immediate,
}

/// One entry of a batch.
#[derive(Debug, Clone)]
pub enum PlannedQuery {
    /// Ready to execute.
    Resolved(QueryDefinition),
    /// Resolution failed; recorded as a failure without executing.
    Unresolved {
        name: String,
        output_key: String,
        parameters: ParameterMap,
        error: LedgerError,
    },
}

impl PlannedQuery {
    pub fn output_key(&self) -> &str {
        match self {
            Self::Resolved(definition) => &definition.output_key,
            Self::Unresolved { output_key, .. } => output_key,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Resolved(definition) => &definition.name,
            Self::Unresolved { name, .. } => name,
        }
    }
}

impl From<QueryDefinition> for PlannedQuery {
    fn from(definition: QueryDefinition) -> Self {
        Self::Resolved(definition)
    }
}

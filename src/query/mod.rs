//! Query execution for query-ledger.
//!
//! This module isolates statement execution, column binding and coercion
//! from batch orchestration.

pub mod executor;

pub use executor::{execute, ExecutionOutcome, QueryExecutor};

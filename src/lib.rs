//! query-ledger - parameterized SQL report extraction with a result ledger.
//!
//! Templates are resolved into query definitions, run against a data source
//! with bounded concurrency, and every outcome is recorded as an artifact
//! plus a row in an overview table.

pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod query;
pub mod template;

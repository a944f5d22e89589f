//! Error types for query-ledger.
//!
//! Defines the main error enum used throughout the application.

use thiserror::Error;

/// Main error type for query-ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A parameter the template requires is missing from the mapping.
    #[error("Unresolved parameter: {0}")]
    UnresolvedParameter(String),

    /// Template definition problems (undeclared parameters, malformed tokens, etc.)
    #[error("Definition error: {0}")]
    Definition(String),

    /// A value could not be interpreted as its declared type.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Template could not be found or parsed.
    #[error("Template error: {0}")]
    Template(String),

    /// The data source rejected or failed the statement.
    #[error("Statement execution error: {0}")]
    StatementExecution(String),

    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Artifact or overview persistence failed.
    #[error("Ledger write error: {0}")]
    LedgerWrite(String),

    /// Configuration errors (invalid config file, unknown query set, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal application errors (unexpected states, task panics, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Creates an unresolved-parameter error with the given message.
    pub fn unresolved(msg: impl Into<String>) -> Self {
        Self::UnresolvedParameter(msg.into())
    }

    /// Creates a definition error with the given message.
    pub fn definition(msg: impl Into<String>) -> Self {
        Self::Definition(msg.into())
    }

    /// Creates a type mismatch error with the given message.
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch(msg.into())
    }

    /// Creates a template error with the given message.
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Creates a statement execution error with the given message.
    pub fn statement(msg: impl Into<String>) -> Self {
        Self::StatementExecution(msg.into())
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a ledger write error with the given message.
    pub fn ledger_write(msg: impl Into<String>) -> Self {
        Self::LedgerWrite(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnresolvedParameter(_) => "Unresolved Parameter",
            Self::Definition(_) => "Definition Error",
            Self::TypeMismatch(_) => "Type Mismatch",
            Self::Template(_) => "Template Error",
            Self::StatementExecution(_) => "Statement Execution Error",
            Self::Connection(_) => "Connection Error",
            Self::LedgerWrite(_) => "Ledger Write Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using LedgerError.
pub type Result<T> = std::result::Result<T, LedgerError>;

//! Error types for sqlbatch.
//!
//! Defines the main error enum used throughout the crate.

use thiserror::Error;

/// Main error type for sqlbatch operations.
#[derive(Error, Debug)]
pub enum SqlBatchError {
    /// Failures reading SQL text from an input source (file, stdin, invalid UTF-8).
    #[error("Input error: {0}")]
    Input(String),

    /// Database connection errors (host unreachable, auth failed, pool exhausted, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Statement execution errors (syntax errors, constraint violations, failed commits, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Errors raised while a row handler consumes a result cursor.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Configuration errors (invalid config file, bad option values, missing inputs, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (thread spawn failures, worker panics, unexpected states).
    #[error("Internal error: {0}")]
    Internal(String),

    /// One or more workers of a pipeline finished with an error.
    #[error("{failed} of {total} workers failed")]
    WorkersFailed { failed: usize, total: usize },
}

impl SqlBatchError {
    /// Creates an input error with the given message.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a handler error with the given message.
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
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
            Self::Input(_) => "Input Error",
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Handler(_) => "Handler Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
            Self::WorkersFailed { .. } => "Run Failed",
        }
    }
}

/// Result type alias using SqlBatchError.
pub type Result<T> = std::result::Result<T, SqlBatchError>;

//! Database abstraction layer for sqlbatch.
//!
//! Workers are plain OS threads, so the interface here is blocking. Each
//! worker owns one [`Connection`] for its whole lifetime; the [`Database`]
//! handle that produces connections is shared by every worker.

mod mock;
pub mod sql;
mod sqlx_client;
mod types;

pub use mock::{MockDatabase, MockEvent, MockOp};
pub use sqlx_client::SqlxDatabase;
pub use types::{ColumnInfo, Row, RowSet, Value};

use crate::error::{Result, SqlBatchError};

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Postgres,
    Sqlite,
}

impl DatabaseBackend {
    /// Returns the backend as a string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Picks the backend from a connection URL's scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            _ => Err(SqlBatchError::config(format!(
                "Invalid scheme '{scheme}'. Expected 'postgres', 'postgresql' or 'sqlite'"
            ))),
        }
    }
}

/// A source of connections, shared by all workers of a run.
pub trait Database: Send + Sync {
    /// Acquires a connection owned by the caller until it is closed.
    fn connect(&self) -> Result<Box<dyn Connection>>;

    /// Releases every resource held by the database handle.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A single connection, owned by exactly one worker.
pub trait Connection: Send {
    /// Switches autocommit on or off. With autocommit off a transaction is
    /// always open and ends only on commit, rollback or close.
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()>;

    /// Hint for how many rows to fetch per round trip.
    fn set_fetch_size(&mut self, _rows: usize) -> Result<()> {
        Ok(())
    }

    /// Executes one statement, returning a cursor when it produced rows.
    fn execute<'a>(&'a mut self, sql: &'a str) -> Result<Option<Box<dyn ResultCursor + 'a>>>;

    /// Executes a batch of statements as one unit.
    fn execute_batch(&mut self, statements: &[String]) -> Result<()>;

    /// Inserts `rows` through an insert template whose values list holds one
    /// `?` placeholder per column.
    fn insert_batch(&mut self, sql: &str, rows: &[Row]) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Releases the connection, rolling back any open transaction.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Forward-only access to the rows of one result.
pub trait ResultCursor {
    fn columns(&self) -> &[ColumnInfo];

    /// Reads the next row, or `None` once the result is exhausted.
    fn next_row(&mut self) -> Result<Option<Row>>;
}

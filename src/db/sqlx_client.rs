//! sqlx-backed database implementation.
//!
//! Provides `SqlxDatabase`, a pooled [`Database`] for PostgreSQL and SQLite.
//! Each backend keeps its own sqlx pool so values decode through the native
//! driver. sqlx is async, while workers are plain threads, so every call is
//! driven through a tokio runtime handle.

use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as SqlxColumn, Postgres, Row as SqlxRow, Sqlite, TypeInfo, ValueRef};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use super::sql::{inline_rows, literal};
use super::{ColumnInfo, Connection, Database, DatabaseBackend, ResultCursor, Row, Value};
use crate::config::ConnectionConfig;
use crate::error::{Result, SqlBatchError};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// How long a worker waits for a pooled connection.
const ACQUIRE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug)]
enum Pool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl Pool {
    async fn open(backend: DatabaseBackend, url: &str, max_connections: u32) -> sqlx::Result<Self> {
        let acquire_timeout = Duration::from_secs(ACQUIRE_TIMEOUT_SECS);
        match backend {
            DatabaseBackend::Postgres => PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(acquire_timeout)
                .connect(url)
                .await
                .map(Pool::Postgres),
            DatabaseBackend::Sqlite => SqlitePoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(acquire_timeout)
                .connect(url)
                .await
                .map(Pool::Sqlite),
        }
    }

    async fn acquire(&self) -> sqlx::Result<PooledConnection> {
        match self {
            Pool::Postgres(pool) => pool.acquire().await.map(PooledConnection::Postgres),
            Pool::Sqlite(pool) => pool.acquire().await.map(PooledConnection::Sqlite),
        }
    }

    async fn close(&self) {
        match self {
            Pool::Postgres(pool) => pool.close().await,
            Pool::Sqlite(pool) => pool.close().await,
        }
    }
}

enum PooledConnection {
    Postgres(PoolConnection<Postgres>),
    Sqlite(PoolConnection<Sqlite>),
}

/// Pooled database reachable through sqlx.
#[derive(Debug)]
pub struct SqlxDatabase {
    pool: Pool,
    backend: DatabaseBackend,
    handle: Handle,
    target: String,
}

impl SqlxDatabase {
    /// Opens a pool sized for `max_connections` concurrent workers.
    ///
    /// Must not be called from inside the runtime that `handle` belongs to.
    pub fn connect(config: &ConnectionConfig, max_connections: u32, handle: Handle) -> Result<Self> {
        let conn_str = config.to_connection_string()?;
        let backend = DatabaseBackend::from_url(&conn_str)?;
        let target = config.display_string();

        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut attempt = 1;

        loop {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = handle.block_on(Pool::open(backend, &conn_str, max_connections.max(1)));

            match result {
                Ok(pool) => {
                    debug!("Connected to {} ({})", target, backend.as_str());
                    return Ok(Self {
                        pool,
                        backend,
                        handle,
                        target,
                    });
                }
                Err(e) if attempt < MAX_RETRY_ATTEMPTS && is_transient_error(&e) => {
                    warn!(
                        "Connection attempt {} failed (transient error), retrying in {:?}",
                        attempt, delay
                    );
                    std::thread::sleep(delay);
                    delay *= 2; // Exponential backoff
                    attempt += 1;
                }
                Err(e) => return Err(map_connection_error(e, &target, config.user())),
            }
        }
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }
}

impl Database for SqlxDatabase {
    fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = self
            .handle
            .block_on(self.pool.acquire())
            .map_err(|e| SqlBatchError::connection(format!("{}: {e}", self.target)))?;

        Ok(Box::new(SqlxConnection {
            conn: Some(conn),
            handle: self.handle.clone(),
            auto_commit: true,
            in_transaction: false,
        }))
    }

    fn close(&self) -> Result<()> {
        self.handle.block_on(self.pool.close());
        Ok(())
    }
}

/// One pooled connection. Autocommit off is an explicit `BEGIN` that is
/// reopened after every commit and rollback.
struct SqlxConnection {
    /// `None` only while dropping.
    conn: Option<PooledConnection>,
    handle: Handle,
    auto_commit: bool,
    in_transaction: bool,
}

impl SqlxConnection {
    fn conn_mut(&mut self) -> Result<&mut PooledConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| SqlBatchError::internal("connection already released"))
    }

    fn run(&mut self, sql: &str) -> Result<()> {
        trace!("Executing: {}", sql);
        let handle = self.handle.clone();
        let result = match self.conn_mut()? {
            PooledConnection::Postgres(conn) => handle
                .block_on(sqlx::raw_sql(sql).execute(&mut **conn))
                .map(|_| ()),
            PooledConnection::Sqlite(conn) => handle
                .block_on(sqlx::raw_sql(sql).execute(&mut **conn))
                .map(|_| ()),
        };
        result.map_err(|e| SqlBatchError::query(format_query_error(e)))
    }

    fn begin(&mut self) -> Result<()> {
        self.run("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    /// Ends the open transaction with `verb` and starts the next one.
    fn end_transaction(&mut self, verb: &str) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.run(verb)?;
        if !self.auto_commit {
            self.begin()?;
        }
        Ok(())
    }
}

impl Connection for SqlxConnection {
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        self.auto_commit = auto_commit;
        if auto_commit {
            self.end_transaction("COMMIT")
        } else if !self.in_transaction {
            self.begin()
        } else {
            Ok(())
        }
    }

    fn set_fetch_size(&mut self, rows: usize) -> Result<()> {
        // sqlx streams rows as they arrive; nothing to configure
        trace!("Fetch size hint: {}", rows);
        Ok(())
    }

    fn execute<'a>(&'a mut self, sql: &'a str) -> Result<Option<Box<dyn ResultCursor + 'a>>> {
        trace!("Executing: {}", sql);
        let handle = self.handle.clone();
        match self.conn_mut()? {
            PooledConnection::Postgres(conn) => {
                open_cursor(handle, sqlx::raw_sql(sql).fetch(&mut **conn), convert_pg_row)
            }
            PooledConnection::Sqlite(conn) => {
                open_cursor(handle, sqlx::raw_sql(sql).fetch(&mut **conn), convert_sqlite_row)
            }
        }
    }

    fn execute_batch(&mut self, statements: &[String]) -> Result<()> {
        for sql in statements {
            self.run(sql)?;
        }
        Ok(())
    }

    /// SQLite binds every row to the template. Postgres receives one
    /// multi-row insert of untyped literals, so the server coerces each value
    /// (NULL included) to its target column type.
    fn insert_batch(&mut self, sql: &str, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let handle = self.handle.clone();

        match self.conn_mut()? {
            PooledConnection::Postgres(conn) => {
                let statement = inline_rows(sql, rows, pg_literal)?;
                trace!("Executing: {}", statement);
                handle
                    .block_on(sqlx::raw_sql(&statement).execute(&mut **conn))
                    .map_err(|e| SqlBatchError::query(format_query_error(e)))?;
            }
            PooledConnection::Sqlite(conn) => {
                for row in rows {
                    let mut query = sqlx::query::<Sqlite>(sql);
                    for value in row {
                        query = match value.clone() {
                            Value::Null => query.bind(None::<String>),
                            Value::Bool(b) => query.bind(b),
                            Value::Int(i) => query.bind(i),
                            Value::Float(f) => query.bind(f),
                            Value::String(s) => query.bind(s),
                            Value::Bytes(b) => query.bind(b),
                        };
                    }
                    handle
                        .block_on(query.execute(&mut **conn))
                        .map_err(|e| SqlBatchError::query(format_query_error(e)))?;
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.end_transaction("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.end_transaction("ROLLBACK")
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.run("ROLLBACK")?;
        self.in_transaction = false;
        Ok(())
    }
}

impl Drop for SqlxConnection {
    /// Returning a connection to the pool spawns a task, which needs the
    /// runtime context even when the owning worker is unwinding from a panic.
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let _guard = self.handle.enter();

        // A raw `BEGIN` is invisible to the pool; never hand it to the next worker
        match conn {
            PooledConnection::Postgres(mut conn) => {
                if self.in_transaction {
                    conn.close_on_drop();
                }
            }
            PooledConnection::Sqlite(mut conn) => {
                if self.in_transaction {
                    conn.close_on_drop();
                }
            }
        }
    }
}

/// Reads the first row to learn the columns; `None` when there are no rows.
fn open_cursor<'a, R: SqlxRow>(
    handle: Handle,
    mut stream: BoxStream<'a, sqlx::Result<R>>,
    convert: fn(&R) -> Row,
) -> Result<Option<Box<dyn ResultCursor + 'a>>> {
    let first = handle
        .block_on(stream.next())
        .transpose()
        .map_err(|e| SqlBatchError::query(format_query_error(e)))?;

    let Some(first) = first else {
        return Ok(None);
    };

    let columns = first
        .columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect();
    let pending = Some(convert(&first));

    let rows = stream
        .map(move |row| {
            row.map(|row| convert(&row))
                .map_err(|e| SqlBatchError::query(format_query_error(e)))
        })
        .boxed();

    Ok(Some(Box::new(SqlxCursor {
        rows,
        handle,
        columns,
        pending,
    })))
}

/// Streams rows of one statement, blocking on the runtime per row.
struct SqlxCursor<'a> {
    rows: BoxStream<'a, Result<Row>>,
    handle: Handle,
    columns: Vec<ColumnInfo>,
    pending: Option<Row>,
}

impl ResultCursor for SqlxCursor<'_> {
    fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.pending.take() {
            return Ok(Some(row));
        }
        self.handle.block_on(self.rows.next()).transpose()
    }
}

fn convert_pg_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_pg_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single Postgres column value to our Value type.
///
/// Statements run over the simple query protocol, so every value arrives in
/// text form; types without a dedicated arm (dates, numerics, uuids, json)
/// keep that text.
fn convert_pg_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    let typed = match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64)),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64)),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64)),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float),

        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes),

        _ => None,
    };

    typed.unwrap_or_else(|| pg_text(row, index))
}

fn pg_text(row: &PgRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => raw
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Bytes travel as bytea hex text; everything else as a plain literal.
fn pg_literal(value: &Value) -> sqlparser::ast::Value {
    match value {
        Value::Bytes(b) => {
            sqlparser::ast::Value::SingleQuotedString(format!("\\x{}", super::sql::hex(b)))
        }
        other => literal(other),
    }
}

fn convert_sqlite_row(row: &SqliteRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_sqlite_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single SQLite column value to our Value type.
///
/// SQLite columns are dynamically typed, so the value's storage class picks
/// the decoding. Integers in a column declared boolean become booleans; text
/// in date, time or numeric columns stays text.
fn convert_sqlite_value(row: &SqliteRow, index: usize, declared: &str) -> Value {
    let storage = match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => raw.type_info().name().to_string(),
        _ => return Value::Null,
    };

    let value = match storage.as_str() {
        "INTEGER" => row.try_get::<i64, _>(index).ok().map(|v| {
            if declared.eq_ignore_ascii_case("BOOLEAN") {
                Value::Bool(v != 0)
            } else {
                Value::Int(v)
            }
        }),
        "REAL" => row.try_get::<f64, _>(index).ok().map(Value::Float),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).ok().map(Value::Bytes),
        _ => row.try_get::<String, _>(index).ok().map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    // Connection refused or timeout are often transient
    if error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
    {
        return true;
    }

    // Authentication and database-not-found errors are not transient
    false
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, target: &str, user: Option<&str>) -> SqlBatchError {
    let user = user.unwrap_or("unknown");
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        SqlBatchError::connection(format!(
            "Cannot connect to {target}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        SqlBatchError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        SqlBatchError::connection(format!("Database {target} does not exist."))
    } else if error_str.contains("unable to open database") {
        SqlBatchError::connection(format!(
            "Cannot open {target}. Add '?mode=rwc' to create it."
        ))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        SqlBatchError::connection(format!(
            "Connection to {target} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        SqlBatchError::connection(format!("{target}: {error}"))
    }
}

/// Formats a query error with the database's own message and code when available.
fn format_query_error(error: sqlx::Error) -> String {
    match error.as_database_error() {
        Some(db_error) => {
            let mut result = String::from("ERROR: ");
            result.push_str(db_error.message());
            if let Some(code) = db_error.code() {
                result.push_str(" (");
                result.push_str(&code);
                result.push(')');
            }
            if let Some(constraint) = db_error.constraint() {
                result.push_str("\n  CONSTRAINT: ");
                result.push_str(constraint);
            }
            result
        }
        None => error.to_string(),
    }
}

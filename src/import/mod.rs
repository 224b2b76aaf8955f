//! Bulk import of query results into a target table.
//!
//! [`ImportPipeline`] is a row processor: when a query produces rows it
//! drains the cursor into parameterized inserts on a target database. With
//! more than one worker the rows are fanned out through a [`WorkQueue`] to
//! import threads that each own a connection and an [`ExecutionHook`].

use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, trace};

use crate::db::{Connection, Database, ResultCursor, Row};
use crate::error::{Result, SqlBatchError};
use crate::handler::ResultProcessor;
use crate::pipeline::{
    with_connection, Envelope, ExecutionHook, ExecutionSettings, StatementContext, WorkQueue,
    WorkerStats,
};

/// Table (and optionally columns) rows are inserted into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    pub table: String,
    pub columns: Vec<String>,
}

impl ImportTarget {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    /// Parses a comma-separated column list, ignoring blanks.
    pub fn parse_columns(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect()
    }

    /// Number of values each inserted row carries for a source with
    /// `source_columns` columns.
    pub fn insert_width(&self, source_columns: usize) -> Result<usize> {
        if self.columns.is_empty() {
            if source_columns == 0 {
                return Err(SqlBatchError::config(
                    "Cannot import a result without columns",
                ));
            }
            return Ok(source_columns);
        }
        if self.columns.len() > source_columns {
            return Err(SqlBatchError::config(format!(
                "{} import columns given but the query returns only {}",
                self.columns.len(),
                source_columns
            )));
        }
        Ok(self.columns.len())
    }

    /// Builds the parameterized insert statement with `?` placeholders.
    pub fn insert_sql(&self, width: usize) -> String {
        let placeholders = vec!["?"; width].join(", ");
        if self.columns.is_empty() {
            format!("insert into {} values ({placeholders})", self.table)
        } else {
            format!(
                "insert into {} ({}) values ({placeholders})",
                self.table,
                self.columns.join(", ")
            )
        }
    }
}

/// Insert execution context of an import worker: its connection plus the
/// rows collected for the next batch.
pub struct PreparedInsert<'c> {
    conn: &'c mut dyn Connection,
    sql: &'c str,
    batch: Vec<Row>,
    stats: WorkerStats,
}

impl<'c> PreparedInsert<'c> {
    pub fn new(conn: &'c mut dyn Connection, sql: &'c str) -> Self {
        Self {
            conn,
            sql,
            batch: Vec::new(),
            stats: WorkerStats::default(),
        }
    }

    pub fn add_batch(&mut self, row: Row) {
        self.batch.push(row);
    }
}

impl StatementContext for PreparedInsert<'_> {
    fn execute_batch(&mut self) -> Result<()> {
        self.conn.insert_batch(self.sql, &self.batch)?;
        self.stats.batches += 1;
        Ok(())
    }

    fn clear_batch(&mut self) {
        self.batch.clear();
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.commit()?;
        self.stats.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.rollback()?;
        self.stats.rollbacks += 1;
        Ok(())
    }
}

/// Inserts every row `next` yields on one connection.
fn import_rows(
    conn: &mut dyn Connection,
    sql: &str,
    mut hook: ExecutionHook,
    mut next: impl FnMut() -> Result<Option<Row>>,
) -> Result<WorkerStats> {
    let mut insert = PreparedInsert::new(conn, sql);
    let mut rows = 0;

    hook.before_all();
    while let Some(row) = next()? {
        insert.add_batch(row);
        rows += 1;
        hook.after_statement(&mut insert)?;
    }
    hook.after_all(&mut insert)?;

    Ok(WorkerStats {
        statements: rows,
        ..insert.stats
    })
}

/// Row processor that copies query results into a target table.
pub struct ImportPipeline {
    database: Arc<dyn Database>,
    target: ImportTarget,
    workers: usize,
    settings: ExecutionSettings,
    stats: WorkerStats,
}

impl ImportPipeline {
    pub fn new(
        database: Arc<dyn Database>,
        target: ImportTarget,
        workers: usize,
        settings: ExecutionSettings,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(SqlBatchError::config("Number of import jobs must be positive"));
        }
        if target.table.trim().is_empty() {
            return Err(SqlBatchError::config("Import table name is required"));
        }
        Ok(Self {
            database,
            target,
            workers,
            settings,
            stats: WorkerStats::default(),
        })
    }

    /// Totals over every import so far.
    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    fn import_single(&self, cursor: &mut dyn ResultCursor, sql: &str, width: usize) -> Result<WorkerStats> {
        let hook = ExecutionHook::for_import(&self.settings);
        with_connection(self.database.as_ref(), &self.settings, |conn| {
            import_rows(conn, sql, hook, || {
                Ok(cursor.next_row()?.map(|mut row| {
                    row.truncate(width);
                    row
                }))
            })
        })
    }

    fn import_parallel(&self, cursor: &mut dyn ResultCursor, sql: &str, width: usize) -> Result<WorkerStats> {
        let queue: WorkQueue<Row> = WorkQueue::new();
        let prototype = ExecutionHook::for_import(&self.settings);
        let database = self.database.as_ref();
        let settings = &self.settings;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.workers);

            for id in 1..=self.workers {
                let hook = prototype.fresh_copy();
                let queue = &queue;
                let spawned = thread::Builder::new()
                    .name(format!("import-worker-{id}"))
                    .spawn_scoped(scope, move || {
                        debug!("Import worker {} starting", id);
                        with_connection(database, settings, |conn| {
                            import_rows(conn, sql, hook, || match queue.take() {
                                Envelope::Item(row) => Ok(Some(row)),
                                Envelope::Done => Ok(None),
                            })
                        })
                    });

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        error!("Failed to start import worker {}: {}", id, e);
                        break;
                    }
                }
            }

            let started = handles.len();
            let read = read_rows(cursor, &queue, width);
            queue.finish(started);

            let mut failed = self.workers - started;
            let mut stats = WorkerStats::default();
            for (index, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(Ok(worker_stats)) => stats += worker_stats,
                    Ok(Err(e)) => {
                        error!("Import worker {} failed: {}: {}", index + 1, e.category(), e);
                        failed += 1;
                    }
                    Err(_) => {
                        error!("Import worker {} panicked", index + 1);
                        failed += 1;
                    }
                }
            }

            read?;
            if failed > 0 {
                return Err(SqlBatchError::WorkersFailed {
                    failed,
                    total: self.workers,
                });
            }
            Ok(stats)
        })
    }
}

/// Moves every row of `cursor` onto the queue, cut to `width` values.
fn read_rows(cursor: &mut dyn ResultCursor, queue: &WorkQueue<Row>, width: usize) -> Result<usize> {
    let mut count = 0;
    while let Some(mut row) = cursor.next_row()? {
        row.truncate(width);
        queue.put(row);
        count += 1;
    }
    trace!("Read {} rows for import", count);
    Ok(count)
}

impl ResultProcessor for ImportPipeline {
    fn process(&mut self, cursor: &mut dyn ResultCursor) -> Result<()> {
        let width = self.target.insert_width(cursor.columns().len())?;
        let sql = self.target.insert_sql(width);
        info!(
            "Importing into {} with {} worker(s): {}",
            self.target.table, self.workers, sql
        );

        let stats = if self.workers == 1 {
            self.import_single(cursor, &sql, width)?
        } else {
            self.import_parallel(cursor, &sql, width)?
        };

        info!(
            "Imported {} rows into {} ({} batches, {} commits)",
            stats.statements, self.target.table, stats.batches, stats.commits
        );
        self.stats += stats;
        Ok(())
    }

    fn requires_single_worker(&self) -> bool {
        true
    }
}

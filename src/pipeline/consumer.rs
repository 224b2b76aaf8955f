//! Statement workers.

use std::ops::AddAssign;

use tracing::{debug, trace, warn};

use super::hook::{ExecutionHook, StatementContext};
use super::job::Job;
use super::queue::{Envelope, WorkQueue};
use super::settings::ExecutionSettings;
use crate::db::{Connection, Database};
use crate::error::Result;
use crate::handler::RowHandler;
use crate::output::SqlEcho;

/// What one worker did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Statements (or rows, for import workers) processed.
    pub statements: usize,
    pub batches: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

impl AddAssign for WorkerStats {
    fn add_assign(&mut self, other: Self) {
        self.statements += other.statements;
        self.batches += other.batches;
        self.commits += other.commits;
        self.rollbacks += other.rollbacks;
    }
}

/// Acquires a connection configured for `settings`, runs `work` on it and
/// always releases it afterwards. An error from `work` wins over an error
/// from releasing the connection.
pub(crate) fn with_connection<T>(
    database: &dyn Database,
    settings: &ExecutionSettings,
    work: impl FnOnce(&mut dyn Connection) -> Result<T>,
) -> Result<T> {
    let mut conn = database.connect()?;

    let result = configure(conn.as_mut(), settings).and_then(|()| work(conn.as_mut()));

    match (result, conn.close()) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!("Failed to release connection after error: {}", close_err);
            Err(e)
        }
    }
}

fn configure(conn: &mut dyn Connection, settings: &ExecutionSettings) -> Result<()> {
    conn.set_auto_commit(settings.auto_commit())?;
    if settings.fetch_size() > 0 {
        conn.set_fetch_size(settings.fetch_size())?;
    }
    Ok(())
}

/// Statement execution context of a worker: its connection plus the
/// statements collected for the next batch.
pub struct SqlStatement<'c> {
    conn: &'c mut dyn Connection,
    batch: Vec<String>,
    stats: WorkerStats,
}

impl<'c> SqlStatement<'c> {
    pub fn new(conn: &'c mut dyn Connection) -> Self {
        Self {
            conn,
            batch: Vec::new(),
            stats: WorkerStats::default(),
        }
    }

    pub fn add_batch(&mut self, sql: &str) {
        self.batch.push(sql.to_string());
    }

    /// Executes one statement and hands any rows to `handler`.
    pub fn execute(&mut self, sql: &str, handler: Option<&dyn RowHandler>) -> Result<()> {
        let cursor = self.conn.execute(sql)?;
        if let (Some(mut cursor), Some(handler)) = (cursor, handler) {
            handler.process(cursor.as_mut())?;
        }
        Ok(())
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }
}

impl StatementContext for SqlStatement<'_> {
    fn execute_batch(&mut self) -> Result<()> {
        self.conn.execute_batch(&self.batch)?;
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

/// Worker that executes jobs from the queue until it receives `Done`.
pub struct JobConsumer<'a> {
    id: usize,
    database: &'a dyn Database,
    queue: &'a WorkQueue<Job>,
    settings: &'a ExecutionSettings,
    hook: ExecutionHook,
    echo: Option<&'a SqlEcho>,
}

impl<'a> JobConsumer<'a> {
    pub fn new(
        id: usize,
        database: &'a dyn Database,
        queue: &'a WorkQueue<Job>,
        settings: &'a ExecutionSettings,
        hook: ExecutionHook,
    ) -> Self {
        Self {
            id,
            database,
            queue,
            settings,
            hook,
            echo: None,
        }
    }

    /// Echoes every statement before it runs.
    pub fn with_echo(mut self, echo: Option<&'a SqlEcho>) -> Self {
        self.echo = echo;
        self
    }

    pub fn run(mut self) -> Result<WorkerStats> {
        debug!("Worker {} starting", self.id);
        let database = self.database;
        let settings = self.settings;
        let stats = with_connection(database, settings, |conn| self.drain(conn))?;
        debug!(
            "Worker {} finished: {} statements, {} batches, {} commits",
            self.id, stats.statements, stats.batches, stats.commits
        );
        Ok(stats)
    }

    fn drain(&mut self, conn: &mut dyn Connection) -> Result<WorkerStats> {
        let mut statement = SqlStatement::new(conn);
        let batch_mode = self.hook.is_batch_enabled();
        let mut executed = 0;

        self.hook.before_all();

        while let Envelope::Item(job) = self.queue.take() {
            trace!("Worker {} executing: {}", self.id, job.sql());
            if let Some(echo) = self.echo {
                echo.echo(job.sql())?;
            }

            if batch_mode {
                statement.add_batch(job.sql());
            } else {
                statement.execute(job.sql(), job.handler())?;
            }
            executed += 1;

            self.hook.after_statement(&mut statement)?;
        }

        self.hook.after_all(&mut statement)?;

        Ok(WorkerStats {
            statements: executed,
            ..statement.stats()
        })
    }
}

//! Runs a producer and a pool of statement workers to completion.

use std::sync::Arc;
use std::thread;

use tracing::{error, info};

use super::consumer::{JobConsumer, WorkerStats};
use super::hook::ExecutionHook;
use super::producer::JobProducer;
use super::queue::WorkQueue;
use super::settings::ExecutionSettings;
use crate::db::Database;
use crate::error::{Result, SqlBatchError};
use crate::handler::RowHandler;
use crate::lexer::StatementLexer;
use crate::output::SqlEcho;

/// Outcome of a whole run.
#[derive(Debug)]
pub struct RunReport {
    /// Workers requested.
    pub workers: usize,
    /// Workers that failed, panicked or could not be started.
    pub failed: usize,
    /// Statements queued by the producer.
    pub statements: usize,
    /// Totals over the workers that finished successfully.
    pub stats: WorkerStats,
    /// Error that stopped the producer, if any.
    pub producer_error: Option<SqlBatchError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.producer_error.is_none()
    }

    /// Turns the report into the run's overall status.
    pub fn into_result(self) -> Result<WorkerStats> {
        if self.failed > 0 {
            return Err(SqlBatchError::WorkersFailed {
                failed: self.failed,
                total: self.workers,
            });
        }
        match self.producer_error {
            Some(e) => Err(e),
            None => Ok(self.stats),
        }
    }
}

/// Starts the workers, produces on the calling thread and joins every worker.
pub struct Coordinator {
    database: Arc<dyn Database>,
    settings: ExecutionSettings,
    workers: usize,
    handler: Option<Arc<dyn RowHandler>>,
    echo: Option<Arc<SqlEcho>>,
}

impl Coordinator {
    pub fn new(
        database: Arc<dyn Database>,
        settings: ExecutionSettings,
        workers: usize,
        handler: Option<Arc<dyn RowHandler>>,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(SqlBatchError::config("Number of jobs must be positive"));
        }
        if workers > 1 && handler.as_ref().is_some_and(|h| h.requires_single_worker()) {
            return Err(SqlBatchError::config(
                "Importing requires a single query job; use --jobs for the import workers",
            ));
        }
        Ok(Self {
            database,
            settings,
            workers,
            handler,
            echo: None,
        })
    }

    /// Echoes every executed statement.
    pub fn with_echo(mut self, echo: Arc<SqlEcho>) -> Self {
        self.echo = Some(echo);
        self
    }

    pub fn run(&self, lexer: &mut StatementLexer) -> RunReport {
        info!(
            "Running with {} worker(s), batch size {}, transaction mode {}",
            self.workers,
            self.settings.batch_size(),
            self.settings.transaction_mode()
        );

        let queue = WorkQueue::new();
        let prototype = ExecutionHook::for_statements(&self.settings);

        let report = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.workers);

            for id in 1..=self.workers {
                let consumer = JobConsumer::new(
                    id,
                    self.database.as_ref(),
                    &queue,
                    &self.settings,
                    prototype.fresh_copy(),
                )
                .with_echo(self.echo.as_deref());

                let spawned = thread::Builder::new()
                    .name(format!("sql-worker-{id}"))
                    .spawn_scoped(scope, move || consumer.run());

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        error!("Failed to start worker {}: {}", id, e);
                        break;
                    }
                }
            }

            let started = handles.len();
            let produced = JobProducer::new(&queue, self.handler.clone()).run(lexer, started);

            let mut failed = self.workers - started;
            let mut stats = WorkerStats::default();
            for (index, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(Ok(worker_stats)) => stats += worker_stats,
                    Ok(Err(e)) => {
                        error!("Worker {} failed: {}: {}", index + 1, e.category(), e);
                        failed += 1;
                    }
                    Err(_) => {
                        error!("Worker {} panicked", index + 1);
                        failed += 1;
                    }
                }
            }

            let (statements, producer_error) = match produced {
                Ok(count) => (count, None),
                Err(e) => {
                    error!("Reading statements failed: {}", e);
                    (0, Some(e))
                }
            };

            RunReport {
                workers: self.workers,
                failed,
                statements,
                stats,
                producer_error,
            }
        });

        info!(
            "Run finished: {} statements, {} of {} workers failed",
            report.stats.statements, report.failed, report.workers
        );
        report
    }
}

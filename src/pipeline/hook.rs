//! Per-worker batch and transaction bookkeeping.
//!
//! The hook counts statements and decides when the worker's pending batch is
//! flushed and when its transaction is committed or rolled back. The actual
//! database calls go through a [`StatementContext`], so the same hook drives
//! both plain statement workers and import workers.

use tracing::trace;

use super::settings::{ExecutionSettings, TransactionMode};
use crate::error::Result;

/// The database operations a hook may trigger.
pub trait StatementContext {
    /// Submits everything added to the batch since the last flush.
    fn execute_batch(&mut self) -> Result<()>;

    fn clear_batch(&mut self);

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

/// Batch/transaction state machine owned by a single worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionHook {
    batch_enabled: bool,
    batch_size: usize,
    transaction_mode: TransactionMode,
    transaction_size: usize,
    since_batch: usize,
    since_transaction: usize,
}

impl ExecutionHook {
    /// Hook for statement workers; batching is on when the batch size exceeds one.
    pub fn for_statements(settings: &ExecutionSettings) -> Self {
        Self::new(settings, settings.is_batch_mode())
    }

    /// Hook for import workers, which always collect rows into batches.
    pub fn for_import(settings: &ExecutionSettings) -> Self {
        Self::new(settings, true)
    }

    fn new(settings: &ExecutionSettings, batch_enabled: bool) -> Self {
        Self {
            batch_enabled,
            batch_size: settings.batch_size().max(1),
            transaction_mode: settings.transaction_mode(),
            transaction_size: settings.transaction_size(),
            since_batch: 0,
            since_transaction: 0,
        }
    }

    /// Same configuration, zeroed counters.
    pub fn fresh_copy(&self) -> Self {
        Self {
            since_batch: 0,
            since_transaction: 0,
            ..self.clone()
        }
    }

    pub fn is_batch_enabled(&self) -> bool {
        self.batch_enabled
    }

    pub fn before_all(&mut self) {
        self.since_batch = 0;
        self.since_transaction = 0;
    }

    /// Called once after every statement (or row) handed to the context.
    pub fn after_statement(&mut self, context: &mut impl StatementContext) -> Result<()> {
        self.since_batch += 1;
        self.since_transaction += 1;

        if self.batch_enabled && self.since_batch >= self.batch_size {
            self.flush(context)?;
        }

        if let TransactionMode::Every(_) = self.transaction_mode {
            if self.since_transaction >= self.transaction_size {
                trace!("Committing after {} statements", self.since_transaction);
                context.commit()?;
                self.since_transaction = 0;
            }
        }

        if !self.batch_enabled && self.transaction_mode == TransactionMode::Rollback {
            context.rollback()?;
        }

        Ok(())
    }

    /// Flushes and commits whatever is still pending once the input is drained.
    pub fn after_all(&mut self, context: &mut impl StatementContext) -> Result<()> {
        let mut flushed = false;
        if self.batch_enabled && self.since_batch > 0 {
            self.flush(context)?;
            flushed = true;
        }

        if let TransactionMode::Every(_) = self.transaction_mode {
            if self.since_transaction > 0 || flushed {
                trace!("Final commit after {} statements", self.since_transaction);
                context.commit()?;
                self.since_transaction = 0;
            }
        }

        Ok(())
    }

    fn flush(&mut self, context: &mut impl StatementContext) -> Result<()> {
        trace!("Flushing batch of {}", self.since_batch);
        context.execute_batch()?;
        context.clear_batch();
        self.since_batch = 0;

        if self.transaction_mode == TransactionMode::Rollback {
            context.rollback()?;
        }
        Ok(())
    }
}

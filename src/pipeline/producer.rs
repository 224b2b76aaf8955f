//! Feeds statements from the lexer into the work queue.

use std::sync::Arc;

use tracing::{debug, trace};

use super::job::Job;
use super::queue::WorkQueue;
use crate::error::Result;
use crate::handler::RowHandler;
use crate::lexer::StatementLexer;

/// Single writer of a run's work queue.
pub struct JobProducer<'a> {
    queue: &'a WorkQueue<Job>,
    handler: Option<Arc<dyn RowHandler>>,
}

impl<'a> JobProducer<'a> {
    pub fn new(queue: &'a WorkQueue<Job>, handler: Option<Arc<dyn RowHandler>>) -> Self {
        Self { queue, handler }
    }

    /// Queues every statement the lexer yields, then one `Done` per consumer.
    ///
    /// The markers are queued even when the lexer fails, so consumers always
    /// drain and stop; the lexer error is returned afterwards.
    pub fn run(&self, lexer: &mut StatementLexer, consumers: usize) -> Result<usize> {
        let result = self.produce(lexer);
        self.queue.finish(consumers);
        if let Ok(count) = &result {
            debug!("Queued {} statements for {} workers", count, consumers);
        }
        result
    }

    fn produce(&self, lexer: &mut StatementLexer) -> Result<usize> {
        let mut count = 0;
        while let Some(sql) = lexer.next_statement()? {
            if sql.trim().is_empty() {
                continue;
            }
            trace!("Queueing statement {}", count + 1);
            self.queue.put(Job::new(sql, self.handler.clone()));
            count += 1;
        }
        Ok(count)
    }
}

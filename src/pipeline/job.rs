//! Units of work passed from the producer to the workers.

use std::fmt;
use std::sync::Arc;

use crate::handler::RowHandler;

/// One SQL statement and the handler that receives its rows, if any.
#[derive(Clone)]
pub struct Job {
    sql: String,
    handler: Option<Arc<dyn RowHandler>>,
}

impl Job {
    pub fn new(sql: impl Into<String>, handler: Option<Arc<dyn RowHandler>>) -> Self {
        Self {
            sql: sql.into(),
            handler,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn handler(&self) -> Option<&dyn RowHandler> {
        self.handler.as_deref()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("sql", &self.sql)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

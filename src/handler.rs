//! Row handlers: what happens to the rows of a statement that returns a result.

use parking_lot::Mutex;

use crate::db::ResultCursor;
use crate::error::Result;

/// Consumes a statement's result cursor.
///
/// A single handler is shared by every worker of a run, so implementations
/// must be safe to call from several threads.
pub trait RowHandler: Send + Sync {
    fn process(&self, cursor: &mut dyn ResultCursor) -> Result<()>;

    /// True when the handler cannot be fed by more than one worker.
    fn requires_single_worker(&self) -> bool {
        false
    }
}

/// A stateful consumer of result cursors that needs exclusive access.
pub trait ResultProcessor: Send {
    fn process(&mut self, cursor: &mut dyn ResultCursor) -> Result<()>;

    fn requires_single_worker(&self) -> bool {
        false
    }
}

/// Adapts a [`ResultProcessor`] into a shared [`RowHandler`]: at most one
/// worker is inside `process` at a time.
pub struct Exclusive<P> {
    inner: Mutex<P>,
}

impl<P: ResultProcessor> Exclusive<P> {
    pub fn new(processor: P) -> Self {
        Self {
            inner: Mutex::new(processor),
        }
    }

    pub fn into_inner(self) -> P {
        self.inner.into_inner()
    }
}

impl<P: ResultProcessor> RowHandler for Exclusive<P> {
    fn process(&self, cursor: &mut dyn ResultCursor) -> Result<()> {
        self.inner.lock().process(cursor)
    }

    fn requires_single_worker(&self) -> bool {
        self.inner.lock().requires_single_worker()
    }
}

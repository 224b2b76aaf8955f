//! Producer/consumer execution pipeline.
//!
//! A [`Coordinator`] starts N statement workers, feeds them from the lexer
//! on the calling thread and reports once every worker has finished. Each
//! worker owns its connection and an [`ExecutionHook`] that decides when to
//! flush batches and end transactions.

mod consumer;
mod coordinator;
mod hook;
mod job;
mod producer;
mod queue;
mod settings;

pub(crate) use consumer::with_connection;
pub use consumer::{JobConsumer, SqlStatement, WorkerStats};
pub use coordinator::{Coordinator, RunReport};
pub use hook::{ExecutionHook, StatementContext};
pub use job::Job;
pub use producer::JobProducer;
pub use queue::{Envelope, WorkQueue};
pub use settings::{ExecutionSettings, TransactionMode, DEFAULT_BATCH_SIZE};

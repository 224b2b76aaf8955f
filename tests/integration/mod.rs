//! Integration tests for sqlbatch.

pub mod import_test;
pub mod pipeline_test;
pub mod sqlite_test;

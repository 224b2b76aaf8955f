//! sqlbatch - run SQL scripts against a database in batches and in parallel.
//!
//! This library exposes the core modules for use by the binary and in
//! integration tests.

pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod import;
pub mod lexer;
pub mod logging;
pub mod output;
pub mod pipeline;

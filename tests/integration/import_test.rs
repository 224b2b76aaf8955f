//! Import pipeline integration tests.
//!
//! A one-worker query pipeline feeds an import into a second mock database.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use sqlbatch::db::{MockDatabase, MockOp, Row, Value};
use sqlbatch::error::SqlBatchError;
use sqlbatch::handler::{Exclusive, RowHandler};
use sqlbatch::import::{ImportPipeline, ImportTarget};
use sqlbatch::lexer::{LexerConfig, StatementLexer};
use sqlbatch::pipeline::{Coordinator, ExecutionSettings, RunReport, TransactionMode};

fn source_rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| vec![Value::Int(i as i64), Value::String(format!("name-{i}"))])
        .collect()
}

fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by_key(|row| match row[0] {
        Value::Int(id) => id,
        _ => i64::MIN,
    });
    rows
}

fn run_import(
    source: &MockDatabase,
    target: &MockDatabase,
    import: ImportTarget,
    workers: usize,
    settings: ExecutionSettings,
    sql: &str,
) -> RunReport {
    let pipeline = ImportPipeline::new(Arc::new(target.clone()), import, workers, settings.clone())
        .unwrap();
    let handler: Arc<dyn RowHandler> = Arc::new(Exclusive::new(pipeline));

    let mut lexer = StatementLexer::new(LexerConfig::default()).unwrap();
    lexer.add_str(sql);

    Coordinator::new(Arc::new(source.clone()), settings.unbatched(), 1, Some(handler))
        .unwrap()
        .run(&mut lexer)
}

#[test]
fn test_import_copies_every_row_once() {
    let rows = source_rows(250);
    let settings = ExecutionSettings::derive(Some(7), None).unwrap();

    for workers in [1, 4, 8, 40] {
        let source = MockDatabase::new().with_table("src", &["id", "name"], rows.clone());
        let target = MockDatabase::new().with_table("dst", &["id", "name"], Vec::new());

        let report = run_import(
            &source,
            &target,
            ImportTarget::new("dst"),
            workers,
            settings.clone(),
            "select * from src",
        );

        assert!(report.is_success(), "W={workers}");
        assert_eq!(sorted(target.table_rows("dst")), rows, "W={workers}");

        // Every import worker opened and released its own connection
        assert_eq!(target.connections_opened(), workers);
        assert_eq!(target.count_ops(|op| *op == MockOp::Close), workers);
        assert!(target.batch_sizes().iter().all(|size| *size <= 7));
    }
}

#[test]
fn test_import_single_worker_batches_in_order() {
    let rows = source_rows(20);
    let source = MockDatabase::new().with_table("src", &["id", "name"], rows.clone());
    let target = MockDatabase::new().with_table("dst", &["id", "name"], Vec::new());
    let settings = ExecutionSettings::derive(Some(6), None).unwrap();

    let report = run_import(
        &source,
        &target,
        ImportTarget::new("dst"),
        1,
        settings,
        "select * from src",
    );

    assert!(report.is_success());
    assert_eq!(target.batch_sizes(), vec![6, 6, 6, 2]);
    assert_eq!(target.table_rows("dst"), rows);
}

#[test]
fn test_import_batch_size_alone_keeps_autocommit() {
    let rows = source_rows(20);
    let source = MockDatabase::new().with_table("src", &["id", "name"], rows.clone());
    let target = MockDatabase::new().with_table("dst", &["id", "name"], Vec::new());
    let settings = ExecutionSettings::for_import(Some(6), None).unwrap();

    let report = run_import(
        &source,
        &target,
        ImportTarget::new("dst"),
        1,
        settings,
        "select * from src",
    );

    assert!(report.is_success());
    assert_eq!(target.batch_sizes(), vec![6, 6, 6, 2]);
    assert_eq!(target.table_rows("dst"), rows);
    assert_eq!(target.count_ops(|op| *op == MockOp::Commit), 0);
    assert_eq!(target.count_ops(|op| *op == MockOp::AutoCommit(false)), 0);
}

#[test]
fn test_import_into_named_columns() {
    let source = MockDatabase::new().with_table("src", &["id", "name"], source_rows(3));
    let target = MockDatabase::new().with_table("dst", &["name", "id", "note"], Vec::new());

    let report = run_import(
        &source,
        &target,
        ImportTarget::new("dst").with_columns(vec!["id".to_string(), "name".to_string()]),
        2,
        ExecutionSettings::derive(Some(2), None).unwrap(),
        "select * from src",
    );

    assert!(report.is_success());
    let mut imported = target.table_rows("dst");
    imported.sort_by_key(|row| row[0].to_string());
    assert_eq!(
        imported,
        vec![
            vec![Value::String("name-0".to_string()), Value::Int(0), Value::Null],
            vec![Value::String("name-1".to_string()), Value::Int(1), Value::Null],
            vec![Value::String("name-2".to_string()), Value::Int(2), Value::Null],
        ]
    );
}

#[test]
fn test_import_rollback_mode_imports_nothing() {
    let source = MockDatabase::new().with_table("src", &["id", "name"], source_rows(30));
    let target = MockDatabase::new().with_table("dst", &["id", "name"], Vec::new());
    let settings = ExecutionSettings::derive(Some(5), Some(TransactionMode::Rollback)).unwrap();

    let report = run_import(
        &source,
        &target,
        ImportTarget::new("dst"),
        4,
        settings,
        "select * from src",
    );

    assert!(report.is_success());
    assert!(target.table_rows("dst").is_empty());
    assert_eq!(target.count_ops(|op| *op == MockOp::Commit), 0);
}

#[test]
fn test_import_failure_fails_the_query_worker() {
    let source = MockDatabase::new().with_table("src", &["id", "name"], source_rows(40));
    let target = MockDatabase::new()
        .with_table("dst", &["id", "name"], Vec::new())
        .with_failure("insert into dst");

    let report = run_import(
        &source,
        &target,
        ImportTarget::new("dst"),
        4,
        ExecutionSettings::derive(Some(10), None).unwrap(),
        "select * from src",
    );

    assert!(!report.is_success());
    assert_eq!(report.failed, 1);
    assert!(target.table_rows("dst").is_empty());

    // Import workers still released their connections
    assert_eq!(
        target.count_ops(|op| *op == MockOp::Close),
        target.connections_opened()
    );
    assert!(matches!(
        report.into_result().unwrap_err(),
        SqlBatchError::WorkersFailed { .. }
    ));
}

#[test]
fn test_import_requires_single_query_worker() {
    let source = MockDatabase::new();
    let target = MockDatabase::new().with_table("dst", &["id"], Vec::new());
    let pipeline = ImportPipeline::new(
        Arc::new(target),
        ImportTarget::new("dst"),
        4,
        ExecutionSettings::default(),
    )
    .unwrap();
    let handler: Arc<dyn RowHandler> = Arc::new(Exclusive::new(pipeline));

    let err = Coordinator::new(Arc::new(source), ExecutionSettings::default(), 3, Some(handler))
        .err()
        .unwrap();
    assert!(matches!(err, SqlBatchError::Config(_)));
}

#[test]
fn test_statements_without_rows_are_not_imported() {
    let source = MockDatabase::new().with_table("src", &["id", "name"], source_rows(2));
    let target = MockDatabase::new().with_table("dst", &["id", "name"], Vec::new());

    let report = run_import(
        &source,
        &target,
        ImportTarget::new("dst"),
        2,
        ExecutionSettings::default(),
        "insert into src values (9, 'late'); select * from src",
    );

    assert!(report.is_success());
    assert_eq!(target.table_rows("dst").len(), 3);
}

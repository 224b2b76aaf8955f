//! Statement pipeline integration tests.
//!
//! Runs whole coordinator runs against the mock database.

use std::io::Cursor;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use sqlbatch::db::{Database, MockDatabase, MockOp, Row, Value};
use sqlbatch::error::SqlBatchError;
use sqlbatch::handler::{Exclusive, RowHandler};
use sqlbatch::lexer::{LexerConfig, StatementLexer};
use sqlbatch::output::{SharedBuffer, SqlEcho, TextOutput};
use sqlbatch::pipeline::{Coordinator, ExecutionSettings, TransactionMode};

fn lexer_for(sql: &str) -> StatementLexer {
    let mut lexer = StatementLexer::new(LexerConfig::default()).unwrap();
    lexer.add_str(sql);
    lexer
}

fn inserts(count: usize) -> String {
    (0..count)
        .map(|i| format!("insert into t values ({i});\n"))
        .collect()
}

fn ids(rows: &[Row]) -> Vec<i64> {
    let mut ids: Vec<i64> = rows
        .iter()
        .map(|row| match row[0] {
            Value::Int(id) => id,
            ref other => panic!("unexpected id {other:?}"),
        })
        .collect();
    ids.sort_unstable();
    ids
}

fn coordinator(db: &MockDatabase, settings: ExecutionSettings, workers: usize) -> Coordinator {
    Coordinator::new(Arc::new(db.clone()), settings, workers, None).unwrap()
}

#[test]
fn test_every_statement_runs_exactly_once() {
    for workers in [1, 2, 3, 8] {
        for statements in [0, 1, 5, 37] {
            let db = MockDatabase::new().with_table("t", &["id"], Vec::new());

            let report = coordinator(&db, ExecutionSettings::default(), workers)
                .run(&mut lexer_for(&inserts(statements)));

            assert!(report.is_success(), "C={workers} S={statements}");
            assert_eq!(report.statements, statements);
            assert_eq!(report.stats.statements, statements);
            assert_eq!(
                ids(&db.table_rows("t")),
                (0..statements as i64).collect::<Vec<_>>()
            );

            // Every worker got its Done marker and released its connection
            assert_eq!(db.connections_opened(), workers);
            assert_eq!(db.count_ops(|op| *op == MockOp::Close), workers);
        }
    }
}

#[test]
fn test_rollback_mode_leaves_database_unchanged() {
    let existing = vec![vec![Value::Int(100)], vec![Value::Int(200)]];
    let settings = ExecutionSettings::derive(None, Some(TransactionMode::Rollback)).unwrap();

    for workers in [1, 4] {
        let db = MockDatabase::new().with_table("t", &["id"], existing.clone());
        let sql = format!("{}delete from t;\n{}", inserts(6), inserts(3));

        let report = coordinator(&db, settings.clone(), workers).run(&mut lexer_for(&sql));

        assert!(report.is_success());
        assert_eq!(report.stats.statements, 10);
        assert_eq!(report.stats.commits, 0);
        assert_eq!(db.table_rows("t"), existing);
    }
}

#[test]
fn test_rollback_mode_with_batches() {
    let existing = vec![vec![Value::Int(7)]];
    let db = MockDatabase::new().with_table("t", &["id"], existing.clone());
    let settings = ExecutionSettings::derive(Some(3), Some(TransactionMode::Rollback)).unwrap();

    let report = coordinator(&db, settings, 1).run(&mut lexer_for(&inserts(8)));

    assert!(report.is_success());
    assert_eq!(db.batch_sizes(), vec![3, 3, 2]);
    assert_eq!(db.table_rows("t"), existing);
}

#[test]
fn test_failure_keeps_completed_transactions() {
    let db = MockDatabase::new().with_table("t", &["id"], Vec::new());
    let settings = ExecutionSettings::derive(None, Some(TransactionMode::Every(4))).unwrap();

    let sql: String = (1..=14)
        .map(|i| {
            if i == 11 {
                format!("insert into t valuez ({i});\n")
            } else {
                format!("insert into t values ({i});\n")
            }
        })
        .collect();

    let report = coordinator(&db, settings, 1).run(&mut lexer_for(&sql));

    assert!(!report.is_success());
    assert_eq!(report.failed, 1);
    assert_eq!(ids(&db.table_rows("t")), (1..=8).collect::<Vec<_>>());

    let err = report.into_result().unwrap_err();
    assert!(matches!(
        err,
        SqlBatchError::WorkersFailed {
            failed: 1,
            total: 1
        }
    ));
}

#[test]
fn test_batch_size_implies_commit_per_batch() {
    let db = MockDatabase::new().with_table("t", &["id"], Vec::new());
    let settings = ExecutionSettings::derive(Some(4), None).unwrap();
    assert_eq!(settings.transaction_mode(), TransactionMode::Every(4));

    let report = coordinator(&db, settings, 1).run(&mut lexer_for(&inserts(14)));

    assert!(report.is_success());
    assert_eq!(db.batch_sizes(), vec![4, 4, 4, 2]);
    assert_eq!(report.stats.batches, 4);
    assert_eq!(report.stats.commits, 4);
    assert_eq!(db.table_rows("t").len(), 14);
}

#[test]
fn test_large_transaction_spans_batches() {
    let db = MockDatabase::new().with_table("t", &["id"], Vec::new());
    let settings = ExecutionSettings::derive(Some(4), Some(TransactionMode::Every(20))).unwrap();

    let report = coordinator(&db, settings, 1).run(&mut lexer_for(&inserts(14)));

    assert!(report.is_success());
    assert_eq!(db.batch_sizes(), vec![4, 4, 4, 2]);
    assert_eq!(db.count_ops(|op| *op == MockOp::Commit), 1);
    assert_eq!(db.table_rows("t").len(), 14);
}

#[test]
fn test_query_rows_reach_output() {
    let db = MockDatabase::new().with_table(
        "people",
        &["id", "name"],
        vec![
            vec![Value::Int(1), Value::String("ada".to_string())],
            vec![Value::Int(2), Value::Null],
        ],
    );
    let buffer = SharedBuffer::default();
    let output = TextOutput::new(buffer.clone())
        .with_column_separator(",")
        .with_headers(true);
    let handler: Arc<dyn RowHandler> = Arc::new(Exclusive::new(output));

    let report = Coordinator::new(
        Arc::new(db.clone()),
        ExecutionSettings::default(),
        1,
        Some(handler),
    )
    .unwrap()
    .run(&mut lexer_for("select * from people"));

    assert!(report.is_success());
    assert_eq!(buffer.contents(), "id,name\n1,ada\n2,null\n");
}

#[test]
fn test_echo_sees_every_statement() {
    let db = MockDatabase::new().with_table("t", &["id"], Vec::new());
    let (echo, buffer) = SqlEcho::in_memory();

    let report = coordinator(&db, ExecutionSettings::default(), 3)
        .with_echo(Arc::new(echo))
        .run(&mut lexer_for(&inserts(5)));

    assert!(report.is_success());
    let mut lines: Vec<String> = buffer
        .contents()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    lines.sort();
    let mut expected: Vec<String> = (0..5).map(|i| format!("insert into t values ({i})")).collect();
    expected.sort();
    assert_eq!(lines, expected);
}

#[test]
fn test_input_error_stops_workers_cleanly() {
    let db = MockDatabase::new().with_table("t", &["id"], Vec::new());
    let mut lexer = lexer_for("insert into t values (1);");
    lexer.add_source(Cursor::new(vec![0xFF, 0xFE, 0x00]));

    let report = coordinator(&db, ExecutionSettings::default(), 2).run(&mut lexer);

    assert_eq!(report.failed, 0);
    assert!(report.producer_error.is_some());
    assert_eq!(db.table_rows("t").len(), 1);
    assert_eq!(db.count_ops(|op| *op == MockOp::Close), 2);

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, SqlBatchError::Input(_)));
}

#[test]
fn test_unsplit_sources_run_whole() {
    let db = MockDatabase::new().with_table("t", &["id"], Vec::new());
    let mut lexer = StatementLexer::new(LexerConfig {
        split_statements: false,
        ..LexerConfig::default()
    })
    .unwrap();
    lexer.add_str("insert into t values (1)");
    lexer.add_str("insert into t values (2)");

    let database: Arc<dyn Database> = Arc::new(db.clone());
    let report = Coordinator::new(database, ExecutionSettings::default(), 1, None)
        .unwrap()
        .run(&mut lexer);

    assert!(report.is_success());
    assert_eq!(report.statements, 2);
    assert_eq!(ids(&db.table_rows("t")), vec![1, 2]);
}

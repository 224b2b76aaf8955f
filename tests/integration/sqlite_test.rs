//! End-to-end tests through sqlx against SQLite files.
//!
//! Workers are plain threads that block on a runtime handle, so every test
//! builds its own multi-threaded runtime instead of using `#[tokio::test]`.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use sqlbatch::config::ConnectionConfig;
use sqlbatch::db::{Database, ResultCursor, SqlxDatabase, Value};
use sqlbatch::error::{Result, SqlBatchError};
use sqlbatch::handler::{Exclusive, RowHandler};
use sqlbatch::import::{ImportPipeline, ImportTarget};
use sqlbatch::lexer::{LexerConfig, StatementLexer};
use sqlbatch::output::{OutputFormat, OutputOptions, SharedBuffer, TextOutput};
use sqlbatch::pipeline::{Coordinator, ExecutionSettings, TransactionMode};
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn sqlite_config(dir: &TempDir, name: &str) -> ConnectionConfig {
    let path = dir.path().join(name);
    ConnectionConfig::from_url(format!("sqlite://{}?mode=rwc", path.display()))
}

fn open(rt: &Runtime, dir: &TempDir, name: &str, connections: u32) -> Arc<SqlxDatabase> {
    let config = sqlite_config(dir, name);
    Arc::new(SqlxDatabase::connect(&config, connections, rt.handle().clone()).unwrap())
}

fn lexer_for(sql: &str) -> StatementLexer {
    let mut lexer = StatementLexer::new(LexerConfig::default()).unwrap();
    lexer.add_str(sql);
    lexer
}

/// Runs `sql` on a single worker and returns what it printed.
fn query(db: &Arc<SqlxDatabase>, sql: &str) -> String {
    let buffer = SharedBuffer::default();
    let handler: Arc<dyn RowHandler> = Arc::new(Exclusive::new(TextOutput::new(buffer.clone())));
    let database: Arc<dyn Database> = db.clone();

    let report = Coordinator::new(database, ExecutionSettings::default(), 1, Some(handler))
        .unwrap()
        .run(&mut lexer_for(sql));
    assert!(report.is_success());
    buffer.contents()
}

fn setup(db: &Arc<SqlxDatabase>, sql: &str) {
    let database: Arc<dyn Database> = db.clone();
    let report = Coordinator::new(database, ExecutionSettings::default(), 1, None)
        .unwrap()
        .run(&mut lexer_for(sql));
    assert!(report.is_success());
}

#[test]
fn test_script_with_comments_and_quotes() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let db = open(&rt, &dir, "script.db", 1);

    let script = "
        -- schema
        create table note (id integer, body text);
        /* two rows; one with a separator inside quotes */
        insert into note values (1, 'a;b');
        insert into note values (2, 'it''s');
    ";
    setup(&db, script);

    assert_eq!(
        query(&db, "select id, body from note order by id"),
        "1\ta;b\n2\tit's\n"
    );
    db.close().unwrap();
}

#[test]
fn test_parallel_workers_auto_commit() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let db = open(&rt, &dir, "parallel.db", 3);
    setup(&db, "create table t (id integer)");

    let inserts: String = (0..30)
        .map(|i| format!("insert into t values ({i});\n"))
        .collect();
    let database: Arc<dyn Database> = db.clone();
    let report = Coordinator::new(database, ExecutionSettings::default(), 3, None)
        .unwrap()
        .run(&mut lexer_for(&inserts));

    assert!(report.is_success());
    assert_eq!(report.stats.statements, 30);
    assert_eq!(query(&db, "select count(*), sum(id) from t"), "30\t435\n");
    db.close().unwrap();
}

#[test]
fn test_rollback_mode_discards_changes() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let db = open(&rt, &dir, "rollback.db", 1);
    setup(&db, "create table t (id integer); insert into t values (1);");

    let settings = ExecutionSettings::derive(Some(2), Some(TransactionMode::Rollback)).unwrap();
    let database: Arc<dyn Database> = db.clone();
    let report = Coordinator::new(database, settings, 1, None)
        .unwrap()
        .run(&mut lexer_for(
            "insert into t values (2); delete from t; insert into t values (3);",
        ));

    assert!(report.is_success());
    assert_eq!(query(&db, "select id from t"), "1\n");
    db.close().unwrap();
}

#[test]
fn test_failed_statement_keeps_committed_transactions() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let db = open(&rt, &dir, "partial.db", 1);
    setup(&db, "create table t (id integer)");

    let sql: String = (1..=14)
        .map(|i| {
            if i == 11 {
                format!("insert into t valuez ({i});\n")
            } else {
                format!("insert into t values ({i});\n")
            }
        })
        .collect();
    let settings = ExecutionSettings::derive(None, Some(TransactionMode::Every(4))).unwrap();
    let database: Arc<dyn Database> = db.clone();
    let report = Coordinator::new(database, settings, 1, None)
        .unwrap()
        .run(&mut lexer_for(&sql));

    assert_eq!(report.failed, 1);
    assert_eq!(query(&db, "select count(*), max(id) from t"), "8\t8\n");
    db.close().unwrap();
}

#[test]
fn test_import_between_databases() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let source = open(&rt, &dir, "source.db", 1);
    let target = open(&rt, &dir, "target.db", 1);

    let rows: String = (1..=25)
        .map(|i| format!("insert into person values ({i}, 'p{i}', null);\n"))
        .collect();
    setup(
        &source,
        &format!("create table person (id integer, name text, extra text);\n{rows}"),
    );
    setup(&target, "create table person_copy (id integer, name text)");

    let settings = ExecutionSettings::derive(Some(10), None).unwrap();
    let import = ImportTarget::new("person_copy")
        .with_columns(ImportTarget::parse_columns("id, name"));
    let pipeline = ImportPipeline::new(target.clone(), import, 1, settings.clone()).unwrap();
    let handler: Arc<dyn RowHandler> = Arc::new(Exclusive::new(pipeline));

    let database: Arc<dyn Database> = source.clone();
    let report = Coordinator::new(database, settings.unbatched(), 1, Some(handler))
        .unwrap()
        .run(&mut lexer_for("select id, name, extra from person order by id"));

    assert!(report.is_success());
    assert_eq!(
        query(&target, "select count(*), min(name), max(id) from person_copy"),
        "25\tp1\t25\n"
    );

    let mut conn = target.connect().unwrap();
    let mut cursor = conn
        .execute("select id, name from person_copy where id = 7")
        .unwrap()
        .unwrap();
    assert_eq!(
        cursor.next_row().unwrap(),
        Some(vec![Value::Int(7), Value::String("p7".to_string())])
    );
    drop(cursor);
    conn.close().unwrap();

    source.close().unwrap();
    target.close().unwrap();
}

fn person_with_dates(db: &Arc<SqlxDatabase>) {
    setup(
        db,
        "create table person (id integer, birth_date date, active boolean, score numeric);
         insert into person values (1, '1990-05-01', 1, 7.5);
         insert into person values (2, null, 0, null);",
    );
}

#[test]
fn test_select_date_and_boolean_columns() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let db = open(&rt, &dir, "dates.db", 1);
    person_with_dates(&db);

    assert_eq!(
        query(&db, "select * from person order by id"),
        "1\t1990-05-01\ttrue\t7.5\n2\tnull\tfalse\tnull\n"
    );
    db.close().unwrap();
}

#[test]
fn test_import_date_and_boolean_columns() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let source = open(&rt, &dir, "dates_source.db", 1);
    let target = open(&rt, &dir, "dates_target.db", 1);
    person_with_dates(&source);
    setup(
        &target,
        "create table person_copy (id integer, birth_date date, active boolean, score numeric)",
    );

    let settings = ExecutionSettings::for_import(Some(5), None).unwrap();
    let pipeline =
        ImportPipeline::new(target.clone(), ImportTarget::new("person_copy"), 1, settings.clone())
            .unwrap();
    let handler: Arc<dyn RowHandler> = Arc::new(Exclusive::new(pipeline));

    let database: Arc<dyn Database> = source.clone();
    let report = Coordinator::new(database, settings.unbatched(), 1, Some(handler))
        .unwrap()
        .run(&mut lexer_for("select * from person"));

    assert!(report.is_success());
    assert_eq!(
        query(&target, "select * from person_copy order by id"),
        "1\t1990-05-01\ttrue\t7.5\n2\tnull\tfalse\tnull\n"
    );
    source.close().unwrap();
    target.close().unwrap();
}

#[test]
fn test_csv_output_from_sqlite() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let db = open(&rt, &dir, "csv.db", 1);
    person_with_dates(&db);

    let buffer = SharedBuffer::default();
    let handler = OutputOptions::for_format(OutputFormat::Csv)
        .handler(Box::new(buffer.clone()))
        .unwrap();
    let database: Arc<dyn Database> = db.clone();
    let report = Coordinator::new(database, ExecutionSettings::default(), 1, Some(handler))
        .unwrap()
        .run(&mut lexer_for("select id, birth_date, active from person order by id"));

    assert!(report.is_success());
    assert_eq!(
        buffer.contents(),
        "\"id\",\"birth_date\",\"active\"\n1,\"1990-05-01\",\"true\"\n2,,\"false\"\n"
    );
    db.close().unwrap();
}

/// Panics while holding a pooled connection.
struct PanickingHandler;

impl RowHandler for PanickingHandler {
    fn process(&self, _cursor: &mut dyn ResultCursor) -> Result<()> {
        panic!("handler failed");
    }
}

#[test]
fn test_handler_panic_fails_the_worker_only() {
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let db = open(&rt, &dir, "panic.db", 1);
    setup(&db, "create table t (id integer); insert into t values (1);");

    let database: Arc<dyn Database> = db.clone();
    let handler: Arc<dyn RowHandler> = Arc::new(PanickingHandler);
    let report = Coordinator::new(database, ExecutionSettings::default(), 1, Some(handler))
        .unwrap()
        .run(&mut lexer_for("select id from t"));

    assert_eq!(report.failed, 1);
    assert!(matches!(
        report.into_result().unwrap_err(),
        SqlBatchError::WorkersFailed { .. }
    ));

    // The connection went back to the pool of one
    assert_eq!(query(&db, "select count(*) from t"), "1\n");
    db.close().unwrap();
}

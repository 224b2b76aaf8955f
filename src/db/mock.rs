//! Mock database for testing.
//!
//! Provides an in-memory database with per-connection transactions and an
//! operation log, used by the test suite and by `--mock-db`. Statements are
//! parsed with sqlparser; of those, the mock runs:
//!
//! - `create table <t> (<col> [type], ...)`
//! - `drop table <t>`
//! - `insert into <t> [(<cols>)] values (<literal>, ...)[, (...)]`
//! - `select * from <t>`
//! - `delete from <t>`
//!
//! Text that does not parse fails with a syntax error; any other statement
//! is reported as unsupported.

use parking_lot::Mutex;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectName, ObjectType, SelectItem, SetExpr, Statement, TableFactor,
    TableWithJoins, UnaryOperator,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

use super::sql::parse_statement;
use super::{ColumnInfo, Connection, Database, ResultCursor, Row, RowSet, Value};
use crate::error::{Result, SqlBatchError};

/// One entry of the operation log.
#[derive(Debug, Clone, PartialEq)]
pub struct MockEvent {
    /// Sequence number of the connection the operation ran on, from 1.
    pub connection: usize,
    pub op: MockOp,
}

/// Operations recorded by [`MockDatabase`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockOp {
    Connect,
    AutoCommit(bool),
    FetchSize(usize),
    Execute(String),
    /// A statement batch with the given number of statements.
    Batch(usize),
    /// A parameterized insert batch with the given number of rows.
    InsertBatch(usize),
    Commit,
    Rollback,
    Close,
}

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug)]
enum Change {
    Insert { table: String, row: Row },
    Delete { table: String },
}

#[derive(Debug, Default)]
struct MockState {
    tables: BTreeMap<String, Table>,
    events: Vec<MockEvent>,
    connections: usize,
    failures: Vec<String>,
}

impl MockState {
    fn apply(&mut self, change: Change) -> Result<()> {
        match change {
            Change::Insert { table, row } => {
                self.table_mut(&table)?.rows.push(row);
            }
            Change::Delete { table } => {
                self.table_mut(&table)?.rows.clear();
            }
        }
        Ok(())
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| SqlBatchError::query(format!("relation \"{name}\" does not exist")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| SqlBatchError::query(format!("relation \"{name}\" does not exist")))
    }
}

/// An in-memory database shared by every connection it hands out.
///
/// Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<MockState>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table with the given columns and committed rows.
    pub fn with_table(self, name: &str, columns: &[&str], rows: Vec<Row>) -> Self {
        self.state.lock().tables.insert(
            name.to_lowercase(),
            Table {
                columns: columns.iter().map(|c| c.to_lowercase()).collect(),
                rows,
            },
        );
        self
    }

    /// Makes every statement or commit whose text contains `pattern` fail.
    pub fn with_failure(self, pattern: &str) -> Self {
        self.state.lock().failures.push(pattern.to_lowercase());
        self
    }

    /// Committed rows of a table, in insertion order.
    pub fn table_rows(&self, name: &str) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(&name.to_lowercase())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.lock().tables.contains_key(&name.to_lowercase())
    }

    /// Snapshot of the operation log.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    /// Number of logged operations matching `predicate`.
    pub fn count_ops(&self, predicate: impl Fn(&MockOp) -> bool) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| predicate(&e.op))
            .count()
    }

    /// Sizes of every statement or insert batch, in execution order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e.op {
                MockOp::Batch(n) | MockOp::InsertBatch(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    /// Number of connections handed out so far.
    pub fn connections_opened(&self) -> usize {
        self.state.lock().connections
    }
}

impl Database for MockDatabase {
    fn connect(&self) -> Result<Box<dyn Connection>> {
        let mut state = self.state.lock();
        state.connections += 1;
        let id = state.connections;
        state.events.push(MockEvent {
            connection: id,
            op: MockOp::Connect,
        });
        drop(state);

        Ok(Box::new(MockConnection {
            id,
            state: Arc::clone(&self.state),
            auto_commit: true,
            pending: Vec::new(),
        }))
    }
}

struct MockConnection {
    id: usize,
    state: Arc<Mutex<MockState>>,
    auto_commit: bool,
    pending: Vec<Change>,
}

impl MockConnection {
    fn log(&self, op: MockOp) {
        self.state.lock().events.push(MockEvent {
            connection: self.id,
            op,
        });
    }

    fn check_failure(&self, text: &str) -> Result<()> {
        let lowered = text.to_lowercase();
        let state = self.state.lock();
        match state.failures.iter().find(|f| lowered.contains(f.as_str())) {
            Some(pattern) => Err(SqlBatchError::query(format!(
                "injected failure matching '{pattern}'"
            ))),
            None => Ok(()),
        }
    }

    fn record(&mut self, change: Change) -> Result<()> {
        if self.auto_commit {
            self.state.lock().apply(change)
        } else {
            self.pending.push(change);
            Ok(())
        }
    }

    /// Runs one statement, returning the rows of a select.
    fn run(&mut self, sql: &str) -> Result<Option<RowSet>> {
        self.check_failure(sql)?;
        let statement = translate(parse_statement(sql)?, sql)?;

        match statement {
            MockStatement::Create { table, columns } => {
                let mut state = self.state.lock();
                if state.tables.contains_key(&table) {
                    return Err(SqlBatchError::query(format!(
                        "relation \"{table}\" already exists"
                    )));
                }
                state.tables.insert(
                    table,
                    Table {
                        columns,
                        rows: Vec::new(),
                    },
                );
                Ok(None)
            }
            MockStatement::Drop { table } => {
                let mut state = self.state.lock();
                state.table(&table)?;
                state.tables.remove(&table);
                Ok(None)
            }
            MockStatement::Insert {
                table,
                columns,
                rows,
            } => {
                for values in rows {
                    let row = self.shape_row(&table, columns.as_deref(), values)?;
                    self.record(Change::Insert {
                        table: table.clone(),
                        row,
                    })?;
                }
                Ok(None)
            }
            MockStatement::Delete { table } => {
                self.state.lock().table(&table)?;
                self.record(Change::Delete { table })?;
                Ok(None)
            }
            MockStatement::Select { table } => {
                let state = self.state.lock();
                let source = state.table(&table)?;
                let columns = source
                    .columns
                    .iter()
                    .map(|c| ColumnInfo::new(c.as_str(), "text"))
                    .collect();
                let mut rows = source.rows.clone();
                // A connection sees its own uncommitted inserts
                for change in &self.pending {
                    if let Change::Insert { table: t, row } = change {
                        if *t == table {
                            rows.push(row.clone());
                        }
                    }
                }
                Ok(Some(RowSet::new(columns, rows)))
            }
        }
    }

    /// Orders `values` into the table's full column layout.
    fn shape_row(&self, table: &str, columns: Option<&[String]>, values: Row) -> Result<Row> {
        let state = self.state.lock();
        let layout = &state.table(table)?.columns;

        let Some(columns) = columns else {
            if values.len() != layout.len() {
                return Err(SqlBatchError::query(format!(
                    "table \"{table}\" has {} columns but {} values were supplied",
                    layout.len(),
                    values.len()
                )));
            }
            return Ok(values);
        };

        if columns.len() != values.len() {
            return Err(SqlBatchError::query(format!(
                "INSERT has {} target columns but {} values",
                columns.len(),
                values.len()
            )));
        }

        let mut row = vec![Value::Null; layout.len()];
        for (column, value) in columns.iter().zip(values) {
            let position = layout.iter().position(|c| c == column).ok_or_else(|| {
                SqlBatchError::query(format!(
                    "column \"{column}\" of relation \"{table}\" does not exist"
                ))
            })?;
            row[position] = value;
        }
        Ok(row)
    }
}

impl Connection for MockConnection {
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<()> {
        self.log(MockOp::AutoCommit(auto_commit));
        if auto_commit && !self.auto_commit {
            self.apply_pending()?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn set_fetch_size(&mut self, rows: usize) -> Result<()> {
        self.log(MockOp::FetchSize(rows));
        Ok(())
    }

    fn execute<'a>(&'a mut self, sql: &'a str) -> Result<Option<Box<dyn ResultCursor + 'a>>> {
        trace!("mock execute: {}", sql);
        self.log(MockOp::Execute(sql.to_string()));
        Ok(self
            .run(sql)?
            .map(|rows| Box::new(rows) as Box<dyn ResultCursor + 'a>))
    }

    fn execute_batch(&mut self, statements: &[String]) -> Result<()> {
        self.log(MockOp::Batch(statements.len()));
        for sql in statements {
            self.run(sql)?;
        }
        Ok(())
    }

    fn insert_batch(&mut self, sql: &str, rows: &[Row]) -> Result<()> {
        self.log(MockOp::InsertBatch(rows.len()));
        self.check_failure(sql)?;

        let Statement::Insert(insert) = parse_statement(sql)? else {
            return Err(SqlBatchError::query(format!("not an insert: {sql}")));
        };
        let (table, columns) = insert_target(&insert);
        for row in rows {
            let row = self.shape_row(&table, columns.as_deref(), row.clone())?;
            self.record(Change::Insert {
                table: table.clone(),
                row,
            })?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.log(MockOp::Commit);
        self.check_failure("commit")?;
        self.apply_pending()
    }

    fn rollback(&mut self) -> Result<()> {
        self.log(MockOp::Rollback);
        self.pending.clear();
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.log(MockOp::Close);
        Ok(())
    }
}

impl MockConnection {
    fn apply_pending(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        for change in self.pending.drain(..) {
            state.apply(change)?;
        }
        Ok(())
    }
}

/// The statements the mock knows how to run, with names lowercased.
#[derive(Debug, PartialEq)]
enum MockStatement {
    Create {
        table: String,
        columns: Vec<String>,
    },
    Drop {
        table: String,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Row>,
    },
    Delete {
        table: String,
    },
    Select {
        table: String,
    },
}

fn unsupported(sql: &str) -> SqlBatchError {
    SqlBatchError::query(format!("unsupported by the mock database: {}", sql.trim()))
}

fn translate(statement: Statement, sql: &str) -> Result<MockStatement> {
    match statement {
        Statement::CreateTable(create) if !create.columns.is_empty() => {
            Ok(MockStatement::Create {
                table: object_name(&create.name),
                columns: create
                    .columns
                    .iter()
                    .map(|c| c.name.value.to_lowercase())
                    .collect(),
            })
        }
        Statement::Drop {
            object_type: ObjectType::Table,
            names,
            ..
        } => match names.as_slice() {
            [name] => Ok(MockStatement::Drop {
                table: object_name(name),
            }),
            _ => Err(unsupported(sql)),
        },
        Statement::Insert(insert) => {
            let (table, columns) = insert_target(&insert);
            let Some(SetExpr::Values(values)) = insert.source.as_deref().map(|q| q.body.as_ref())
            else {
                return Err(unsupported(sql));
            };
            let rows = values
                .rows
                .iter()
                .map(|row| row.iter().map(|expr| literal_value(expr, sql)).collect::<Result<Row>>())
                .collect::<Result<Vec<Row>>>()?;
            Ok(MockStatement::Insert {
                table,
                columns,
                rows,
            })
        }
        Statement::Delete(delete) if delete.selection.is_none() => {
            let from = match &delete.from {
                FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from) => from,
            };
            single_table(from)
                .map(|table| MockStatement::Delete { table })
                .ok_or_else(|| unsupported(sql))
        }
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select)
                if select.selection.is_none()
                    && matches!(select.projection.as_slice(), [SelectItem::Wildcard(_)]) =>
            {
                single_table(&select.from)
                    .map(|table| MockStatement::Select { table })
                    .ok_or_else(|| unsupported(sql))
            }
            _ => Err(unsupported(sql)),
        },
        _ => Err(unsupported(sql)),
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.to_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

/// Table and explicit column list of an insert.
fn insert_target(insert: &ast::Insert) -> (String, Option<Vec<String>>) {
    let columns = (!insert.columns.is_empty()).then(|| {
        insert
            .columns
            .iter()
            .map(|c| c.value.to_lowercase())
            .collect()
    });
    (object_name(&insert.table_name), columns)
}

/// The name of a plain single-table `from` clause.
fn single_table(from: &[TableWithJoins]) -> Option<String> {
    match from {
        [TableWithJoins { relation: TableFactor::Table { name, .. }, joins }] if joins.is_empty() => {
            Some(object_name(name))
        }
        _ => None,
    }
}

fn literal_value(expr: &Expr, sql: &str) -> Result<Value> {
    match expr {
        Expr::Value(value) => match value {
            ast::Value::Null => Ok(Value::Null),
            ast::Value::Boolean(b) => Ok(Value::Bool(*b)),
            ast::Value::SingleQuotedString(s) => Ok(Value::String(s.clone())),
            ast::Value::Number(n, _) => n
                .parse::<i64>()
                .map(Value::Int)
                .or_else(|_| n.parse::<f64>().map(Value::Float))
                .map_err(|_| unsupported(sql)),
            _ => Err(unsupported(sql)),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal_value(expr, sql)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(unsupported(sql)),
        },
        _ => Err(unsupported(sql)),
    }
}

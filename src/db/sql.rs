//! SQL text helpers built on sqlparser.
//!
//! Parses single statements for the mock database and renders [`Value`]s as
//! SQL literals for insert output and literal imports.

use sqlparser::ast::{self, Expr, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use super::{Row, Value};
use crate::error::{Result, SqlBatchError};

/// Parses `sql`, which must hold exactly one statement.
pub fn parse_statement(sql: &str) -> Result<Statement> {
    let mut statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| SqlBatchError::query(format!("syntax error: {e}")))?;

    match statements.len() {
        1 => Ok(statements.remove(0)),
        0 => Err(SqlBatchError::query("syntax error: empty statement")),
        n => Err(SqlBatchError::query(format!(
            "expected a single statement, found {n}"
        ))),
    }
}

/// The literal for `value`.
pub fn literal(value: &Value) -> ast::Value {
    match value {
        Value::Null => ast::Value::Null,
        Value::Bool(b) => ast::Value::Boolean(*b),
        Value::Int(i) => ast::Value::Number(i.to_string(), false),
        Value::Float(f) if f.is_finite() => ast::Value::Number(f.to_string(), false),
        Value::Float(f) => ast::Value::SingleQuotedString(non_finite(*f).to_string()),
        Value::String(s) => ast::Value::SingleQuotedString(s.clone()),
        Value::Bytes(b) => ast::Value::HexStringLiteral(hex(b)),
    }
}

/// NaN and the infinities are not numeric literals; both backends accept them quoted.
fn non_finite(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Rewrites the `values` list of an insert template into one literal row per
/// entry of `rows`.
pub fn inline_rows(
    template: &str,
    rows: &[Row],
    render: impl Fn(&Value) -> ast::Value,
) -> Result<String> {
    let mut statement = parse_statement(template)?;

    let Statement::Insert(insert) = &mut statement else {
        return Err(SqlBatchError::internal(format!("not an insert: {template}")));
    };
    let Some(SetExpr::Values(values)) = insert.source.as_deref_mut().map(|q| &mut *q.body) else {
        return Err(SqlBatchError::internal(format!(
            "insert without a values list: {template}"
        )));
    };

    values.rows = rows
        .iter()
        .map(|row| row.iter().map(|v| Expr::Value(render(v))).collect())
        .collect();

    Ok(statement.to_string())
}

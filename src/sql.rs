use chrono::{DateTime, NaiveDateTime};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBooking {
        resource_id: ResourceId,
        start: Ms,
        end: Ms,
        booker: Option<String>,
    },
    /// Soft delete: the booking is kept as `canceled`.
    CancelBooking {
        id: BookingId,
    },
    SelectBookings {
        resource_id: ResourceId,
    },
    SelectBooking {
        id: BookingId,
    },
    SelectResources,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let rows = extract_insert_rows(insert)?;
    if rows.len() > 1 {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    }

    // (resource_id, start, "end"[, booker])
    let values = &rows[0];
    if values.len() < 3 {
        return Err(SqlError::WrongArity("bookings", 3, values.len()));
    }
    let booker = match values.get(3) {
        Some(expr) => parse_string_or_null(expr)?,
        None => None,
    };
    Ok(Command::InsertBooking {
        resource_id: parse_ulid(&values[0], SqlError::UnknownResource)?,
        start: parse_timestamp(&values[1])?,
        end: parse_timestamp(&values[2])?,
        booker,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    match extract_eq_filter(&delete.selection)? {
        ("id", value) => Ok(Command::CancelBooking {
            id: parse_ulid(value, SqlError::UnknownBooking)?,
        }),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "bookings" => match extract_eq_filter(&select.selection)? {
            ("resource_id", value) => Ok(Command::SelectBookings {
                resource_id: parse_ulid(value, SqlError::UnknownResource)?,
            }),
            ("id", value) => Ok(Command::SelectBooking {
                id: parse_ulid(value, SqlError::UnknownBooking)?,
            }),
            _ => Err(SqlError::MissingFilter("resource_id or id")),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => {
            Err(SqlError::Parse("empty VALUES".into()))
        }
        SetExpr::Values(values) => Ok(values.rows.as_slice()),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// The single `<column> = <value>` a WHERE clause must consist of.
fn extract_eq_filter(selection: &Option<Expr>) -> Result<(&'static str, &Expr), SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let Expr::BinaryOp {
        left,
        op: ast::BinaryOperator::Eq,
        right,
    } = sel
    else {
        return Err(SqlError::Unsupported(format!("filter {sel}")));
    };
    match expr_column_name(left).as_deref() {
        Some("id") => Ok(("id", right.as_ref())),
        Some("resource_id") => Ok(("resource_id", right.as_ref())),
        Some(other) => Err(SqlError::Unsupported(format!("filter on {other}"))),
        None => Err(SqlError::Parse(format!("expected column, got {left}"))),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// An id literal. A string or number that is not a ULID names a row that
/// cannot exist, so it is reported through `not_found`.
fn parse_ulid(expr: &Expr, not_found: fn(String) -> SqlError) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|_| not_found(s.clone()))
        }
        Some(Value::Number(s, _)) => Err(not_found(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string or NULL, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Integer Unix milliseconds, or a quoted RFC 3339 / ISO-8601 timestamp.
fn parse_timestamp(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad timestamp {s}: {e}"))),
        Some(Value::SingleQuotedString(s)) => parse_timestamp_str(s),
        Some(value) => Err(SqlError::Parse(format!("expected timestamp, got {value}"))),
        None => match expr {
            Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } => parse_timestamp(expr)?
                .checked_neg()
                .ok_or_else(|| SqlError::Parse(format!("timestamp out of range: {expr}"))),
            _ => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        },
    }
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Strings without an offset are read as UTC.
pub fn parse_timestamp_str(s: &str) -> Result<Ms, SqlError> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<Ms>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
        .ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s:?}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    /// Malformed room id; no room can have it.
    UnknownResource(String),
    /// Malformed booking id; no booking can have it.
    UnknownBooking(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::UnknownResource(id) => write!(f, "room not found: {id}"),
            SqlError::UnknownBooking(id) => write!(f, "booking not found: {id}"),
        }
    }
}

impl std::error::Error for SqlError {}

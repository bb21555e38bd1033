use std::time::Duration;

use rusqlite::types::ValueRef;

use crate::error::SqlMapperError;
use crate::executor::{Column, Command, ResultSet};
use crate::rewrite::split_statements;
use crate::types::DbValue;

use super::params::bind_parameters;

/// Result sets and the affected-row total of one command.
#[derive(Debug, Default)]
pub(crate) struct CommandOutcome {
    pub sets: Vec<ResultSet>,
    pub rows_affected: u64,
}

/// Extract a [`DbValue`] from a `SQLite` row.
///
/// # Errors
/// Returns [`SqlMapperError::SqliteError`] if the column cannot be read.
pub fn sqlite_extract_value_sync(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<DbValue, SqlMapperError> {
    let value = match row.get_ref(idx)? {
        ValueRef::Null => DbValue::Null,
        ValueRef::Integer(i) => DbValue::Int(i),
        ValueRef::Real(f) => DbValue::Float(f),
        ValueRef::Text(bytes) => DbValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => DbValue::Blob(bytes.to_vec()),
    };
    Ok(value)
}

fn statement_columns(stmt: &rusqlite::Statement<'_>) -> Vec<Column> {
    stmt.columns()
        .iter()
        .enumerate()
        .map(|(ordinal, column)| {
            Column::new(column.name(), ordinal, column.decl_type().unwrap_or_default())
        })
        .collect()
}

/// Run every statement of `command` in order.
///
/// Statements that return columns produce a [`ResultSet`]; the others add their change count.
/// The cancellation token is checked between statements and between rows. A command timeout
/// replaces the busy timeout for this command only; `default_timeout` is restored afterwards.
///
/// # Errors
/// Returns driver, binding and cancellation errors.
pub(crate) fn run_command(
    conn: &rusqlite::Connection,
    command: &Command,
    default_timeout: Duration,
) -> Result<CommandOutcome, SqlMapperError> {
    let Some(timeout) = command.timeout else {
        return run_statements(conn, command);
    };
    conn.busy_timeout(timeout)?;
    let outcome = run_statements(conn, command);
    conn.busy_timeout(default_timeout)?;
    outcome
}

fn run_statements(
    conn: &rusqlite::Connection,
    command: &Command,
) -> Result<CommandOutcome, SqlMapperError> {
    let mut outcome = CommandOutcome::default();
    for sql in split_statements(&command.sql) {
        command.check_cancelled()?;
        let mut stmt = conn.prepare(sql)?;
        bind_parameters(&mut stmt, command)?;
        if stmt.column_count() == 0 {
            let changed = stmt.raw_execute()?;
            outcome.rows_affected += u64::try_from(changed).unwrap_or(u64::MAX);
            continue;
        }
        let columns = statement_columns(&stmt);
        let width = columns.len();
        let mut set = ResultSet::with_capacity(columns, 16);
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            command.check_cancelled()?;
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(sqlite_extract_value_sync(row, idx)?);
            }
            set.add_row_values(values)?;
        }
        outcome.sets.push(set);
    }
    Ok(outcome)
}

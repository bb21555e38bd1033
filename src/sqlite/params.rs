use std::fmt::Write;

use rusqlite::Statement;
use rusqlite::types::Value;

use crate::error::SqlMapperError;
use crate::executor::{Command, Parameter};
use crate::types::DbValue;

// Thread-local buffer for timestamp formatting
thread_local! {
    static TIMESTAMP_BUF: std::cell::RefCell<String> =
        std::cell::RefCell::new(String::with_capacity(32));
}

/// Convert a single [`DbValue`] to a rusqlite `Value`.
#[must_use]
pub fn db_value_to_sqlite_value(value: &DbValue) -> Value {
    match value {
        DbValue::Null => Value::Null,
        DbValue::Bool(b) => Value::Integer(i64::from(*b)),
        DbValue::Int(i) => Value::Integer(*i),
        DbValue::Float(f) => Value::Real(*f),
        DbValue::Text(s) => Value::Text(s.clone()),
        DbValue::Timestamp(dt) => TIMESTAMP_BUF.with(|buf| {
            let mut borrow = buf.borrow_mut();
            borrow.clear();
            let _ = write!(borrow, "{}", dt.format("%F %T%.f"));
            Value::Text(borrow.clone())
        }),
        DbValue::Json(json) => Value::Text(json.to_string()),
        DbValue::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

/// Bind the command's parameters to every placeholder of `stmt`.
///
/// Named placeholders (`@name`, `:name`, `$name`) are matched case-insensitively; bare `?`
/// placeholders take the command's parameters in order. Values bind by their runtime variant;
/// `DbType` and size tags have no meaning to `SQLite` and are ignored.
///
/// # Errors
/// Returns [`SqlMapperError::ExecutionError`] when a placeholder has no matching parameter.
pub fn bind_parameters(stmt: &mut Statement<'_>, command: &Command) -> Result<(), SqlMapperError> {
    let mut positional = command.parameters.iter();
    for index in 1..=stmt.parameter_count() {
        let parameter: &Parameter = match stmt.parameter_name(index) {
            Some(name) => {
                let bare = name.trim_start_matches(['@', ':', '$']);
                command.parameter(bare).ok_or_else(|| {
                    SqlMapperError::ExecutionError(format!(
                        "no value was supplied for parameter {name}"
                    ))
                })?
            }
            None => positional.next().ok_or_else(|| {
                SqlMapperError::ExecutionError(format!(
                    "no value was supplied for positional parameter {index}"
                ))
            })?,
        };
        stmt.raw_bind_parameter(index, db_value_to_sqlite_value(&parameter.value))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn timestamps_bind_as_iso_text() {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 6)
            .and_then(|d| d.and_hms_opt(7, 8, 9))
            .unwrap();
        assert_eq!(
            db_value_to_sqlite_value(&DbValue::Timestamp(ts)),
            Value::Text("2024-05-06 07:08:09".into())
        );
        assert_eq!(db_value_to_sqlite_value(&DbValue::Bool(true)), Value::Integer(1));
    }

    #[test]
    fn named_placeholders_ignore_case_and_prefix() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("select @Id, :name").unwrap();
        let mut command = Command::new("select @Id, :name");
        command.add_parameter(Parameter::input("id", DbValue::Int(3)));
        command.add_parameter(Parameter::input("NAME", DbValue::Text("x".into())));
        bind_parameters(&mut stmt, &command).unwrap();

        let mut missing = conn.prepare("select @other").unwrap();
        assert!(matches!(
            bind_parameters(&mut missing, &command),
            Err(SqlMapperError::ExecutionError(_))
        ));
    }
}

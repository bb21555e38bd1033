use std::borrow::Cow;

use tiberius::{ColumnData, Query, ToSql};

use crate::executor::Command;
use crate::rewrite::to_positional;
use crate::types::{CommandKind, DbValue, ParameterDirection};

impl ToSql for DbValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            DbValue::Null => ColumnData::String(None),
            DbValue::Bool(b) => ColumnData::Bit(Some(*b)),
            DbValue::Int(i) => ColumnData::I64(Some(*i)),
            DbValue::Float(f) => ColumnData::F64(Some(*f)),
            DbValue::Text(s) => ColumnData::String(Some(Cow::from(s.as_str()))),
            DbValue::Timestamp(dt) => dt.to_sql(),
            DbValue::Json(json) => ColumnData::String(Some(Cow::from(json.to_string()))),
            DbValue::Blob(bytes) => ColumnData::Binary(Some(Cow::from(bytes.as_slice()))),
        }
    }
}

/// Translate a bound command into SQL Server's positional form.
///
/// Text commands have their bound `@name` tokens rewritten to `@P1..@Pn`; other `@name` tokens
/// are batch variables and pass through unchanged. Stored procedures become an `EXEC` call
/// passing every input parameter by name.
#[must_use]
pub fn positional_sql(command: &Command) -> (String, Vec<&DbValue>) {
    match command.kind {
        CommandKind::Text => {
            let (sql, slots) = to_positional(&command.sql, |name| command.has_parameter(name));
            let values = slots
                .iter()
                .filter_map(|name| command.parameter(name).map(|p| &p.value))
                .collect();
            (sql, values)
        }
        CommandKind::StoredProcedure => {
            let inputs: Vec<_> = command
                .parameters
                .iter()
                .filter(|p| p.direction != ParameterDirection::ReturnValue)
                .collect();
            let args: Vec<String> = inputs
                .iter()
                .enumerate()
                .map(|(idx, p)| format!("@{} = @P{}", p.name, idx + 1))
                .collect();
            let sql = if args.is_empty() {
                format!("EXEC {}", command.sql)
            } else {
                format!("EXEC {} {}", command.sql, args.join(", "))
            };
            (sql, inputs.into_iter().map(|p| &p.value).collect())
        }
    }
}

/// Build a tiberius query with every positional value bound.
///
/// Values bind by their runtime variant; `DbType`, size, precision and scale tags are not
/// forwarded because tiberius infers the wire type from the bound Rust value.
#[must_use]
pub fn bind_query(command: &Command) -> Query<'static> {
    let (sql, values) = positional_sql(command);
    let mut query = Query::new(sql);
    for value in values {
        match value {
            DbValue::Null => query.bind(Option::<String>::None),
            DbValue::Bool(b) => query.bind(*b),
            DbValue::Int(i) => query.bind(*i),
            DbValue::Float(f) => query.bind(*f),
            DbValue::Text(s) => query.bind(s.clone()),
            DbValue::Timestamp(dt) => query.bind(*dt),
            DbValue::Json(json) => query.bind(json.to_string()),
            DbValue::Blob(bytes) => query.bind(bytes.clone()),
        }
    }
    query
}

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::TryStreamExt;
use tiberius::{ColumnData, FromSql, QueryItem};

use super::client::MssqlClient;
use super::params::bind_query;
use crate::error::SqlMapperError;
use crate::executor::{Column, Command, ResultSet};
use crate::types::DbValue;

fn execution_error(context: &str, err: &tiberius::error::Error) -> SqlMapperError {
    SqlMapperError::ExecutionError(format!("SQL Server {context} error: {err}"))
}

/// Run a command and collect every result set it produces, including empty ones.
///
/// # Errors
/// Returns [`SqlMapperError::ExecutionError`] if the query or a row fetch fails.
pub async fn build_result_sets(
    client: &mut MssqlClient,
    command: &Command,
) -> Result<Vec<ResultSet>, SqlMapperError> {
    let query = bind_query(command);
    let mut stream = query
        .query(client)
        .await
        .map_err(|e| execution_error("query", &e))?;

    let mut sets: Vec<ResultSet> = Vec::new();
    while let Some(item) = stream
        .try_next()
        .await
        .map_err(|e| execution_error("row fetch", &e))?
    {
        match item {
            QueryItem::Metadata(meta) => {
                let columns = meta
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(ordinal, col)| {
                        Column::new(col.name(), ordinal, format!("{:?}", col.column_type()))
                    })
                    .collect();
                sets.push(ResultSet::with_capacity(columns, 16));
            }
            QueryItem::Row(row) => {
                command.check_cancelled()?;
                let set = sets.last_mut().ok_or_else(|| {
                    SqlMapperError::ExecutionError("row received before column metadata".into())
                })?;
                let values = row
                    .into_iter()
                    .map(|data| extract_value(&data))
                    .collect::<Result<Vec<_>, _>>()?;
                set.add_row_values(values)?;
            }
        }
    }
    Ok(sets)
}

/// Run a command that returns no rows and sum the affected-row counts of its statements.
///
/// # Errors
/// Returns [`SqlMapperError::ExecutionError`] if execution fails.
pub async fn execute_command(
    client: &mut MssqlClient,
    command: &Command,
) -> Result<u64, SqlMapperError> {
    let query = bind_query(command);
    let result = query
        .execute(client)
        .await
        .map_err(|e| execution_error("execute", &e))?;
    Ok(result.rows_affected().iter().sum())
}

fn temporal<'a, T: FromSql<'a>>(
    data: &'a ColumnData<'static>,
) -> Result<Option<T>, SqlMapperError> {
    T::from_sql(data).map_err(|e| execution_error("value conversion", &e))
}

/// Convert one cell into a [`DbValue`].
///
/// # Errors
/// Returns [`SqlMapperError::ExecutionError`] when a temporal or numeric cell cannot be read.
pub fn extract_value(data: &ColumnData<'static>) -> Result<DbValue, SqlMapperError> {
    let value = match data {
        ColumnData::U8(v) => v.map_or(DbValue::Null, |v| DbValue::Int(i64::from(v))),
        ColumnData::I16(v) => v.map_or(DbValue::Null, |v| DbValue::Int(i64::from(v))),
        ColumnData::I32(v) => v.map_or(DbValue::Null, |v| DbValue::Int(i64::from(v))),
        ColumnData::I64(v) => v.map_or(DbValue::Null, DbValue::Int),
        ColumnData::F32(v) => v.map_or(DbValue::Null, |v| DbValue::Float(f64::from(v))),
        ColumnData::F64(v) => v.map_or(DbValue::Null, DbValue::Float),
        ColumnData::Bit(v) => v.map_or(DbValue::Null, DbValue::Bool),
        ColumnData::String(v) => v
            .as_ref()
            .map_or(DbValue::Null, |s| DbValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.map_or(DbValue::Null, |g| DbValue::Text(g.to_string())),
        ColumnData::Binary(v) => v
            .as_ref()
            .map_or(DbValue::Null, |b| DbValue::Blob(b.to_vec())),
        ColumnData::Numeric(v) => match v {
            Some(n) => DbValue::Float(n.to_string().parse::<f64>().map_err(|e| {
                SqlMapperError::ExecutionError(format!("SQL Server numeric conversion error: {e}"))
            })?),
            None => DbValue::Null,
        },
        ColumnData::Xml(v) => v.as_ref().map_or(DbValue::Null, |x| {
            DbValue::Text(x.clone().into_owned().into_string())
        }),
        ColumnData::Date(_) => temporal::<NaiveDate>(data)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or(DbValue::Null, DbValue::Timestamp),
        ColumnData::Time(_) => temporal::<NaiveTime>(data)?
            .map_or(DbValue::Null, |t| DbValue::Text(t.format("%H:%M:%S%.f").to_string())),
        ColumnData::DateTimeOffset(_) => temporal::<DateTime<Utc>>(data)?
            .map_or(DbValue::Null, |dt| DbValue::Timestamp(dt.naive_utc())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            temporal::<NaiveDateTime>(data)?.map_or(DbValue::Null, DbValue::Timestamp)
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn scalar_cells_convert() {
        assert_eq!(extract_value(&ColumnData::I32(Some(7))).unwrap(), DbValue::Int(7));
        assert_eq!(extract_value(&ColumnData::I32(None)).unwrap(), DbValue::Null);
        assert_eq!(
            extract_value(&ColumnData::String(Some(Cow::from("hi")))).unwrap(),
            DbValue::Text("hi".into())
        );
        assert_eq!(
            extract_value(&ColumnData::Bit(Some(true))).unwrap(),
            DbValue::Bool(true)
        );
    }
}

use std::any::type_name;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::error::{ConversionError, DeserializationError, SqlMapperError};
use crate::executor::Column;
use crate::mapping::convert::FromDbValue;
use crate::types::DbValue;

type ReadFn<T> = dyn Fn(&[DbValue]) -> Result<T, SqlMapperError> + Send + Sync;

/// A row deserializer compiled for one column layout.
///
/// Cheap to clone; the compiled plan is shared.
pub struct RowReader<T> {
    read: Arc<ReadFn<T>>,
}

impl<T> Clone for RowReader<T> {
    fn clone(&self) -> Self {
        Self {
            read: Arc::clone(&self.read),
        }
    }
}

impl<T> fmt::Debug for RowReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowReader")
            .field("target", &type_name::<T>())
            .finish()
    }
}

impl<T> RowReader<T> {
    pub fn new<F>(read: F) -> Self
    where
        F: Fn(&[DbValue]) -> Result<T, SqlMapperError> + Send + Sync + 'static,
    {
        Self {
            read: Arc::new(read),
        }
    }

    /// Materialize one row; `row` holds every column of the result set.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::Deserialization`] when a value does not fit its target.
    pub fn read(&self, row: &[DbValue]) -> Result<T, SqlMapperError> {
        (self.read)(row)
    }
}

/// A type that can be materialized from a contiguous range of columns.
pub trait FromRow: Sized + Send + 'static {
    /// Build a reader for `columns[range]`.
    ///
    /// # Errors
    /// Returns [`DeserializationError::NoColumns`] for an empty range and
    /// [`DeserializationError::NoConstructor`] when the type cannot be built from the columns.
    fn compile(columns: &[Column], range: Range<usize>) -> Result<RowReader<Self>, SqlMapperError>;
}

/// Attach column context to a low-level conversion failure.
pub(crate) fn conversion_error(
    ordinal: usize,
    column: &str,
    value: &DbValue,
    member: String,
    err: ConversionError,
) -> SqlMapperError {
    DeserializationError::Conversion {
        ordinal,
        column: column.to_string(),
        value: value.to_string(),
        value_type: value.type_name(),
        member,
        reason: err.reason,
    }
    .into()
}

pub(crate) fn value_at(row: &[DbValue], ordinal: usize) -> &DbValue {
    const NULL: &DbValue = &DbValue::Null;
    row.get(ordinal).unwrap_or(NULL)
}

/// Reader for a scalar target taken from the first column of the range.
pub fn compile_scalar<T: FromDbValue + Send + 'static>(
    columns: &[Column],
    range: Range<usize>,
) -> Result<RowReader<T>, SqlMapperError> {
    let column = columns
        .get(range.start)
        .filter(|_| !range.is_empty())
        .ok_or(DeserializationError::NoColumns)?;
    let ordinal = range.start;
    let name = column.name.clone();
    Ok(RowReader::new(move |row| {
        let value = value_at(row, ordinal);
        T::from_db_value(value).map_err(|err| {
            conversion_error(ordinal, &name, value, type_name::<T>().to_string(), err)
        })
    }))
}

macro_rules! impl_scalar_row {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromRow for $ty {
                fn compile(
                    columns: &[Column],
                    range: Range<usize>,
                ) -> Result<RowReader<Self>, SqlMapperError> {
                    compile_scalar::<$ty>(columns, range)
                }
            }
        )*
    };
}

impl_scalar_row!(
    u8, i8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64, bool, char, String,
    Vec<u8>, chrono::NaiveDateTime, chrono::NaiveDate, serde_json::Value, DbValue,
);

/// `None` when the first column of the range is null.
impl<T: FromRow> FromRow for Option<T> {
    fn compile(columns: &[Column], range: Range<usize>) -> Result<RowReader<Self>, SqlMapperError> {
        let first = range.start;
        let inner = T::compile(columns, range)?;
        Ok(RowReader::new(move |row| {
            if value_at(row, first).is_null() {
                Ok(None)
            } else {
                inner.read(row).map(Some)
            }
        }))
    }
}

use crate::error::ConversionError;
use crate::types::DbValue;

/// A fieldless enum stored as its integer value.
///
/// Implemented by [`crate::sql_enum!`]. Columns read as the enum either by underlying value or,
/// for text columns, by variant name (case-insensitive).
pub trait SqlEnum: Sized + Copy + Send + Sync + 'static {
    fn to_underlying(self) -> i64;
    fn from_underlying(value: i64) -> Option<Self>;
    fn variant_name(self) -> &'static str;
    fn from_name(name: &str) -> Option<Self>;
}

/// Read an enum from an integer or text column.
///
/// # Errors
/// Returns [`ConversionError`] when no variant matches.
pub fn enum_from_db_value<E: SqlEnum>(value: &DbValue) -> Result<E, ConversionError> {
    let target = std::any::type_name::<E>();
    let unmatched = || {
        ConversionError::new(
            target,
            value.type_name(),
            format!("{value} does not name a variant"),
        )
    };
    match value {
        DbValue::Int(i) => E::from_underlying(*i).ok_or_else(unmatched),
        DbValue::Float(f) if f.fract() == 0.0 && f.is_finite() => {
            #[allow(clippy::cast_possible_truncation)]
            let whole = *f as i64;
            E::from_underlying(whole).ok_or_else(unmatched)
        }
        DbValue::Text(s) => {
            let trimmed = s.trim();
            E::from_name(trimmed)
                .or_else(|| trimmed.parse::<i64>().ok().and_then(E::from_underlying))
                .ok_or_else(unmatched)
        }
        _ => Err(unmatched()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::convert::{FromDbValue, ToDbValue};

    crate::sql_enum! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub enum Level {
            #[default]
            Low = 1,
            High = 5,
        }
    }

    #[test]
    fn reads_by_value_and_by_name() {
        assert_eq!(Level::from_db_value(&DbValue::Int(5)).unwrap(), Level::High);
        assert_eq!(
            Level::from_db_value(&DbValue::Text("high".into())).unwrap(),
            Level::High
        );
        assert_eq!(
            Level::from_db_value(&DbValue::Text("1".into())).unwrap(),
            Level::Low
        );
        assert!(Level::from_db_value(&DbValue::Int(3)).is_err());
    }

    #[test]
    fn null_reads_as_default_and_writes_as_integer() {
        assert_eq!(Level::from_db_value(&DbValue::Null).unwrap(), Level::Low);
        assert_eq!(Level::High.to_db_value(), DbValue::Int(5));
        assert_eq!(Level::High.variant_name(), "High");
    }
}

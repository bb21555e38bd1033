//! Coercion between raw [`DbValue`]s and Rust scalars.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;

use crate::error::ConversionError;
use crate::types::DbValue;

/// A Rust type that can be read from a single column value.
///
/// Numeric targets accept any numeric source that fits (`bigint` into `i32` works when the value
/// is in range), integers read as booleans, and text reads as timestamps. `Option<T>` maps null to
/// `None`; every other target maps null to [`FromDbValue::null_value`].
pub trait FromDbValue: Sized {
    /// # Errors
    /// Returns [`ConversionError`] when the value cannot represent `Self`.
    fn from_db_value(value: &DbValue) -> Result<Self, ConversionError>;

    /// The value used for a null column.
    fn null_value() -> Self;
}

/// A Rust type that can be sent as a single parameter value.
pub trait ToDbValue {
    fn to_db_value(&self) -> DbValue;
}

/// Scalars that may appear as elements of an expanded `IN` list.
///
/// `u8` is deliberately absent: `Vec<u8>` binds as a blob.
pub trait ListElement: ToDbValue + 'static {}

fn mismatch(expected: &'static str, value: &DbValue) -> ConversionError {
    ConversionError::new(
        expected,
        value.type_name(),
        format!("{value} is not a valid {expected}"),
    )
}

macro_rules! impl_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromDbValue for $ty {
                fn from_db_value(value: &DbValue) -> Result<Self, ConversionError> {
                    let name = stringify!($ty);
                    let out_of_range = |shown: &dyn std::fmt::Display| {
                        let reason = format!("{shown} is out of range");
                        ConversionError::new(name, value.type_name(), reason)
                    };
                    match value {
                        DbValue::Null => Ok(Self::null_value()),
                        DbValue::Int(i) => <$ty>::try_from(*i).map_err(|_| out_of_range(i)),
                        DbValue::Bool(b) => Ok(<$ty>::from(*b)),
                        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                        DbValue::Float(f) => {
                            if f.fract() != 0.0 || !f.is_finite() {
                                return Err(mismatch(name, value));
                            }
                            let whole = *f as i128;
                            <$ty>::try_from(whole).map_err(|_| out_of_range(f))
                        }
                        DbValue::Text(s) => {
                            s.trim().parse::<$ty>().map_err(|_| mismatch(name, value))
                        }
                        _ => Err(mismatch(name, value)),
                    }
                }

                fn null_value() -> Self {
                    0
                }
            }

            impl ToDbValue for $ty {
                #[allow(clippy::cast_lossless)]
                fn to_db_value(&self) -> DbValue {
                    match i64::try_from(*self) {
                        Ok(v) => DbValue::Int(v),
                        Err(_) => DbValue::Text(self.to_string()),
                    }
                }
            }
        )*
    };
}

impl_integer!(u8, i8, i16, u16, i32, u32, i64, u64, isize, usize);

impl ListElement for i8 {}
impl ListElement for i16 {}
impl ListElement for u16 {}
impl ListElement for i32 {}
impl ListElement for u32 {}
impl ListElement for i64 {}
impl ListElement for u64 {}
impl ListElement for isize {}
impl ListElement for usize {}

macro_rules! impl_float {
    ($($ty:ty),*) => {
        $(
            impl FromDbValue for $ty {
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                fn from_db_value(value: &DbValue) -> Result<Self, ConversionError> {
                    match value {
                        DbValue::Null => Ok(Self::null_value()),
                        DbValue::Float(f) => Ok(*f as $ty),
                        DbValue::Int(i) => Ok(*i as $ty),
                        DbValue::Text(s) => s
                            .trim()
                            .parse::<$ty>()
                            .map_err(|_| mismatch(stringify!($ty), value)),
                        _ => Err(mismatch(stringify!($ty), value)),
                    }
                }

                fn null_value() -> Self {
                    0.0
                }
            }

            impl ToDbValue for $ty {
                fn to_db_value(&self) -> DbValue {
                    DbValue::Float(f64::from(*self))
                }
            }

            impl ListElement for $ty {}
        )*
    };
}

impl_float!(f32, f64);

impl FromDbValue for bool {
    fn from_db_value(value: &DbValue) -> Result<Self, ConversionError> {
        match value {
            DbValue::Null => Ok(false),
            DbValue::Bool(b) => Ok(*b),
            DbValue::Int(i) => Ok(*i != 0),
            DbValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(mismatch("bool", value)),
            },
            _ => Err(mismatch("bool", value)),
        }
    }

    fn null_value() -> Self {
        false
    }
}

impl ToDbValue for bool {
    fn to_db_value(&self) -> DbValue {
        DbValue::Bool(*self)
    }
}

impl ListElement for bool {}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, ConversionError> {
        match value {
            DbValue::Null => Ok(String::new()),
            DbValue::Text(s) => Ok(s.clone()),
            DbValue::Blob(bytes) => {
                String::from_utf8(bytes.clone()).map_err(|_| mismatch("String", value))
            }
            other => Ok(other.to_string()),
        }
    }

    fn null_value() -> Self {
        String::new()
    }
}

impl ToDbValue for String {
    fn to_db_value(&self) -> DbValue {
        DbValue::Text(self.clone())
    }
}

impl ToDbValue for str {
    fn to_db_value(&self) -> DbValue {
        DbValue::Text(self.to_string())
    }
}

impl ListElement for String {}
impl ListElement for &'static str {}

impl<T: ToDbValue + ?Sized> ToDbValue for &T {
    fn to_db_value(&self) -> DbValue {
        (**self).to_db_value()
    }
}

impl FromDbValue for char {
    fn from_db_value(value: &DbValue) -> Result<Self, ConversionError> {
        match value {
            DbValue::Null => Ok('\0'),
            DbValue::Text(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(mismatch("char", value)),
                }
            }
            _ => Err(mismatch("char", value)),
        }
    }

    fn null_value() -> Self {
        '\0'
    }
}

impl ToDbValue for char {
    fn to_db_value(&self) -> DbValue {
        DbValue::Text(self.to_string())
    }
}

impl ListElement for char {}

impl FromDbValue for Vec<u8> {
    fn from_db_value(value: &DbValue) -> Result<Self, ConversionError> {
        match value {
            DbValue::Null => Ok(Vec::new()),
            DbValue::Blob(bytes) => Ok(bytes.clone()),
            DbValue::Text(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(mismatch("Vec<u8>", value)),
        }
    }

    fn null_value() -> Self {
        Vec::new()
    }
}

impl ToDbValue for Vec<u8> {
    fn to_db_value(&self) -> DbValue {
        DbValue::Blob(self.clone())
    }
}

impl FromDbValue for NaiveDateTime {
    fn from_db_value(value: &DbValue) -> Result<Self, ConversionError> {
        match value {
            DbValue::Null => Ok(Self::null_value()),
            other => other
                .as_timestamp()
                .ok_or_else(|| mismatch("NaiveDateTime", other)),
        }
    }

    fn null_value() -> Self {
        NaiveDateTime::default()
    }
}

impl ToDbValue for NaiveDateTime {
    fn to_db_value(&self) -> DbValue {
        DbValue::Timestamp(*self)
    }
}

impl ListElement for NaiveDateTime {}

impl FromDbValue for NaiveDate {
    fn from_db_value(value: &DbValue) -> Result<Self, ConversionError> {
        match value {
            DbValue::Null => Ok(Self::null_value()),
            DbValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()
                .or_else(|| value.as_timestamp().map(|ts| ts.date()))
                .ok_or_else(|| mismatch("NaiveDate", value)),
            other => other
                .as_timestamp()
                .map(|ts| ts.date())
                .ok_or_else(|| mismatch("NaiveDate", other)),
        }
    }

    fn null_value() -> Self {
        NaiveDate::default()
    }
}

impl ToDbValue for NaiveDate {
    fn to_db_value(&self) -> DbValue {
        DbValue::Timestamp(self.and_time(NaiveTime::MIN))
    }
}

impl ListElement for NaiveDate {}

impl FromDbValue for JsonValue {
    fn from_db_value(value: &DbValue) -> Result<Self, ConversionError> {
        Ok(match value {
            DbValue::Null => JsonValue::Null,
            DbValue::Json(json) => json.clone(),
            DbValue::Text(s) => {
                serde_json::from_str(s).unwrap_or_else(|_| JsonValue::String(s.clone()))
            }
            DbValue::Bool(b) => JsonValue::Bool(*b),
            DbValue::Int(i) => JsonValue::from(*i),
            DbValue::Float(f) => JsonValue::from(*f),
            DbValue::Timestamp(_) | DbValue::Blob(_) => JsonValue::String(value.to_string()),
        })
    }

    fn null_value() -> Self {
        JsonValue::Null
    }
}

impl ToDbValue for JsonValue {
    fn to_db_value(&self) -> DbValue {
        DbValue::Json(self.clone())
    }
}

impl FromDbValue for DbValue {
    fn from_db_value(value: &DbValue) -> Result<Self, ConversionError> {
        Ok(value.clone())
    }

    fn null_value() -> Self {
        DbValue::Null
    }
}

impl ToDbValue for DbValue {
    fn to_db_value(&self) -> DbValue {
        self.clone()
    }
}

impl ListElement for DbValue {}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self, ConversionError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_db_value(value).map(Some)
        }
    }

    fn null_value() -> Self {
        None
    }
}

impl<T: ToDbValue> ToDbValue for Option<T> {
    fn to_db_value(&self) -> DbValue {
        self.as_ref().map_or(DbValue::Null, ToDbValue::to_db_value)
    }
}

impl<T: ListElement> ListElement for Option<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigint_narrows_when_in_range() {
        assert_eq!(i32::from_db_value(&DbValue::Int(42)).unwrap(), 42);
        let err = i32::from_db_value(&DbValue::Int(i64::from(i32::MAX) + 1)).unwrap_err();
        assert_eq!(err.expected, "i32");
        assert!(u8::from_db_value(&DbValue::Int(-1)).is_err());
    }

    #[test]
    fn integral_floats_read_as_integers() {
        assert_eq!(i64::from_db_value(&DbValue::Float(3.0)).unwrap(), 3);
        assert!(i64::from_db_value(&DbValue::Float(3.5)).is_err());
    }

    #[test]
    fn bool_and_integer_interchange() {
        assert!(bool::from_db_value(&DbValue::Int(1)).unwrap());
        assert!(!bool::from_db_value(&DbValue::Int(0)).unwrap());
        assert_eq!(i32::from_db_value(&DbValue::Bool(true)).unwrap(), 1);
    }

    #[test]
    fn null_reads_as_zero_or_none() {
        assert_eq!(i32::from_db_value(&DbValue::Null).unwrap(), 0);
        assert_eq!(String::from_db_value(&DbValue::Null).unwrap(), "");
        assert_eq!(Option::<i32>::from_db_value(&DbValue::Null).unwrap(), None);
        assert_eq!(
            Option::<i32>::from_db_value(&DbValue::Int(7)).unwrap(),
            Some(7)
        );
    }

    #[test]
    fn text_reads_as_timestamp() {
        let text = DbValue::Text("2024-01-02 03:04:05".into());
        let ts = NaiveDateTime::from_db_value(&text).unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-02 03:04:05");
        assert!(NaiveDateTime::from_db_value(&DbValue::Int(5)).is_err());
    }

    #[test]
    fn large_unsigned_values_fall_back_to_text() {
        assert_eq!(u64::MAX.to_db_value(), DbValue::Text(u64::MAX.to_string()));
        assert_eq!(7_u64.to_db_value(), DbValue::Int(7));
    }
}

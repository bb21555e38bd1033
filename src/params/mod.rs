//! Parameter sources and the binder that turns them into command parameters.

use std::any::{TypeId, type_name};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;

use crate::error::SqlMapperError;
use crate::executor::{Command, OutputValues};
use crate::mapping::convert::{ListElement, ToDbValue};
use crate::types::{DbType, DbValue, ParameterDirection};

pub mod binder;
pub mod db_string;
pub mod dynamic;
pub mod member_path;

pub use binder::{ParamPlan, bind};
pub use db_string::DbString;
pub use dynamic::{DynamicParameters, ParamOptions};
pub use member_path::MemberPath;

/// A parameter value that adds itself to the command.
///
/// [`DbString`] is the built-in example; user types can implement this for provider-specific
/// parameters.
pub trait CustomParameter: fmt::Debug + Send + Sync {
    /// Add one or more parameters for `name` to `command`.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::Binding`] when the value cannot be expressed as a parameter.
    fn add_parameter(&self, command: &mut Command, name: &str) -> Result<(), SqlMapperError>;

    /// Literal SQL text for `{=name}` substitution, when the value supports it.
    fn literal(&self) -> Option<String> {
        None
    }
}

/// The bindable form of a single member value.
#[derive(Debug, Clone)]
pub enum ParamValue {
    /// A scalar; `type_id` is the static Rust type, used for the provider type lookup.
    Scalar {
        value: DbValue,
        type_id: TypeId,
        type_name: &'static str,
    },
    /// A sequence of scalars, expanded into one parameter per element.
    List {
        values: Vec<DbValue>,
        element: TypeId,
        element_name: &'static str,
    },
    Custom(Arc<dyn CustomParameter>),
    /// A member the binder cannot express (a nested object, for instance).
    Unsupported { type_name: &'static str },
}

impl ParamValue {
    #[must_use]
    pub fn scalar<T: ToDbValue + ?Sized + 'static>(value: &T) -> Self {
        ParamValue::Scalar {
            value: value.to_db_value(),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    #[must_use]
    pub fn list<T: ListElement>(values: &[T]) -> Self {
        ParamValue::List {
            values: values.iter().map(ToDbValue::to_db_value).collect(),
            element: TypeId::of::<T>(),
            element_name: type_name::<T>(),
        }
    }

    #[must_use]
    pub fn unsupported<T: ?Sized>() -> Self {
        ParamValue::Unsupported {
            type_name: type_name::<T>(),
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Scalar { type_name, .. } | ParamValue::Unsupported { type_name } => {
                type_name
            }
            ParamValue::List { element_name, .. } => element_name,
            ParamValue::Custom(_) => "custom parameter",
        }
    }
}

/// Conversion of a member value into its bindable form.
pub trait ToParam {
    fn to_param(&self) -> ParamValue;
}

macro_rules! impl_scalar_param {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToParam for $ty {
                fn to_param(&self) -> ParamValue {
                    ParamValue::scalar::<$ty>(self)
                }
            }
        )*
    };
}

impl_scalar_param!(
    u8, i8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64, bool, char, String,
    NaiveDateTime, NaiveDate, JsonValue, DbValue,
);

impl ToParam for str {
    fn to_param(&self) -> ParamValue {
        ParamValue::scalar::<str>(self)
    }
}

impl ToParam for Vec<u8> {
    fn to_param(&self) -> ParamValue {
        ParamValue::scalar::<Vec<u8>>(self)
    }
}

impl<T: ToParam + ?Sized> ToParam for &T {
    fn to_param(&self) -> ParamValue {
        (**self).to_param()
    }
}

impl<T: ToParam + 'static> ToParam for Option<T> {
    fn to_param(&self) -> ParamValue {
        match self {
            Some(value) => value.to_param(),
            None => ParamValue::Scalar {
                value: DbValue::Null,
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
            },
        }
    }
}

impl<T: ListElement> ToParam for [T] {
    fn to_param(&self) -> ParamValue {
        ParamValue::list(self)
    }
}

macro_rules! impl_list_param {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToParam for Vec<$ty> {
                fn to_param(&self) -> ParamValue {
                    ParamValue::list(self.as_slice())
                }
            }
        )*
    };
}

impl_list_param!(
    i8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64, bool, char, String,
    &'static str, NaiveDateTime, NaiveDate, DbValue,
);

impl<T: ListElement, const N: usize> ToParam for [T; N] {
    fn to_param(&self) -> ParamValue {
        ParamValue::list(self.as_slice())
    }
}

impl ToParam for ParamValue {
    fn to_param(&self) -> ParamValue {
        self.clone()
    }
}

/// One named value produced by a [`ParamSource`].
#[derive(Debug, Clone)]
pub struct ParamEntry {
    pub name: String,
    pub value: ParamValue,
    pub direction: ParameterDirection,
    pub db_type: Option<DbType>,
    pub size: Option<i32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

impl ParamEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            value,
            direction: ParameterDirection::Input,
            db_type: None,
            size: None,
            precision: None,
            scale: None,
        }
    }

    /// Strip a leading `@`, `:` or `?` so callers may write either form.
    #[must_use]
    pub fn clean_name(name: &str) -> &str {
        name.strip_prefix(['@', ':', '?']).unwrap_or(name)
    }
}

/// Anything that can supply named parameters for a command.
pub trait ParamSource: Sync {
    /// Identifies the parameter shape for caching; `None` for shapes that vary per value.
    fn shape(&self) -> Option<TypeId>;

    /// # Errors
    /// Returns [`SqlMapperError::Binding`] when a value cannot be produced.
    fn entries(&self) -> Result<Vec<ParamEntry>, SqlMapperError>;

    /// Whether members the SQL never references are dropped before binding.
    fn filters_unused(&self) -> bool {
        true
    }

    /// Receives output values once the command has completed.
    ///
    /// # Errors
    /// Returns an error when an output value cannot be written back.
    fn on_completed(&self, outputs: &OutputValues) -> Result<(), SqlMapperError> {
        let _ = outputs;
        Ok(())
    }
}

impl ParamSource for () {
    fn shape(&self) -> Option<TypeId> {
        Some(TypeId::of::<()>())
    }

    fn entries(&self) -> Result<Vec<ParamEntry>, SqlMapperError> {
        Ok(Vec::new())
    }
}

impl<P: ParamSource + ?Sized> ParamSource for &P {
    fn shape(&self) -> Option<TypeId> {
        (**self).shape()
    }

    fn entries(&self) -> Result<Vec<ParamEntry>, SqlMapperError> {
        (**self).entries()
    }

    fn filters_unused(&self) -> bool {
        (**self).filters_unused()
    }

    fn on_completed(&self, outputs: &OutputValues) -> Result<(), SqlMapperError> {
        (**self).on_completed(outputs)
    }
}

impl<V: ToParam + Sync> ParamSource for HashMap<String, V> {
    fn shape(&self) -> Option<TypeId> {
        None
    }

    fn entries(&self) -> Result<Vec<ParamEntry>, SqlMapperError> {
        let mut entries: Vec<ParamEntry> = self
            .iter()
            .map(|(name, value)| ParamEntry::new(ParamEntry::clean_name(name), value.to_param()))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl<V: ToParam + Sync> ParamSource for BTreeMap<String, V> {
    fn shape(&self) -> Option<TypeId> {
        None
    }

    fn entries(&self) -> Result<Vec<ParamEntry>, SqlMapperError> {
        Ok(self
            .iter()
            .map(|(name, value)| ParamEntry::new(ParamEntry::clean_name(name), value.to_param()))
            .collect())
    }
}

impl<V: ToParam + Sync> ParamSource for [(&str, V)] {
    fn shape(&self) -> Option<TypeId> {
        None
    }

    fn entries(&self) -> Result<Vec<ParamEntry>, SqlMapperError> {
        Ok(self
            .iter()
            .map(|(name, value)| ParamEntry::new(ParamEntry::clean_name(name), value.to_param()))
            .collect())
    }
}

impl<V: ToParam + Sync, const N: usize> ParamSource for [(&str, V); N] {
    fn shape(&self) -> Option<TypeId> {
        None
    }

    fn entries(&self) -> Result<Vec<ParamEntry>, SqlMapperError> {
        self.as_slice().entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_keeps_the_inner_type() {
        let value: Option<i32> = None;
        match value.to_param() {
            ParamValue::Scalar {
                value, type_id, ..
            } => {
                assert!(value.is_null());
                assert_eq!(type_id, TypeId::of::<i32>());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn byte_vectors_bind_as_blobs_and_int_vectors_as_lists() {
        assert!(matches!(vec![1_u8, 2].to_param(), ParamValue::Scalar { .. }));
        assert!(matches!(
            vec![1_i32, 2].to_param(),
            ParamValue::List { values, .. } if values.len() == 2
        ));
    }

    #[test]
    fn map_names_lose_their_prefix() {
        let mut map = HashMap::new();
        map.insert("@id".to_string(), 5_i32);
        let entries = map.entries().unwrap();
        assert_eq!(entries[0].name, "id");
    }
}

use crate::error::{BindingError, SqlMapperError};
use crate::executor::{Command, Parameter};
use crate::params::{CustomParameter, ParamValue, ToParam};
use crate::settings::Settings;
use crate::types::{DbType, DbValue, StringEncoding};

use std::sync::Arc;

/// Size given to string parameters of at most this many characters, so that short strings of
/// different lengths share one plan.
pub const DEFAULT_LENGTH: i32 = 4000;

/// Size hint for a plain string parameter: [`DEFAULT_LENGTH`] when it fits, `-1` (max) otherwise.
#[must_use]
pub fn default_string_size(value: &DbValue) -> Option<i32> {
    match value {
        DbValue::Text(s) => {
            let fits = i32::try_from(s.chars().count()).is_ok_and(|len| len <= DEFAULT_LENGTH);
            Some(if fits { DEFAULT_LENGTH } else { -1 })
        }
        _ => None,
    }
}

/// A string parameter with explicit encoding, fixed-length and length control.
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// let code = DbString::new("ABC").ansi().fixed_length(3);
/// # let _ = code;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbString {
    pub value: Option<String>,
    /// `None` follows [`Settings::default_string_encoding`] at bind time.
    pub encoding: Option<StringEncoding>,
    pub is_fixed_length: bool,
    /// `-1` means unspecified.
    pub length: i32,
}

impl DbString {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            encoding: None,
            is_fixed_length: false,
            length: -1,
        }
    }

    #[must_use]
    pub fn null() -> Self {
        Self {
            length: -1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ansi(mut self) -> Self {
        self.encoding = Some(StringEncoding::Ansi);
        self
    }

    #[must_use]
    pub fn unicode(mut self) -> Self {
        self.encoding = Some(StringEncoding::Unicode);
        self
    }

    #[must_use]
    pub fn fixed_length(mut self, length: i32) -> Self {
        self.is_fixed_length = true;
        self.length = length;
        self
    }

    #[must_use]
    pub fn with_length(mut self, length: i32) -> Self {
        self.length = length;
        self
    }

    fn db_type(&self) -> DbType {
        let encoding = self
            .encoding
            .unwrap_or_else(Settings::default_string_encoding);
        match (encoding, self.is_fixed_length) {
            (StringEncoding::Ansi, true) => DbType::AnsiStringFixedLength,
            (StringEncoding::Ansi, false) => DbType::AnsiString,
            (StringEncoding::Unicode, true) => DbType::StringFixedLength,
            (StringEncoding::Unicode, false) => DbType::String,
        }
    }

    fn size(&self) -> i32 {
        match &self.value {
            Some(value) if self.length == -1 => default_string_size(&DbValue::Text(value.clone()))
                .unwrap_or(DEFAULT_LENGTH),
            _ => self.length,
        }
    }
}

impl CustomParameter for DbString {
    fn add_parameter(&self, command: &mut Command, name: &str) -> Result<(), SqlMapperError> {
        if self.is_fixed_length && self.length == -1 {
            return Err(BindingError::InvalidParameter {
                name: name.to_string(),
                reason: "a fixed-length string must also specify a length".to_string(),
            }
            .into());
        }
        let value = self
            .value
            .as_ref()
            .map_or(DbValue::Null, |v| DbValue::Text(v.clone()));
        command.add_parameter(
            Parameter::input(name, value)
                .with_db_type(Some(self.db_type()))
                .with_size(Some(self.size())),
        );
        Ok(())
    }

    fn literal(&self) -> Option<String> {
        Some(match &self.value {
            Some(value) => format!("'{}'", value.replace('\'', "''")),
            None => "null".to_string(),
        })
    }
}

impl ToParam for DbString {
    fn to_param(&self) -> ParamValue {
        ParamValue::Custom(Arc::new(self.clone()))
    }
}

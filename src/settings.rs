//! Process-wide mapper settings.
//!
//! Every option is read through [`Settings`]; nothing else in the crate keeps its own copy of
//! these knobs. Defaults:
//!
//! | option                         | default     |
//! |--------------------------------|-------------|
//! | `pad_list_expansions`          | `false`     |
//! | `in_list_string_split_count`   | `-1` (off)  |
//! | `default_string_encoding`      | `Unicode`   |
//! | `match_names_with_underscores` | `false`     |
//! | `command_timeout`              | `None`      |
//! | `use_single_row_optimization`  | `true`      |
//!
//! Tests that flip these values share global state and should serialize themselves.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::types::{DbType, DbValue, StringEncoding};

/// Point-in-time copy of the scalar options.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsSnapshot {
    pub pad_list_expansions: bool,
    pub in_list_string_split_count: i32,
    pub default_string_encoding: StringEncoding,
    pub match_names_with_underscores: bool,
    pub command_timeout: Option<Duration>,
    pub use_single_row_optimization: bool,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            pad_list_expansions: false,
            in_list_string_split_count: -1,
            default_string_encoding: StringEncoding::Unicode,
            match_names_with_underscores: false,
            command_timeout: None,
            use_single_row_optimization: true,
        }
    }
}

struct SettingsState {
    options: SettingsSnapshot,
    type_map: HashMap<TypeId, DbType>,
}

impl SettingsState {
    fn new() -> Self {
        Self {
            options: SettingsSnapshot::default(),
            type_map: default_type_map(),
        }
    }
}

lazy_static! {
    static ref SETTINGS: RwLock<SettingsState> = RwLock::new(SettingsState::new());
}

fn read_state() -> RwLockReadGuard<'static, SettingsState> {
    match SETTINGS.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_state() -> RwLockWriteGuard<'static, SettingsState> {
    match SETTINGS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn default_type_map() -> HashMap<TypeId, DbType> {
    let mut map = HashMap::new();
    map.insert(TypeId::of::<u8>(), DbType::Byte);
    map.insert(TypeId::of::<i8>(), DbType::SByte);
    map.insert(TypeId::of::<i16>(), DbType::Int16);
    map.insert(TypeId::of::<u16>(), DbType::UInt16);
    map.insert(TypeId::of::<i32>(), DbType::Int32);
    map.insert(TypeId::of::<u32>(), DbType::UInt32);
    map.insert(TypeId::of::<i64>(), DbType::Int64);
    map.insert(TypeId::of::<u64>(), DbType::UInt64);
    map.insert(TypeId::of::<f32>(), DbType::Single);
    map.insert(TypeId::of::<f64>(), DbType::Double);
    map.insert(TypeId::of::<bool>(), DbType::Boolean);
    map.insert(TypeId::of::<char>(), DbType::StringFixedLength);
    map.insert(TypeId::of::<Vec<u8>>(), DbType::Binary);
    map.insert(TypeId::of::<NaiveDateTime>(), DbType::DateTime);
    map.insert(TypeId::of::<NaiveDate>(), DbType::Date);
    map.insert(TypeId::of::<JsonValue>(), DbType::Json);
    map.insert(TypeId::of::<DbValue>(), DbType::Object);
    map
}

fn is_string_type(type_id: TypeId) -> bool {
    type_id == TypeId::of::<String>() || type_id == TypeId::of::<str>()
}

/// Namespace for the global settings singleton.
pub struct Settings;

impl Settings {
    /// Copy of the current scalar options.
    #[must_use]
    pub fn snapshot() -> SettingsSnapshot {
        read_state().options.clone()
    }

    /// Restore every option and the type map to their defaults.
    pub fn reset() {
        let mut state = write_state();
        *state = SettingsState::new();
    }

    #[must_use]
    pub fn pad_list_expansions() -> bool {
        read_state().options.pad_list_expansions
    }

    /// Round list expansions up to fixed bucket sizes so similar lists share one SQL text.
    pub fn set_pad_list_expansions(enabled: bool) {
        write_state().options.pad_list_expansions = enabled;
    }

    #[must_use]
    pub fn in_list_string_split_count() -> i32 {
        read_state().options.in_list_string_split_count
    }

    /// Integer lists longer than `count` are shipped as one delimited string; negative disables.
    pub fn set_in_list_string_split_count(count: i32) {
        write_state().options.in_list_string_split_count = count;
    }

    #[must_use]
    pub fn default_string_encoding() -> StringEncoding {
        read_state().options.default_string_encoding
    }

    pub fn set_default_string_encoding(encoding: StringEncoding) {
        write_state().options.default_string_encoding = encoding;
    }

    #[must_use]
    pub fn match_names_with_underscores() -> bool {
        read_state().options.match_names_with_underscores
    }

    /// Let `first_name` match a `FirstName` column.
    pub fn set_match_names_with_underscores(enabled: bool) {
        write_state().options.match_names_with_underscores = enabled;
    }

    #[must_use]
    pub fn command_timeout() -> Option<Duration> {
        read_state().options.command_timeout
    }

    /// Timeout applied to commands that do not set their own.
    pub fn set_command_timeout(timeout: Option<Duration>) {
        write_state().options.command_timeout = timeout;
    }

    #[must_use]
    pub fn use_single_row_optimization() -> bool {
        read_state().options.use_single_row_optimization
    }

    pub fn set_use_single_row_optimization(enabled: bool) {
        write_state().options.use_single_row_optimization = enabled;
    }

    /// Override the provider type used for parameters of type `T`.
    pub fn add_type_map<T: ?Sized + 'static>(db_type: DbType) {
        write_state().type_map.insert(TypeId::of::<T>(), db_type);
    }

    /// Drop the mapping for `T`; parameters of that type fall back to provider inference.
    pub fn remove_type_map<T: ?Sized + 'static>() {
        write_state().type_map.remove(&TypeId::of::<T>());
    }

    /// Restore the built-in type map, leaving the scalar options untouched.
    pub fn reset_type_map() {
        write_state().type_map = default_type_map();
    }

    /// Provider type for a parameter whose static type is `type_id`.
    ///
    /// Strings without an explicit mapping follow the default string encoding.
    #[must_use]
    pub fn lookup_db_type(type_id: TypeId) -> Option<DbType> {
        let state = read_state();
        if let Some(db_type) = state.type_map.get(&type_id) {
            return Some(*db_type);
        }
        if is_string_type(type_id) {
            return Some(match state.options.default_string_encoding {
                StringEncoding::Unicode => DbType::String,
                StringEncoding::Ansi => DbType::AnsiString,
            });
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod test_lock {
    use std::sync::{Mutex, MutexGuard};

    static LOCK: Mutex<()> = Mutex::new(());

    /// Serializes unit tests that touch the global settings.
    pub(crate) fn lock() -> MutexGuard<'static, ()> {
        match LOCK.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_follow_default_encoding_until_overridden() {
        let _guard = test_lock::lock();
        Settings::reset();
        assert_eq!(
            Settings::lookup_db_type(TypeId::of::<String>()),
            Some(DbType::String)
        );

        Settings::set_default_string_encoding(StringEncoding::Ansi);
        assert_eq!(
            Settings::lookup_db_type(TypeId::of::<String>()),
            Some(DbType::AnsiString)
        );

        Settings::add_type_map::<String>(DbType::StringFixedLength);
        assert_eq!(
            Settings::lookup_db_type(TypeId::of::<String>()),
            Some(DbType::StringFixedLength)
        );

        Settings::reset_type_map();
        assert_eq!(
            Settings::lookup_db_type(TypeId::of::<String>()),
            Some(DbType::AnsiString)
        );
        Settings::reset();
    }

    #[test]
    fn removed_mappings_fall_back_to_none() {
        let _guard = test_lock::lock();
        Settings::reset();
        assert_eq!(Settings::lookup_db_type(TypeId::of::<i32>()), Some(DbType::Int32));
        Settings::remove_type_map::<i32>();
        assert_eq!(Settings::lookup_db_type(TypeId::of::<i32>()), None);
        Settings::reset();
        assert_eq!(Settings::snapshot(), SettingsSnapshot::default());
    }
}

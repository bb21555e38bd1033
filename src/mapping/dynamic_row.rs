use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{ConversionError, DeserializationError, SqlMapperError};
use crate::executor::Column;
use crate::mapping::convert::FromDbValue;
use crate::mapping::row::{FromRow, RowReader, value_at};
use crate::types::DbValue;

fn build_index(names: &[String]) -> HashMap<String, usize> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}

/// A row materialized without a target type: an ordered map from column name to value.
///
/// Rows produced by one reader share their column names and index until a row is modified.
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// let mut row = DynamicRow::from_pairs(vec![("Id", DbValue::Int(1))]);
/// row.insert("Name", DbValue::Text("ann".into()));
/// assert_eq!(row.field("id"), Some(&DbValue::Int(1)));
/// assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"Id":1,"Name":"ann"}"#);
/// ```
#[derive(Clone, PartialEq)]
pub struct DynamicRow {
    column_names: Arc<Vec<String>>,
    values: Vec<DbValue>,
    column_index_cache: Arc<HashMap<String, usize>>,
}

impl DynamicRow {
    /// Create a row from shared column names and positional values.
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<DbValue>) -> Self {
        let cache = Arc::new(build_index(&column_names));
        Self {
            column_names,
            values,
            column_index_cache: cache,
        }
    }

    #[must_use]
    pub fn from_pairs<S: Into<String>>(pairs: Vec<(S, DbValue)>) -> Self {
        let (names, values): (Vec<String>, Vec<DbValue>) =
            pairs.into_iter().map(|(n, v)| (n.into(), v)).unzip();
        Self::new(Arc::new(names), values)
    }

    fn shared(
        column_names: &Arc<Vec<String>>,
        cache: &Arc<HashMap<String, usize>>,
        values: Vec<DbValue>,
    ) -> Self {
        Self {
            column_names: Arc::clone(column_names),
            values,
            column_index_cache: Arc::clone(cache),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Position of a column, matched case-sensitively.
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Value of a column, matched case-sensitively.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&DbValue> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&DbValue> {
        self.values.get(index)
    }

    /// Member-style access: exact name first, then case-insensitive.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&DbValue> {
        self.get(name).or_else(|| {
            self.column_names
                .iter()
                .position(|col| col.eq_ignore_ascii_case(name))
                .and_then(|idx| self.values.get(idx))
        })
    }

    /// Read a column through [`FromDbValue`]; `None` when the column is absent.
    ///
    /// # Errors
    /// Returns [`ConversionError`] when the value does not fit `T`.
    pub fn get_as<T: FromDbValue>(&self, name: &str) -> Result<Option<T>, ConversionError> {
        self.field(name).map(T::from_db_value).transpose()
    }

    /// Set a column, appending it when new. Returns the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: DbValue) -> Option<DbValue> {
        let name = name.into();
        if let Some(idx) = self.get_column_index(&name) {
            return Some(std::mem::replace(&mut self.values[idx], value));
        }
        Arc::make_mut(&mut self.column_names).push(name.clone());
        Arc::make_mut(&mut self.column_index_cache).insert(name, self.values.len());
        self.values.push(value);
        None
    }

    /// Remove a column, keeping the order of the others.
    pub fn remove(&mut self, name: &str) -> Option<DbValue> {
        let idx = self.get_column_index(name)?;
        Arc::make_mut(&mut self.column_names).remove(idx);
        self.column_index_cache = Arc::new(build_index(&self.column_names));
        Some(self.values.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DbValue)> {
        self.column_names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Name to value view. Later duplicates shadow earlier ones.
    #[must_use]
    pub fn as_map(&self) -> HashMap<&str, &DbValue> {
        self.iter().collect()
    }

    #[must_use]
    pub fn into_values(self) -> Vec<DbValue> {
        self.values
    }
}

impl fmt::Debug for DynamicRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl fmt::Display for DynamicRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                DbValue::Null => write!(f, "{name} = NULL")?,
                other => write!(f, "{name} = '{other}'")?,
            }
        }
        f.write_str("}")
    }
}

impl Serialize for DynamicRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl FromRow for DynamicRow {
    fn compile(columns: &[Column], range: Range<usize>) -> Result<RowReader<Self>, SqlMapperError> {
        if range.is_empty() || range.end > columns.len() {
            return Err(DeserializationError::NoColumns.into());
        }
        let names: Arc<Vec<String>> = Arc::new(
            columns[range.clone()]
                .iter()
                .map(|c| c.name.clone())
                .collect(),
        );
        let cache = Arc::new(build_index(&names));
        Ok(RowReader::new(move |row| {
            let values = range.clone().map(|i| value_at(row, i).clone()).collect();
            Ok(DynamicRow::shared(&names, &cache, values))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DynamicRow {
        DynamicRow::from_pairs(vec![
            ("Id", DbValue::Int(1)),
            ("Name", DbValue::Text("ann".into())),
        ])
    }

    #[test]
    fn get_is_case_sensitive_and_field_is_not() {
        let row = sample();
        assert_eq!(row.get("Id"), Some(&DbValue::Int(1)));
        assert_eq!(row.get("id"), None);
        assert_eq!(row.field("id"), Some(&DbValue::Int(1)));
    }

    #[test]
    fn insert_and_remove_keep_order() {
        let mut row = sample();
        assert_eq!(row.insert("Extra", DbValue::Bool(true)), None);
        assert_eq!(
            row.insert("Id", DbValue::Int(2)),
            Some(DbValue::Int(1))
        );
        assert_eq!(row.remove("Name"), Some(DbValue::Text("ann".into())));
        let names: Vec<&str> = row.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Id", "Extra"]);
        assert_eq!(row.get("Extra"), Some(&DbValue::Bool(true)));
    }

    #[test]
    fn rows_from_one_reader_share_names_until_modified() {
        let columns = vec![Column::new("a", 0, ""), Column::new("b", 1, "")];
        let reader = DynamicRow::compile(&columns, 0..2).unwrap();
        let first = reader.read(&[DbValue::Int(1), DbValue::Int(2)]).unwrap();
        let mut second = reader.read(&[DbValue::Int(3), DbValue::Int(4)]).unwrap();
        assert!(Arc::ptr_eq(&first.column_names, &second.column_names));
        second.insert("c", DbValue::Null);
        assert!(!Arc::ptr_eq(&first.column_names, &second.column_names));
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn display_and_json() {
        let row = sample();
        assert_eq!(row.to_string(), "{Id = '1', Name = 'ann'}");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["Name"], "ann");
    }
}

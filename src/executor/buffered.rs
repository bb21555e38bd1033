use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use super::{AsyncDataReader, Column, DataReader, OutputValues};
use crate::error::SqlMapperError;
use crate::types::DbValue;

/// One fully materialized result set.
///
/// Column descriptors are shared by every row so that cloning a set, or handing its columns to
/// the mapper, never copies names.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    columns: Arc<[Column]>,
    rows: VecDeque<Vec<DbValue>>,
    /// The number of rows affected (for DML statements)
    pub rows_affected: u64,
}

impl ResultSet {
    /// Create an empty result set with a known row capacity.
    #[must_use]
    pub fn with_capacity(columns: Vec<Column>, capacity: usize) -> ResultSet {
        ResultSet {
            columns: columns.into(),
            rows: VecDeque::with_capacity(capacity),
            rows_affected: 0,
        }
    }

    /// Convenience constructor taking bare column names; provider types are left empty.
    #[must_use]
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> ResultSet {
        let columns = names
            .iter()
            .enumerate()
            .map(|(ordinal, name)| Column::new(name.as_ref(), ordinal, ""))
            .collect();
        Self::with_capacity(columns, 8)
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Add a row; values are positional and must match the column count.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::ExecutionError`] when the value count differs from the
    /// column count.
    pub fn add_row_values(&mut self, row_values: Vec<DbValue>) -> Result<(), SqlMapperError> {
        if row_values.len() != self.columns.len() {
            return Err(SqlMapperError::ExecutionError(format!(
                "row has {} values but the result set has {} columns",
                row_values.len(),
                self.columns.len()
            )));
        }
        self.rows.push_back(row_values);
        Ok(())
    }

    /// Builder-style variant of [`ResultSet::add_row_values`].
    ///
    /// # Errors
    /// Same as [`ResultSet::add_row_values`].
    pub fn with_row(mut self, row_values: Vec<DbValue>) -> Result<Self, SqlMapperError> {
        self.add_row_values(row_values)?;
        Ok(self)
    }

    fn pop_row(&mut self) -> Option<Vec<DbValue>> {
        self.rows.pop_front()
    }
}

/// A reader over result sets that were fully fetched up front.
///
/// Both shipped executors buffer each statement's rows while the driver borrow is alive and
/// return one of these; it serves both the sync and async reader traits.
#[derive(Debug, Default)]
pub struct BufferedReader {
    sets: VecDeque<ResultSet>,
    current: ResultSet,
    outputs: OutputValues,
}

impl BufferedReader {
    #[must_use]
    pub fn new(sets: Vec<ResultSet>) -> Self {
        let mut sets: VecDeque<ResultSet> = sets.into();
        let current = sets.pop_front().unwrap_or_default();
        Self {
            sets,
            current,
            outputs: OutputValues::new(),
        }
    }

    #[must_use]
    pub fn with_outputs(mut self, outputs: OutputValues) -> Self {
        self.outputs = outputs;
        self
    }

    fn advance(&mut self) -> bool {
        match self.sets.pop_front() {
            Some(next) => {
                self.current = next;
                true
            }
            None => {
                self.current = ResultSet::default();
                false
            }
        }
    }
}

impl DataReader for BufferedReader {
    fn columns(&self) -> &[Column] {
        self.current.columns()
    }

    fn next_row(&mut self) -> Result<Option<Vec<DbValue>>, SqlMapperError> {
        Ok(self.current.pop_row())
    }

    fn next_result(&mut self) -> Result<bool, SqlMapperError> {
        Ok(self.advance())
    }

    fn output_values(&self) -> OutputValues {
        self.outputs.clone()
    }
}

#[async_trait]
impl AsyncDataReader for BufferedReader {
    fn columns(&self) -> &[Column] {
        self.current.columns()
    }

    async fn next_row(&mut self) -> Result<Option<Vec<DbValue>>, SqlMapperError> {
        Ok(self.current.pop_row())
    }

    async fn next_result(&mut self) -> Result<bool, SqlMapperError> {
        Ok(self.advance())
    }

    fn output_values(&self) -> OutputValues {
        self.outputs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_sets_in_order() {
        let first = ResultSet::from_names(&["a"])
            .with_row(vec![DbValue::Int(1)])
            .unwrap();
        let second = ResultSet::from_names(&["b", "c"])
            .with_row(vec![DbValue::Int(2), DbValue::Null])
            .unwrap();
        let mut reader = BufferedReader::new(vec![first, second]);

        assert_eq!(DataReader::columns(&reader)[0].name, "a");
        assert_eq!(
            DataReader::next_row(&mut reader).unwrap(),
            Some(vec![DbValue::Int(1)])
        );
        assert_eq!(DataReader::next_row(&mut reader).unwrap(), None);
        assert!(DataReader::next_result(&mut reader).unwrap());
        assert_eq!(DataReader::columns(&reader).len(), 2);
        assert!(!DataReader::next_result(&mut reader).unwrap());
        assert!(DataReader::columns(&reader).is_empty());
    }

    #[test]
    fn rejects_ragged_rows() {
        let mut set = ResultSet::from_names(&["a", "b"]);
        assert!(set.add_row_values(vec![DbValue::Int(1)]).is_err());
    }
}

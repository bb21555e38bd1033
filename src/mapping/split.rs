//! Multi-mapping: one row split into several target shapes at split columns.

use std::ops::Range;

use crate::error::SqlMapperError;
use crate::executor::Column;
use crate::mapping::row::{FromRow, RowReader};

/// Split column used when the caller does not name one.
pub const DEFAULT_SPLIT_ON: &str = "Id";

const SPLIT_ON_HINT: &str =
    "When using the multi-mapping APIs ensure you set the splitOn param if you have keys other than Id";

/// Partition `columns` into `count` contiguous ranges.
///
/// `split_on` is a comma-separated list. One name applies to every boundary; several names
/// apply per boundary from the last one backwards and must number `count - 1`. `*` splits one
/// column per boundary. Boundaries are searched from right to left and never land on column 0.
///
/// # Errors
/// Returns [`SqlMapperError::SplitConfiguration`] when a boundary column cannot be found or the
/// number of names does not fit the number of types.
pub fn split_ranges(
    columns: &[Column],
    split_on: &str,
    count: usize,
) -> Result<Vec<Range<usize>>, SqlMapperError> {
    if count < 2 {
        return Err(SqlMapperError::SplitConfiguration(format!(
            "multi-mapping needs at least two types, got {count}"
        )));
    }
    let names: Vec<&str> = split_on.split(',').map(str::trim).collect();
    if names.len() > 1 && names.len() != count - 1 {
        return Err(SqlMapperError::SplitConfiguration(format!(
            "{} split columns were given for {count} types; expected {}",
            names.len(),
            count - 1
        )));
    }

    let mut ranges = Vec::with_capacity(count);
    let mut current_pos = columns.len();
    let mut name_idx = names.len() - 1;
    for type_idx in (0..count).rev() {
        let split_point = if type_idx > 0 {
            let point = next_split(columns, current_pos, names[name_idx])?;
            name_idx = name_idx.saturating_sub(1);
            point
        } else {
            0
        };
        if split_point >= current_pos {
            return Err(SqlMapperError::SplitConfiguration(SPLIT_ON_HINT.to_string()));
        }
        ranges.push(split_point..current_pos);
        current_pos = split_point;
    }
    ranges.reverse();
    Ok(ranges)
}

fn next_split(columns: &[Column], start: usize, split_on: &str) -> Result<usize, SqlMapperError> {
    if split_on == "*" {
        return start
            .checked_sub(1)
            .filter(|point| *point > 0)
            .ok_or_else(|| SqlMapperError::SplitConfiguration(SPLIT_ON_HINT.to_string()));
    }
    (1..start)
        .rev()
        .find(|&i| columns[i].name.eq_ignore_ascii_case(split_on))
        .ok_or_else(|| {
            SqlMapperError::SplitConfiguration(format!(
                "{SPLIT_ON_HINT} (no `{split_on}` column found)"
            ))
        })
}

/// Tuples of 2 to 7 row-mappable types.
pub trait SplitTuple: Sized + Send + 'static {
    const ARITY: usize;

    /// # Errors
    /// Returns [`SqlMapperError::SplitConfiguration`] or a compile error from an element type.
    fn compile(columns: &[Column], split_on: &str) -> Result<RowReader<Self>, SqlMapperError>;
}

macro_rules! impl_split_tuple {
    ($arity:expr; $($name:ident => $idx:tt),+) => {
        impl<$($name: FromRow),+> SplitTuple for ($($name,)+) {
            const ARITY: usize = $arity;

            fn compile(
                columns: &[Column],
                split_on: &str,
            ) -> Result<RowReader<Self>, SqlMapperError> {
                let ranges = split_ranges(columns, split_on, $arity)?;
                let readers = ($($name::compile(columns, ranges[$idx].clone())?,)+);
                Ok(RowReader::new(move |row| Ok(($(readers.$idx.read(row)?,)+))))
            }
        }
    };
}

impl_split_tuple!(2; A => 0, B => 1);
impl_split_tuple!(3; A => 0, B => 1, C => 2);
impl_split_tuple!(4; A => 0, B => 1, C => 2, D => 3);
impl_split_tuple!(5; A => 0, B => 1, C => 2, D => 3, E => 4);
impl_split_tuple!(6; A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
impl_split_tuple!(7; A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::DynamicRow;
    use crate::types::DbValue;

    fn columns(names: &[&str]) -> Vec<Column> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| Column::new(*n, i, ""))
            .collect()
    }

    #[test]
    fn default_split_finds_rightmost_id() {
        let cols = columns(&["Id", "Title", "Id", "Name"]);
        let ranges = split_ranges(&cols, DEFAULT_SPLIT_ON, 2).unwrap();
        assert_eq!(ranges, vec![0..2, 2..4]);
    }

    #[test]
    fn several_names_apply_right_to_left() {
        let cols = columns(&["a", "b", "c_id", "d", "e_id", "f"]);
        let ranges = split_ranges(&cols, "c_id, e_id", 3).unwrap();
        assert_eq!(ranges, vec![0..2, 2..4, 4..6]);
    }

    #[test]
    fn star_takes_one_column_per_boundary() {
        let cols = columns(&["a", "b", "c"]);
        let ranges = split_ranges(&cols, "*", 3).unwrap();
        assert_eq!(ranges, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn missing_split_column_is_a_configuration_error() {
        let cols = columns(&["Id", "Title", "UserId", "Name"]);
        let err = split_ranges(&cols, "OwnerId", 2).unwrap_err();
        assert!(err.to_string().contains("splitOn"));
    }

    #[test]
    fn name_count_must_match_boundaries() {
        let cols = columns(&["a", "b", "c"]);
        assert!(split_ranges(&cols, "b,c", 2).is_err());
    }

    #[test]
    fn column_zero_is_never_a_boundary() {
        let cols = columns(&["Id", "Name"]);
        assert!(split_ranges(&cols, "Id", 2).is_err());
    }

    #[test]
    fn tuple_reader_splits_rows() {
        let cols = columns(&["Id", "Title", "Id", "Name"]);
        let reader = <(i64, DynamicRow)>::compile(&cols, "Id").unwrap();
        let (id, owner) = reader
            .read(&[
                DbValue::Int(1),
                DbValue::Text("post".into()),
                DbValue::Int(7),
                DbValue::Text("ann".into()),
            ])
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(owner.get("Name"), Some(&DbValue::Text("ann".into())));
    }
}

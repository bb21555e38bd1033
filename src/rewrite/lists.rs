use std::any::TypeId;

use tracing::trace;

use super::{Edit, apply_edits, placeholder_tokens};
use crate::executor::Parameter;
use crate::params::db_string::default_string_size;
use crate::settings::Settings;
use crate::types::{DbType, DbValue};

/// Extra slots added to a list of `count` elements when padding is enabled.
///
/// Lists of five or fewer are never padded. Larger lists round up to a multiple of 10 (up to
/// 150), 50 (up to 750), 100 (up to 2000), 10 (up to 2070) and 200 beyond that.
#[must_use]
pub fn list_padding(count: usize) -> usize {
    if count <= 5 {
        return 0;
    }
    let factor = match count {
        0..=150 => 10,
        151..=750 => 50,
        751..=2000 => 100,
        2001..=2070 => 10,
        _ => 200,
    };
    let into_block = count % factor;
    if into_block == 0 { 0 } else { factor - into_block }
}

/// Expand every standalone reference to `name` for a list value.
///
/// Returns the rewritten SQL and the parameters that replace the single list parameter.
#[must_use]
pub fn expand_list(
    sql: &str,
    name: &str,
    values: &[DbValue],
    element: TypeId,
) -> (String, Vec<Parameter>) {
    let db_type = Settings::lookup_db_type(element);
    let tokens: Vec<_> = placeholder_tokens(sql)
        .into_iter()
        .filter(|token| token.name.eq_ignore_ascii_case(name))
        .collect();

    if let Some(split) = try_string_split(sql, name, values, db_type, &tokens) {
        return split;
    }

    if values.is_empty() {
        let edits = tokens
            .iter()
            .filter(|token| token.hint_end.is_none())
            .map(|token| Edit {
                start: token.start,
                end: token.end,
                text: format!("(SELECT {} WHERE 1 = 0)", token.spelled(sql)),
            })
            .collect();
        let parameter = Parameter::input(name, DbValue::Null).with_db_type(db_type);
        return (apply_edits(sql, edits), vec![parameter]);
    }

    let padding = if Settings::pad_list_expansions() {
        list_padding(values.len())
    } else {
        0
    };
    let total = values.len() + padding;
    trace!(name, count = values.len(), padding, "expanding list parameter");

    let mut parameters = Vec::with_capacity(total);
    let mut last = &DbValue::Null;
    for slot in 0..total {
        let value = values.get(slot).unwrap_or(last);
        last = value;
        parameters.push(
            Parameter::input(format!("{name}{}", slot + 1), value.clone())
                .with_db_type(db_type)
                .with_size(default_string_size(value)),
        );
    }

    let edits = tokens
        .iter()
        .map(|token| {
            let spelled = token.spelled(sql);
            match token.hint_end {
                Some(hint_end) => {
                    let hint = &sql[token.end..hint_end];
                    let parts: Vec<String> =
                        (1..=total).map(|i| format!("{spelled}{i}{hint}")).collect();
                    Edit {
                        start: token.start,
                        end: hint_end,
                        text: parts.join(","),
                    }
                }
                None => {
                    let parts: Vec<String> = (1..=total).map(|i| format!("{spelled}{i}")).collect();
                    Edit {
                        start: token.start,
                        end: token.end,
                        text: format!("({})", parts.join(",")),
                    }
                }
            }
        })
        .collect();

    (apply_edits(sql, edits), parameters)
}

fn try_string_split(
    sql: &str,
    name: &str,
    values: &[DbValue],
    db_type: Option<DbType>,
    tokens: &[super::PlaceholderToken<'_>],
) -> Option<(String, Vec<Parameter>)> {
    let threshold = usize::try_from(Settings::in_list_string_split_count()).ok()?;
    if values.len() <= threshold {
        return None;
    }
    let cast = db_type.and_then(DbType::integer_cast_name)?;
    let mut joined = Vec::with_capacity(values.len());
    for value in values {
        match value {
            DbValue::Int(i) => joined.push(i.to_string()),
            _ => return None,
        }
    }
    trace!(name, count = values.len(), "shipping integer list as a delimited string");

    let edits = tokens
        .iter()
        .filter(|token| token.hint_end.is_none())
        .map(|token| Edit {
            start: token.start,
            end: token.end,
            text: format!(
                "(SELECT CAST([value] AS {cast}) FROM STRING_SPLIT({}, ','))",
                token.spelled(sql)
            ),
        })
        .collect();
    let parameter = Parameter::input(name, DbValue::Text(joined.join(",")))
        .with_db_type(Some(DbType::AnsiString));
    Some((apply_edits(sql, edits), vec![parameter]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::test_lock;

    fn ints(values: &[i64]) -> Vec<DbValue> {
        values.iter().copied().map(DbValue::Int).collect()
    }

    #[test]
    fn padding_table() {
        let padded = |count: usize| count + list_padding(count);
        assert_eq!(list_padding(0), 0);
        assert_eq!(list_padding(5), 0);
        assert_eq!(padded(6), 10);
        assert_eq!(padded(120), 120);
        assert_eq!(padded(145), 150);
        assert_eq!(padded(150), 150);

        assert_eq!(padded(151), 200);
        assert_eq!(padded(700), 700);
        assert_eq!(padded(740), 750);
        assert_eq!(padded(750), 750);

        assert_eq!(padded(751), 800);
        assert_eq!(padded(800), 800);
        assert_eq!(padded(1950), 2000);
        assert_eq!(padded(2000), 2000);

        assert_eq!(padded(2001), 2010);
        assert_eq!(padded(2060), 2060);
        assert_eq!(padded(2069), 2070);
        assert_eq!(padded(2070), 2070);

        assert_eq!(padded(2071), 2200);
        assert_eq!(padded(2100), 2200);
        assert_eq!(padded(2200), 2200);
        assert_eq!(padded(2201), 2400);
    }

    #[test]
    fn expands_each_reference() {
        let _guard = test_lock::lock();
        Settings::reset();
        let (sql, params) = expand_list(
            "select * from t where a in @Ids or b in @ids",
            "ids",
            &ints(&[1, 2, 3]),
            TypeId::of::<i32>(),
        );
        assert_eq!(
            sql,
            "select * from t where a in (@Ids1,@Ids2,@Ids3) or b in (@ids1,@ids2,@ids3)"
        );
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["ids1", "ids2", "ids3"]);
    }

    #[test]
    fn empty_list_never_matches() {
        let _guard = test_lock::lock();
        Settings::reset();
        let (sql, params) =
            expand_list("select 1 where 1 in @ids", "ids", &[], TypeId::of::<i32>());
        assert_eq!(sql, "select 1 where 1 in (SELECT @ids WHERE 1 = 0)");
        assert_eq!(params.len(), 1);
        assert!(params[0].value.is_null());
    }

    #[test]
    fn unknown_hint_is_expanded_or_left_alone() {
        let _guard = test_lock::lock();
        Settings::reset();
        let sql = "select 1 where a in @ids option (optimize for (@ids unknown))";
        let (expanded, _) = expand_list(sql, "ids", &ints(&[1, 2]), TypeId::of::<i32>());
        assert_eq!(
            expanded,
            "select 1 where a in (@ids1,@ids2) option (optimize for (@ids1 unknown,@ids2 unknown))"
        );
        let (empty, _) = expand_list(sql, "ids", &[], TypeId::of::<i32>());
        assert_eq!(
            empty,
            "select 1 where a in (SELECT @ids WHERE 1 = 0) option (optimize for (@ids unknown))"
        );
    }

    #[test]
    fn string_split_leaves_optimizer_hints_alone() {
        let _guard = test_lock::lock();
        Settings::reset();
        Settings::set_in_list_string_split_count(1);
        let sql = "select 1 where a in @ids option (optimize for (@ids unknown))";
        let (rewritten, params) = expand_list(sql, "ids", &ints(&[1, 2]), TypeId::of::<i32>());
        Settings::reset();
        assert_eq!(
            rewritten,
            "select 1 where a in (SELECT CAST([value] AS int) FROM STRING_SPLIT(@ids, ',')) \
             option (optimize for (@ids unknown))"
        );
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "ids");
    }

    #[test]
    fn padded_slots_repeat_the_last_value() {
        let _guard = test_lock::lock();
        Settings::reset();
        Settings::set_pad_list_expansions(true);
        let (sql, params) = expand_list(
            "where a in @ids",
            "ids",
            &ints(&[1, 2, 3, 4, 5, 6, 7]),
            TypeId::of::<i64>(),
        );
        Settings::reset();
        assert_eq!(params.len(), 10);
        assert_eq!(params[9].value, DbValue::Int(7));
        assert!(sql.ends_with("@ids10)"));
    }

    #[test]
    fn integer_lists_switch_to_string_split_over_threshold() {
        let _guard = test_lock::lock();
        Settings::reset();
        Settings::set_in_list_string_split_count(2);
        let (sql, params) =
            expand_list("where a in @ids", "ids", &ints(&[1, 2, 3]), TypeId::of::<i32>());
        let (short, short_params) =
            expand_list("where a in @ids", "ids", &ints(&[1, 2]), TypeId::of::<i32>());
        let (text, _) = expand_list(
            "where a in @ids",
            "ids",
            &[DbValue::Text("a".into()), DbValue::Text("b".into()), DbValue::Text("c".into())],
            TypeId::of::<String>(),
        );
        Settings::reset();

        assert_eq!(
            sql,
            "where a in (SELECT CAST([value] AS int) FROM STRING_SPLIT(@ids, ','))"
        );
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].value, DbValue::Text("1,2,3".into()));
        assert_eq!(short, "where a in (@ids1,@ids2)");
        assert_eq!(short_params.len(), 2);
        assert_eq!(text, "where a in (@ids1,@ids2,@ids3)");
    }
}

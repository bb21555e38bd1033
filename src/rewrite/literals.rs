use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::error::{BindingError, SqlMapperError};
use crate::params::{ParamEntry, ParamValue};
use crate::types::DbValue;

lazy_static! {
    static ref LITERAL_TOKEN: Result<Regex, regex::Error> = Regex::new(r"\{=([a-zA-Z0-9_]+)\}");
}

fn literal_regex() -> Result<&'static Regex, SqlMapperError> {
    LITERAL_TOKEN
        .as_ref()
        .map_err(|err| SqlMapperError::ConfigError(format!("literal token pattern: {err}")))
}

/// Lowercased names of every `{=name}` token in `sql`.
#[must_use]
pub fn literal_names(sql: &str) -> Vec<String> {
    let Ok(regex) = literal_regex() else {
        return Vec::new();
    };
    let mut names: Vec<String> = Vec::new();
    for caps in regex.captures_iter(sql) {
        let name = caps[1].to_ascii_lowercase();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Replace each `{=name}` token with the literal text of the matching entry.
///
/// # Errors
/// Returns [`SqlMapperError::MissingLiteral`] when no entry carries the name, and
/// [`BindingError::UnsupportedLiteral`] when the value has no literal form.
pub fn replace_literals(sql: &str, entries: &[ParamEntry]) -> Result<String, SqlMapperError> {
    if !sql.contains("{=") {
        return Ok(sql.to_string());
    }
    let regex = literal_regex()?;
    let mut failure: Option<SqlMapperError> = None;
    let replaced = regex.replace_all(sql, |caps: &Captures<'_>| {
        let name = &caps[1];
        let outcome = entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| SqlMapperError::MissingLiteral(name.to_string()))
            .and_then(|entry| format_literal(&entry.value, &entry.name).map_err(Into::into));
        match outcome {
            Ok(text) => text,
            Err(err) => {
                failure.get_or_insert(err);
                caps[0].to_string()
            }
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(replaced.into_owned()),
    }
}

/// Render a parameter value as inline SQL text.
///
/// # Errors
/// Returns [`BindingError::UnsupportedLiteral`] for timestamps, JSON, blobs, nested objects and
/// custom parameters without a literal form.
pub fn format_literal(value: &ParamValue, member: &str) -> Result<String, BindingError> {
    let unsupported = |type_name: &'static str| BindingError::UnsupportedLiteral {
        member: member.to_string(),
        type_name,
    };
    match value {
        ParamValue::Scalar {
            value, type_name, ..
        } => format_scalar(value).ok_or_else(|| unsupported(type_name)),
        ParamValue::List {
            values,
            element_name,
            ..
        } => {
            if values.is_empty() {
                return Ok("(select null where 1=0)".to_string());
            }
            let parts = values
                .iter()
                .map(|v| format_scalar(v).ok_or_else(|| unsupported(element_name)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("({})", parts.join(",")))
        }
        ParamValue::Custom(custom) => custom
            .literal()
            .ok_or_else(|| unsupported("custom parameter")),
        ParamValue::Unsupported { type_name } => Err(unsupported(type_name)),
    }
}

fn format_scalar(value: &DbValue) -> Option<String> {
    match value {
        DbValue::Null => Some("null".to_string()),
        DbValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        DbValue::Int(i) => Some(i.to_string()),
        DbValue::Float(f) if f.is_finite() => Some(f.to_string()),
        DbValue::Text(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        DbValue::Float(_) | DbValue::Timestamp(_) | DbValue::Json(_) | DbValue::Blob(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, value: ParamValue) -> ParamEntry {
        ParamEntry::new(name, value)
    }

    #[test]
    fn renders_scalars() {
        let entries = vec![
            entry("id", ParamValue::scalar(&42_i64)),
            entry("flag", ParamValue::scalar(&true)),
            entry("name", ParamValue::scalar("O'Brien")),
            entry("ratio", ParamValue::scalar(&1.5_f64)),
            entry("nothing", ParamValue::scalar(&DbValue::Null)),
        ];
        let sql = "select {=id}, {=FLAG}, {=name}, {=ratio}, {=nothing}";
        assert_eq!(
            replace_literals(sql, &entries).unwrap(),
            "select 42, 1, 'O''Brien', 1.5, null"
        );
    }

    #[test]
    fn renders_lists_and_empty_lists() {
        let entries = vec![
            entry("ids", ParamValue::list(&[1_i32, 2, 3])),
            entry("none", ParamValue::list::<i32>(&[])),
        ];
        let sql = "where a in {=ids} and b in {=none}";
        assert_eq!(
            replace_literals(sql, &entries).unwrap(),
            "where a in (1,2,3) and b in (select null where 1=0)"
        );
    }

    #[test]
    fn missing_literal_is_reported_by_name() {
        let err = replace_literals("select {=nope}", &[]).unwrap_err();
        assert!(matches!(err, SqlMapperError::MissingLiteral(name) if name == "nope"));
    }

    #[test]
    fn nested_objects_have_no_literal_form() {
        let entries = vec![entry("owner", ParamValue::Unsupported { type_name: "User" })];
        let err = replace_literals("select {=owner}", &entries).unwrap_err();
        assert!(matches!(
            err,
            SqlMapperError::Binding(BindingError::UnsupportedLiteral { .. })
        ));
    }

    #[test]
    fn names_are_collected_once() {
        assert_eq!(literal_names("{=a} {=A} {=b_1}"), vec!["a", "b_1"]);
    }
}

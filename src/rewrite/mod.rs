//! SQL text rewriting: placeholder scanning, list expansion, literal substitution and
//! statement splitting.
//!
//! Scanning is a lightweight byte state machine that skips quoted strings, quoted identifiers
//! and comments. It does not understand every dialect; dollar-quoted bodies, for example, are
//! scanned as plain text.

use std::collections::HashSet;

pub(crate) mod lists;
pub(crate) mod literals;
mod parsers;
mod scanner;

pub use lists::{expand_list, list_padding};
pub use literals::{format_literal, literal_names, replace_literals};

use parsers::{
    is_block_comment_end, is_block_comment_start, is_doubled_prefix, is_line_comment_start,
    is_placeholder_prefix,
};
use scanner::{State, scan_unknown_hint, scan_word};

/// A `[@:?]name` placeholder found outside strings and comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderToken<'a> {
    /// Byte offset of the prefix character.
    pub start: usize,
    /// Byte offset one past the last name character.
    pub end: usize,
    pub prefix: char,
    pub name: &'a str,
    /// End offset of a trailing ` unknown` optimizer hint, when present.
    pub hint_end: Option<usize>,
}

impl PlaceholderToken<'_> {
    /// Prefix plus name exactly as written in the SQL.
    #[must_use]
    pub fn spelled<'s>(&self, sql: &'s str) -> &'s str {
        &sql[self.start..self.end]
    }
}

/// A byte-range replacement applied by [`apply_edits`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Edit {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

struct Scan<'a> {
    tokens: Vec<PlaceholderToken<'a>>,
    terminators: Vec<usize>,
}

fn scan(sql: &str) -> Scan<'_> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut terminators = Vec::new();
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'[' => state = State::Bracketed,
                b';' => terminators.push(idx),
                _ if is_line_comment_start(bytes, idx) => {
                    state = State::LineComment;
                    idx += 1;
                }
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                _ if is_placeholder_prefix(b) && !is_doubled_prefix(bytes, idx) => {
                    if let Some(end) = scan_word(bytes, idx + 1) {
                        tokens.push(PlaceholderToken {
                            start: idx,
                            end,
                            prefix: b as char,
                            name: &sql[idx + 1..end],
                            hint_end: scan_unknown_hint(bytes, end),
                        });
                        idx = end - 1;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::Bracketed => {
                if b == b']' {
                    if bytes.get(idx + 1) == Some(&b']') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
        }
        idx += 1;
    }

    Scan {
        tokens,
        terminators,
    }
}

/// Every placeholder token in `sql`, in text order.
#[must_use]
pub fn placeholder_tokens(sql: &str) -> Vec<PlaceholderToken<'_>> {
    scan(sql).tokens
}

/// True when `[@:?]name` appears as a standalone token (case-insensitive).
#[must_use]
pub fn references_parameter(sql: &str, name: &str) -> bool {
    scan(sql)
        .tokens
        .iter()
        .any(|token| token.name.eq_ignore_ascii_case(name))
}

/// Lowercased names of every placeholder referenced by `sql`.
#[must_use]
pub fn referenced_parameters(sql: &str) -> HashSet<String> {
    scan(sql)
        .tokens
        .iter()
        .map(|token| token.name.to_ascii_lowercase())
        .collect()
}

/// Split a batch on top-level `;`, dropping empty statements.
#[must_use]
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    for end in scan(sql).terminators {
        push_statement(&mut statements, &sql[start..end]);
        start = end + 1;
    }
    push_statement(&mut statements, &sql[start..]);
    statements
}

fn push_statement<'a>(statements: &mut Vec<&'a str>, candidate: &'a str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() && !is_only_comments(trimmed) {
        statements.push(trimmed);
    }
}

fn is_only_comments(sql: &str) -> bool {
    let mut rest = sql.trim_start();
    loop {
        if rest.is_empty() {
            return true;
        }
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            match after.find("*/") {
                Some(pos) => rest = after[pos + 2..].trim_start(),
                None => return true,
            }
        } else {
            return false;
        }
    }
}

/// Rewrite bound `@name` tokens to positional `@P1..@Pn`, one slot per distinct name
/// (case-insensitive, first occurrence wins). Returns the new SQL and the name of each slot.
///
/// Names for which `is_bound` is false (batch variables such as `declare @total int`) are left
/// as written.
pub fn to_positional(sql: &str, is_bound: impl Fn(&str) -> bool) -> (String, Vec<String>) {
    let mut order: Vec<String> = Vec::new();
    let mut edits = Vec::new();
    let tokens = scan(sql).tokens.into_iter();
    for token in tokens.filter(|t| t.prefix == '@' && is_bound(t.name)) {
        let lowered = token.name.to_ascii_lowercase();
        let slot = match order.iter().position(|name| *name == lowered) {
            Some(pos) => pos,
            None => {
                order.push(lowered);
                order.len() - 1
            }
        };
        edits.push(Edit {
            start: token.start,
            end: token.end,
            text: format!("@P{}", slot + 1),
        });
    }
    (apply_edits(sql, edits), order)
}

/// Apply non-overlapping edits sorted by start offset.
pub(crate) fn apply_edits(sql: &str, edits: Vec<Edit>) -> String {
    if edits.is_empty() {
        return sql.to_string();
    }
    let extra: usize = edits.iter().map(|edit| edit.text.len()).sum();
    let mut out = String::with_capacity(sql.len() + extra);
    let mut cursor = 0;
    for edit in edits {
        out.push_str(&sql[cursor..edit.start]);
        out.push_str(&edit.text);
        cursor = edit.end;
    }
    out.push_str(&sql[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_tokens_outside_literals_and_comments() {
        let sql = "select '@a', [@b], \"@c\" -- @d\n/* @e */ from t where x = @f and y = :g";
        let names: Vec<&str> = placeholder_tokens(sql).iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["f", "g"]);
    }

    #[test]
    fn ignores_system_variables_and_casts() {
        let sql = "select @@ROWCOUNT, x::int from t where id = @id";
        let names: Vec<&str> = placeholder_tokens(sql).iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["id"]);
    }

    #[test]
    fn reference_check_is_standalone_and_case_insensitive() {
        let sql = "select * from t where id = @Id and name = @names";
        assert!(references_parameter(sql, "id"));
        assert!(references_parameter(sql, "NAMES"));
        assert!(!references_parameter(sql, "name"));
    }

    #[test]
    fn records_unknown_hint() {
        let sql = "select 1 option (optimize for (@ids UNKNOWN))";
        let tokens = placeholder_tokens(sql);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].hint_end, Some(sql.len() - 2));
    }

    #[test]
    fn splits_batches_on_top_level_semicolons() {
        let sql = "select ';' as a; select 2 /* ; */;\n-- trailing\n";
        assert_eq!(split_statements(sql), vec!["select ';' as a", "select 2 /* ; */"]);
    }

    #[test]
    fn positional_conversion_reuses_slots() {
        let (sql, names) = to_positional("select @a, @b, @A", |_| true);
        assert_eq!(sql, "select @P1, @P2, @P1");
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn multibyte_text_is_preserved() {
        let (sql, _) = to_positional("select 'héllo', @a", |_| true);
        assert_eq!(sql, "select 'héllo', @P1");
    }

    #[test]
    fn unbound_names_are_left_alone() {
        let sql = "declare @total int = 5; select @total + @id";
        let (sql, names) = to_positional(sql, |name| name.eq_ignore_ascii_case("id"));
        assert_eq!(sql, "declare @total int = 5; select @total + @P1");
        assert_eq!(names, vec!["id".to_string()]);
    }
}

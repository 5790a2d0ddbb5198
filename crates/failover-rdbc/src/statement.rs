//! Statement building for failover-rdbc
//!
//! A query template carries `?` (positional) or `:name` (named) placeholders.
//! Array-valued positional arguments are expanded in place: the placeholder
//! that belongs to the array becomes a comma-joined run with one `?` per
//! element, and the elements are spliced into the flattened value list at the
//! same position. The rewritten text and the flattened list always line up
//! left to right.
//!
//! Placeholders inside quoted literals are not recognised as special; the
//! template is scanned as plain text.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::security::render_value;
use crate::types::{Params, Value};

/// Positional placeholder character
pub const PLACEHOLDER: char = '?';

/// Header prepended to emulated queries
pub const EMULATION_WARNING: &str =
    "-- [WARNING] This only EMULATES what the prepared statement will run.";

static INSERT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*INSERT").expect("insert regex pattern is invalid - this is a bug")
});

static MUTATING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(UPDATE|REPLACE|DELETE)")
        .expect("mutating regex pattern is invalid - this is a bug")
});

static NAMED_PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)")
        .expect("named placeholder regex pattern is invalid - this is a bug")
});

/// What a statement does, judged by its leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// INSERT: yields a generated key
    Insert,
    /// UPDATE, REPLACE or DELETE: yields an affected-row count
    MutatingOther,
    /// SELECT and everything else: yields rows
    Other,
}

impl StatementKind {
    /// Classify a query template
    pub fn classify(sql: &str) -> Self {
        if INSERT_REGEX.is_match(sql) {
            Self::Insert
        } else if MUTATING_REGEX.is_match(sql) {
            Self::MutatingOther
        } else {
            Self::Other
        }
    }
}

/// A rewritten template and its flattened arguments
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    /// Query text after array expansion
    pub sql: String,
    /// Arguments aligned 1:1 with the placeholders of `sql`
    pub params: Params,
}

impl BoundStatement {
    /// Parameters as JSON, for diagnostics
    pub fn params_json(&self) -> String {
        match &self.params {
            Params::None => "[]".to_string(),
            Params::Positional(values) => serde_json::to_string(values).unwrap_or_default(),
            Params::Named(pairs) => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(name, value)| {
                        (
                            format!(":{name}"),
                            serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                        )
                    })
                    .collect();
                serde_json::Value::Object(map).to_string()
            }
        }
    }

    /// Statement dump recorded in the audit log
    pub fn describe(&self) -> String {
        format!(
            "SQL: [{}] {}\nParams: {} {}",
            self.sql.len(),
            self.sql,
            self.params.len(),
            self.params_json()
        )
    }
}

/// Replace the `nth` (1-based) `?` in `sql` with `count` comma-joined `?`.
///
/// Nothing changes when `nth` is 0, `count` is below 2, or `sql` has fewer
/// than `nth` placeholders.
///
/// # Examples
///
/// ```
/// use failover_rdbc::statement::expand_placeholder;
///
/// assert_eq!(expand_placeholder("a IN (?) AND b = ?", 1, 3), "a IN (?,?,?) AND b = ?");
/// assert_eq!(expand_placeholder("a = ? AND b IN (?)", 2, 2), "a = ? AND b IN (?,?)");
/// ```
pub fn expand_placeholder(sql: &str, nth: usize, count: usize) -> String {
    if nth == 0 || count < 2 {
        return sql.to_string();
    }

    let position = sql
        .char_indices()
        .filter(|(_, c)| *c == PLACEHOLDER)
        .nth(nth - 1)
        .map(|(idx, _)| idx);

    match position {
        Some(idx) => {
            let run = vec!["?"; count].join(",");
            let mut expanded = String::with_capacity(sql.len() + run.len());
            expanded.push_str(&sql[..idx]);
            expanded.push_str(&run);
            expanded.push_str(&sql[idx + PLACEHOLDER.len_utf8()..]);
            expanded
        }
        None => sql.to_string(),
    }
}

/// Rewrite a template, expanding array-valued positional arguments.
///
/// An array in argument position *n* (1-based) replaces the *n*-th `?` of
/// the current, partially rewritten template. The ordinal is not shifted by
/// earlier expansions, so with several arrays the expanded run can land on a
/// placeholder an earlier array produced.
///
/// Array values are only supported positionally; an array bound to a named
/// placeholder is rejected.
pub fn rewrite(template: &str, params: Params) -> Result<BoundStatement> {
    match params {
        Params::None => Ok(BoundStatement {
            sql: template.to_string(),
            params: Params::None,
        }),
        Params::Positional(values) => {
            let mut sql = template.to_string();
            let mut flattened = Vec::with_capacity(values.len());

            for (idx, value) in values.into_iter().enumerate() {
                match value {
                    Value::Array(items) => {
                        sql = expand_placeholder(&sql, idx + 1, items.len());
                        flattened.extend(items);
                    }
                    scalar => flattened.push(scalar),
                }
            }

            Ok(BoundStatement {
                sql,
                params: Params::Positional(flattened),
            })
        }
        Params::Named(pairs) => {
            if let Some((name, _)) = pairs.iter().find(|(_, v)| v.is_array()) {
                return Err(Error::invalid_parameter(format!(
                    "array value bound to named placeholder :{name}; arrays expand only for '?' placeholders"
                )));
            }
            Ok(BoundStatement {
                sql: template.to_string(),
                params: Params::Named(pairs),
            })
        }
    }
}

/// Substitute rendered values into a bound statement.
///
/// Placeholders without a matching value are left as they are.
pub fn render(statement: &BoundStatement, quote: &dyn Fn(&str) -> String) -> String {
    match &statement.params {
        Params::None => statement.sql.clone(),
        Params::Positional(values) => {
            let mut rendered = String::with_capacity(statement.sql.len());
            let mut values = values.iter();
            for c in statement.sql.chars() {
                if c == PLACEHOLDER {
                    match values.next() {
                        Some(value) => rendered.push_str(&render_value(value, quote)),
                        None => rendered.push(c),
                    }
                } else {
                    rendered.push(c);
                }
            }
            rendered
        }
        Params::Named(pairs) => NAMED_PLACEHOLDER_REGEX
            .replace_all(&statement.sql, |caps: &regex::Captures| {
                pairs
                    .iter()
                    .find(|(name, _)| name == &caps[1])
                    .map(|(_, value)| render_value(value, quote))
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;
    use crate::security::quote_string_literal;

    #[test]
    fn test_classify() {
        assert_eq!(StatementKind::classify("INSERT INTO t VALUES (1)"), StatementKind::Insert);
        assert_eq!(StatementKind::classify("  \n insert into t"), StatementKind::Insert);
        assert_eq!(StatementKind::classify("update t set a = 1"), StatementKind::MutatingOther);
        assert_eq!(StatementKind::classify("REPLACE INTO t"), StatementKind::MutatingOther);
        assert_eq!(StatementKind::classify("\tDelete FROM t"), StatementKind::MutatingOther);
        assert_eq!(StatementKind::classify("SELECT 1"), StatementKind::Other);
        assert_eq!(StatementKind::classify("SHOW TABLES"), StatementKind::Other);
        assert_eq!(StatementKind::classify("SELECT 'INSERT'"), StatementKind::Other);
    }

    #[test]
    fn test_expand_placeholder_edge_cases() {
        assert_eq!(expand_placeholder("a = ?", 0, 3), "a = ?");
        assert_eq!(expand_placeholder("a = ?", 1, 1), "a = ?");
        assert_eq!(expand_placeholder("a = ?", 1, 0), "a = ?");
        assert_eq!(expand_placeholder("a = ?", 2, 3), "a = ?");
    }

    #[test]
    fn test_expand_placeholder_multibyte_text() {
        assert_eq!(
            expand_placeholder("name = 'é' AND id IN (?)", 1, 2),
            "name = 'é' AND id IN (?,?)"
        );
    }

    #[test]
    fn test_rewrite_expands_array() {
        let bound = rewrite(
            "SELECT * FROM t WHERE x IN (?) AND y = ?",
            params![vec!["a", "b", "c"], 5],
        )
        .unwrap();

        assert_eq!(bound.sql, "SELECT * FROM t WHERE x IN (?,?,?) AND y = ?");
        assert_eq!(
            bound.params,
            Params::Positional(vec![
                Value::from("a"),
                Value::from("b"),
                Value::from("c"),
                Value::Int32(5),
            ])
        );
    }

    #[test]
    fn test_rewrite_array_after_scalar() {
        let bound = rewrite("a = ? AND b IN (?)", params![1, vec![2, 3]]).unwrap();
        assert_eq!(bound.sql, "a = ? AND b IN (?,?)");
        assert_eq!(bound.params.len(), 3);
    }

    #[test]
    fn test_rewrite_adjacent_arrays_use_argument_ordinal() {
        let bound = rewrite("a IN (?) AND b IN (?)", params![vec![1, 2], vec![3, 4, 5]]).unwrap();

        assert_eq!(bound.sql, "a IN (?,?,?,?) AND b IN (?)");
        assert_eq!(
            bound.params,
            Params::Positional(vec![
                Value::Int32(1),
                Value::Int32(2),
                Value::Int32(3),
                Value::Int32(4),
                Value::Int32(5),
            ])
        );
    }

    #[test]
    fn test_rewrite_three_arrays_with_scalars_between() {
        let bound = rewrite(
            "(?) ? (?) ? (?)",
            params![vec![1, 2], 9, vec![3, 4, 5], 8, vec![6, 7]],
        )
        .unwrap();
        assert_eq!(bound.sql, "(?,?) ?,?,?,? (?) ? (?)");
        assert_eq!(bound.params.len(), 9);
        assert_eq!(bound.sql.matches('?').count(), 9);
    }

    #[test]
    fn test_rewrite_single_element_and_empty_arrays() {
        let bound = rewrite("a IN (?) AND b = ?", params![vec![1], 2]).unwrap();
        assert_eq!(bound.sql, "a IN (?) AND b = ?");
        assert_eq!(bound.params.len(), 2);

        let bound = rewrite("a IN (?)", params![Vec::<i32>::new()]).unwrap();
        assert_eq!(bound.sql, "a IN (?)");
        assert!(bound.params.is_empty());
    }

    #[test]
    fn test_rewrite_named_passthrough_and_array_rejection() {
        let bound = rewrite("a = :a", Params::named([("a", 1)])).unwrap();
        assert_eq!(bound.sql, "a = :a");

        let err = rewrite("a IN (:a)", Params::named([("a", vec![1, 2])])).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn test_render_positional() {
        let bound = rewrite(
            "SELECT name FROM users WHERE hair IN (?) AND age > ? AND note = ?",
            params![vec!["brown", "red"], 20, Value::Null],
        )
        .unwrap();
        let rendered = render(&bound, &quote_string_literal);

        assert_eq!(
            rendered,
            "SELECT name FROM users WHERE hair IN ('brown','red') AND age > 20 AND note = NULL"
        );
    }

    #[test]
    fn test_render_named() {
        let bound = rewrite(
            "SELECT * FROM users WHERE hair = :hair AND id = :missing",
            Params::named([(":hair", "O'Hara")]),
        )
        .unwrap();
        let rendered = render(&bound, &quote_string_literal);

        assert_eq!(
            rendered,
            r"SELECT * FROM users WHERE hair = 'O\'Hara' AND id = :missing"
        );
    }

    #[test]
    fn test_describe_contains_sql_and_params() {
        let bound = rewrite("SELECT ?", params!["x"]).unwrap();
        let dump = bound.describe();
        assert!(dump.starts_with("SQL: [8] SELECT ?"));
        assert!(dump.contains("Params: 1"));
        assert!(dump.contains("\"x\""));
    }
}

//! Identifier whitelisting and literal quoting for failover-rdbc.
//!
//! Values always travel as bound parameters. Identifiers (table and column
//! names) cannot be bound, so a dynamic identifier is only ever rendered into
//! query text after it has been confirmed to be a real table or column of the
//! connected database. Nothing else is quoted: an unknown name is rejected,
//! never "cleaned".
//!
//! Literal quoting here exists for diagnostics only (rendered queries in logs
//! and the audit trail). It is never used to build executed SQL.

use crate::types::Value;

/// Identifier quote character (MySQL/MariaDB)
pub const IDENTIFIER_QUOTE: char = '`';

/// Wrap an identifier in backticks, doubling any embedded backtick.
///
/// # Examples
///
/// ```
/// use failover_rdbc::security::quote_identifier;
///
/// assert_eq!(quote_identifier("users"), "`users`");
/// assert_eq!(quote_identifier("we`ird"), "`we``ird`");
/// ```
pub fn quote_identifier(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push(IDENTIFIER_QUOTE);
    for c in name.chars() {
        if c == IDENTIFIER_QUOTE {
            quoted.push(IDENTIFIER_QUOTE);
        }
        quoted.push(c);
    }
    quoted.push(IDENTIFIER_QUOTE);
    quoted
}

/// Accept `name` only if it exactly matches one of the `known` identifiers.
///
/// Returns the quoted identifier on a match and `None` otherwise. The match is
/// exact and case-sensitive; reserved words and names containing quote
/// characters get no special treatment beyond quoting.
///
/// # Examples
///
/// ```
/// use failover_rdbc::security::whitelist_identifier;
///
/// let known = ["users", "email"];
/// assert_eq!(whitelist_identifier("email", known), Some("`email`".to_string()));
/// assert_eq!(whitelist_identifier("email; DROP TABLE users", known), None);
/// assert_eq!(whitelist_identifier("EMAIL", known), None);
/// ```
pub fn whitelist_identifier<'a, I>(name: &str, known: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    known
        .into_iter()
        .find(|candidate| *candidate == name)
        .map(quote_identifier)
}

/// Quote a string as a MySQL single-quoted literal.
///
/// Backslash, both quote characters, NUL, CR, LF and Ctrl-Z are
/// backslash-escaped, matching what the server-side escaper produces.
///
/// # Examples
///
/// ```
/// use failover_rdbc::security::quote_string_literal;
///
/// assert_eq!(quote_string_literal("brown"), "'brown'");
/// assert_eq!(quote_string_literal("O'Brien"), r"'O\'Brien'");
/// ```
pub fn quote_string_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '"' => quoted.push_str("\\\""),
            '\0' => quoted.push_str("\\0"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\u{1a}' => quoted.push_str("\\Z"),
            other => quoted.push(other),
        }
    }
    quoted.push('\'');
    quoted
}

/// Render a value as it would appear in an emulated query.
///
/// Numbers stay bare, NULL stays `NULL`, booleans become `1`/`0`, arrays
/// render element-wise joined by commas, everything else goes through `quote`.
pub fn render_value(value: &Value, quote: &dyn Fn(&str) -> String) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => u8::from(*b).to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, quote))
            .collect::<Vec<_>>()
            .join(","),
        v if v.is_numeric() => v.to_string(),
        v => quote(&v.to_string()),
    }
}

/// Undo doubled single quotes inside a quoted enum/set member.
pub(crate) fn unescape_enum_member(raw: &str) -> String {
    raw.replace("''", "'")
}

//! Schema cache for failover-rdbc
//!
//! Table and column names of the connected database, discovered on first use
//! and kept for the lifetime of the [`crate::Database`] that owns the cache.
//! There is no invalidation: tables or columns created after the first lookup
//! stay unknown until a new `Database` is built. Empty results are not
//! memoized, so an empty database is asked again on the next lookup.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::security::unescape_enum_member;
use crate::types::{ColumnInfo, Row};

/// Lists the tables of the current database
pub const LIST_TABLES_SQL: &str = "SHOW TABLES";

/// Column metadata for every table of a schema
pub const LIST_COLUMNS_SQL: &str = "SELECT column_name, column_default, is_nullable, data_type, \
     character_maximum_length, numeric_precision, column_type, column_key, extra \
     FROM information_schema.columns \
     WHERE table_schema = ? \
     ORDER BY ordinal_position ASC";

/// Column metadata for one table
pub const LIST_TABLE_COLUMNS_SQL: &str = "SELECT column_name, column_default, is_nullable, data_type, \
     character_maximum_length, numeric_precision, column_type, column_key, extra \
     FROM information_schema.columns \
     WHERE table_schema = ? AND table_name = ? \
     ORDER BY ordinal_position ASC";

/// Declared type of one column
pub const COLUMN_TYPE_SQL: &str = "SELECT column_type FROM information_schema.columns \
     WHERE table_schema = ? AND table_name = ? AND column_name = ?";

/// Marker in `extra` for auto-generated keys
const AUTO_INCREMENT_MARKER: &str = "auto_increment";

static ENUM_MEMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'((?:[^']|'')*)'").expect("enum member regex pattern is invalid - this is a bug")
});

/// Memoized schema metadata
#[derive(Debug, Default, Clone)]
pub struct SchemaCache {
    tables: Vec<String>,
    all_columns: Vec<String>,
    table_columns: HashMap<Option<String>, Vec<ColumnInfo>>,
}

impl SchemaCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached table names, `None` until a non-empty list was stored
    pub fn tables(&self) -> Option<&[String]> {
        (!self.tables.is_empty()).then_some(self.tables.as_slice())
    }

    /// Store table names, deduplicated in first-seen order
    pub fn remember_tables(&mut self, names: Vec<String>) -> Vec<String> {
        let names = dedup(names);
        if !names.is_empty() {
            self.tables = names.clone();
        }
        names
    }

    /// Cached column names across every table
    pub fn all_columns(&self) -> Option<&[String]> {
        (!self.all_columns.is_empty()).then_some(self.all_columns.as_slice())
    }

    /// Store column names across every table, deduplicated
    pub fn remember_all_columns(&mut self, names: Vec<String>) -> Vec<String> {
        let names = dedup(names);
        if !names.is_empty() {
            self.all_columns = names.clone();
        }
        names
    }

    /// Cached column metadata for a table (`None` = every table)
    pub fn table_columns(&self, table: Option<&str>) -> Option<&[ColumnInfo]> {
        self.table_columns
            .get(&table.map(str::to_string))
            .map(Vec::as_slice)
    }

    /// Store column metadata for a table (`None` = every table)
    pub fn remember_table_columns(&mut self, table: Option<&str>, columns: Vec<ColumnInfo>) {
        if !columns.is_empty() {
            self.table_columns.insert(table.map(str::to_string), columns);
        }
    }

    /// Check if nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.all_columns.is_empty() && self.table_columns.is_empty()
    }
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(names.len());
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Build a [`ColumnInfo`] from one row of the column metadata query
pub fn column_info_from_row(row: &Row) -> Result<ColumnInfo> {
    let name = row
        .get_by_name("column_name")
        .and_then(|v| v.as_string())
        .ok_or_else(|| Error::internal("column metadata row has no column_name"))?;

    let is_nullable = row
        .get_by_name("is_nullable")
        .and_then(|v| v.as_string())
        .map(|v| v != "NO")
        .unwrap_or(true);

    let is_autokey = row
        .get_by_name("extra")
        .and_then(|v| v.as_string())
        .map(|extra| extra.contains(AUTO_INCREMENT_MARKER))
        .unwrap_or(false);

    Ok(ColumnInfo::new(name, is_nullable, is_autokey))
}

/// Parse the members of an `enum(...)` or `set(...)` column type, in
/// declaration order. Other types yield an empty list.
pub fn parse_enum_members(column_type: &str) -> Vec<String> {
    let lower = column_type.trim_start().to_ascii_lowercase();
    if !(lower.starts_with("enum(") || lower.starts_with("set(")) {
        return Vec::new();
    }
    ENUM_MEMBER_REGEX
        .captures_iter(column_type)
        .map(|caps| unescape_enum_member(&caps[1]))
        .collect()
}

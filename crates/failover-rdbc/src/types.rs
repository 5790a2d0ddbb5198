//! Value types for failover-rdbc
//!
//! - [`Value`]: a bindable or fetched SQL value, including the array form
//!   that the statement builder expands into a placeholder run
//! - [`Params`]: positional or named arguments for one query
//! - [`Row`]: an ordered set of named column values
//! - [`ColumnInfo`]: introspected column metadata

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// SQL value type that can hold any bound or fetched value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit signed integer (INT)
    Int32(i32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// 64-bit unsigned integer (BIGINT UNSIGNED)
    UInt64(u64),
    /// 32-bit floating point (FLOAT)
    Float32(f32),
    /// 64-bit floating point (DOUBLE)
    Float64(f64),
    /// Arbitrary precision decimal (DECIMAL)
    Decimal(Decimal),
    /// Text string (VARCHAR, TEXT, ENUM)
    String(String),
    /// Binary data (BLOB, VARBINARY)
    Bytes(Vec<u8>),
    /// Date without time (DATE)
    Date(NaiveDate),
    /// Time without date (TIME)
    Time(NaiveTime),
    /// Timestamp without timezone (DATETIME, TIMESTAMP)
    DateTime(NaiveDateTime),
    /// List of values, expanded into `?,?,...` when bound positionally
    Array(Vec<Value>),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if value is an array
    #[inline]
    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Whether the value renders as a bare SQL number
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int32(_)
                | Self::Int64(_)
                | Self::UInt64(_)
                | Self::Float32(_)
                | Self::Float64(_)
                | Self::Decimal(_)
        )
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            Self::UInt64(n) => Some(*n != 0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::UInt64(n) => i64::try_from(*n).ok(),
            Self::Float32(n) if n.is_finite() => Some(*n as i64),
            Self::Float64(n) if n.is_finite() => Some(*n as i64),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt64(n) => Some(*n),
            Self::String(s) => s.parse().ok(),
            other => other.as_i64().and_then(|n| u64::try_from(n).ok()),
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(n) => Some(f64::from(*n)),
            Self::Int64(n) => Some(*n as f64),
            Self::UInt64(n) => Some(*n as f64),
            Self::Float32(n) => Some(f64::from(*n)),
            Self::Float64(n) => Some(*n),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to borrow as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Convert to owned string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::Null | Self::Array(_) => None,
            Self::Bytes(b) => String::from_utf8(b.clone()).ok(),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", u8::from(*b)),
            Self::Int32(n) => write!(f, "{n}"),
            Self::Int64(n) => write!(f, "{n}"),
            Self::UInt64(n) => write!(f, "{n}"),
            Self::Float32(n) => write!(f, "{n}"),
            Self::Float64(n) => write!(f, "{n}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::Array(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int64(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Arguments for one query
///
/// Positional arguments bind to `?` placeholders in order; named arguments
/// bind to `:name` placeholders. The two styles cannot be mixed in one
/// template.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    /// No arguments
    #[default]
    None,
    /// Arguments bound to `?` placeholders in order
    Positional(Vec<Value>),
    /// Arguments bound to `:name` placeholders
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Build positional arguments from any iterator of values
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Build named arguments; a leading `:` on a name is optional
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| {
                    let key: String = k.into();
                    let key = key.strip_prefix(':').map(str::to_string).unwrap_or(key);
                    (key, v.into())
                })
                .collect(),
        )
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Positional(values) => values.len(),
            Self::Named(pairs) => pairs.len(),
        }
    }

    /// Check if there are no arguments
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl From<Value> for Params {
    fn from(value: Value) -> Self {
        Self::Positional(vec![value])
    }
}

macro_rules! single_value_params {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Params {
                fn from(value: $ty) -> Self {
                    Self::Positional(vec![Value::from(value)])
                }
            }
        )*
    };
}

single_value_params!(bool, i32, i64, u32, u64, f64, String, &str);

/// Build positional [`Params`] from heterogeneous values
///
/// ```
/// use failover_rdbc::{params, Params, Value};
///
/// let p = params![vec!["a", "b"], 5];
/// assert_eq!(
///     p,
///     Params::Positional(vec![
///         Value::Array(vec![Value::from("a"), Value::from("b")]),
///         Value::Int32(5),
///     ])
/// );
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::None
    };
    ($($val:expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::Value::from($val)),+])
    };
}

/// Build named [`Params`]
///
/// ```
/// use failover_rdbc::named_params;
///
/// let p = named_params! { ":hair" => "brown", "age" => 20 };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! named_params {
    ($($key:expr => $val:expr),* $(,)?) => {
        $crate::Params::named(vec![$(($key, $crate::Value::from($val))),*])
    };
}

/// Database row as ordered column values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column names
    columns: Vec<String>,
    /// Column values (same order as columns)
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get column names
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get value by column name (case-insensitive)
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    /// Take the value at a column index
    pub fn take(mut self, idx: usize) -> Option<Value> {
        if idx < self.values.len() {
            Some(self.values.swap_remove(idx))
        } else {
            None
        }
    }

    /// Convert row to HashMap
    pub fn into_map(self) -> HashMap<String, Value> {
        self.columns.into_iter().zip(self.values).collect()
    }
}

/// Introspected column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Whether the column accepts NULL
    pub is_nullable: bool,
    /// Whether the column is an auto-generated key (AUTO_INCREMENT)
    pub is_autokey: bool,
}

impl ColumnInfo {
    /// Create column metadata
    pub fn new(name: impl Into<String>, is_nullable: bool, is_autokey: bool) -> Self {
        Self {
            name: name.into(),
            is_nullable,
            is_autokey,
        }
    }
}

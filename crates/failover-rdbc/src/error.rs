//! Error types for failover-rdbc
//!
//! Every caller-facing operation returns [`Result`]. Per-server connection
//! failures are swallowed by the connection manager; only exhaustion of the
//! whole server pool surfaces as [`Error::PoolExhausted`].

use std::fmt;
use thiserror::Error;

/// Result type for failover-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A single server refused the connection (retriable)
    Connection,
    /// No server in the pool accepted a connection (retriable with backoff)
    PoolExhausted,
    /// Identifier is not a known table or column name
    Identifier,
    /// Statement could not be prepared
    Prepare,
    /// Driver-level failure while executing or fetching
    Execution,
    /// A row was required but the query matched none
    MissingRow,
    /// Transaction control failure
    Transaction,
    /// Incremental cursor misuse
    Cursor,
    /// Caller supplied parameters that cannot be bound
    Parameter,
    /// Configuration error
    Configuration,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::PoolExhausted)
    }
}

/// Main error type for failover-rdbc
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection to one server failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Every server in the pool refused a connection
    #[error("pool exhausted: {message}")]
    PoolExhausted { message: String },

    /// Identifier is not a table or column of the connected database
    #[error("invalid identifier: {name:?}")]
    InvalidIdentifier { name: String },

    /// Query text could not be prepared
    #[error("prepare failed ({}): {message}", code_label(.code))]
    Prepare {
        code: Option<u16>,
        message: String,
        sql: String,
    },

    /// Statement execution (or fetching its rows) failed
    #[error("query failed ({}): {message}", code_label(.code))]
    Execution {
        code: Option<u16>,
        message: String,
        sql: String,
        params: String,
    },

    /// `query_row` with `require_row` matched zero rows
    #[error("query returned no rows when at least one row was required: {sql}")]
    RequiredRowMissing { sql: String },

    /// Transaction control statement failed
    #[error("transaction error: {message}")]
    Transaction { message: String },

    /// Incremental cursor used outside its lifecycle
    #[error("cursor error: {message}")]
    Cursor { message: String },

    /// Parameters cannot be bound to the template
    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

fn code_label(code: &Option<u16>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "no code".to_string(),
    }
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::PoolExhausted { .. } => ErrorCategory::PoolExhausted,
            Self::InvalidIdentifier { .. } => ErrorCategory::Identifier,
            Self::Prepare { .. } => ErrorCategory::Prepare,
            Self::Execution { .. } => ErrorCategory::Execution,
            Self::RequiredRowMissing { .. } => ErrorCategory::MissingRow,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Cursor { .. } => ErrorCategory::Cursor,
            Self::InvalidParameter { .. } => ErrorCategory::Parameter,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Vendor error code reported by the driver, if any
    pub fn vendor_code(&self) -> Option<u16> {
        match self {
            Self::Prepare { code, .. } | Self::Execution { code, .. } => *code,
            _ => None,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a pool exhaustion error
    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted {
            message: message.into(),
        }
    }

    /// Create an invalid identifier error
    pub fn invalid_identifier(name: impl Into<String>) -> Self {
        Self::InvalidIdentifier { name: name.into() }
    }

    /// Create a prepare error
    pub fn prepare(code: Option<u16>, message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Prepare {
            code,
            message: message.into(),
            sql: sql.into(),
        }
    }

    /// Create an execution error without statement context
    ///
    /// Drivers return this; the executor fills in `sql` and `params`
    /// with [`Error::with_statement`].
    pub fn execution(code: Option<u16>, message: impl Into<String>) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            sql: String::new(),
            params: String::new(),
        }
    }

    /// Attach the rendered statement and its parameters to a prepare or
    /// execution error. Other variants are returned unchanged.
    pub fn with_statement(self, statement_sql: &str, statement_params: &str) -> Self {
        match self {
            Self::Prepare { code, message, .. } => Self::Prepare {
                code,
                message,
                sql: statement_sql.to_string(),
            },
            Self::Execution { code, message, .. } => Self::Execution {
                code,
                message,
                sql: statement_sql.to_string(),
                params: statement_params.to_string(),
            },
            other => other,
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a cursor error
    pub fn cursor(message: impl Into<String>) -> Self {
        Self::Cursor {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::Identifier => write!(f, "identifier"),
            Self::Prepare => write!(f, "prepare"),
            Self::Execution => write!(f, "execution"),
            Self::MissingRow => write!(f, "missing_row"),
            Self::Transaction => write!(f, "transaction"),
            Self::Cursor => write!(f, "cursor"),
            Self::Parameter => write!(f, "parameter"),
            Self::Configuration => write!(f, "configuration"),
            Self::Other => write!(f, "other"),
        }
    }
}

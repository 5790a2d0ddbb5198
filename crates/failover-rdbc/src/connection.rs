//! Driver boundary for failover-rdbc
//!
//! The engine never speaks a wire protocol itself. A backend supplies:
//! - [`ConnectionFactory`]: opens a session against one server descriptor
//! - [`Connection`]: a live session (prepare, transactions, quoting)
//! - [`PreparedStatement`]: an executed statement holding its result cursor
//!
//! All calls block on driver I/O.

use std::time::Duration;

use crate::error::Result;
use crate::security::quote_string_literal;
use crate::server::ServerDescriptor;
use crate::types::{Params, Row};

/// A live database session
pub trait Connection: Send {
    /// Prepare a statement for execution
    ///
    /// Fails with [`crate::Error::Prepare`] when the text is malformed or
    /// references something that does not exist.
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Begin a transaction
    fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction
    fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction
    fn rollback(&mut self) -> Result<()>;

    /// Key generated by the most recent INSERT on this session
    fn last_insert_id(&self) -> Option<u64>;

    /// Quote a string for display in a rendered query
    fn quote(&self, value: &str) -> String {
        quote_string_literal(value)
    }

    /// Release the session
    fn close(&mut self) -> Result<()>;
}

/// A prepared statement and, once executed, its result cursor
pub trait PreparedStatement: Send {
    /// Get the SQL string
    fn sql(&self) -> &str;

    /// Execute with the given (already flattened) parameters
    fn execute(&mut self, params: &Params) -> Result<()>;

    /// Fetch the next row, `None` once the result set is exhausted
    fn fetch_one(&mut self) -> Result<Option<Row>>;

    /// Fetch every remaining row
    fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_one()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Rows affected by the last execution, if the driver reports it
    fn affected_rows(&self) -> Option<u64>;
}

/// Factory for creating sessions
pub trait ConnectionFactory: Send + Sync {
    /// Open a session against one server
    fn connect(
        &self,
        server: &ServerDescriptor,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}

/// Options applied to every session the manager opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Keep the underlying handle alive after close for reuse
    pub persistent: bool,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Statement run once on each new session
    pub init_command: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            persistent: false,
            connect_timeout: Duration::from_secs(10),
            init_command: Some("SET NAMES utf8".into()),
        }
    }
}

impl ConnectOptions {
    /// Set persistence
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set (or clear) the session init command
    pub fn with_init_command(mut self, command: Option<String>) -> Self {
        self.init_command = command;
        self
    }
}

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Read uncommitted - dirty reads possible
    ReadUncommitted,
    /// Read committed - no dirty reads
    ReadCommitted,
    /// Repeatable read - no non-repeatable reads (MySQL default)
    RepeatableRead,
    /// Serializable - full isolation
    Serializable,
}

impl IsolationLevel {
    /// Convert to SQL string for SET TRANSACTION statement
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    /// Control statement applying this level to the next transaction only
    pub fn set_transaction_sql(&self) -> String {
        format!("SET TRANSACTION ISOLATION LEVEL {}", self.to_sql())
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// MySQL/MariaDB
    MySQL,
    /// In-memory scripted driver
    Mock,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MySQL => write!(f, "MySQL"),
            Self::Mock => write!(f, "Mock"),
        }
    }
}

//! # failover-rdbc
//!
//! A resilient, blocking client-side access layer for MySQL/MariaDB clusters.
//!
//! ## Features
//!
//! - **Transparent Failover**: servers are tried in order until one accepts a session
//! - **Array Placeholders**: `IN (?)` bound to an array expands to `IN (?,?,?)`
//!   with the values flattened in step
//! - **Identifier Whitelisting**: dynamic table/column names are accepted only
//!   if the connected database actually has them
//! - **Transactions**: any failure rolls back the open transaction before it
//!   reaches the caller
//! - **Incremental Fetch**: rows one at a time with an explicit end-of-rows signal
//! - **Audit Trail**: query counter and the rendered text of the last statement
//!   (or of the whole open transaction)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use failover_rdbc::prelude::*;
//! use failover_rdbc::mysql::MySqlConnectionFactory;
//!
//! let config = DatabaseConfig::from_file("database.yaml")?;
//! let mut db = Database::new(&config, Arc::new(MySqlConnectionFactory::new()?));
//!
//! let rows = db
//!     .query(
//!         "SELECT name, age FROM users WHERE hair IN (?) AND age > ?",
//!         params![vec!["brown", "red"], 20],
//!     )?
//!     .into_rows();
//!
//! db.start_transaction(Some(IsolationLevel::ReadCommitted))?;
//! db.query("UPDATE users SET age = age + 1 WHERE id = ?", 7)?;
//! db.commit_transaction()?;
//!
//! let column = db.escape_identifier("email");
//! assert_eq!(column, "`email`");
//! ```
//!
//! ## Feature Flags
//!
//! - `mysql` - MySQL/MariaDB backend via mysql_async
//! - `full` - All features enabled

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod cursor;
pub mod database;
pub mod error;
pub mod manager;
pub mod schema;
pub mod security;
pub mod server;
pub mod statement;
pub mod testing;
pub mod transaction;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "mysql")]
pub mod mysql;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{ColumnInfo, Params, Row, Value};
    pub use crate::{named_params, params};

    // Driver boundary
    pub use crate::connection::{
        ConnectOptions, Connection, ConnectionFactory, DatabaseType, IsolationLevel,
        PreparedStatement,
    };

    // Servers and configuration
    pub use crate::config::DatabaseConfig;
    pub use crate::server::{SensitiveString, ServerDescriptor, ServerEntry, ServerPool};

    // Executor
    pub use crate::cursor::Fetch;
    pub use crate::database::{Database, FetchMode, QueryOutcome};
    pub use crate::statement::StatementKind;
    pub use crate::transaction::TransactionState;
}

// Re-export commonly used items at crate root
pub use config::DatabaseConfig;
pub use cursor::Fetch;
pub use database::{Database, FetchMode, QueryOutcome};
pub use error::{Error, Result};
pub use server::ServerEntry;
pub use types::{Params, Row, Value};

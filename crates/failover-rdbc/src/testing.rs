//! Testing utilities for failover-rdbc
//!
//! An in-memory, scripted driver. Hosts can be marked unreachable, statements
//! are answered from responses registered by SQL fragment, and every driver
//! call is appended to a shared event journal for assertions.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use failover_rdbc::testing::{MockConnectionFactory, MockResponse};
//! use failover_rdbc::{params, Database, DatabaseConfig, QueryOutcome, ServerEntry};
//!
//! let factory = MockConnectionFactory::new()
//!     .fail_host("db1")
//!     .on_query("INSERT INTO users", MockResponse::Inserted(Some(42)));
//!
//! let config = DatabaseConfig::new(vec![
//!     ServerEntry::new("db1", "app", "pw", "shop"),
//!     ServerEntry::new("db2", "app", "pw", "shop"),
//! ]);
//! let mut db = Database::new(&config, Arc::new(factory.clone()));
//!
//! let outcome = db.query("INSERT INTO users (name) VALUES (?)", params!["ada"]).unwrap();
//! assert_eq!(outcome, QueryOutcome::Inserted(42));
//! assert_eq!(db.host(), Some("db2"));
//! assert_eq!(factory.connect_attempts(), vec!["db1", "db2"]);
//! ```

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::connection::{
    ConnectOptions, Connection, ConnectionFactory, DatabaseType, PreparedStatement,
};
use crate::error::{Error, Result};
use crate::server::ServerDescriptor;
use crate::types::{Params, Row, Value};

// ============================================================================
// Scripted responses and the event journal
// ============================================================================

/// How the mock answers a statement
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    /// A result set
    Rows {
        /// Column names
        columns: Vec<String>,
        /// Row values
        rows: Vec<Vec<Value>>,
    },
    /// A result set whose fetch fails after the given rows
    RowsThenError {
        /// Column names
        columns: Vec<String>,
        /// Rows delivered before the failure
        rows: Vec<Vec<Value>>,
        /// Vendor error code
        code: u16,
        /// Error message
        message: String,
    },
    /// Affected-row count of a mutating statement
    Affected(u64),
    /// Generated key of an INSERT (`None` = no key)
    Inserted(Option<u64>),
    /// Preparation fails
    PrepareError {
        /// Vendor error code
        code: u16,
        /// Error message
        message: String,
    },
    /// Execution fails
    ExecuteError {
        /// Vendor error code
        code: u16,
        /// Error message
        message: String,
    },
}

impl MockResponse {
    /// A result set from column names and rows
    pub fn rows<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Rows {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// A single-column result set
    pub fn column<V: Into<Value>>(name: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::Rows {
            columns: vec![name.to_string()],
            rows: values.into_iter().map(|v| vec![v.into()]).collect(),
        }
    }

    /// An empty result set
    pub fn empty() -> Self {
        Self::Rows {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Execution fails with a vendor error
    pub fn execute_error(code: u16, message: impl Into<String>) -> Self {
        Self::ExecuteError {
            code,
            message: message.into(),
        }
    }

    /// Preparation fails with a vendor error
    pub fn prepare_error(code: u16, message: impl Into<String>) -> Self {
        Self::PrepareError {
            code,
            message: message.into(),
        }
    }
}

/// One recorded driver call
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    /// A session opened
    Connect {
        /// Server host
        host: String,
        /// Persistence requested
        persistent: bool,
    },
    /// A connect attempt was refused
    ConnectFailed {
        /// Server host
        host: String,
    },
    /// The init command ran on a new session
    InitCommand {
        /// Statement text
        sql: String,
    },
    /// A statement was prepared
    Prepare {
        /// Statement text
        sql: String,
    },
    /// A statement was executed
    Execute {
        /// Statement text
        sql: String,
        /// Bound parameters
        params: Params,
    },
    /// Transaction begin
    Begin,
    /// Transaction commit
    Commit,
    /// Transaction rollback
    Rollback,
    /// A session closed
    Close {
        /// Server host
        host: String,
    },
}

#[derive(Debug, Default)]
struct MockState {
    unreachable: HashSet<String>,
    responses: Vec<(String, MockResponse)>,
    events: Vec<MockEvent>,
    last_insert_id: Option<u64>,
}

impl MockState {
    /// Most recently registered response whose fragment occurs in `sql`
    fn response_for(&self, sql: &str) -> MockResponse {
        self.responses
            .iter()
            .rev()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(MockResponse::empty)
    }
}

// ============================================================================
// Mock Connection Factory
// ============================================================================

/// A scripted connection factory
///
/// Clones share state, so a test can hand one clone to a
/// [`crate::Database`] and inspect the journal through another.
#[derive(Debug, Clone, Default)]
pub struct MockConnectionFactory {
    state: Arc<Mutex<MockState>>,
}

impl MockConnectionFactory {
    /// Create a factory where every host is reachable
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse connections to `host`
    pub fn fail_host(self, host: impl Into<String>) -> Self {
        self.state.lock().unreachable.insert(host.into());
        self
    }

    /// Answer statements containing `fragment` with `response`.
    ///
    /// Later registrations take precedence over earlier ones.
    pub fn on_query(self, fragment: impl Into<String>, response: MockResponse) -> Self {
        self.respond(fragment, response);
        self
    }

    /// Register a response on a shared factory
    pub fn respond(&self, fragment: impl Into<String>, response: MockResponse) {
        self.state.lock().responses.push((fragment.into(), response));
    }

    /// Mark a host reachable or unreachable
    pub fn set_host_reachable(&self, host: &str, reachable: bool) {
        let mut state = self.state.lock();
        if reachable {
            state.unreachable.remove(host);
        } else {
            state.unreachable.insert(host.to_string());
        }
    }

    /// Every recorded driver call, oldest first
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    /// Forget recorded calls
    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Hosts tried, in order, successful or not
    pub fn connect_attempts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MockEvent::Connect { host, .. } | MockEvent::ConnectFailed { host } => Some(host),
                _ => None,
            })
            .collect()
    }

    /// Statement texts prepared, in order
    pub fn prepared(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MockEvent::Prepare { sql } => Some(sql),
                _ => None,
            })
            .collect()
    }

    /// Executed statements and their parameters, in order
    pub fn executed(&self) -> Vec<(String, Params)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MockEvent::Execute { sql, params } => Some((sql, params)),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded calls equal to `event`
    pub fn count(&self, event: &MockEvent) -> usize {
        self.state.lock().events.iter().filter(|e| *e == event).count()
    }

    fn record(&self, event: MockEvent) {
        self.state.lock().events.push(event);
    }
}

impl ConnectionFactory for MockConnectionFactory {
    fn connect(
        &self,
        server: &ServerDescriptor,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let host = server.host().to_string();
        if self.state.lock().unreachable.contains(&host) {
            self.record(MockEvent::ConnectFailed { host: host.clone() });
            return Err(Error::connection(format!(
                "Can't connect to MySQL server on '{host}'"
            )));
        }

        self.record(MockEvent::Connect {
            host: host.clone(),
            persistent: options.persistent,
        });
        if let Some(init) = &options.init_command {
            self.record(MockEvent::InitCommand { sql: init.clone() });
        }

        Ok(Box::new(MockConnection {
            host,
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mock
    }
}

// ============================================================================
// Mock Connection / Statement
// ============================================================================

struct MockConnection {
    host: String,
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockConnection {
    fn record(&self, event: MockEvent) {
        self.state.lock().events.push(event);
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::connection("session is closed"));
        }
        Ok(())
    }
}

impl Connection for MockConnection {
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.check_open()?;
        self.record(MockEvent::Prepare {
            sql: sql.to_string(),
        });

        let response = self.state.lock().response_for(sql);
        if let MockResponse::PrepareError { code, message } = response {
            return Err(Error::prepare(Some(code), message, sql));
        }

        Ok(Box::new(MockStatement {
            sql: sql.to_string(),
            response,
            state: Arc::clone(&self.state),
            rows: VecDeque::new(),
            fetch_error: None,
            affected: None,
        }))
    }

    fn begin(&mut self) -> Result<()> {
        self.check_open()?;
        self.record(MockEvent::Begin);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        self.record(MockEvent::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        self.record(MockEvent::Rollback);
        Ok(())
    }

    fn last_insert_id(&self) -> Option<u64> {
        self.state.lock().last_insert_id
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.record(MockEvent::Close {
                host: self.host.clone(),
            });
        }
        Ok(())
    }
}

struct MockStatement {
    sql: String,
    response: MockResponse,
    state: Arc<Mutex<MockState>>,
    rows: VecDeque<Row>,
    fetch_error: Option<Error>,
    affected: Option<u64>,
}

fn build_rows(columns: &[String], rows: &[Vec<Value>]) -> VecDeque<Row> {
    rows.iter()
        .map(|values| Row::new(columns.to_vec(), values.clone()))
        .collect()
}

impl PreparedStatement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn execute(&mut self, params: &Params) -> Result<()> {
        self.state.lock().events.push(MockEvent::Execute {
            sql: self.sql.clone(),
            params: params.clone(),
        });

        match &self.response {
            MockResponse::Rows { columns, rows } => {
                self.rows = build_rows(columns, rows);
            }
            MockResponse::RowsThenError {
                columns,
                rows,
                code,
                message,
            } => {
                self.rows = build_rows(columns, rows);
                self.fetch_error = Some(Error::execution(Some(*code), message.clone()));
            }
            MockResponse::Affected(count) => self.affected = Some(*count),
            MockResponse::Inserted(id) => {
                self.state.lock().last_insert_id = *id;
                self.affected = Some(1);
            }
            MockResponse::ExecuteError { code, message } => {
                return Err(Error::execution(Some(*code), message.clone()));
            }
            MockResponse::PrepareError { code, message } => {
                return Err(Error::prepare(Some(*code), message.clone(), self.sql.clone()));
            }
        }
        Ok(())
    }

    fn fetch_one(&mut self) -> Result<Option<Row>> {
        match self.rows.pop_front() {
            Some(row) => Ok(Some(row)),
            None => match self.fetch_error.take() {
                Some(error) => Err(error),
                None => Ok(None),
            },
        }
    }

    fn affected_rows(&self) -> Option<u64> {
        self.affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerEntry;

    fn server(host: &str) -> ServerDescriptor {
        ServerDescriptor::admit(&ServerEntry::new(host, "app", "pw", "shop")).unwrap()
    }

    #[test]
    fn test_unreachable_host_refused() {
        let factory = MockConnectionFactory::new().fail_host("down");
        let options = ConnectOptions::default();

        assert!(factory.connect(&server("down"), &options).is_err());
        assert!(factory.connect(&server("up"), &options).is_ok());
        assert_eq!(factory.connect_attempts(), vec!["down", "up"]);
        assert_eq!(
            factory.count(&MockEvent::InitCommand {
                sql: "SET NAMES utf8".into()
            }),
            1
        );
    }

    #[test]
    fn test_latest_matching_response_wins() {
        let factory = MockConnectionFactory::new()
            .on_query("FROM users", MockResponse::column("id", [1]))
            .on_query("FROM users WHERE", MockResponse::column("id", [2]));
        let mut conn = factory
            .connect(&server("db"), &ConnectOptions::default())
            .unwrap();

        let mut stmt = conn.prepare("SELECT id FROM users WHERE id = ?").unwrap();
        stmt.execute(&Params::from(2)).unwrap();
        let rows = stmt.fetch_all().unwrap();
        assert_eq!(rows[0].get(0), Some(&Value::Int32(2)));

        let mut stmt = conn.prepare("SELECT id FROM users").unwrap();
        stmt.execute(&Params::None).unwrap();
        assert_eq!(stmt.fetch_all().unwrap()[0].get(0), Some(&Value::Int32(1)));
    }

    #[test]
    fn test_rows_then_error() {
        let factory = MockConnectionFactory::new().on_query(
            "SELECT",
            MockResponse::RowsThenError {
                columns: vec!["n".into()],
                rows: vec![vec![Value::Int64(1)]],
                code: 2013,
                message: "Lost connection".into(),
            },
        );
        let mut conn = factory
            .connect(&server("db"), &ConnectOptions::default())
            .unwrap();
        let mut stmt = conn.prepare("SELECT n FROM t").unwrap();
        stmt.execute(&Params::None).unwrap();

        assert!(stmt.fetch_one().unwrap().is_some());
        let err = stmt.fetch_one().unwrap_err();
        assert_eq!(err.vendor_code(), Some(2013));
        assert!(stmt.fetch_one().unwrap().is_none());
    }

    #[test]
    fn test_closed_connection_rejects_calls() {
        let factory = MockConnectionFactory::new();
        let mut conn = factory
            .connect(&server("db"), &ConnectOptions::default())
            .unwrap();
        conn.close().unwrap();
        conn.close().unwrap();

        assert!(conn.prepare("SELECT 1").is_err());
        assert_eq!(factory.count(&MockEvent::Close { host: "db".into() }), 1);
    }
}

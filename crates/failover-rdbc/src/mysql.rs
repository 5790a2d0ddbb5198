//! MySQL/MariaDB backend for failover-rdbc
//!
//! Built on `mysql_async`, driven from blocking code through a private
//! current-thread tokio runtime. Statements are prepared server-side (real
//! parameter binding, no client emulation) and their result sets are
//! buffered on execute, so the cursor API never holds the session across
//! calls.
//!
//! Persistent sessions: when [`ConnectOptions::persistent`] is set, a closed
//! session is parked in the factory and handed back (after a ping) to the
//! next connect against the same server and user.
//!
//! The blocking calls must not be made from inside an async runtime.

use chrono::{Datelike, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::connection::{
    ConnectOptions, Connection, ConnectionFactory, DatabaseType, PreparedStatement,
};
use crate::error::{Error, Result};
use crate::server::ServerDescriptor;
use crate::types::{Params, Row, Value};

/// Convert a failover-rdbc Value to a MySQL parameter
fn value_to_sql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int32(n) => mysql_async::Value::from(*n),
        Value::Int64(n) => mysql_async::Value::from(*n),
        Value::UInt64(n) => mysql_async::Value::from(*n),
        Value::Float32(n) => mysql_async::Value::from(*n),
        Value::Float64(n) => mysql_async::Value::from(*n),
        Value::Decimal(d) => mysql_async::Value::from(d.to_string()),
        Value::String(s) => mysql_async::Value::from(s.clone()),
        Value::Bytes(b) => mysql_async::Value::from(b.clone()),
        Value::Date(d) => {
            mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
        }
        Value::Time(t) => mysql_async::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => mysql_async::Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1000,
        ),
        // Arrays are flattened before binding; a nested one is sent as JSON
        Value::Array(items) => {
            mysql_async::Value::from(serde_json::to_string(items).unwrap_or_default())
        }
    }
}

/// Convert a MySQL value to a failover-rdbc Value
fn mysql_value_to_value(val: mysql_async::Value) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(n) => Value::Int64(n),
        mysql_async::Value::UInt(n) => Value::UInt64(n),
        mysql_async::Value::Float(f) => Value::Float32(f),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let Some(date) = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            else {
                return Value::Null;
            };
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                Value::Date(date)
            } else {
                chrono::NaiveTime::from_hms_micro_opt(hour as u32, min as u32, sec as u32, micro)
                    .map(|time| Value::DateTime(chrono::NaiveDateTime::new(date, time)))
                    .unwrap_or(Value::Null)
            }
        }
        mysql_async::Value::Time(neg, days, hour, min, sec, micro) => {
            let total_hours = days * 24 + hour as u32;
            if neg || total_hours >= 24 {
                // Outside time-of-day: keep the server's textual form
                let sign = if neg { "-" } else { "" };
                Value::String(format!("{sign}{total_hours:02}:{min:02}:{sec:02}"))
            } else {
                chrono::NaiveTime::from_hms_micro_opt(total_hours, min as u32, sec as u32, micro)
                    .map(Value::Time)
                    .unwrap_or(Value::Null)
            }
        }
    }
}

fn convert_row(row: mysql_async::Row) -> Row {
    let columns: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();
    let values: Vec<Value> = (0..row.len())
        .map(|i| {
            let val: mysql_async::Value = row.get(i).unwrap_or(mysql_async::Value::NULL);
            mysql_value_to_value(val)
        })
        .collect();
    Row::new(columns, values)
}

fn to_driver_params(params: &Params) -> mysql_async::Params {
    match params {
        Params::None => mysql_async::Params::Empty,
        Params::Positional(values) => {
            mysql_async::Params::Positional(values.iter().map(value_to_sql).collect())
        }
        Params::Named(pairs) => mysql_async::Params::Named(
            pairs
                .iter()
                .map(|(name, value)| (name.clone().into_bytes(), value_to_sql(value)))
                .collect(),
        ),
    }
}

/// Vendor error code and message of a driver error
fn split_error(e: &mysql_async::Error) -> (Option<u16>, String) {
    match e {
        mysql_async::Error::Server(server) => (Some(server.code), server.message.clone()),
        other => (None, other.to_string()),
    }
}

type ParkedSessions = Arc<Mutex<HashMap<String, Conn>>>;

/// Opens MySQL/MariaDB sessions
pub struct MySqlConnectionFactory {
    runtime: Arc<Runtime>,
    parked: ParkedSessions,
}

impl MySqlConnectionFactory {
    /// Create a factory with its own I/O runtime
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::internal(format!("Failed to start MySQL I/O runtime: {}", e)))?;
        Ok(Self {
            runtime: Arc::new(runtime),
            parked: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn session_key(server: &ServerDescriptor) -> String {
        format!("{}@{}", server.username(), server.label())
    }

    /// A parked session for this server that still answers a ping
    fn take_parked(&self, key: &str) -> Option<Conn> {
        let mut conn = self.parked.lock().remove(key)?;
        match self.runtime.block_on(conn.ping()) {
            Ok(()) => {
                debug!(session = %key, "Reusing persistent MySQL session");
                Some(conn)
            }
            Err(e) => {
                debug!(session = %key, error = %e, "Discarding stale persistent MySQL session");
                let _guard = self.runtime.enter();
                drop(conn);
                None
            }
        }
    }

    fn open(&self, server: &ServerDescriptor, options: &ConnectOptions) -> Result<Conn> {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(server.host().to_string())
            .tcp_port(server.port())
            .user(Some(server.username().to_string()))
            .pass(Some(server.password().to_string()))
            .db_name(Some(server.database().to_string()))
            .prefer_socket(false);
        if let Some(init) = &options.init_command {
            builder = builder.init(vec![init.clone()]);
        }

        let timeout = options.connect_timeout;
        let label = server.label();
        self.runtime.block_on(async move {
            match tokio::time::timeout(timeout, Conn::new(builder)).await {
                Ok(Ok(conn)) => Ok(conn),
                Ok(Err(e)) => Err(Error::connection_with_source(
                    format!("Failed to connect to MySQL at {}", label),
                    e,
                )),
                Err(_) => Err(Error::connection(format!(
                    "Timed out after {:?} connecting to MySQL at {}",
                    timeout, label
                ))),
            }
        })
    }
}

impl std::fmt::Debug for MySqlConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnectionFactory")
            .field("parked", &self.parked.lock().len())
            .finish()
    }
}

impl ConnectionFactory for MySqlConnectionFactory {
    fn connect(
        &self,
        server: &ServerDescriptor,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let key = Self::session_key(server);
        let conn = match options.persistent.then(|| self.take_parked(&key)).flatten() {
            Some(conn) => conn,
            None => self.open(server, options)?,
        };

        Ok(Box::new(MySqlConnection {
            conn: Arc::new(Mutex::new(Some(conn))),
            runtime: Arc::clone(&self.runtime),
            parked: options.persistent.then(|| Arc::clone(&self.parked)),
            key,
            last_insert_id: Arc::new(Mutex::new(None)),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}

/// A live MySQL session
pub struct MySqlConnection {
    conn: Arc<Mutex<Option<Conn>>>,
    runtime: Arc<Runtime>,
    /// Set for persistent sessions
    parked: Option<ParkedSessions>,
    key: String,
    last_insert_id: Arc<Mutex<Option<u64>>>,
}

impl MySqlConnection {
    fn control(&mut self, sql: &str) -> Result<()> {
        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("MySQL session is closed"))?;
        self.runtime.block_on(conn.query_drop(sql)).map_err(|e| {
            let (code, message) = split_error(&e);
            Error::execution(code, message).with_statement(sql, "[]")
        })
    }
}

impl Connection for MySqlConnection {
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let statement = {
            let mut guard = self.conn.lock();
            let conn = guard
                .as_mut()
                .ok_or_else(|| Error::connection("MySQL session is closed"))?;
            self.runtime.block_on(conn.prep(sql)).map_err(|e| {
                let (code, message) = split_error(&e);
                Error::prepare(code, message, sql)
            })?
        };

        Ok(Box::new(MySqlStatement {
            sql: sql.to_string(),
            statement,
            conn: Arc::clone(&self.conn),
            runtime: Arc::clone(&self.runtime),
            last_insert_id: Arc::clone(&self.last_insert_id),
            rows: VecDeque::new(),
            affected: None,
        }))
    }

    fn begin(&mut self) -> Result<()> {
        self.control("START TRANSACTION")
    }

    fn commit(&mut self) -> Result<()> {
        self.control("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.control("ROLLBACK")
    }

    fn last_insert_id(&self) -> Option<u64> {
        *self.last_insert_id.lock()
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.lock().take() else {
            return Ok(());
        };

        if let Some(parked) = &self.parked {
            // A parked handle must not carry an open transaction
            if let Err(e) = self.runtime.block_on(conn.query_drop("ROLLBACK")) {
                debug!(session = %self.key, error = %e, "Not parking MySQL session after failed rollback");
                let _guard = self.runtime.enter();
                drop(conn);
                return Ok(());
            }
            debug!(session = %self.key, "Parking persistent MySQL session");
            if let Some(previous) = parked.lock().insert(self.key.clone(), conn) {
                let _guard = self.runtime.enter();
                drop(previous);
            }
            return Ok(());
        }

        self.runtime
            .block_on(conn.disconnect())
            .map_err(|e| Error::connection_with_source("Failed to close MySQL session", e))
    }
}

impl Drop for MySqlConnection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(session = %self.key, error = %e, "Error closing MySQL session on drop");
        }
    }
}

/// A prepared MySQL statement with its buffered result set
pub struct MySqlStatement {
    sql: String,
    statement: mysql_async::Statement,
    conn: Arc<Mutex<Option<Conn>>>,
    runtime: Arc<Runtime>,
    last_insert_id: Arc<Mutex<Option<u64>>>,
    rows: VecDeque<Row>,
    affected: Option<u64>,
}

impl PreparedStatement for MySqlStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn execute(&mut self, params: &Params) -> Result<()> {
        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("MySQL session is closed"))?;

        let rows: Vec<mysql_async::Row> = self
            .runtime
            .block_on(conn.exec(&self.statement, to_driver_params(params)))
            .map_err(|e| {
                let (code, message) = split_error(&e);
                Error::execution(code, message)
            })?;

        self.affected = Some(conn.affected_rows());
        *self.last_insert_id.lock() = conn.last_insert_id();
        self.rows = rows.into_iter().map(convert_row).collect();
        Ok(())
    }

    fn fetch_one(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }

    fn fetch_all(&mut self) -> Result<Vec<Row>> {
        Ok(self.rows.drain(..).collect())
    }

    fn affected_rows(&self) -> Option<u64> {
        self.affected
    }
}

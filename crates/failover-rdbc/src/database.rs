//! Query executor and the caller-facing API
//!
//! [`Database`] ties the pieces together: the connection manager supplies a
//! session, the statement builder rewrites the template, the driver runs it,
//! and the result is classified by the statement's leading keyword. Any
//! failure past the connection stage is recorded in the audit log and rolls
//! back an open transaction before it reaches the caller.
//!
//! A `Database` is a single logical session and is not meant to be shared
//! between threads without external synchronization.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::DatabaseConfig;
use crate::connection::{Connection, ConnectionFactory, IsolationLevel};
use crate::cursor::{Fetch, RowCursor};
use crate::error::{Error, Result};
use crate::manager::ConnectionManager;
use crate::schema::{self, SchemaCache};
use crate::security::{quote_string_literal, whitelist_identifier};
use crate::server::{ServerDescriptor, ServerEntry, ServerPool};
use crate::statement::{self, BoundStatement, StatementKind, EMULATION_WARNING};
use crate::transaction::{QueryAudit, TransactionState};
use crate::types::{ColumnInfo, Params, Row, Value};

/// How the rows of a row-returning statement are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Every row, eagerly
    #[default]
    All,
    /// One column (0-based) of every row
    Column(usize),
    /// Nothing now; rows come one at a time from [`Database::next_row`]
    Incremental,
}

/// What a successful query produced
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Rows of a row-returning statement
    Rows(Vec<Row>),
    /// One column of a row-returning statement
    Column(Vec<Value>),
    /// Rows affected by UPDATE, REPLACE or DELETE
    Affected(u64),
    /// Positive key generated by INSERT
    Inserted(u64),
    /// No key, no count, or an incremental query
    Empty,
}

impl QueryOutcome {
    /// Rows, or an empty list for any other outcome
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    /// Column values, or an empty list for any other outcome
    pub fn into_column(self) -> Vec<Value> {
        match self {
            Self::Column(values) => values,
            _ => Vec::new(),
        }
    }

    /// Affected-row count
    pub fn affected(&self) -> Option<u64> {
        match self {
            Self::Affected(count) => Some(*count),
            _ => None,
        }
    }

    /// Generated key
    pub fn inserted_id(&self) -> Option<u64> {
        match self {
            Self::Inserted(id) => Some(*id),
            _ => None,
        }
    }

    /// Check for [`QueryOutcome::Empty`]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Failover-aware database handle
#[derive(Debug)]
pub struct Database {
    manager: ConnectionManager,
    schema: SchemaCache,
    transaction: TransactionState,
    audit: QueryAudit,
    cursor: RowCursor,
}

impl Database {
    /// Create a handle from configuration. Nothing connects until first use.
    pub fn new(config: &DatabaseConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let manager =
            ConnectionManager::new(config.server_pool(), factory, config.connect_options());
        Self::with_manager(manager)
    }

    /// Create a handle from raw server entries with default options.
    ///
    /// Incomplete entries are dropped; `load_balance` shuffles the order.
    pub fn from_servers(
        servers: &[ServerEntry],
        load_balance: bool,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let config = DatabaseConfig::new(servers.to_vec()).with_load_balance(load_balance);
        Self::new(&config, factory)
    }

    /// Create a handle around an existing manager
    pub fn with_manager(manager: ConnectionManager) -> Self {
        Self {
            manager,
            schema: SchemaCache::new(),
            transaction: TransactionState::Idle,
            audit: QueryAudit::new(),
            cursor: RowCursor::Closed,
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Check if a session is open
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Host of the active server, `None` when disconnected
    pub fn host(&self) -> Option<&str> {
        self.manager.host()
    }

    /// Pool position of the active server
    pub fn active_server_index(&self) -> Option<usize> {
        self.manager.active_index()
    }

    /// The active server
    pub fn active_server(&self) -> Option<&ServerDescriptor> {
        self.manager.active_server()
    }

    /// The server pool in its current order
    pub fn servers(&self) -> &ServerPool {
        self.manager.pool()
    }

    /// Database name of the active server, connecting if needed
    pub fn database_name(&mut self) -> Result<String> {
        self.ensure_session()?;
        self.manager
            .active_server()
            .map(|server| server.database().to_string())
            .ok_or_else(|| Error::internal("session without an active server"))
    }

    /// Close the session. An open transaction is rolled back first.
    pub fn close(&mut self) {
        self.reset_session_state();
        self.manager.close();
    }

    /// Change session persistence; reconnects only when the flag changes
    pub fn set_persistent(&mut self, persistent: bool) {
        if self.manager.is_persistent() == persistent {
            return;
        }
        self.reset_session_state();
        self.manager.set_persistent(persistent);
    }

    /// Shuffle the server order for naive load distribution
    pub fn randomize_servers(&mut self) {
        self.manager.randomize();
    }

    fn reset_session_state(&mut self) {
        if self.transaction.close() {
            warn!("Session closed with an open transaction; rolling it back");
            if let Some(conn) = self.manager.connection() {
                if let Err(e) = conn.rollback() {
                    warn!(error = %e, "Rollback before closing the session failed");
                }
            }
        }
        if self.cursor.is_open() {
            debug!("Discarding unfinished incremental query");
        }
        self.cursor.close();
    }

    fn ensure_session(&mut self) -> Result<()> {
        if self.manager.is_connected() {
            return Ok(());
        }
        self.reset_session_state();
        if self.manager.ensure_connected() {
            Ok(())
        } else {
            Err(Error::pool_exhausted(format!(
                "could not establish a connection to any of {} server(s)",
                self.manager.pool().len()
            )))
        }
    }

    fn connection(&mut self) -> Result<&mut dyn Connection> {
        self.manager
            .connection()
            .ok_or_else(|| Error::connection("no active session"))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Run a query and fetch every row.
    ///
    /// INSERT yields [`QueryOutcome::Inserted`] (or `Empty` without a positive
    /// key), UPDATE/REPLACE/DELETE yield [`QueryOutcome::Affected`], anything
    /// else yields [`QueryOutcome::Rows`].
    pub fn query(&mut self, sql: &str, params: impl Into<Params>) -> Result<QueryOutcome> {
        self.query_with(sql, params, FetchMode::All)
    }

    /// Run a query with an explicit fetch mode
    pub fn query_with(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
        mode: FetchMode,
    ) -> Result<QueryOutcome> {
        self.execute(sql, params.into(), mode)
    }

    /// First row of a query.
    ///
    /// With `require_row` an empty result is an
    /// [`Error::RequiredRowMissing`]; without it, `None`.
    pub fn query_row(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
        require_row: bool,
    ) -> Result<Option<Row>> {
        let row = self.query(sql, params)?.into_rows().into_iter().next();
        if row.is_none() && require_row {
            self.abort_transaction();
            return Err(Error::RequiredRowMissing {
                sql: sql.to_string(),
            });
        }
        Ok(row)
    }

    /// One column (0-based) of every row
    pub fn query_column(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
        column: usize,
    ) -> Result<Vec<Value>> {
        Ok(self
            .query_with(sql, params, FetchMode::Column(column))?
            .into_column())
    }

    /// Run a query whose rows are read one at a time with [`Database::next_row`]
    pub fn begin_incremental_query(&mut self, sql: &str, params: impl Into<Params>) -> Result<()> {
        self.query_with(sql, params, FetchMode::Incremental)?;
        Ok(())
    }

    /// Next row of the incremental query.
    ///
    /// Returns [`Fetch::EndOfRows`] once the result set is exhausted, and
    /// keeps returning it. A fetch failure closes the cursor and rolls back
    /// an open transaction.
    pub fn next_row(&mut self) -> Result<Fetch> {
        match self.cursor.next() {
            Ok(fetch) => Ok(fetch),
            Err(e @ Error::Cursor { .. }) => Err(e),
            Err(e) => {
                error!(error = %e, "Incremental fetch failed");
                self.abort_transaction();
                Err(e)
            }
        }
    }

    fn execute(&mut self, sql: &str, params: Params, mode: FetchMode) -> Result<QueryOutcome> {
        self.audit.count_query();
        let kind = StatementKind::classify(sql);

        self.ensure_session()?;
        self.cursor.close();

        let bound = match statement::rewrite(sql, params) {
            Ok(bound) => bound,
            Err(e) => {
                self.abort_transaction();
                return Err(e);
            }
        };

        debug!(sql = %bound.sql, params = bound.params.len(), ?kind, "Preparing statement");

        let prepared = self.connection()?.prepare(&bound.sql);
        let mut prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.fail(e, &bound)),
        };
        if let Err(e) = prepared.execute(&bound.params) {
            return Err(self.fail(e, &bound));
        }

        let outcome = match kind {
            StatementKind::Insert => match self.connection()?.last_insert_id() {
                Some(id) if id > 0 => QueryOutcome::Inserted(id),
                _ => QueryOutcome::Empty,
            },
            StatementKind::MutatingOther => match prepared.affected_rows() {
                Some(count) => QueryOutcome::Affected(count),
                None => QueryOutcome::Empty,
            },
            StatementKind::Other => match mode {
                FetchMode::All => match prepared.fetch_all() {
                    Ok(rows) => QueryOutcome::Rows(rows),
                    Err(e) => return Err(self.fail(e, &bound)),
                },
                FetchMode::Column(index) => {
                    let rows = match prepared.fetch_all() {
                        Ok(rows) => rows,
                        Err(e) => return Err(self.fail(e, &bound)),
                    };
                    match column_values(rows, index) {
                        Ok(values) => QueryOutcome::Column(values),
                        Err(e) => return Err(self.fail(e, &bound)),
                    }
                }
                FetchMode::Incremental => {
                    self.cursor = RowCursor::open(prepared);
                    QueryOutcome::Empty
                }
            },
        };

        self.audit
            .record(&bound.describe(), self.transaction.is_open());
        Ok(outcome)
    }

    /// Record, log and roll back after a failed statement
    fn fail(&mut self, error: Error, bound: &BoundStatement) -> Error {
        let rendered = self.render_bound(bound);
        let error = error.with_statement(&rendered, &bound.params_json());
        error!(
            error = %error,
            query = %rendered,
            host = self.manager.host().unwrap_or("-"),
            "Query failed"
        );
        self.audit
            .record(&bound.describe(), self.transaction.is_open());
        self.abort_transaction();
        error
    }

    /// Roll back the open transaction, if any, after a failure
    fn abort_transaction(&mut self) {
        if !self.transaction.is_open() {
            return;
        }
        warn!("Rolling back open transaction after a failed query");
        if let Err(e) = self.rollback_transaction() {
            warn!(error = %e, "Automatic rollback failed");
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a transaction; a no-op while one is open.
    ///
    /// An isolation level, if given, is applied with a control statement that
    /// affects only this transaction.
    pub fn start_transaction(&mut self, isolation: Option<IsolationLevel>) -> Result<()> {
        self.ensure_session()?;
        if self.transaction.is_open() {
            debug!("Transaction already open");
            return Ok(());
        }

        if let Some(level) = isolation {
            self.execute(&level.set_transaction_sql(), Params::None, FetchMode::All)?;
        }

        self.connection()?
            .begin()
            .map_err(|e| Error::transaction(format!("failed to begin transaction: {e}")))?;
        self.transaction = TransactionState::Open { isolation };
        self.audit.transaction_started();
        debug!(isolation = ?isolation, "Transaction started");
        Ok(())
    }

    /// Commit the open transaction; a no-op when idle.
    ///
    /// A failed commit is followed by a rollback and the transaction is
    /// closed either way.
    pub fn commit_transaction(&mut self) -> Result<()> {
        if !self.transaction.is_open() {
            return Ok(());
        }
        self.transaction.close();

        let conn = self.connection()?;
        if let Err(e) = conn.commit() {
            warn!(error = %e, "Commit failed, rolling back");
            if let Err(rollback_err) = conn.rollback() {
                warn!(error = %rollback_err, "Rollback after failed commit also failed");
            }
            return Err(Error::transaction(format!("failed to commit transaction: {e}")));
        }
        debug!("Transaction committed");
        Ok(())
    }

    /// Roll back the open transaction.
    ///
    /// Returns `false` when no transaction was open.
    pub fn rollback_transaction(&mut self) -> Result<bool> {
        if !self.transaction.close() {
            return Ok(false);
        }
        self.connection()?
            .rollback()
            .map_err(|e| Error::transaction(format!("failed to roll back transaction: {e}")))?;
        debug!("Transaction rolled back");
        Ok(true)
    }

    /// Check if a transaction is open
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_open()
    }

    /// Current transaction state
    pub fn transaction_state(&self) -> TransactionState {
        self.transaction
    }

    // ========================================================================
    // Schema and identifiers
    // ========================================================================

    /// Table names of the connected database (cached once non-empty)
    pub fn list_tables(&mut self) -> Result<Vec<String>> {
        if let Some(tables) = self.schema.tables() {
            return Ok(tables.to_vec());
        }
        let names = self
            .query_column(schema::LIST_TABLES_SQL, Params::None, 0)?
            .into_iter()
            .filter_map(|v| v.as_string())
            .collect();
        Ok(self.schema.remember_tables(names))
    }

    /// Column names across every table (cached once non-empty)
    pub fn list_all_columns(&mut self) -> Result<Vec<String>> {
        if let Some(columns) = self.schema.all_columns() {
            return Ok(columns.to_vec());
        }
        let names = self
            .list_columns(None)?
            .into_iter()
            .map(|info| info.name)
            .collect();
        Ok(self.schema.remember_all_columns(names))
    }

    /// Column metadata in ordinal order, for one table or (with `None`) for
    /// every table of the connected database
    pub fn list_columns(&mut self, table: Option<&str>) -> Result<Vec<ColumnInfo>> {
        if let Some(columns) = self.schema.table_columns(table) {
            return Ok(columns.to_vec());
        }

        let database = self.database_name()?;
        let (sql, params) = match table {
            Some(table) => (
                schema::LIST_TABLE_COLUMNS_SQL,
                Params::positional([database, table.to_string()]),
            ),
            None => (schema::LIST_COLUMNS_SQL, Params::positional([database])),
        };

        let columns = self
            .query(sql, params)?
            .into_rows()
            .iter()
            .map(schema::column_info_from_row)
            .collect::<Result<Vec<_>>>()?;
        self.schema.remember_table_columns(table, columns.clone());
        Ok(columns)
    }

    /// Quote `name` if it is a table or column of the connected database.
    ///
    /// Returns an empty string for anything else; callers must not use an
    /// empty result in a query. See [`Database::try_escape_identifier`].
    pub fn escape_identifier(&mut self, name: &str) -> String {
        self.try_escape_identifier(name).unwrap_or_default()
    }

    /// Quote `name` if it is a table or column of the connected database,
    /// [`Error::InvalidIdentifier`] otherwise
    pub fn try_escape_identifier(&mut self, name: &str) -> Result<String> {
        let tables = self.list_tables()?;
        let columns = self.list_all_columns()?;
        whitelist_identifier(name, tables.iter().chain(&columns).map(String::as_str))
            .ok_or_else(|| Error::invalid_identifier(name))
    }

    /// Members of an `enum(...)`/`set(...)` column in declaration order.
    ///
    /// Both names must be known identifiers. Other column types give an
    /// empty list.
    pub fn enumerated_values(&mut self, table: &str, column: &str) -> Result<Vec<String>> {
        self.try_escape_identifier(table)?;
        self.try_escape_identifier(column)?;

        let database = self.database_name()?;
        let row = self.query_row(
            schema::COLUMN_TYPE_SQL,
            Params::positional([database, table.to_string(), column.to_string()]),
            false,
        )?;

        Ok(row
            .and_then(|row| row.take(0))
            .and_then(|value| value.as_string())
            .map(|column_type| schema::parse_enum_members(&column_type))
            .unwrap_or_default())
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Queries invoked on this handle
    pub fn query_count(&self) -> u64 {
        self.audit.query_count()
    }

    /// The last statement, or every statement of the open transaction
    pub fn last_query_audit(&self) -> &str {
        self.audit.last_query()
    }

    /// Render a query with its values substituted, for reading only.
    ///
    /// The output only emulates what the prepared statement runs and must
    /// never be executed.
    pub fn debug_render(&self, sql: &str, params: impl Into<Params>) -> Result<String> {
        let bound = statement::rewrite(sql, params.into())?;
        Ok(format!(
            "{}\n\n{}\n",
            EMULATION_WARNING,
            self.render_bound(&bound).trim()
        ))
    }

    fn render_bound(&self, bound: &BoundStatement) -> String {
        match self.manager.connection_ref() {
            Some(conn) => statement::render(bound, &|value: &str| conn.quote(value)),
            None => statement::render(bound, &quote_string_literal),
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.reset_session_state();
    }
}

fn column_values(rows: Vec<Row>, index: usize) -> Result<Vec<Value>> {
    rows.into_iter()
        .map(|row| {
            let width = row.len();
            row.take(index).ok_or_else(|| {
                Error::invalid_parameter(format!(
                    "column index {index} out of range for a {width}-column result"
                ))
            })
        })
        .collect()
}

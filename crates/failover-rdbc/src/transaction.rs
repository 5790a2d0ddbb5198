//! Transaction state and the query audit trail
//!
//! [`TransactionState`] is the two-state machine (`Idle` / `Open`) the
//! executor drives; [`QueryAudit`] counts queries and keeps the rendered text
//! of the most recent one, or of every statement since the open transaction
//! began.

use crate::connection::IsolationLevel;

/// Whether a transaction is open on the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No transaction
    #[default]
    Idle,
    /// A transaction is open
    Open {
        /// Isolation level requested for this transaction, `None` = server default
        isolation: Option<IsolationLevel>,
    },
}

impl TransactionState {
    /// Check if a transaction is open
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Isolation level of the open transaction
    pub fn isolation(&self) -> Option<IsolationLevel> {
        match self {
            Self::Open { isolation } => *isolation,
            Self::Idle => None,
        }
    }

    /// Move to `Idle`, returning whether a transaction was open
    pub fn close(&mut self) -> bool {
        let was_open = self.is_open();
        *self = Self::Idle;
        was_open
    }
}

/// Query counter and last-statement log
#[derive(Debug, Clone, Default)]
pub struct QueryAudit {
    query_count: u64,
    last_query: String,
    appending: bool,
}

impl QueryAudit {
    /// Create an empty audit
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one query invocation
    pub fn count_query(&mut self) {
        self.query_count += 1;
    }

    /// Queries invoked so far
    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    /// Mark the start of a transaction; its first statement replaces the log
    pub fn transaction_started(&mut self) {
        self.appending = false;
    }

    /// Record a rendered statement.
    ///
    /// Inside a transaction every statement after the first is appended on a
    /// new line; outside one the log holds only the latest statement.
    pub fn record(&mut self, entry: &str, in_transaction: bool) {
        if in_transaction && self.appending {
            self.last_query.push('\n');
            self.last_query.push_str(entry);
        } else {
            self.last_query = entry.to_string();
        }
        self.appending = in_transaction;
    }

    /// The recorded statement(s)
    pub fn last_query(&self) -> &str {
        &self.last_query
    }
}

//! Incremental-fetch cursor
//!
//! Lifecycle: `Closed` until an incremental query opens it, `Open` while rows
//! remain, `Exhausted` once the driver reports the end of the result set.
//! Any other query replaces it with `Closed`.

use std::fmt;
use tracing::debug;

use crate::connection::PreparedStatement;
use crate::error::{Error, Result};
use crate::types::Row;

/// Result of one incremental fetch
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch {
    /// The next row
    Row(Row),
    /// The result set has no more rows
    EndOfRows,
}

impl Fetch {
    /// The row, if any
    pub fn into_row(self) -> Option<Row> {
        match self {
            Self::Row(row) => Some(row),
            Self::EndOfRows => None,
        }
    }

    /// Check for the end-of-rows signal
    pub fn is_end(&self) -> bool {
        matches!(self, Self::EndOfRows)
    }
}

/// Owned cursor over an executed statement
#[derive(Default)]
pub(crate) enum RowCursor {
    #[default]
    Closed,
    Open(Box<dyn PreparedStatement>),
    Exhausted,
}

impl RowCursor {
    pub(crate) fn open(statement: Box<dyn PreparedStatement>) -> Self {
        Self::Open(statement)
    }

    pub(crate) fn close(&mut self) {
        *self = Self::Closed;
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// Fetch the next row. A fetch error closes the cursor.
    pub(crate) fn next(&mut self) -> Result<Fetch> {
        let statement = match self {
            Self::Closed => {
                return Err(Error::cursor(
                    "no incremental query in progress; call begin_incremental_query first",
                ))
            }
            Self::Exhausted => return Ok(Fetch::EndOfRows),
            Self::Open(statement) => statement,
        };

        match statement.fetch_one() {
            Ok(Some(row)) => Ok(Fetch::Row(row)),
            Ok(None) => {
                debug!(sql = %statement.sql(), "Incremental cursor exhausted");
                *self = Self::Exhausted;
                Ok(Fetch::EndOfRows)
            }
            Err(e) => {
                *self = Self::Closed;
                Err(e)
            }
        }
    }
}

impl fmt::Debug for RowCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open(statement) => f.debug_tuple("Open").field(&statement.sql()).finish(),
            Self::Exhausted => write!(f, "Exhausted"),
        }
    }
}

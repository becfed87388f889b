//! The driver capability the connection orchestrates.
//!
//! The wire protocol, authentication, and result decoding all live behind
//! these traits. A [`Connection`](crate::Connection) only ever opens
//! sessions, executes finalized SQL text, pulls rows one at a time, and
//! closes what it opened.

use std::fmt;
use std::sync::Arc;

use moar_core::{ColumnInfo, QueryErrorKind, Row, Value};

use crate::config::MySqlConfig;
use crate::escape;

/// MySQL server and client error codes the connection cares about.
pub mod codes {
    /// Access denied for user to database
    pub const ER_DBACCESS_DENIED_ERROR: u16 = 1044;
    /// Access denied for user (bad credentials)
    pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
    /// Unknown column
    pub const ER_BAD_FIELD_ERROR: u16 = 1054;
    /// Duplicate entry for key
    pub const ER_DUP_ENTRY: u16 = 1062;
    /// SQL syntax error
    pub const ER_PARSE_ERROR: u16 = 1064;
    /// Command denied for user on table
    pub const ER_TABLEACCESS_DENIED_ERROR: u16 = 1142;
    /// Table doesn't exist
    pub const ER_NO_SUCH_TABLE: u16 = 1146;
    /// Cannot delete or update a parent row
    pub const ER_ROW_IS_REFERENCED_2: u16 = 1451;
    /// Cannot add or update a child row
    pub const ER_NO_REFERENCED_ROW_2: u16 = 1452;
    /// Can't connect to MySQL server
    pub const CR_CONN_HOST_ERROR: u16 = 2003;
    /// MySQL server has gone away
    pub const CR_SERVER_GONE_ERROR: u16 = 2006;
    /// Lost connection to MySQL server during query
    pub const CR_SERVER_LOST: u16 = 2013;
}

/// An error reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    /// MySQL error code
    pub code: u16,
    /// SQLSTATE, when the server sent one
    pub sqlstate: Option<String>,
    pub message: String,
}

impl DriverError {
    /// Create a driver error without a SQLSTATE.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            sqlstate: None,
            message: message.into(),
        }
    }

    /// Attach a SQLSTATE.
    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    /// "Server has gone away" or "lost connection during query".
    ///
    /// Recognized by code only; the message text is never inspected.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self.code,
            codes::CR_SERVER_GONE_ERROR | codes::CR_SERVER_LOST
        )
    }

    /// Check if this is a duplicate key error.
    pub fn is_duplicate_key(&self) -> bool {
        self.code == codes::ER_DUP_ENTRY
    }

    /// Check if this is a foreign key constraint violation.
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(
            self.code,
            codes::ER_ROW_IS_REFERENCED_2 | codes::ER_NO_REFERENCED_ROW_2
        )
    }

    /// Classify the error for [`QueryError`](moar_core::QueryError).
    pub fn query_kind(&self) -> QueryErrorKind {
        match self.code {
            codes::CR_SERVER_GONE_ERROR | codes::CR_SERVER_LOST => QueryErrorKind::ConnectionLost,
            codes::ER_DUP_ENTRY | codes::ER_ROW_IS_REFERENCED_2 | codes::ER_NO_REFERENCED_ROW_2 => {
                QueryErrorKind::Constraint
            }
            codes::ER_PARSE_ERROR => QueryErrorKind::Syntax,
            codes::ER_NO_SUCH_TABLE | codes::ER_BAD_FIELD_ERROR => QueryErrorKind::NotFound,
            codes::ER_TABLEACCESS_DENIED_ERROR
            | codes::ER_DBACCESS_DENIED_ERROR
            | codes::ER_ACCESS_DENIED_ERROR => QueryErrorKind::Permission,
            _ => QueryErrorKind::Database,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "ERROR {} ({}): {}", self.code, state, self.message),
            None => write!(f, "ERROR {}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for DriverError {}

/// Opens sessions.
pub trait Driver {
    type Session: Session;

    /// Open a new authenticated session.
    fn connect(&self, config: &MySqlConfig) -> Result<Self::Session, DriverError>;
}

/// One live server session.
pub trait Session {
    type Cursor: Cursor;

    /// Send finalized SQL text and return a cursor over its result.
    ///
    /// Statements without a result set return a cursor with no rows.
    fn execute(&mut self, sql: &str) -> Result<Self::Cursor, DriverError>;

    /// Render a value as a literal for this session's character set.
    fn escape(&self, value: &Value) -> String {
        escape::escape_value(value)
    }

    /// Close the session.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// A forward-only cursor over one result set.
pub trait Cursor {
    /// Column metadata shared by every row of this result.
    fn columns(&self) -> Arc<ColumnInfo>;

    /// Fetch the next row, or `None` once the result is exhausted.
    fn fetch_next(&mut self) -> Result<Option<Row>, DriverError>;

    /// Rows changed by the statement (`UPDATE`, `DELETE`, `INSERT`).
    fn affected_rows(&self) -> u64 {
        0
    }

    /// `AUTO_INCREMENT` value generated by the statement, if any.
    fn last_insert_id(&self) -> Option<u64> {
        None
    }

    /// Release the cursor, discarding any rows not yet fetched.
    fn close(&mut self) -> Result<(), DriverError>;
}

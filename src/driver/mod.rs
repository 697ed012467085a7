//! Abstract SQL capability used by the job executor.
//!
//! The engine only ever opens a connection, runs plain SQL text, walks the
//! result forward once reading columns by name, and closes the connection.
//! `PostgresDriver` implements this on top of the `postgres` crate and
//! `MockDriver` implements it in memory for tests.

pub mod mock;
pub mod postgres;

use thiserror::Error;

use crate::config::ConnectionDescriptor;

pub use self::mock::{MockDriver, MockTable};
pub use self::postgres::PostgresDriver;

/// Failure of a connection-level or query-level operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlError {
    /// Opening the connection failed.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Executing the statement or iterating its rows failed.
    #[error("query failed: {0}")]
    Query(String),
    /// Closing the connection failed.
    #[error("close failed: {0}")]
    Close(String),
}

/// Failure to read one column of the current row.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldReadError {
    #[error("column '{0}' not found in result set")]
    MissingColumn(String),
    #[error("column '{0}' is NULL")]
    Null(String),
    #[error("column '{column}' value '{value}' is not numeric")]
    NotNumeric { column: String, value: String },
    /// No current row: `advance` was not called or returned `false`.
    #[error("no current row")]
    NoRow,
}

/// Opens connections described by the configuration.
pub trait SqlDriver: Send + Sync {
    fn connect(&self, conn: &ConnectionDescriptor) -> Result<Box<dyn SqlConnection>, SqlError>;
}

/// A live connection, owned by one job execution.
///
/// Dropping a connection releases it; `close` additionally reports errors.
pub trait SqlConnection {
    /// Executes plain SQL text and returns a forward-only cursor over its rows.
    fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor + '_>, SqlError>;

    fn close(self: Box<Self>) -> Result<(), SqlError>;
}

/// Forward-only, single-pass view of a result set.
pub trait RowCursor {
    /// Moves to the next row. Returns `Ok(false)` once rows are exhausted.
    fn advance(&mut self) -> Result<bool, SqlError>;

    /// Reads a column of the current row as text. `NULL` reads as `Null`.
    fn read_string(&self, column: &str) -> Result<String, FieldReadError>;

    /// Reads a column of the current row as a float.
    fn read_float(&self, column: &str) -> Result<f64, FieldReadError>;
}

/// Parses a column's text representation as `f64`.
///
/// Shared by cursors whose rows arrive as text.
pub(crate) fn parse_float(column: &str, text: &str) -> Result<f64, FieldReadError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| FieldReadError::NotNumeric {
            column: column.to_string(),
            value: text.to_string(),
        })
}

//! Scripted in-memory SQL driver for testing the executor without a database.
//!
//! Results are registered per SQL text, optionally narrowed to one connection
//! URL. The driver records every connect, query and close so tests can check
//! that connections are always released.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{FieldReadError, RowCursor, SqlConnection, SqlDriver, SqlError, parse_float};
use crate::config::ConnectionDescriptor;

/// A result table with named columns and text cells (`None` is `NULL`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl MockTable {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row. Cells are matched to columns by position.
    pub fn row(mut self, cells: &[&str]) -> Self {
        self.rows
            .push(cells.iter().map(|c| Some(c.to_string())).collect());
        self
    }

    /// Appends a row that may contain `NULL` cells.
    pub fn row_with_nulls(mut self, cells: &[Option<&str>]) -> Self {
        self.rows
            .push(cells.iter().map(|c| c.map(str::to_string)).collect());
        self
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Rows(MockTable),
    Fail(String),
    /// Yields `rows` then fails on the next advance.
    FailAfter(MockTable, String),
    Panic(String),
}

#[derive(Debug, Default)]
struct MockState {
    any_url: HashMap<String, Scripted>,
    per_url: HashMap<(String, String), Scripted>,
    refused: HashSet<String>,
    panic_on_connect: HashSet<String>,
    failing_close: HashSet<String>,
    opened: usize,
    closed: usize,
    executed: Vec<(String, String)>,
}

/// In-memory `SqlDriver`.
///
/// Clones share state. SQL that was never registered fails like an unknown
/// relation would.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `table` for `sql` on every connection.
    pub fn with_rows(self, sql: &str, table: MockTable) -> Self {
        self.state()
            .any_url
            .insert(sql.to_string(), Scripted::Rows(table));
        self
    }

    /// Returns `table` for `sql` only on the connection to `url`.
    pub fn with_rows_for(self, url: &str, sql: &str, table: MockTable) -> Self {
        self.state()
            .per_url
            .insert((url.to_string(), sql.to_string()), Scripted::Rows(table));
        self
    }

    /// Makes `sql` fail to execute on every connection.
    pub fn fail_query(self, sql: &str, message: &str) -> Self {
        self.state()
            .any_url
            .insert(sql.to_string(), Scripted::Fail(message.to_string()));
        self
    }

    /// Makes `sql` yield the rows of `table` and then fail mid-iteration.
    pub fn fail_after_rows(self, sql: &str, table: MockTable, message: &str) -> Self {
        self.state().any_url.insert(
            sql.to_string(),
            Scripted::FailAfter(table, message.to_string()),
        );
        self
    }

    /// Makes executing `sql` panic, simulating a defect in the driver.
    pub fn panic_on_query(self, sql: &str) -> Self {
        self.state().any_url.insert(
            sql.to_string(),
            Scripted::Panic(format!("driver panicked on '{}'", sql)),
        );
        self
    }

    /// Makes connecting to `url` fail.
    pub fn refuse_connection(self, url: &str) -> Self {
        self.state().refused.insert(url.to_string());
        self
    }

    /// Makes connecting to `url` panic.
    pub fn panic_on_connect(self, url: &str) -> Self {
        self.state().panic_on_connect.insert(url.to_string());
        self
    }

    /// Makes closing connections to `url` report an error.
    pub fn fail_close(self, url: &str) -> Self {
        self.state().failing_close.insert(url.to_string());
        self
    }

    /// Number of connections opened so far.
    pub fn opened(&self) -> usize {
        self.state().opened
    }

    /// Number of connections released so far, by `close` or by drop.
    pub fn closed(&self) -> usize {
        self.state().closed
    }

    /// `(url, sql)` pairs in execution order.
    pub fn executed(&self) -> Vec<(String, String)> {
        self.state().executed.clone()
    }
}

impl SqlDriver for MockDriver {
    fn connect(&self, conn: &ConnectionDescriptor) -> Result<Box<dyn SqlConnection>, SqlError> {
        let mut state = self.state();
        if state.panic_on_connect.contains(&conn.url) {
            drop(state);
            panic!("driver panicked connecting to '{}'", conn.url);
        }
        if state.refused.contains(&conn.url) {
            return Err(SqlError::Connect(format!(
                "connection to '{}' refused",
                conn.url
            )));
        }
        state.opened += 1;
        Ok(Box::new(MockConnection {
            url: conn.url.clone(),
            driver: self.clone(),
        }))
    }
}

struct MockConnection {
    url: String,
    driver: MockDriver,
}

impl SqlConnection for MockConnection {
    fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor + '_>, SqlError> {
        let scripted = {
            let mut state = self.driver.state();
            state.executed.push((self.url.clone(), sql.to_string()));
            state
                .per_url
                .get(&(self.url.clone(), sql.to_string()))
                .or_else(|| state.any_url.get(sql))
                .cloned()
        };

        match scripted {
            Some(Scripted::Rows(table)) => Ok(Box::new(MockCursor::new(table, None))),
            Some(Scripted::FailAfter(table, message)) => {
                Ok(Box::new(MockCursor::new(table, Some(message))))
            }
            Some(Scripted::Fail(message)) => Err(SqlError::Query(message)),
            Some(Scripted::Panic(message)) => panic!("{}", message),
            None => Err(SqlError::Query(format!(
                "ERROR: relation referenced by '{}' does not exist",
                sql
            ))),
        }
    }

    fn close(self: Box<Self>) -> Result<(), SqlError> {
        if self.driver.state().failing_close.contains(&self.url) {
            return Err(SqlError::Close(format!("closing '{}' failed", self.url)));
        }
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.driver.state().closed += 1;
    }
}

struct MockCursor {
    table: MockTable,
    /// Index of the current row; `None` before the first advance.
    position: Option<usize>,
    fail_at_end: Option<String>,
}

impl MockCursor {
    fn new(table: MockTable, fail_at_end: Option<String>) -> Self {
        Self {
            table,
            position: None,
            fail_at_end,
        }
    }

    fn cell(&self, column: &str) -> Result<&str, FieldReadError> {
        let row = self
            .position
            .and_then(|i| self.table.rows.get(i))
            .ok_or(FieldReadError::NoRow)?;
        let index = self
            .table
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| FieldReadError::MissingColumn(column.to_string()))?;
        match row.get(index) {
            Some(Some(text)) => Ok(text),
            Some(None) => Err(FieldReadError::Null(column.to_string())),
            None => Err(FieldReadError::MissingColumn(column.to_string())),
        }
    }
}

impl RowCursor for MockCursor {
    fn advance(&mut self) -> Result<bool, SqlError> {
        let next = self.position.map_or(0, |i| i + 1);
        if next < self.table.rows.len() {
            self.position = Some(next);
            return Ok(true);
        }
        self.position = Some(self.table.rows.len());
        match &self.fail_at_end {
            Some(message) => Err(SqlError::Query(message.clone())),
            None => Ok(false),
        }
    }

    fn read_string(&self, column: &str) -> Result<String, FieldReadError> {
        self.cell(column).map(str::to_string)
    }

    fn read_float(&self, column: &str) -> Result<f64, FieldReadError> {
        parse_float(column, self.cell(column)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(url: &str) -> ConnectionDescriptor {
        ConnectionDescriptor {
            url: url.to_string(),
            username: "x".to_string(),
            password: "y".to_string(),
        }
    }

    #[test]
    fn cursor_reads_rows_in_order() {
        let driver = MockDriver::new().with_rows(
            "select",
            MockTable::new(&["name", "v"])
                .row(&["a", "1"])
                .row_with_nulls(&[None, Some("2.5")]),
        );
        let mut connection = driver.connect(&conn("u")).unwrap();
        let mut cursor = connection.query("select").unwrap();

        assert_eq!(cursor.read_string("name"), Err(FieldReadError::NoRow));
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.read_string("name").unwrap(), "a");
        assert_eq!(cursor.read_float("v").unwrap(), 1.0);
        assert!(cursor.advance().unwrap());
        assert_eq!(
            cursor.read_string("name"),
            Err(FieldReadError::Null("name".to_string()))
        );
        assert_eq!(cursor.read_float("v").unwrap(), 2.5);
        assert_eq!(
            cursor.read_float("missing"),
            Err(FieldReadError::MissingColumn("missing".to_string()))
        );
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn per_url_results_take_precedence() {
        let driver = MockDriver::new()
            .with_rows("q", MockTable::new(&["v"]).row(&["1"]))
            .with_rows_for("db2", "q", MockTable::new(&["v"]).row(&["2"]));

        for (url, expected) in [("db1", 1.0), ("db2", 2.0)] {
            let mut connection = driver.connect(&conn(url)).unwrap();
            let mut cursor = connection.query("q").unwrap();
            assert!(cursor.advance().unwrap());
            assert_eq!(cursor.read_float("v").unwrap(), expected);
        }
    }

    #[test]
    fn tracks_open_and_close() {
        let driver = MockDriver::new().refuse_connection("bad").fail_close("flaky");
        assert!(matches!(
            driver.connect(&conn("bad")),
            Err(SqlError::Connect(_))
        ));

        let good = driver.connect(&conn("good")).unwrap();
        assert!(good.close().is_ok());
        let flaky = driver.connect(&conn("flaky")).unwrap();
        assert!(matches!(flaky.close(), Err(SqlError::Close(_))));
        drop(driver.connect(&conn("dropped")).unwrap());

        assert_eq!(driver.opened(), 3);
        assert_eq!(driver.closed(), 3);
    }

    #[test]
    fn unknown_sql_and_mid_cursor_failures() {
        let driver = MockDriver::new().fail_after_rows(
            "partial",
            MockTable::new(&["v"]).row(&["1"]),
            "connection reset",
        );
        let mut connection = driver.connect(&conn("u")).unwrap();
        assert!(matches!(
            connection.query("nope").err(),
            Some(SqlError::Query(_))
        ));

        let mut cursor = connection.query("partial").unwrap();
        assert!(cursor.advance().unwrap());
        assert_eq!(
            cursor.advance(),
            Err(SqlError::Query("connection reset".to_string()))
        );
        drop(cursor);
        assert_eq!(
            driver.executed(),
            vec![
                ("u".to_string(), "nope".to_string()),
                ("u".to_string(), "partial".to_string())
            ]
        );
    }
}

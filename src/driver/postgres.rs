//! PostgreSQL binding of the SQL capability.
//!
//! Queries run over the simple-query protocol, so every column arrives as
//! text and can be read by name regardless of its SQL type. Values are parsed
//! from that text representation.

use postgres::config::SslMode;
use postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use postgres_native_tls::MakeTlsConnector;
use tracing::debug;

use super::{FieldReadError, RowCursor, SqlConnection, SqlDriver, SqlError, parse_float};
use crate::config::ConnectionDescriptor;

/// Opens a fresh `postgres::Client` per connection descriptor.
///
/// Accepts libpq key/value strings, `postgres://` URLs, and JDBC-style
/// `jdbc:postgresql://` URLs. A non-empty `username` or `password` from the
/// descriptor overrides the one in the URL. TLS is negotiated with
/// `native-tls` unless the URL says `sslmode=disable`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

/// Builds a client configuration from a descriptor.
pub(crate) fn build_config(conn: &ConnectionDescriptor) -> Result<Config, SqlError> {
    let url = conn.url.strip_prefix("jdbc:").unwrap_or(&conn.url);
    let mut config: Config = url
        .parse()
        .map_err(|e: postgres::Error| SqlError::Connect(format!("invalid url: {}", e)))?;
    if !conn.username.is_empty() {
        config.user(&conn.username);
    }
    if !conn.password.is_empty() {
        config.password(&conn.password);
    }
    Ok(config)
}

impl SqlDriver for PostgresDriver {
    fn connect(&self, conn: &ConnectionDescriptor) -> Result<Box<dyn SqlConnection>, SqlError> {
        let config = build_config(conn)?;

        let client = if matches!(config.get_ssl_mode(), SslMode::Disable) {
            config.connect(NoTls)
        } else {
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| SqlError::Connect(format!("tls setup failed: {}", e)))?;
            config.connect(MakeTlsConnector::new(connector))
        }
        .map_err(|e| SqlError::Connect(format_postgres_error(&e)))?;

        Ok(Box::new(PostgresConnection { client }))
    }
}

struct PostgresConnection {
    client: Client,
}

impl SqlConnection for PostgresConnection {
    fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor + '_>, SqlError> {
        let messages = self
            .client
            .simple_query(sql)
            .map_err(|e| SqlError::Query(format_postgres_error(&e)))?;

        let rows: Vec<SimpleQueryRow> = messages
            .into_iter()
            .filter_map(|m| match m {
                SimpleQueryMessage::Row(row) => Some(row),
                _ => None,
            })
            .collect();
        debug!(rows = rows.len(), "query returned");

        Ok(Box::new(TextCursor {
            rows: rows.into_iter(),
            current: None,
        }))
    }

    fn close(self: Box<Self>) -> Result<(), SqlError> {
        self.client
            .close()
            .map_err(|e| SqlError::Close(format_postgres_error(&e)))
    }
}

struct TextCursor {
    rows: std::vec::IntoIter<SimpleQueryRow>,
    current: Option<SimpleQueryRow>,
}

impl TextCursor {
    fn cell(&self, column: &str) -> Result<&str, FieldReadError> {
        let row = self.current.as_ref().ok_or(FieldReadError::NoRow)?;
        match row.try_get(column) {
            Ok(Some(text)) => Ok(text),
            Ok(None) => Err(FieldReadError::Null(column.to_string())),
            Err(_) => Err(FieldReadError::MissingColumn(column.to_string())),
        }
    }
}

impl RowCursor for TextCursor {
    fn advance(&mut self) -> Result<bool, SqlError> {
        self.current = self.rows.next();
        Ok(self.current.is_some())
    }

    fn read_string(&self, column: &str) -> Result<String, FieldReadError> {
        self.cell(column).map(str::to_string)
    }

    fn read_float(&self, column: &str) -> Result<f64, FieldReadError> {
        parse_float(column, self.cell(column)?)
    }
}

/// Renders a driver error as one log line.
///
/// Server errors carry severity, SQLSTATE and message, plus detail and hint
/// when the server sent them. Client-side failures keep the driver's message
/// and its cause chain, which names the socket or TLS problem.
fn format_postgres_error(e: &postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => server_error_line(
            db.severity(),
            db.code().code(),
            db.message(),
            db.detail(),
            db.hint(),
        ),
        None => client_error_line(e),
    }
}

fn server_error_line(
    severity: &str,
    sqlstate: &str,
    message: &str,
    detail: Option<&str>,
    hint: Option<&str>,
) -> String {
    let mut line = format!("{} {}: {}", severity, sqlstate, message);
    if let Some(detail) = detail {
        line.push_str("; detail: ");
        line.push_str(detail);
    }
    if let Some(hint) = hint {
        line.push_str("; hint: ");
        line.push_str(hint);
    }
    line
}

fn client_error_line(e: &dyn std::error::Error) -> String {
    let mut line = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // The driver already appends its direct cause to its own message.
        if !line.contains(&text) {
            line.push_str(": ");
            line.push_str(&text);
        }
        source = cause.source();
    }
    line
}

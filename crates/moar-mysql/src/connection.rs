//! The fault-tolerant MySQL connection.
//!
//! A [`Connection`] owns at most one driver session at a time. Sessions are
//! opened lazily on first use, replaced when the server drops them in the
//! middle of a query, and closed on [`Connection::close`], on
//! [`Connection::shutdown`], or when the connection is dropped.

use std::sync::Arc;

use moar_core::error::{ConnectionError, ConnectionErrorKind, QueryError};
use moar_core::{Error, Result, Row, Value};

use crate::config::MySqlConfig;
use crate::driver::{Cursor, Driver, DriverError, Session};
use crate::observer::{ConnectionEvent, QueryObserver, TracingObserver};
use crate::prepare;
use crate::stream::RowStream;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session is open; the next use opens one.
    Unconnected,
    /// A session is open.
    Connected,
    /// Shut down; every further use fails.
    Closed,
}

/// A lazily connecting, self-healing MySQL connection.
///
/// Queries are written as templates with `%s` placeholders and run through
/// [`query`](Self::query), which streams rows on demand. If the server goes
/// away while a query runs, the connection reconnects and restarts the
/// query from its first row, up to the retry budget.
///
/// ```ignore
/// let mut conn = Connection::new(MySqlConfig::new().host("db1").user("app"), driver);
/// for row in conn.query("SELECT id FROM users WHERE active = %s", &[true.into()])? {
///     let id: i64 = row?.get_named("id")?;
/// }
/// ```
pub struct Connection<D: Driver> {
    config: MySqlConfig,
    driver: D,
    session: Option<D::Session>,
    last_query: Option<String>,
    retries: u32,
    observer: Arc<dyn QueryObserver>,
    shut_down: bool,
}

impl<D: Driver> std::fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("last_query", &self.last_query)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Connection<D> {
    /// Create a connection. No I/O happens until the first query.
    pub fn new(config: MySqlConfig, driver: D) -> Self {
        let retries = config.retries;
        Self {
            config,
            driver,
            session: None,
            last_query: None,
            retries,
            observer: Arc::new(TracingObserver),
            shut_down: false,
        }
    }

    /// Replace the diagnostics observer.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Override the retry budget taken from the config.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Get the connection configuration.
    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    /// Get the driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Reconnect cycles allowed per [`query`](Self::query).
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        if self.shut_down {
            ConnectionState::Closed
        } else if self.session.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Unconnected
        }
    }

    /// Check if a session is currently open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The most recently prepared SQL text.
    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// Return the open session, opening one first if needed.
    pub fn connect(&mut self) -> Result<&mut D::Session> {
        self.ensure_open()?;
        let session = match self.session.take() {
            Some(session) => session,
            None => self.open_session()?,
        };
        Ok(self.session.insert(session))
    }

    /// Finalize a template into SQL text using the session's escaping.
    ///
    /// Records the result as [`last_query`](Self::last_query).
    pub fn prepare(&mut self, template: &str, args: &[Value]) -> Result<String> {
        self.ensure_open()?;
        prepare::check_arguments(template, args)?;

        let session = self.connect()?;
        let sql = prepare::prepare_query(template, args, |value| session.escape(value))?;

        self.last_query = Some(sql.clone());
        self.notify(&ConnectionEvent::Prepared { sql: sql.clone() });
        Ok(sql)
    }

    /// Run a query and stream its rows, retrying with the connection's budget.
    pub fn query(&mut self, template: &str, args: &[Value]) -> Result<RowStream<'_, D>> {
        let retries = self.retries;
        self.query_with_retries(template, args, retries)
    }

    /// Run a query and stream its rows with an explicit retry budget.
    ///
    /// Each retry closes the stale session, opens a new one, and restarts the
    /// query from the first row, so a consumer that already saw some rows
    /// sees them again.
    pub fn query_with_retries(
        &mut self,
        template: &str,
        args: &[Value],
        retries: u32,
    ) -> Result<RowStream<'_, D>> {
        self.ensure_open()?;
        RowStream::open(self, template, args.to_vec(), retries)
    }

    /// Run a query and collect every row.
    ///
    /// Holds the full result in memory; use [`query`](Self::query) for large
    /// results.
    pub fn execute(&mut self, template: &str, args: &[Value]) -> Result<Vec<Row>> {
        self.query(template, args)?.collect()
    }

    /// Run a query and return its first row, abandoning the rest.
    pub fn query_one(&mut self, template: &str, args: &[Value]) -> Result<Option<Row>> {
        let mut stream = self.query(template, args)?;
        let first = stream.next().transpose()?;
        stream.close();
        Ok(first)
    }

    /// Run a data-changing statement and return the number of affected rows.
    ///
    /// Any rows the statement returns are read and discarded.
    pub fn execute_update(&mut self, template: &str, args: &[Value]) -> Result<u64> {
        let mut stream = self.query(template, args)?;
        for row in stream.by_ref() {
            row?;
        }
        Ok(stream.affected_rows())
    }

    /// Run an `INSERT` and return the generated `AUTO_INCREMENT` id.
    pub fn insert(&mut self, template: &str, args: &[Value]) -> Result<Option<u64>> {
        let mut stream = self.query(template, args)?;
        for row in stream.by_ref() {
            row?;
        }
        Ok(stream.last_insert_id())
    }

    /// Close the open session, if any.
    ///
    /// Never fails; close errors are reported to the observer. The
    /// connection stays usable and reconnects on the next query.
    pub fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        match session.close() {
            Ok(()) => self.notify(&ConnectionEvent::Closed),
            Err(err) => self.notify(&ConnectionEvent::CloseFailed {
                resource: "session",
                error: err.to_string(),
            }),
        }
    }

    /// Close the session and refuse all further use.
    pub fn shutdown(&mut self) {
        self.close();
        self.shut_down = true;
    }

    /// Replace a session the server dropped.
    pub(crate) fn reconnect(&mut self, cause: &DriverError, retries_left: u32) -> Result<()> {
        self.notify(&ConnectionEvent::Reconnecting {
            code: cause.code,
            retries_left,
        });
        self.close();
        match self.connect() {
            Ok(_) => Ok(()),
            Err(Error::Connection(err)) if err.kind == ConnectionErrorKind::Connect => {
                Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: format!(
                        "Reconnect after error {} failed: {}",
                        cause.code, err.message
                    ),
                    source: Some(Box::new(err)),
                }))
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn notify(&self, event: &ConnectionEvent) {
        self.observer.on_event(event);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shut_down {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Closed,
                message: "Connection has been shut down".to_string(),
                source: None,
            }));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(addr = %self.config.socket_addr()))]
    fn open_session(&self) -> Result<D::Session> {
        self.config.validate()?;

        let mut session = self
            .driver
            .connect(&self.config)
            .map_err(|e| connect_error(&self.config, e))?;

        if let Err(e) = apply_charset(&mut session, &self.config.charset) {
            if let Err(close_err) = session.close() {
                self.notify(&ConnectionEvent::CloseFailed {
                    resource: "session",
                    error: close_err.to_string(),
                });
            }
            return Err(connect_error(&self.config, e));
        }

        self.notify(&ConnectionEvent::Connected {
            host: self.config.host.clone(),
            port: self.config.port,
        });
        Ok(session)
    }
}

impl<D: Driver> Drop for Connection<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn apply_charset<S: Session>(
    session: &mut S,
    charset: &str,
) -> std::result::Result<(), DriverError> {
    let mut cursor = session.execute(&format!("SET NAMES {charset}"))?;
    let drained = drain(&mut cursor);
    let closed = cursor.close();
    drained.and(closed)
}

fn drain<C: Cursor>(cursor: &mut C) -> std::result::Result<(), DriverError> {
    while cursor.fetch_next()?.is_some() {}
    Ok(())
}

fn connect_error(config: &MySqlConfig, err: DriverError) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message: format!("Failed to connect to {}: {}", config.socket_addr(), err),
        source: Some(Box::new(err)),
    })
}

pub(crate) fn query_error(err: DriverError, sql: &str) -> Error {
    Error::Query(QueryError {
        kind: err.query_kind(),
        code: Some(err.code),
        sqlstate: err.sqlstate.clone(),
        message: err.message.clone(),
        sql: Some(sql.to_string()),
        source: Some(Box::new(err)),
    })
}

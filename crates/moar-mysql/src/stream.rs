//! Lazy row streams.

use std::iter::FusedIterator;
use std::sync::Arc;

use moar_core::{ColumnInfo, Result, Row, Value};

use crate::connection::{Connection, query_error};
use crate::driver::{Cursor, Driver, DriverError, Session};
use crate::observer::ConnectionEvent;

type CursorOf<D> = <<D as Driver>::Session as Session>::Cursor;

/// A forward-only stream over the rows of one query.
///
/// Rows are pulled from the driver one at a time as the stream is iterated.
/// The stream holds the connection mutably until it is dropped, so nothing
/// else can use the session mid-iteration. The driver cursor is closed when
/// the rows run out, when an error is yielded, on [`close`](Self::close),
/// or on drop.
///
/// If the server drops the session while rows are being read, the stream
/// reconnects, re-runs the query, and starts over from its first row.
pub struct RowStream<'c, D: Driver> {
    conn: &'c mut Connection<D>,
    template: String,
    args: Vec<Value>,
    retries_left: u32,
    restarts: u32,
    sql: String,
    cursor: Option<CursorOf<D>>,
    position: usize,
    affected_rows: u64,
    last_insert_id: Option<u64>,
    done: bool,
}

impl<D: Driver> std::fmt::Debug for RowStream<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("sql", &self.sql)
            .field("position", &self.position)
            .field("retries_left", &self.retries_left)
            .field("restarts", &self.restarts)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<'c, D: Driver> RowStream<'c, D> {
    pub(crate) fn open(
        conn: &'c mut Connection<D>,
        template: &str,
        args: Vec<Value>,
        retries: u32,
    ) -> Result<Self> {
        let mut stream = Self {
            conn,
            template: template.to_string(),
            args,
            retries_left: retries,
            restarts: 0,
            sql: String::new(),
            cursor: None,
            position: 0,
            affected_rows: 0,
            last_insert_id: None,
            done: false,
        };
        stream.start()?;
        Ok(stream)
    }

    /// The SQL text currently executing.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Column metadata of the current result, while the cursor is open.
    pub fn columns(&self) -> Option<Arc<ColumnInfo>> {
        self.cursor.as_ref().map(Cursor::columns)
    }

    /// How many times the query was restarted on a fresh session.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Remaining reconnect cycles.
    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    /// Rows yielded since the query last (re)started.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Rows changed by the statement, as reported when it executed.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// `AUTO_INCREMENT` value generated by the statement, if any.
    pub fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    /// Stop reading and release the cursor.
    pub fn close(mut self) {
        self.finish();
    }

    /// Prepare and execute, reconnecting while the budget allows.
    fn start(&mut self) -> Result<()> {
        loop {
            let sql = self.conn.prepare(&self.template, &self.args).inspect_err(|_| {
                self.done = true;
            })?;
            let executed = match self.conn.connect() {
                Ok(session) => session.execute(&sql),
                Err(err) => {
                    self.done = true;
                    return Err(err);
                }
            };
            match executed {
                Ok(cursor) => {
                    self.affected_rows = cursor.affected_rows();
                    self.last_insert_id = cursor.last_insert_id();
                    self.cursor = Some(cursor);
                    self.sql = sql;
                    self.position = 0;
                    return Ok(());
                }
                Err(err) => self.recover(err, &sql)?,
            }
        }
    }

    /// Decide whether a driver error is retried.
    ///
    /// Returns `Ok(())` once a fresh session is in place; otherwise the
    /// stream is finished and the error is returned.
    fn recover(&mut self, err: DriverError, sql: &str) -> Result<()> {
        self.discard_cursor();
        if !err.is_connection_lost() || self.retries_left == 0 {
            self.done = true;
            return Err(query_error(err, sql));
        }

        self.retries_left -= 1;
        self.restarts += 1;
        tracing::debug!(
            code = err.code,
            sql = %sql,
            rows_seen = self.position,
            retries_left = self.retries_left,
            "Restarting query after lost connection"
        );
        if let Err(reconnect_err) = self.conn.reconnect(&err, self.retries_left) {
            self.done = true;
            return Err(reconnect_err);
        }
        Ok(())
    }

    fn discard_cursor(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(err) = cursor.close() {
                self.conn.notify(&ConnectionEvent::CloseFailed {
                    resource: "cursor",
                    error: err.to_string(),
                });
            }
        }
    }

    fn finish(&mut self) {
        self.discard_cursor();
        self.done = true;
    }
}

impl<D: Driver> Iterator for RowStream<'_, D> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            let Some(cursor) = self.cursor.as_mut() else {
                self.done = true;
                return None;
            };

            match cursor.fetch_next() {
                Ok(Some(row)) => {
                    self.position += 1;
                    return Some(Ok(row));
                }
                Ok(None) => {
                    self.finish();
                    return None;
                }
                Err(err) => {
                    let sql = self.sql.clone();
                    if let Err(e) = self.recover(err, &sql) {
                        return Some(Err(e));
                    }
                    if let Err(e) = self.start() {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

impl<D: Driver> FusedIterator for RowStream<'_, D> {}

impl<D: Driver> Drop for RowStream<'_, D> {
    fn drop(&mut self) {
        self.finish();
    }
}

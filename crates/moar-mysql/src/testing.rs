//! In-memory driver and observer for tests.
//!
//! [`ScriptedDriver`] answers queries from result sets registered by exact
//! SQL text and can be told to fail a connect, an execute, or a fetch at a
//! given row. Clones share state, so a test keeps one handle and gives a
//! clone to the [`Connection`](crate::Connection) under test.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use moar_core::{ColumnInfo, Row, Value};

use crate::config::MySqlConfig;
use crate::driver::{Cursor, Driver, DriverError, Session};
use crate::observer::{ConnectionEvent, QueryObserver};

/// Driver call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub connects: usize,
    pub executes: usize,
    pub session_closes: usize,
    pub cursor_closes: usize,
    pub open_sessions: usize,
    pub open_cursors: usize,
}

#[derive(Debug, Clone)]
struct ScriptedResult {
    columns: Arc<ColumnInfo>,
    rows: Vec<Vec<Value>>,
    affected_rows: u64,
    last_insert_id: Option<u64>,
}

impl ScriptedResult {
    fn empty() -> Self {
        Self {
            columns: Arc::new(ColumnInfo::new(Vec::new())),
            rows: Vec::new(),
            affected_rows: 0,
            last_insert_id: None,
        }
    }
}

#[derive(Debug)]
struct FetchFailure {
    sql: String,
    after_rows: usize,
    error: DriverError,
}

#[derive(Debug, Default)]
struct ScriptState {
    results: HashMap<String, ScriptedResult>,
    connect_failures: VecDeque<DriverError>,
    execute_failures: VecDeque<(String, DriverError)>,
    fetch_failures: Vec<FetchFailure>,
    session_close_failures: VecDeque<DriverError>,
    cursor_close_failures: VecDeque<DriverError>,
    executed: Vec<String>,
    stats: DriverStats,
}

/// A [`Driver`] that plays back scripted results.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDriver {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with these rows.
    pub fn with_result(self, sql: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns = Arc::new(ColumnInfo::new(
            columns.iter().map(|c| (*c).to_string()).collect(),
        ));
        let result = ScriptedResult {
            columns,
            rows,
            ..ScriptedResult::empty()
        };
        self.lock().results.insert(sql.to_string(), result);
        self
    }

    /// Answer `sql` as a data-changing statement with no result set.
    pub fn with_update(self, sql: &str, affected_rows: u64, last_insert_id: Option<u64>) -> Self {
        let result = ScriptedResult {
            affected_rows,
            last_insert_id,
            ..ScriptedResult::empty()
        };
        self.lock().results.insert(sql.to_string(), result);
        self
    }

    /// Fail the next `connect`.
    pub fn fail_next_connect(self, error: DriverError) -> Self {
        self.lock().connect_failures.push_back(error);
        self
    }

    /// Fail the next execute of `sql`.
    pub fn fail_next_execute(self, sql: &str, error: DriverError) -> Self {
        self.lock()
            .execute_failures
            .push_back((sql.to_string(), error));
        self
    }

    /// Make the next cursor over `sql` fail after yielding `after_rows` rows.
    pub fn fail_fetch(self, sql: &str, after_rows: usize, error: DriverError) -> Self {
        self.lock().fetch_failures.push(FetchFailure {
            sql: sql.to_string(),
            after_rows,
            error,
        });
        self
    }

    /// Fail the next session close.
    pub fn fail_next_session_close(self, error: DriverError) -> Self {
        self.lock().session_close_failures.push_back(error);
        self
    }

    /// Fail the next cursor close.
    pub fn fail_next_cursor_close(self, error: DriverError) -> Self {
        self.lock().cursor_close_failures.push_back(error);
        self
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> DriverStats {
        self.lock().stats.clone()
    }

    /// Every SQL text executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Driver for ScriptedDriver {
    type Session = ScriptedSession;

    fn connect(&self, _config: &MySqlConfig) -> Result<ScriptedSession, DriverError> {
        let mut state = self.lock();
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }
        state.stats.connects += 1;
        state.stats.open_sessions += 1;
        Ok(ScriptedSession {
            driver: self.clone(),
            closed: false,
        })
    }
}

/// Session handed out by [`ScriptedDriver`].
#[derive(Debug)]
pub struct ScriptedSession {
    driver: ScriptedDriver,
    closed: bool,
}

impl Session for ScriptedSession {
    type Cursor = ScriptedCursor;

    fn execute(&mut self, sql: &str) -> Result<ScriptedCursor, DriverError> {
        if self.closed {
            return Err(DriverError::new(2006, "MySQL server has gone away"));
        }
        let mut state = self.driver.lock();
        state.stats.executes += 1;
        state.executed.push(sql.to_string());

        if let Some(pos) = state.execute_failures.iter().position(|(s, _)| s == sql) {
            if let Some((_, err)) = state.execute_failures.remove(pos) {
                return Err(err);
            }
        }

        let fail_at = state
            .fetch_failures
            .iter()
            .position(|f| f.sql == sql)
            .map(|pos| state.fetch_failures.remove(pos))
            .map(|f| (f.after_rows, f.error));

        let result = state
            .results
            .get(sql)
            .cloned()
            .unwrap_or_else(ScriptedResult::empty);

        state.stats.open_cursors += 1;
        Ok(ScriptedCursor {
            driver: self.driver.clone(),
            columns: result.columns,
            rows: result.rows.into(),
            affected_rows: result.affected_rows,
            last_insert_id: result.last_insert_id,
            fetched: 0,
            fail_at,
            closed: false,
        })
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.driver.lock();
        state.stats.session_closes += 1;
        state.stats.open_sessions -= 1;
        match state.session_close_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Cursor handed out by [`ScriptedSession`].
#[derive(Debug)]
pub struct ScriptedCursor {
    driver: ScriptedDriver,
    columns: Arc<ColumnInfo>,
    rows: VecDeque<Vec<Value>>,
    affected_rows: u64,
    last_insert_id: Option<u64>,
    fetched: usize,
    fail_at: Option<(usize, DriverError)>,
    closed: bool,
}

impl Cursor for ScriptedCursor {
    fn columns(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    fn fetch_next(&mut self) -> Result<Option<Row>, DriverError> {
        if self.closed {
            return Ok(None);
        }
        if self.fail_at.as_ref().is_some_and(|(at, _)| *at == self.fetched) {
            if let Some((_, err)) = self.fail_at.take() {
                return Err(err);
            }
        }
        Ok(self.rows.pop_front().map(|values| {
            self.fetched += 1;
            Row::with_columns(Arc::clone(&self.columns), values)
        }))
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.driver.lock();
        state.stats.cursor_closes += 1;
        state.stats.open_cursors -= 1;
        match state.cursor_close_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Observer that keeps every event it sees.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in order.
    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of reconnects observed.
    pub fn reconnects(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::Reconnecting { .. }))
            .count()
    }
}

impl QueryObserver for RecordingObserver {
    fn on_event(&self, event: &ConnectionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

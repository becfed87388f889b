//! Diagnostic events emitted by a [`Connection`](crate::Connection).
//!
//! Each connection carries its own observer instead of writing to a
//! process-wide logger. The default [`TracingObserver`] forwards events to
//! `tracing`; tests install a recording observer and assert on the events.

/// Something the connection did that is worth reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A new session was opened and its character set applied.
    Connected { host: String, port: u16 },
    /// A template was finalized into SQL text.
    Prepared { sql: String },
    /// A transient driver error is being retried on a fresh session.
    Reconnecting { code: u16, retries_left: u32 },
    /// The session was closed.
    Closed,
    /// Closing a cursor or session failed; the failure was swallowed.
    CloseFailed {
        resource: &'static str,
        error: String,
    },
}

/// Receives [`ConnectionEvent`]s.
pub trait QueryObserver: Send + Sync {
    fn on_event(&self, event: &ConnectionEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl QueryObserver for TracingObserver {
    fn on_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { host, port } => {
                tracing::debug!(host = %host, port = port, "MySQL session opened");
            }
            ConnectionEvent::Prepared { sql } => {
                tracing::debug!(sql = %sql, "Prepared query");
            }
            ConnectionEvent::Reconnecting { code, retries_left } => {
                tracing::info!(
                    code = code,
                    retries_left = retries_left,
                    "Connection lost, reconnecting and restarting query"
                );
            }
            ConnectionEvent::Closed => {
                tracing::debug!("MySQL session closed");
            }
            ConnectionEvent::CloseFailed { resource, error } => {
                tracing::warn!(resource = resource, error = %error, "Close failed");
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl QueryObserver for NoopObserver {
    fn on_event(&self, _event: &ConnectionEvent) {}
}

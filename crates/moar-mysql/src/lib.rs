//! Fault-tolerant streaming MySQL connection for moar.
//!
//! This crate sits on top of an external MySQL driver and provides:
//!
//! - Lazy connection with an explicit character set on every new session
//! - `%s` placeholder templates with driver-side escaping
//! - Row streaming through a borrowing iterator that always closes its cursor
//! - Transparent reconnect-and-restart when the server drops the session
//! - Pluggable diagnostics through [`QueryObserver`]
//!
//! The wire protocol lives behind the [`Driver`], [`Session`] and [`Cursor`]
//! traits. Enable the `test-utils` feature for an in-memory driver.
//!
//! # Example
//!
//! ```rust,ignore
//! use moar_mysql::{Connection, MySqlConfig};
//!
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = Connection::new(config, driver);
//! for row in conn.query("SELECT id FROM users WHERE active = %s", &[true.into()])? {
//!     println!("{}", row?);
//! }
//! ```

pub mod config;
pub mod connection;
pub mod driver;
pub mod escape;
pub mod observer;
pub mod prepare;
pub mod stream;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::MySqlConfig;
pub use connection::{Connection, ConnectionState};
pub use driver::{Cursor, Driver, DriverError, Session};
pub use observer::{ConnectionEvent, NoopObserver, QueryObserver, TracingObserver};
pub use stream::RowStream;

pub use moar_core::{Error, Result, Row, Value};

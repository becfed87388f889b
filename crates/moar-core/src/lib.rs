//! Core types for the moar database helpers.
//!
//! This crate provides the vocabulary shared by the connection crates:
//!
//! - `Error` taxonomy for connection, query, and configuration failures
//! - `Value` for dynamically-typed query arguments and column values
//! - `Row` for ordered column-name to value mappings

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, MalformedQueryError, QueryError,
    QueryErrorKind, Result, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;

//! `SQLite` executors over `rusqlite`.
//!
//! - config: connection options and the fluent builder
//! - params: binding command parameters to prepared statements
//! - query: statement execution and value extraction
//! - connection: the synchronous connection
//! - worker: the asynchronous connection backed by a worker thread

pub mod config;
pub mod connection;
pub mod params;
pub mod query;
pub mod worker;

pub use config::{IN_MEMORY, SqliteOptions, SqliteOptionsBuilder};
pub use connection::SqliteConnection;
pub use params::db_value_to_sqlite_value;
pub use query::sqlite_extract_value_sync;
pub use worker::AsyncSqliteConnection;

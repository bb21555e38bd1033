//! SQL Server executor over `tiberius`.
//!
//! - config: connection options and the fluent builder
//! - client: raw client creation
//! - params: positional rewriting and parameter binding
//! - query: result extraction
//! - connection: the asynchronous connection

pub mod client;
pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use client::{MssqlClient, create_mssql_client};
pub use config::{MssqlOptions, MssqlOptionsBuilder};
pub use connection::MssqlConnection;
pub use query::build_result_sets;

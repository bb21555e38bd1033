//! Lightweight object mapping over `SQLite` and SQL Server.
//!
//! Commands are plain SQL. Parameters come from entities, tuples, slices of pairs or
//! [`DynamicParameters`](params::DynamicParameters); lists expand into `IN (...)` clauses and
//! `{=name}` tokens become inline literals. Rows map onto entities, scalars, tuples split at
//! key columns, or [`DynamicRow`](mapping::DynamicRow)s. Row readers and parameter plans are
//! cached per command identity.
//!
//! ```rust
//! use sql_mapper::prelude::*;
//!
//! sql_mapper::map_entity! {
//!     #[derive(Debug, Default, Clone, PartialEq)]
//!     pub struct User {
//!         pub id: i64,
//!         pub name: String,
//!     }
//! }
//!
//! # fn demo() -> Result<(), SqlMapperError> {
//! let mut conn = SqliteConnection::in_memory();
//! conn.open()?;
//! conn.execute("create table users (id integer primary key, name text)")?;
//! conn.execute_many(
//!     "insert into users (id, name) values (@id, @name)",
//!     &[
//!         User { id: 1, name: "ann".into() },
//!         User { id: 2, name: "bob".into() },
//!     ],
//! )?;
//! let ids = vec![1_i64, 2, 3];
//! let users: Vec<User> = conn
//!     .sql("select id, name from users where id in @ids order by id")
//!     .params(&sql_mapper::params! { "ids" => ids })
//!     .query()?;
//! assert_eq!(users.len(), 2);
//! # Ok(())
//! # }
//! # demo().unwrap();
//! ```

pub mod cache;
pub mod error;
pub mod executor;
pub mod mapping;
pub mod params;
pub mod prelude;
pub mod query_builder;
pub mod rewrite;
pub mod settings;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "mssql")]
pub mod mssql;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{BindingError, ConversionError, DeserializationError, SqlMapperError};
pub use query_builder::{AsyncSqlMapper, CommandDefinition, SqlMapper};
pub use settings::Settings;
pub use types::{DbValue, DbType, ParameterDirection};

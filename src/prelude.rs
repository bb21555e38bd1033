//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and traits
//! to make it easier to get started with the library.

pub use crate::cache::CommandFlags;
pub use crate::error::{BindingError, ConversionError, DeserializationError, SqlMapperError};
pub use crate::executor::{
    AsyncConnection, AsyncDataReader, Column, Command, Connection, DataReader, ResultSet,
};
pub use crate::mapping::{
    DynamicRow, Entity, EntityMember, FromDbValue, FromRow, SqlEnum, ToDbValue, type_map,
};
pub use crate::params::{DbString, DynamicParameters, ParamOptions, ParamSource, ToParam};
pub use crate::query_builder::{
    AsyncGridReader, AsyncRows, AsyncSqlCommand, AsyncSqlMapper, CommandDefinition, GridReader,
    Rows, SqlCommand, SqlMapper,
};
pub use crate::settings::Settings;
pub use crate::types::{
    CommandKind, ConnectionState, DatabaseType, DbType, DbValue, ParameterDirection,
    StringEncoding,
};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{AsyncSqliteConnection, SqliteConnection, SqliteOptionsBuilder};

#[cfg(feature = "mssql")]
pub use crate::mssql::{MssqlConnection, MssqlOptionsBuilder};

pub use tokio_util::sync::CancellationToken;

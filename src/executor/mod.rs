//! The executor capability: what the mapper needs from a database driver.
//!
//! The mapper never talks to a driver directly. It builds a [`Command`], hands it to a
//! [`Connection`] (or [`AsyncConnection`]) and reads rows back through a [`DataReader`]
//! (or [`AsyncDataReader`]). `SQLite` and SQL Server implementations live in their own modules.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::SqlMapperError;
use crate::types::{CommandKind, ConnectionState, DbType, DbValue, ParameterDirection};

mod async_exec;
mod buffered;

pub use async_exec::{AsyncConnection, AsyncDataReader};
pub use buffered::{BufferedReader, ResultSet};

/// Values handed back by the executor for output, input-output and return-value parameters.
pub type OutputValues = HashMap<String, DbValue>;

/// Case-insensitive lookup in an [`OutputValues`] map.
#[must_use]
pub fn output_value<'a>(outputs: &'a OutputValues, name: &str) -> Option<&'a DbValue> {
    outputs.get(name).or_else(|| {
        outputs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

/// Describes one column of the current result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: String,
    /// Zero-based position within the current result set.
    pub ordinal: usize,
    /// Provider type name as reported by the driver (`INTEGER`, `nvarchar`, ...).
    pub provider_type: String,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, ordinal: usize, provider_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordinal,
            provider_type: provider_type.into(),
        }
    }
}

/// A named, typed parameter owned by a [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub direction: ParameterDirection,
    pub db_type: Option<DbType>,
    pub size: Option<i32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub value: DbValue,
}

impl Parameter {
    #[must_use]
    pub fn input(name: impl Into<String>, value: DbValue) -> Self {
        Self {
            name: name.into(),
            direction: ParameterDirection::Input,
            db_type: None,
            size: None,
            precision: None,
            scale: None,
            value,
        }
    }

    #[must_use]
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn with_db_type(mut self, db_type: Option<DbType>) -> Self {
        self.db_type = db_type;
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: Option<i32>) -> Self {
        self.size = size;
        self
    }
}

/// Hints passed along with a reader request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandBehavior {
    /// Only the first result set will be read.
    pub single_result: bool,
    /// Only the first row will be read.
    pub single_row: bool,
}

/// A fully rewritten, fully bound command ready for an executor.
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub sql: String,
    pub kind: CommandKind,
    pub timeout: Option<Duration>,
    pub behavior: CommandBehavior,
    pub parameters: Vec<Parameter>,
    pub cancellation: Option<CancellationToken>,
}

impl Command {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn add_parameter(&mut self, parameter: Parameter) {
        self.parameters.push(parameter);
    }

    /// Case-insensitive lookup by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameter(name).is_some()
    }

    /// True once the attached cancellation token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Fail fast with [`SqlMapperError::Cancelled`] when the token has already fired.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), SqlMapperError> {
        if self.is_cancelled() {
            Err(SqlMapperError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a non-query execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    pub outputs: OutputValues,
}

/// Synchronous connection to a database.
pub trait Connection {
    fn state(&self) -> ConnectionState;

    /// # Errors
    /// Returns an executor error when the connection cannot be established.
    fn open(&mut self) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns an executor error when the connection cannot be released cleanly.
    fn close(&mut self) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns an executor error if the transaction cannot be started.
    fn begin(&mut self) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns an executor error if the commit fails.
    fn commit(&mut self) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns an executor error if the rollback fails.
    fn rollback(&mut self) -> Result<(), SqlMapperError>;

    /// Run a command that returns no rows of interest.
    ///
    /// # Errors
    /// Returns an executor error from the driver.
    fn execute_non_query(&mut self, command: &Command) -> Result<ExecuteOutcome, SqlMapperError>;

    /// Run a command and hand back a reader positioned before the first row of the first set.
    ///
    /// # Errors
    /// Returns an executor error from the driver.
    fn execute_reader(
        &mut self,
        command: &Command,
    ) -> Result<Box<dyn DataReader + Send>, SqlMapperError>;
}

/// Forward-only cursor over one or more result sets.
pub trait DataReader {
    /// Columns of the current result set.
    fn columns(&self) -> &[Column];

    /// # Errors
    /// Returns an executor error if the row cannot be fetched.
    fn next_row(&mut self) -> Result<Option<Vec<DbValue>>, SqlMapperError>;

    /// Advance to the next result set; `false` when there are none left.
    ///
    /// # Errors
    /// Returns an executor error if the driver fails while advancing.
    fn next_result(&mut self) -> Result<bool, SqlMapperError>;

    /// Output values, complete once every result set has been consumed.
    fn output_values(&self) -> OutputValues;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn state(&self) -> ConnectionState {
        (**self).state()
    }

    fn open(&mut self) -> Result<(), SqlMapperError> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), SqlMapperError> {
        (**self).close()
    }

    fn begin(&mut self) -> Result<(), SqlMapperError> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<(), SqlMapperError> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<(), SqlMapperError> {
        (**self).rollback()
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<ExecuteOutcome, SqlMapperError> {
        (**self).execute_non_query(command)
    }

    fn execute_reader(
        &mut self,
        command: &Command,
    ) -> Result<Box<dyn DataReader + Send>, SqlMapperError> {
        (**self).execute_reader(command)
    }
}

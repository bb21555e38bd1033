use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;
#[cfg(feature = "mssql")]
use tiberius;

/// Errors raised while binding parameters to a command.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BindingError {
    #[error("The member {member} of type {type_name} cannot be used as a parameter value")]
    UnsupportedType {
        member: String,
        type_name: &'static str,
    },

    #[error("The type {type_name} (member {member}) is not supported for SQL literals")]
    UnsupportedLiteral {
        member: String,
        type_name: &'static str,
    },

    #[error("Invalid member path `{path}`: {reason}")]
    InvalidMemberPath { path: String, reason: String },

    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// Errors raised while turning a raw column value into a target member.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeserializationError {
    #[error("Error parsing column {ordinal} ({column}={value} - {value_type}) into {member}: {reason}")]
    Conversion {
        ordinal: usize,
        column: String,
        value: String,
        value_type: &'static str,
        member: String,
        reason: String,
    },

    #[error("A parameterless default constructor or one matching signature ({columns}) is required for {type_name} materialization")]
    NoConstructor {
        type_name: &'static str,
        columns: String,
    },

    #[error("No columns were selected")]
    NoColumns,
}

/// Low-level conversion failure, before column context is attached.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("cannot convert {found} to {expected}: {reason}")]
pub struct ConversionError {
    pub expected: &'static str,
    pub found: &'static str,
    pub reason: String,
}

impl ConversionError {
    #[must_use]
    pub fn new(expected: &'static str, found: &'static str, reason: impl Into<String>) -> Self {
        Self {
            expected,
            found,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SqlMapperError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("No value was supplied for the literal {{={0}}}")]
    MissingLiteral(String),

    #[error(transparent)]
    Deserialization(#[from] DeserializationError),

    #[error("Multi-map error: {0}")]
    SplitConfiguration(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("The operation was cancelled")]
    Cancelled,

    #[error("Sequence contains no elements")]
    NoRows,

    #[error("Sequence contains more than one element")]
    MultipleRows,

    #[error("The reader has been disposed; this can happen after all data has been consumed")]
    Disposed,

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),
}

impl SqlMapperError {
    /// True for failures that originate in the database executor rather than the mapper.
    #[must_use]
    pub fn is_executor_error(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            SqlMapperError::SqliteError(_) => true,
            #[cfg(feature = "mssql")]
            SqlMapperError::MssqlError(_) => true,
            SqlMapperError::ConnectionError(_) | SqlMapperError::ExecutionError(_) => true,
            _ => false,
        }
    }
}

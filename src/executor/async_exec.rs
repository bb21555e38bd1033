use async_trait::async_trait;

use super::{Column, Command, ExecuteOutcome, OutputValues};
use crate::error::SqlMapperError;
use crate::types::{ConnectionState, DbValue};

/// Asynchronous connection to a database.
///
/// Mirrors [`super::Connection`]; every driver round trip is a suspension point.
#[async_trait]
pub trait AsyncConnection: Send {
    fn state(&self) -> ConnectionState;

    /// # Errors
    /// Returns an executor error when the connection cannot be established.
    async fn open(&mut self) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns an executor error when the connection cannot be released cleanly.
    async fn close(&mut self) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns an executor error if the transaction cannot be started.
    async fn begin(&mut self) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns an executor error if the commit fails.
    async fn commit(&mut self) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns an executor error if the rollback fails.
    async fn rollback(&mut self) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns an executor error from the driver, or [`SqlMapperError::Cancelled`].
    async fn execute_non_query(
        &mut self,
        command: &Command,
    ) -> Result<ExecuteOutcome, SqlMapperError>;

    /// # Errors
    /// Returns an executor error from the driver, or [`SqlMapperError::Cancelled`].
    async fn execute_reader(
        &mut self,
        command: &Command,
    ) -> Result<Box<dyn AsyncDataReader>, SqlMapperError>;
}

/// Asynchronous forward-only cursor over one or more result sets.
#[async_trait]
pub trait AsyncDataReader: Send {
    fn columns(&self) -> &[Column];

    /// # Errors
    /// Returns an executor error if the row cannot be fetched.
    async fn next_row(&mut self) -> Result<Option<Vec<DbValue>>, SqlMapperError>;

    /// # Errors
    /// Returns an executor error if the driver fails while advancing.
    async fn next_result(&mut self) -> Result<bool, SqlMapperError>;

    fn output_values(&self) -> OutputValues;
}

#[async_trait]
impl<C: AsyncConnection + ?Sized> AsyncConnection for Box<C> {
    fn state(&self) -> ConnectionState {
        (**self).state()
    }

    async fn open(&mut self) -> Result<(), SqlMapperError> {
        (**self).open().await
    }

    async fn close(&mut self) -> Result<(), SqlMapperError> {
        (**self).close().await
    }

    async fn begin(&mut self) -> Result<(), SqlMapperError> {
        (**self).begin().await
    }

    async fn commit(&mut self) -> Result<(), SqlMapperError> {
        (**self).commit().await
    }

    async fn rollback(&mut self) -> Result<(), SqlMapperError> {
        (**self).rollback().await
    }

    async fn execute_non_query(
        &mut self,
        command: &Command,
    ) -> Result<ExecuteOutcome, SqlMapperError> {
        (**self).execute_non_query(command).await
    }

    async fn execute_reader(
        &mut self,
        command: &Command,
    ) -> Result<Box<dyn AsyncDataReader>, SqlMapperError> {
        (**self).execute_reader(command).await
    }
}

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::client::{MssqlClient, create_mssql_client};
use super::config::MssqlOptions;
use super::query::{build_result_sets, execute_command};
use crate::error::SqlMapperError;
use crate::executor::{
    AsyncConnection, AsyncDataReader, BufferedReader, Command, ExecuteOutcome, OutputValues,
};
use crate::types::{ConnectionState, DatabaseType};

/// Asynchronous SQL Server connection over `tiberius`.
///
/// A command that is cancelled or times out drops the client; the connection then reports
/// [`ConnectionState::Closed`] and reconnects on next use.
pub struct MssqlConnection {
    options: MssqlOptions,
    client: Option<MssqlClient>,
    in_transaction: bool,
}

impl MssqlConnection {
    #[must_use]
    pub fn new(options: MssqlOptions) -> Self {
        Self {
            options,
            client: None,
            in_transaction: false,
        }
    }

    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    fn client(&mut self) -> Result<&mut MssqlClient, SqlMapperError> {
        self.client
            .as_mut()
            .ok_or_else(|| {
                SqlMapperError::ConnectionError("SQL Server connection is closed".into())
            })
    }

    async fn simple(&mut self, sql: &str) -> Result<(), SqlMapperError> {
        self.client()?
            .simple_query(sql)
            .await
            .map_err(|e| SqlMapperError::ExecutionError(format!("SQL Server error: {e}")))?
            .into_results()
            .await
            .map_err(|e| SqlMapperError::ExecutionError(format!("SQL Server error: {e}")))?;
        Ok(())
    }

    /// Resolve a guarded call; an interrupted call leaves the TDS stream unusable, so the
    /// client is dropped and the next call reconnects.
    fn settle<R>(
        &mut self,
        outcome: Result<Result<R, SqlMapperError>, SqlMapperError>,
    ) -> Result<R, SqlMapperError> {
        match outcome {
            Ok(result) => result,
            Err(interrupted) => {
                warn!(error = %interrupted, "SQL Server command interrupted; dropping the client");
                self.client = None;
                self.in_transaction = false;
                Err(interrupted)
            }
        }
    }
}

/// Run `fut` under the command's timeout and cancellation token. The outer error reports an
/// interruption; the inner result is the driver's.
async fn guarded<R, F>(
    command: &Command,
    fut: F,
) -> Result<Result<R, SqlMapperError>, SqlMapperError>
where
    F: Future<Output = Result<R, SqlMapperError>>,
{
    let timed = async {
        match command.timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut).await.map_err(|_| {
                SqlMapperError::ExecutionError(format!(
                    "SQL Server command timed out after {timeout:?}"
                ))
            }),
            None => Ok(fut.await),
        }
    };
    match &command.cancellation {
        Some(token) => {
            tokio::select! {
                biased;
                () = token.cancelled() => Err(SqlMapperError::Cancelled),
                result = timed => result,
            }
        }
        None => timed.await,
    }
}

impl fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("server", &self.options.server)
            .field("database", &self.options.database)
            .field("open", &self.client.is_some())
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AsyncConnection for MssqlConnection {
    fn state(&self) -> ConnectionState {
        if self.client.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn open(&mut self) -> Result<(), SqlMapperError> {
        if self.client.is_none() {
            debug!(server = %self.options.server, "opening SQL Server connection");
            self.client = Some(create_mssql_client(&self.options).await?);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SqlMapperError> {
        self.in_transaction = false;
        if let Some(client) = self.client.take() {
            debug!(server = %self.options.server, "closing SQL Server connection");
            client
                .close()
                .await
                .map_err(|e| {
                    SqlMapperError::ConnectionError(format!("SQL Server close error: {e}"))
                })?;
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), SqlMapperError> {
        if self.in_transaction {
            return Err(SqlMapperError::ExecutionError(
                "SQL Server transaction already in progress".into(),
            ));
        }
        self.simple("BEGIN TRANSACTION").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlMapperError> {
        if !self.in_transaction {
            return Err(SqlMapperError::ExecutionError(
                "SQL Server transaction not active".into(),
            ));
        }
        self.simple("COMMIT TRANSACTION").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlMapperError> {
        if !self.in_transaction {
            return Err(SqlMapperError::ExecutionError(
                "SQL Server transaction not active".into(),
            ));
        }
        self.simple("ROLLBACK TRANSACTION").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn execute_non_query(
        &mut self,
        command: &Command,
    ) -> Result<ExecuteOutcome, SqlMapperError> {
        command.check_cancelled()?;
        let outcome = guarded(command, execute_command(self.client()?, command)).await;
        Ok(ExecuteOutcome {
            rows_affected: self.settle(outcome)?,
            outputs: OutputValues::new(),
        })
    }

    async fn execute_reader(
        &mut self,
        command: &Command,
    ) -> Result<Box<dyn AsyncDataReader>, SqlMapperError> {
        command.check_cancelled()?;
        let outcome = guarded(command, build_result_sets(self.client()?, command)).await;
        let sets = self.settle(outcome)?;
        Ok(Box::new(BufferedReader::new(sets)))
    }
}

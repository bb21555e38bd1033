use std::fmt;

use tracing::debug;

use crate::error::SqlMapperError;
use crate::executor::{BufferedReader, Command, Connection, DataReader, ExecuteOutcome};
use crate::types::{CommandKind, ConnectionState, DatabaseType};

use super::config::{IN_MEMORY, SqliteOptions};
use super::query::run_command;

/// Synchronous `SQLite` connection.
///
/// Created closed; the mapper opens it for the duration of a call when needed. An in-memory
/// database lives only while the connection is open, so open it explicitly to keep data
/// across calls.
pub struct SqliteConnection {
    options: SqliteOptions,
    conn: Option<rusqlite::Connection>,
    in_transaction: bool,
}

impl SqliteConnection {
    #[must_use]
    pub fn new(options: SqliteOptions) -> Self {
        Self {
            options,
            conn: None,
            in_transaction: false,
        }
    }

    /// A closed connection to a file database.
    #[must_use]
    pub fn open_path(db_path: impl Into<String>) -> Self {
        Self::new(SqliteOptions::new(db_path.into()))
    }

    /// A closed connection to a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(SqliteOptions::new(IN_MEMORY.to_string()))
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }

    /// Run synchronous `rusqlite` logic against the open connection.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::ConnectionError`] when the connection is closed.
    pub fn with_connection<R>(
        &mut self,
        func: impl FnOnce(&mut rusqlite::Connection) -> Result<R, SqlMapperError>,
    ) -> Result<R, SqlMapperError> {
        func(self.handle()?)
    }

    fn handle(&mut self) -> Result<&mut rusqlite::Connection, SqlMapperError> {
        self.conn
            .as_mut()
            .ok_or_else(|| SqlMapperError::ConnectionError("SQLite connection is closed".into()))
    }

    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn ensure_text(command: &Command) -> Result<(), SqlMapperError> {
        match command.kind {
            CommandKind::Text => Ok(()),
            CommandKind::StoredProcedure => Err(SqlMapperError::Unimplemented(
                "SQLite has no stored procedures".into(),
            )),
        }
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("db_path", &self.options.db_path)
            .field("open", &self.conn.is_some())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl Connection for SqliteConnection {
    fn state(&self) -> ConnectionState {
        if self.conn.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn open(&mut self) -> Result<(), SqlMapperError> {
        if self.conn.is_none() {
            debug!(path = %self.options.db_path, "opening SQLite connection");
            self.conn = Some(self.options.open_raw()?);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SqlMapperError> {
        if let Some(conn) = self.conn.take() {
            debug!(path = %self.options.db_path, "closing SQLite connection");
            self.in_transaction = false;
            conn.close().map_err(|(_, err)| SqlMapperError::SqliteError(err))?;
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<(), SqlMapperError> {
        if self.in_transaction {
            return Err(SqlMapperError::ExecutionError(
                "SQLite transaction already in progress".into(),
            ));
        }
        self.handle()?.execute_batch("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SqlMapperError> {
        if !self.in_transaction {
            return Err(SqlMapperError::ExecutionError(
                "SQLite transaction not active".into(),
            ));
        }
        self.handle()?.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SqlMapperError> {
        if !self.in_transaction {
            return Err(SqlMapperError::ExecutionError(
                "SQLite transaction not active".into(),
            ));
        }
        self.handle()?.execute_batch("ROLLBACK")?;
        self.in_transaction = false;
        Ok(())
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<ExecuteOutcome, SqlMapperError> {
        Self::ensure_text(command)?;
        let busy_timeout = self.options.busy_timeout;
        let outcome = run_command(self.handle()?, command, busy_timeout)?;
        Ok(ExecuteOutcome {
            rows_affected: outcome.rows_affected,
            outputs: crate::executor::OutputValues::new(),
        })
    }

    fn execute_reader(
        &mut self,
        command: &Command,
    ) -> Result<Box<dyn DataReader + Send>, SqlMapperError> {
        Self::ensure_text(command)?;
        let busy_timeout = self.options.busy_timeout;
        let outcome = run_command(self.handle()?, command, busy_timeout)?;
        Ok(Box::new(BufferedReader::new(outcome.sets)))
    }
}

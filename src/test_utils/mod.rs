//! Scripted in-memory executors for exercising the mapper without a database.
//!
//! Each executed command is recorded, and replies are served from a queue in the order they
//! were pushed. With an empty queue a reader has no result sets and a non-query affects no rows.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SqlMapperError;
use crate::executor::{
    AsyncConnection, AsyncDataReader, BufferedReader, Command, Connection, DataReader,
    ExecuteOutcome, OutputValues, ResultSet,
};
use crate::types::{ConnectionState, DatabaseType, DbValue};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Sets {
        sets: Vec<ResultSet>,
        outputs: OutputValues,
    },
    Affected {
        rows: u64,
        outputs: OutputValues,
    },
    Error(String),
}

impl ScriptedResponse {
    #[must_use]
    pub fn sets(sets: Vec<ResultSet>) -> Self {
        ScriptedResponse::Sets {
            sets,
            outputs: OutputValues::new(),
        }
    }

    #[must_use]
    pub fn affected(rows: u64) -> Self {
        ScriptedResponse::Affected {
            rows,
            outputs: OutputValues::new(),
        }
    }

    /// Attach an output value returned alongside the reply.
    #[must_use]
    pub fn with_output(mut self, name: &str, value: DbValue) -> Self {
        match &mut self {
            ScriptedResponse::Sets { outputs, .. } | ScriptedResponse::Affected { outputs, .. } => {
                outputs.insert(name.to_string(), value);
            }
            ScriptedResponse::Error(_) => {}
        }
        self
    }
}

/// Synchronous scripted connection.
#[derive(Debug)]
pub struct ScriptedConnection {
    open: bool,
    script: VecDeque<ScriptedResponse>,
    commands: Vec<Command>,
    opens: usize,
    closes: usize,
}

impl Default for ScriptedConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: false,
            script: VecDeque::new(),
            commands: Vec::new(),
            opens: 0,
            closes: 0,
        }
    }

    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        DatabaseType::Scripted
    }

    pub fn push(&mut self, response: ScriptedResponse) -> &mut Self {
        self.script.push_back(response);
        self
    }

    /// Queue a reply with a single result set.
    pub fn push_rows(&mut self, set: ResultSet) -> &mut Self {
        self.push(ScriptedResponse::sets(vec![set]))
    }

    pub fn push_affected(&mut self, rows: u64) -> &mut Self {
        self.push(ScriptedResponse::affected(rows))
    }

    pub fn push_error(&mut self, message: &str) -> &mut Self {
        self.push(ScriptedResponse::Error(message.to_string()))
    }

    /// Every command executed so far, in order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn last_command(&self) -> Option<&Command> {
        self.commands.last()
    }

    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes
    }

    fn ensure_open(&self) -> Result<(), SqlMapperError> {
        if self.open {
            Ok(())
        } else {
            Err(SqlMapperError::ConnectionError(
                "scripted connection is closed".into(),
            ))
        }
    }

    fn reply(&mut self, command: &Command) -> Result<ScriptedResponse, SqlMapperError> {
        self.ensure_open()?;
        self.commands.push(command.clone());
        match self.script.pop_front() {
            Some(ScriptedResponse::Error(message)) => Err(SqlMapperError::ExecutionError(message)),
            Some(response) => Ok(response),
            None => Ok(ScriptedResponse::sets(Vec::new())),
        }
    }

    fn reader_for(response: ScriptedResponse) -> BufferedReader {
        match response {
            ScriptedResponse::Sets { sets, outputs } => {
                BufferedReader::new(sets).with_outputs(outputs)
            }
            ScriptedResponse::Affected { outputs, .. } => {
                BufferedReader::new(Vec::new()).with_outputs(outputs)
            }
            ScriptedResponse::Error(_) => BufferedReader::default(),
        }
    }

    fn outcome_for(response: ScriptedResponse) -> ExecuteOutcome {
        match response {
            ScriptedResponse::Sets { sets, outputs } => ExecuteOutcome {
                rows_affected: sets.iter().map(|s| s.rows_affected).sum(),
                outputs,
            },
            ScriptedResponse::Affected { rows, outputs } => ExecuteOutcome {
                rows_affected: rows,
                outputs,
            },
            ScriptedResponse::Error(_) => ExecuteOutcome::default(),
        }
    }
}

impl Connection for ScriptedConnection {
    fn state(&self) -> ConnectionState {
        if self.open {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn open(&mut self) -> Result<(), SqlMapperError> {
        if !self.open {
            self.open = true;
            self.opens += 1;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SqlMapperError> {
        if self.open {
            self.open = false;
            self.closes += 1;
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<(), SqlMapperError> {
        self.ensure_open()
    }

    fn commit(&mut self) -> Result<(), SqlMapperError> {
        self.ensure_open()
    }

    fn rollback(&mut self) -> Result<(), SqlMapperError> {
        self.ensure_open()
    }

    fn execute_non_query(&mut self, command: &Command) -> Result<ExecuteOutcome, SqlMapperError> {
        let response = self.reply(command)?;
        Ok(Self::outcome_for(response))
    }

    fn execute_reader(
        &mut self,
        command: &Command,
    ) -> Result<Box<dyn DataReader + Send>, SqlMapperError> {
        let response = self.reply(command)?;
        Ok(Box::new(Self::reader_for(response)))
    }
}

/// Asynchronous scripted connection; an optional delay before each reply gives cancellation
/// something to interrupt.
#[derive(Debug, Default)]
pub struct AsyncScriptedConnection {
    inner: ScriptedConnection,
    delay: Option<Duration>,
}

impl AsyncScriptedConnection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The recording connection behind this one; push replies and inspect commands here.
    pub fn script(&mut self) -> &mut ScriptedConnection {
        &mut self.inner
    }

    #[must_use]
    pub fn recorded(&self) -> &ScriptedConnection {
        &self.inner
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AsyncConnection for AsyncScriptedConnection {
    fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    async fn open(&mut self) -> Result<(), SqlMapperError> {
        self.inner.open()
    }

    async fn close(&mut self) -> Result<(), SqlMapperError> {
        self.inner.close()
    }

    async fn begin(&mut self) -> Result<(), SqlMapperError> {
        self.inner.begin()
    }

    async fn commit(&mut self) -> Result<(), SqlMapperError> {
        self.inner.commit()
    }

    async fn rollback(&mut self) -> Result<(), SqlMapperError> {
        self.inner.rollback()
    }

    async fn execute_non_query(
        &mut self,
        command: &Command,
    ) -> Result<ExecuteOutcome, SqlMapperError> {
        self.pause().await;
        let response = self.inner.reply(command)?;
        Ok(ScriptedConnection::outcome_for(response))
    }

    async fn execute_reader(
        &mut self,
        command: &Command,
    ) -> Result<Box<dyn AsyncDataReader>, SqlMapperError> {
        self.pause().await;
        let response = self.inner.reply(command)?;
        Ok(Box::new(ScriptedConnection::reader_for(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_are_served_in_order_and_commands_recorded() {
        let mut conn = ScriptedConnection::new();
        conn.push_affected(3).push_error("boom");
        conn.open().unwrap();
        let outcome = conn.execute_non_query(&Command::new("update t")).unwrap();
        assert_eq!(outcome.rows_affected, 3);
        assert!(conn.execute_non_query(&Command::new("delete t")).is_err());
        assert_eq!(conn.commands().len(), 2);
        assert_eq!(conn.last_command().map(|c| c.sql.as_str()), Some("delete t"));
    }

    #[test]
    fn closed_connections_refuse_commands() {
        let mut conn = ScriptedConnection::new();
        assert!(conn.execute_reader(&Command::new("select 1")).is_err());
        assert!(conn.commands().is_empty());
    }
}

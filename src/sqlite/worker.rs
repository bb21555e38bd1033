use std::any::Any;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::InterruptHandle;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::SqlMapperError;
use crate::executor::{
    AsyncConnection, AsyncDataReader, BufferedReader, Command, ExecuteOutcome, OutputValues,
};
use crate::types::{CommandKind, ConnectionState, DatabaseType};

use super::config::{IN_MEMORY, SqliteOptions};
use super::query::{CommandOutcome, run_command};

/// Asynchronous `SQLite` connection backed by a dedicated worker thread.
///
/// `rusqlite` is blocking, so every statement runs on the worker while the caller awaits the
/// reply. Cancelling a command interrupts the statement running on the worker.
pub struct AsyncSqliteConnection {
    options: SqliteOptions,
    worker: Option<SqliteWorker>,
    in_transaction: bool,
}

impl AsyncSqliteConnection {
    #[must_use]
    pub fn new(options: SqliteOptions) -> Self {
        Self {
            options,
            worker: None,
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
    pub fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    /// Run synchronous `rusqlite` logic against the worker-owned connection.
    ///
    /// # Errors
    /// Propagates any error raised by the callback, and [`SqlMapperError::ConnectionError`]
    /// when the connection is closed or the worker is gone.
    pub async fn with_connection<F, R>(&self, func: F) -> Result<R, SqlMapperError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlMapperError> + Send + 'static,
        R: Send + 'static,
    {
        self.worker()?.with_connection(func).await
    }

    fn worker(&self) -> Result<&SqliteWorker, SqlMapperError> {
        self.worker
            .as_ref()
            .ok_or_else(|| SqlMapperError::ConnectionError("SQLite connection is closed".into()))
    }

    async fn run(&self, command: &Command) -> Result<CommandOutcome, SqlMapperError> {
        if command.kind == CommandKind::StoredProcedure {
            return Err(SqlMapperError::Unimplemented(
                "SQLite has no stored procedures".into(),
            ));
        }
        command.check_cancelled()?;
        self.worker()?.run(command).await
    }

    async fn batch(&self, sql: &'static str) -> Result<(), SqlMapperError> {
        self.worker()?.execute_batch(sql).await
    }
}

impl fmt::Debug for AsyncSqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSqliteConnection")
            .field("db_path", &self.options.db_path)
            .field("open", &self.worker.is_some())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

#[async_trait]
impl AsyncConnection for AsyncSqliteConnection {
    fn state(&self) -> ConnectionState {
        if self.worker.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn open(&mut self) -> Result<(), SqlMapperError> {
        if self.worker.is_none() {
            debug!(path = %self.options.db_path, "opening SQLite worker connection");
            self.worker = Some(SqliteWorker::spawn(self.options.clone()).await?);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SqlMapperError> {
        if let Some(worker) = self.worker.take() {
            debug!(path = %self.options.db_path, "closing SQLite worker connection");
            self.in_transaction = false;
            worker.close().await?;
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), SqlMapperError> {
        if self.in_transaction {
            return Err(SqlMapperError::ExecutionError(
                "SQLite transaction already in progress".into(),
            ));
        }
        self.batch("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlMapperError> {
        if !self.in_transaction {
            return Err(SqlMapperError::ExecutionError(
                "SQLite transaction not active".into(),
            ));
        }
        self.batch("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlMapperError> {
        if !self.in_transaction {
            return Err(SqlMapperError::ExecutionError(
                "SQLite transaction not active".into(),
            ));
        }
        self.batch("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn execute_non_query(
        &mut self,
        command: &Command,
    ) -> Result<ExecuteOutcome, SqlMapperError> {
        let outcome = self.run(command).await?;
        Ok(ExecuteOutcome {
            rows_affected: outcome.rows_affected,
            outputs: OutputValues::new(),
        })
    }

    async fn execute_reader(
        &mut self,
        command: &Command,
    ) -> Result<Box<dyn AsyncDataReader>, SqlMapperError> {
        let outcome = self.run(command).await?;
        Ok(Box::new(BufferedReader::new(outcome.sets)))
    }
}

struct SqliteWorker {
    sender: Sender<Request>,
    interrupt: InterruptHandle,
}

impl SqliteWorker {
    async fn spawn(options: SqliteOptions) -> Result<Self, SqlMapperError> {
        let (sender, receiver) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let busy_timeout = options.busy_timeout;
        thread::Builder::new()
            .name(format!("sqlite-worker-{}", options.db_path))
            .spawn(move || match options.open_raw() {
                Ok(mut conn) => {
                    if ready_tx.send(Ok(conn.get_interrupt_handle())).is_ok() {
                        run_sqlite_worker(&mut conn, &receiver, busy_timeout);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(|err| {
                SqlMapperError::ConnectionError(format!(
                    "failed to spawn SQLite worker thread: {err}"
                ))
            })?;

        let interrupt = ready_rx.await.map_err(|_| {
            SqlMapperError::ConnectionError("SQLite worker exited while opening".into())
        })??;
        Ok(Self { sender, interrupt })
    }

    fn send_request(&self, request: Request) -> Result<(), SqlMapperError> {
        self.sender
            .send(request)
            .map_err(|_| SqlMapperError::ConnectionError("SQLite worker closed".into()))
    }

    async fn execute_batch(&self, sql: &'static str) -> Result<(), SqlMapperError> {
        let (tx, rx) = oneshot::channel();
        self.send_request(Request::ExecuteBatch {
            sql,
            respond_to: tx,
        })?;
        rx.await.map_err(|_| {
            SqlMapperError::ConnectionError("SQLite worker dropped while executing batch".into())
        })?
    }

    async fn run(&self, command: &Command) -> Result<CommandOutcome, SqlMapperError> {
        let (tx, rx) = oneshot::channel();
        self.send_request(Request::Run {
            command: command.clone(),
            respond_to: tx,
        })?;
        let reply = async {
            rx.await.map_err(|_| {
                SqlMapperError::ConnectionError(
                    "SQLite worker dropped while executing command".into(),
                )
            })?
        };
        // Dropping this future before the reply arrives (a caller-side select or timeout)
        // interrupts the statement still running on the worker thread.
        let guard = InterruptOnDrop {
            handle: &self.interrupt,
            armed: true,
        };
        match &command.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(SqlMapperError::Cancelled),
                    result = reply => guard.disarm(result),
                }
            }
            None => guard.disarm(reply.await),
        }
    }

    async fn with_connection<F, R>(&self, func: F) -> Result<R, SqlMapperError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, SqlMapperError> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let callback: BoxedCallback =
            Box::new(move |conn| func(conn).map(|value| Box::new(value) as Box<dyn Any + Send>));
        self.send_request(Request::WithConnection {
            callback,
            respond_to: tx,
        })?;
        match rx.await {
            Ok(Ok(payload)) => payload.downcast::<R>().map(|boxed| *boxed).map_err(|_| {
                SqlMapperError::ExecutionError("SQLite worker response downcast failure".into())
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SqlMapperError::ConnectionError(
                "SQLite worker dropped while handling custom callback".into(),
            )),
        }
    }

    async fn close(self) -> Result<(), SqlMapperError> {
        let (tx, rx) = oneshot::channel();
        self.send_request(Request::Close { respond_to: tx })?;
        rx.await.map_err(|_| {
            SqlMapperError::ConnectionError("SQLite worker dropped while closing".into())
        })
    }
}

struct InterruptOnDrop<'a> {
    handle: &'a InterruptHandle,
    armed: bool,
}

impl InterruptOnDrop<'_> {
    fn disarm<R>(mut self, result: R) -> R {
        self.armed = false;
        result
    }
}

impl Drop for InterruptOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("interrupting SQLite statement after cancellation");
            self.handle.interrupt();
        }
    }
}

impl Drop for SqliteWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Request::Shutdown);
    }
}

type BoxedResponse = Result<Box<dyn Any + Send>, SqlMapperError>;
type BoxedCallback = Box<dyn FnOnce(&mut rusqlite::Connection) -> BoxedResponse + Send>;

enum Request {
    ExecuteBatch {
        sql: &'static str,
        respond_to: oneshot::Sender<Result<(), SqlMapperError>>,
    },
    Run {
        command: Command,
        respond_to: oneshot::Sender<Result<CommandOutcome, SqlMapperError>>,
    },
    WithConnection {
        callback: BoxedCallback,
        respond_to: oneshot::Sender<BoxedResponse>,
    },
    Close {
        respond_to: oneshot::Sender<()>,
    },
    Shutdown,
}

fn run_sqlite_worker(
    conn: &mut rusqlite::Connection,
    receiver: &Receiver<Request>,
    busy_timeout: Duration,
) {
    while let Ok(request) = receiver.recv() {
        match request {
            Request::ExecuteBatch { sql, respond_to } => {
                let outcome = conn.execute_batch(sql).map_err(SqlMapperError::from);
                let _ = respond_to.send(outcome);
            }
            Request::Run {
                command,
                respond_to,
            } => {
                let outcome = run_command(conn, &command, busy_timeout).map_err(|err| match err {
                    SqlMapperError::SqliteError(rusqlite::Error::SqliteFailure(code, _))
                        if code.code == rusqlite::ErrorCode::OperationInterrupted =>
                    {
                        SqlMapperError::Cancelled
                    }
                    other => other,
                });
                let _ = respond_to.send(outcome);
            }
            Request::WithConnection {
                callback,
                respond_to,
            } => {
                let _ = respond_to.send(callback(conn));
            }
            Request::Close { respond_to } => {
                let _ = respond_to.send(());
                break;
            }
            Request::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Parameter;
    use crate::types::DbValue;

    #[tokio::test]
    async fn commands_run_on_the_worker() {
        let mut conn = AsyncSqliteConnection::in_memory();
        conn.open().await.unwrap();
        conn.execute_non_query(&Command::new("create table t (id integer)"))
            .await
            .unwrap();
        let mut insert = Command::new("insert into t values (@id)");
        insert.add_parameter(Parameter::input("id", DbValue::Int(4)));
        let outcome = conn.execute_non_query(&insert).await.unwrap();
        assert_eq!(outcome.rows_affected, 1);

        let mut reader = conn
            .execute_reader(&Command::new("select id from t"))
            .await
            .unwrap();
        assert_eq!(reader.next_row().await.unwrap(), Some(vec![DbValue::Int(4)]));

        let tables = conn
            .with_connection(|c| {
                Ok(c.query_row("select count(*) from sqlite_master", [], |r| {
                    r.get::<_, i64>(0)
                })?)
            })
            .await
            .unwrap();
        assert_eq!(tables, 1);
        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn closed_connections_refuse_commands() {
        let mut conn = AsyncSqliteConnection::in_memory();
        assert!(matches!(
            conn.execute_non_query(&Command::new("select 1")).await,
            Err(SqlMapperError::ConnectionError(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_tokens_stop_before_dispatch() {
        let mut conn = AsyncSqliteConnection::in_memory();
        conn.open().await.unwrap();
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let mut command = Command::new("select 1");
        command.cancellation = Some(token);
        assert!(matches!(
            conn.execute_reader(&command).await,
            Err(SqlMapperError::Cancelled)
        ));
    }
}

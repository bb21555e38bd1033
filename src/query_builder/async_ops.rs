use std::borrow::Cow;
use std::future::Future;

use async_trait::async_trait;
use tracing::debug;

use super::sync_ops::{compile_all, scalar_value};
use super::{AsyncGridReader, CommandDefinition, Take, at_most_one, exactly_one};
use crate::cache::{self, CommandFlags, ExecutionKind, Identity};
use crate::error::SqlMapperError;
use crate::executor::{AsyncConnection, AsyncDataReader, Column, Command, OutputValues};
use crate::mapping::{FromDbValue, FromRow, RowReader, SplitTuple};
use crate::params::ParamSource;
use crate::types::ConnectionState;

/// Run `fut` unless the command's token fires first.
pub(super) async fn cancellable<F, R>(command: &Command, fut: F) -> Result<R, SqlMapperError>
where
    F: Future<Output = Result<R, SqlMapperError>>,
{
    command.check_cancelled()?;
    match &command.cancellation {
        Some(token) => {
            tokio::select! {
                biased;
                () = token.cancelled() => Err(SqlMapperError::Cancelled),
                result = fut => result,
            }
        }
        None => fut.await,
    }
}

pub(super) async fn open_if_closed<C>(conn: &mut C) -> Result<bool, SqlMapperError>
where
    C: AsyncConnection + ?Sized,
{
    if conn.state() == ConnectionState::Closed {
        debug!("opening closed connection for the call");
        conn.open().await?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Close a connection opened for the call; an error from the call wins over a close error.
pub(super) async fn release<C, R>(
    conn: &mut C,
    opened: bool,
    result: Result<R, SqlMapperError>,
) -> Result<R, SqlMapperError>
where
    C: AsyncConnection + ?Sized,
{
    if opened {
        debug!("closing connection opened for the call");
        let closed = conn.close().await;
        if result.is_ok() {
            closed?;
        }
    }
    result
}

pub(super) async fn collect_rows<T, R>(
    reader: &mut R,
    row_reader: &RowReader<T>,
    take: Take,
    command: &Command,
) -> Result<Vec<T>, SqlMapperError>
where
    R: AsyncDataReader + ?Sized,
{
    let keep = match take {
        Take::All => usize::MAX,
        Take::First => 1,
        Take::Single => 2,
    };
    let mut rows = Vec::new();
    while let Some(raw) = reader.next_row().await? {
        command.check_cancelled()?;
        if rows.len() < keep {
            rows.push(row_reader.read(&raw)?);
        }
    }
    Ok(rows)
}

pub(super) async fn drain<R>(reader: &mut R) -> Result<OutputValues, SqlMapperError>
where
    R: AsyncDataReader + ?Sized,
{
    while reader.next_result().await? {}
    Ok(reader.output_values())
}

async fn query_with<C, T, F>(
    conn: &mut C,
    def: &CommandDefinition<'_>,
    identity: &Identity,
    take: Take,
    compile: F,
) -> Result<Vec<T>, SqlMapperError>
where
    C: AsyncConnection + ?Sized,
    T: Send + 'static,
    F: FnOnce(&[Column]) -> Result<RowReader<T>, SqlMapperError> + Send,
{
    let info = cache::lookup(identity)?;
    let command = def.build_command(&info, take.behavior())?;
    let opened = open_if_closed(conn).await?;
    let result = cancellable(&command, async {
        let mut reader = conn.execute_reader(&command).await?;
        let columns = reader.columns().to_vec();
        let rows = if columns.is_empty() {
            Vec::new()
        } else {
            let row_reader = info.reader_for(&columns, compile)?;
            collect_rows(reader.as_mut(), &row_reader, take, &command).await?
        };
        let outputs = drain(reader.as_mut()).await?;
        def.complete(&outputs)?;
        Ok(rows)
    })
    .await;
    release(conn, opened, result).await
}

async fn execute<C>(conn: &mut C, def: CommandDefinition<'_>) -> Result<u64, SqlMapperError>
where
    C: AsyncConnection + ?Sized,
{
    let info = cache::lookup(&def.identity(ExecutionKind::Execute))?;
    let command = def.build_command(&info, Take::All.behavior())?;
    let opened = open_if_closed(conn).await?;
    let result = cancellable(&command, async {
        let outcome = conn.execute_non_query(&command).await?;
        def.complete(&outcome.outputs)?;
        Ok(outcome.rows_affected)
    })
    .await;
    release(conn, opened, result).await
}

async fn execute_many<C, P>(
    conn: &mut C,
    def: CommandDefinition<'_>,
    param_sets: &[P],
) -> Result<u64, SqlMapperError>
where
    C: AsyncConnection + ?Sized,
    P: ParamSource,
{
    let Some(first) = param_sets.first() else {
        return Ok(0);
    };
    let identity = def
        .identity(ExecutionKind::Execute)
        .with_param_shape(first.shape());
    let info = cache::lookup(&identity)?;
    let opened = open_if_closed(conn).await?;
    let result = async {
        let mut total = 0;
        for set in param_sets {
            let per_set = def.clone().params_dyn(Some(set as &dyn ParamSource));
            let command = per_set.build_command(&info, Take::All.behavior())?;
            let outcome = cancellable(&command, conn.execute_non_query(&command)).await?;
            per_set.complete(&outcome.outputs)?;
            total += outcome.rows_affected;
        }
        Ok(total)
    }
    .await;
    release(conn, opened, result).await
}

async fn execute_scalar<C, T>(conn: &mut C, def: CommandDefinition<'_>) -> Result<T, SqlMapperError>
where
    C: AsyncConnection + ?Sized,
    T: FromDbValue + Send + 'static,
{
    let identity = def.identity(ExecutionKind::Scalar).with_target::<T>();
    let info = cache::lookup(&identity)?;
    let command = def.build_command(&info, Take::First.behavior())?;
    let opened = open_if_closed(conn).await?;
    let result = cancellable(&command, async {
        let mut reader = conn.execute_reader(&command).await?;
        let column = reader
            .columns()
            .first()
            .map(|c| c.name.clone())
            .unwrap_or_default();
        let first = reader.next_row().await?;
        while reader.next_row().await?.is_some() {}
        let outputs = drain(reader.as_mut()).await?;
        def.complete(&outputs)?;
        scalar_value(first, &column)
    })
    .await;
    release(conn, opened, result).await
}

async fn query_rows<C, T>(
    conn: &mut C,
    def: CommandDefinition<'_>,
    take: Take,
) -> Result<Vec<T>, SqlMapperError>
where
    C: AsyncConnection + ?Sized,
    T: FromRow,
{
    let identity = def.identity(ExecutionKind::Query).with_target::<T>();
    query_with(conn, &def, &identity, take, compile_all::<T>).await
}

async fn query_map<C, Tup, R, F>(
    conn: &mut C,
    def: CommandDefinition<'_>,
    split_on: &str,
    map: F,
) -> Result<Vec<R>, SqlMapperError>
where
    C: AsyncConnection + ?Sized,
    Tup: SplitTuple,
    F: FnMut(Tup) -> R,
{
    let identity = def
        .identity(ExecutionKind::Query)
        .with_target::<Tup>()
        .with_split_on(split_on);
    let rows = query_with(conn, &def, &identity, Take::All, |columns| {
        Tup::compile(columns, split_on)
    })
    .await?;
    Ok(rows.into_iter().map(map).collect())
}

/// Mapping operations over any [`AsyncConnection`].
///
/// Mirrors [`super::SqlMapper`]. A command carrying a cancellation token stops at the next
/// suspension point once the token fires and returns [`SqlMapperError::Cancelled`].
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// # async fn demo() -> Result<(), SqlMapperError> {
/// let mut conn = AsyncSqliteConnection::in_memory();
/// conn.open().await?;
/// let answer: i64 = conn.execute_scalar("select 6 * 7").await?;
/// assert_eq!(answer, 42);
/// conn.close().await?;
/// # Ok(())
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(demo()).unwrap();
/// ```
#[async_trait]
pub trait AsyncSqlMapper: AsyncConnection {
    /// Start a fluent command on this connection.
    fn sql<'c, 'p>(&'c mut self, sql: impl Into<Cow<'p, str>>) -> AsyncSqlCommand<'c, 'p, Self> {
        AsyncSqlCommand {
            conn: self,
            definition: CommandDefinition::new(sql),
        }
    }

    /// # Errors
    /// Returns binding, executor and cancellation errors.
    async fn execute<'p, D>(&mut self, def: D) -> Result<u64, SqlMapperError>
    where
        D: Into<CommandDefinition<'p>> + Send;

    /// # Errors
    /// Stops at the first failing execution and returns its error.
    async fn execute_many<'p, D, P>(
        &mut self,
        def: D,
        param_sets: &[P],
    ) -> Result<u64, SqlMapperError>
    where
        D: Into<CommandDefinition<'p>> + Send,
        P: ParamSource;

    /// # Errors
    /// Returns a conversion error when the value does not fit `T`.
    async fn execute_scalar<'p, T, D>(&mut self, def: D) -> Result<T, SqlMapperError>
    where
        T: FromDbValue + Send + 'static,
        D: Into<CommandDefinition<'p>> + Send;

    /// # Errors
    /// Returns binding, executor, deserialization and cancellation errors.
    async fn query<'p, T, D>(&mut self, def: D) -> Result<Vec<T>, SqlMapperError>
    where
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send;

    /// Map rows lazily with [`AsyncRows::next`].
    ///
    /// # Errors
    /// Returns binding, executor and reader-build errors before the first row.
    async fn query_unbuffered<'c, 'p, T, D>(
        &'c mut self,
        def: D,
    ) -> Result<AsyncRows<'c, T>, SqlMapperError>
    where
        Self: Sized,
        'p: 'c,
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send;

    /// # Errors
    /// Returns [`SqlMapperError::NoRows`] when the result set is empty.
    async fn query_first<'p, T, D>(&mut self, def: D) -> Result<T, SqlMapperError>
    where
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send;

    /// # Errors
    /// Returns binding, executor and deserialization errors.
    async fn query_first_or_default<'p, T, D>(
        &mut self,
        def: D,
    ) -> Result<Option<T>, SqlMapperError>
    where
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send;

    /// # Errors
    /// Returns [`SqlMapperError::NoRows`] or [`SqlMapperError::MultipleRows`].
    async fn query_single<'p, T, D>(&mut self, def: D) -> Result<T, SqlMapperError>
    where
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send;

    /// # Errors
    /// Returns [`SqlMapperError::MultipleRows`] when more than one row comes back.
    async fn query_single_or_default<'p, T, D>(
        &mut self,
        def: D,
    ) -> Result<Option<T>, SqlMapperError>
    where
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send;

    /// # Errors
    /// Returns [`SqlMapperError::SplitConfiguration`] when the split columns cannot be found.
    async fn query_map<'p, Tup, R, F, D>(
        &mut self,
        def: D,
        split_on: &str,
        map: F,
    ) -> Result<Vec<R>, SqlMapperError>
    where
        Tup: SplitTuple,
        R: Send,
        F: FnMut(Tup) -> R + Send,
        D: Into<CommandDefinition<'p>> + Send;

    /// # Errors
    /// Returns binding and executor errors.
    async fn query_multiple<'c, 'p, D>(
        &'c mut self,
        def: D,
    ) -> Result<AsyncGridReader<'c>, SqlMapperError>
    where
        Self: Sized,
        'p: 'c,
        D: Into<CommandDefinition<'p>> + Send;
}

#[async_trait]
impl<C: AsyncConnection + ?Sized> AsyncSqlMapper for C {
    async fn execute<'p, D>(&mut self, def: D) -> Result<u64, SqlMapperError>
    where
        D: Into<CommandDefinition<'p>> + Send,
    {
        execute(self, def.into()).await
    }

    async fn execute_many<'p, D, P>(
        &mut self,
        def: D,
        param_sets: &[P],
    ) -> Result<u64, SqlMapperError>
    where
        D: Into<CommandDefinition<'p>> + Send,
        P: ParamSource,
    {
        execute_many(self, def.into(), param_sets).await
    }

    async fn execute_scalar<'p, T, D>(&mut self, def: D) -> Result<T, SqlMapperError>
    where
        T: FromDbValue + Send + 'static,
        D: Into<CommandDefinition<'p>> + Send,
    {
        execute_scalar(self, def.into()).await
    }

    async fn query<'p, T, D>(&mut self, def: D) -> Result<Vec<T>, SqlMapperError>
    where
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send,
    {
        query_rows(self, def.into(), Take::All).await
    }

    async fn query_unbuffered<'c, 'p, T, D>(
        &'c mut self,
        def: D,
    ) -> Result<AsyncRows<'c, T>, SqlMapperError>
    where
        Self: Sized,
        'p: 'c,
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send,
    {
        let def = def.into();
        let flags = def.flags.without(CommandFlags::BUFFERED);
        let identity = def
            .identity(ExecutionKind::Query)
            .with_target::<T>()
            .with_flags(flags);
        let info = cache::lookup(&identity)?;
        let command = def.build_command(&info, Take::All.behavior())?;
        let opened = open_if_closed(self).await?;

        let prepared = cancellable(&command, async {
            let reader = self.execute_reader(&command).await?;
            let columns = reader.columns().to_vec();
            if columns.is_empty() {
                Ok((reader, None))
            } else {
                let row_reader = info.reader_for(&columns, compile_all::<T>)?;
                Ok((reader, Some(row_reader)))
            }
        })
        .await;
        let (reader, row_reader) = match prepared {
            Ok(parts) => parts,
            Err(err) => return release(self, opened, Err(err)).await,
        };

        Ok(AsyncRows {
            reader: Some(reader),
            row_reader,
            command,
            params: def.params,
            conn: if opened {
                Some(self as &mut dyn AsyncConnection)
            } else {
                None
            },
        })
    }

    async fn query_first<'p, T, D>(&mut self, def: D) -> Result<T, SqlMapperError>
    where
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send,
    {
        query_rows(self, def.into(), Take::First)
            .await?
            .into_iter()
            .next()
            .ok_or(SqlMapperError::NoRows)
    }

    async fn query_first_or_default<'p, T, D>(
        &mut self,
        def: D,
    ) -> Result<Option<T>, SqlMapperError>
    where
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send,
    {
        Ok(query_rows(self, def.into(), Take::First)
            .await?
            .into_iter()
            .next())
    }

    async fn query_single<'p, T, D>(&mut self, def: D) -> Result<T, SqlMapperError>
    where
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send,
    {
        exactly_one(query_rows(self, def.into(), Take::Single).await?)
    }

    async fn query_single_or_default<'p, T, D>(
        &mut self,
        def: D,
    ) -> Result<Option<T>, SqlMapperError>
    where
        T: FromRow,
        D: Into<CommandDefinition<'p>> + Send,
    {
        at_most_one(query_rows(self, def.into(), Take::Single).await?)
    }

    async fn query_map<'p, Tup, R, F, D>(
        &mut self,
        def: D,
        split_on: &str,
        map: F,
    ) -> Result<Vec<R>, SqlMapperError>
    where
        Tup: SplitTuple,
        R: Send,
        F: FnMut(Tup) -> R + Send,
        D: Into<CommandDefinition<'p>> + Send,
    {
        query_map(self, def.into(), split_on, map).await
    }

    async fn query_multiple<'c, 'p, D>(
        &'c mut self,
        def: D,
    ) -> Result<AsyncGridReader<'c>, SqlMapperError>
    where
        Self: Sized,
        'p: 'c,
        D: Into<CommandDefinition<'p>> + Send,
    {
        let def = def.into();
        let identity = def.identity(ExecutionKind::Grid);
        let info = cache::lookup(&identity)?;
        let mut command = def.build_command(&info, Take::All.behavior())?;
        command.behavior.single_result = false;
        let opened = open_if_closed(self).await?;
        let reader = match cancellable(&command, self.execute_reader(&command)).await {
            Ok(reader) => reader,
            Err(err) => return release(self, opened, Err(err)).await,
        };
        let conn = if opened {
            Some(self as &mut dyn AsyncConnection)
        } else {
            None
        };
        Ok(AsyncGridReader::new(reader, identity, command, def.params, conn))
    }
}

/// Lazily mapped rows of an unbuffered async query.
///
/// Dropping the rows before they are exhausted releases the reader but cannot close a
/// connection opened for the call; use [`close`](Self::close) for that.
pub struct AsyncRows<'c, T> {
    reader: Option<Box<dyn AsyncDataReader>>,
    row_reader: Option<RowReader<T>>,
    command: Command,
    params: Option<&'c dyn ParamSource>,
    conn: Option<&'c mut dyn AsyncConnection>,
}

impl<T: Send> AsyncRows<'_, T> {
    /// The next mapped row, or `None` once the result set is exhausted.
    pub async fn next(&mut self) -> Option<Result<T, SqlMapperError>> {
        let next = {
            let reader = self.reader.as_mut()?;
            cancellable(&self.command, reader.next_row()).await
        };
        match next {
            Ok(Some(raw)) => self.row_reader.as_ref().map(|r| r.read(&raw)),
            Ok(None) => self.finish().await.err().map(Err),
            Err(err) => {
                if let Err(close_err) = self.close().await {
                    debug!(error = %close_err, "failed to release unbuffered query");
                }
                Some(Err(err))
            }
        }
    }

    /// Read every remaining row.
    ///
    /// # Errors
    /// Returns the first mapping or executor error.
    pub async fn try_collect(mut self) -> Result<Vec<T>, SqlMapperError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Release the reader and close a connection opened for the call.
    ///
    /// # Errors
    /// Returns the error raised while closing the connection.
    pub async fn close(&mut self) -> Result<(), SqlMapperError> {
        self.reader = None;
        self.row_reader = None;
        match self.conn.take() {
            Some(conn) => {
                debug!("closing connection opened for an unbuffered query");
                conn.close().await
            }
            None => Ok(()),
        }
    }

    async fn finish(&mut self) -> Result<(), SqlMapperError> {
        let drained = match self.reader.as_mut() {
            Some(reader) => drain(reader.as_mut()).await,
            None => Ok(OutputValues::new()),
        };
        let completed = drained.and_then(|outputs| match self.params {
            Some(params) => params.on_completed(&outputs),
            None => Ok(()),
        });
        let closed = self.close().await;
        completed.and(closed)
    }
}

impl<T> Drop for AsyncRows<'_, T> {
    fn drop(&mut self) {
        if self.conn.is_some() && self.reader.is_some() {
            debug!("unbuffered query dropped before completion; connection left open");
        }
    }
}

/// Fluent command bound to an asynchronous connection.
pub struct AsyncSqlCommand<'c, 'p, C: ?Sized> {
    conn: &'c mut C,
    definition: CommandDefinition<'p>,
}

impl<'c, 'p, C: ?Sized> AsyncSqlCommand<'c, 'p, C> {
    super::fluent_setters!('p);
}

impl<'c, 'p, C: AsyncConnection + ?Sized> AsyncSqlCommand<'c, 'p, C> {
    /// # Errors
    /// See [`AsyncSqlMapper::execute`].
    pub async fn execute(self) -> Result<u64, SqlMapperError> {
        execute(self.conn, self.definition).await
    }

    /// # Errors
    /// See [`AsyncSqlMapper::execute_many`].
    pub async fn execute_many<P: ParamSource>(
        self,
        param_sets: &[P],
    ) -> Result<u64, SqlMapperError> {
        execute_many(self.conn, self.definition, param_sets).await
    }

    /// # Errors
    /// See [`AsyncSqlMapper::execute_scalar`].
    pub async fn execute_scalar<T: FromDbValue + Send + 'static>(
        self,
    ) -> Result<T, SqlMapperError> {
        execute_scalar(self.conn, self.definition).await
    }

    /// # Errors
    /// See [`AsyncSqlMapper::query`].
    pub async fn query<T: FromRow>(self) -> Result<Vec<T>, SqlMapperError> {
        query_rows(self.conn, self.definition, Take::All).await
    }

    /// # Errors
    /// See [`AsyncSqlMapper::query_first`].
    pub async fn query_first<T: FromRow>(self) -> Result<T, SqlMapperError> {
        query_rows(self.conn, self.definition, Take::First)
            .await?
            .into_iter()
            .next()
            .ok_or(SqlMapperError::NoRows)
    }

    /// # Errors
    /// See [`AsyncSqlMapper::query_first_or_default`].
    pub async fn query_first_or_default<T: FromRow>(self) -> Result<Option<T>, SqlMapperError> {
        Ok(query_rows(self.conn, self.definition, Take::First)
            .await?
            .into_iter()
            .next())
    }

    /// # Errors
    /// See [`AsyncSqlMapper::query_single`].
    pub async fn query_single<T: FromRow>(self) -> Result<T, SqlMapperError> {
        exactly_one(query_rows(self.conn, self.definition, Take::Single).await?)
    }

    /// # Errors
    /// See [`AsyncSqlMapper::query_single_or_default`].
    pub async fn query_single_or_default<T: FromRow>(self) -> Result<Option<T>, SqlMapperError> {
        at_most_one(query_rows(self.conn, self.definition, Take::Single).await?)
    }

    /// # Errors
    /// See [`AsyncSqlMapper::query_map`].
    pub async fn query_map<Tup, R, F>(
        self,
        split_on: &str,
        map: F,
    ) -> Result<Vec<R>, SqlMapperError>
    where
        Tup: SplitTuple,
        F: FnMut(Tup) -> R,
    {
        query_map(self.conn, self.definition, split_on, map).await
    }
}

impl<'c, 'p: 'c, C: AsyncConnection> AsyncSqlCommand<'c, 'p, C> {
    /// # Errors
    /// See [`AsyncSqlMapper::query_unbuffered`].
    pub async fn query_unbuffered<T: FromRow>(self) -> Result<AsyncRows<'c, T>, SqlMapperError> {
        self.conn.query_unbuffered(self.definition).await
    }

    /// # Errors
    /// See [`AsyncSqlMapper::query_multiple`].
    pub async fn query_multiple(self) -> Result<AsyncGridReader<'c>, SqlMapperError> {
        self.conn.query_multiple(self.definition).await
    }
}

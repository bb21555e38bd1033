use std::any::type_name;
use std::borrow::Cow;

use tracing::debug;

use super::{
    CommandDefinition, GridReader, Take, at_most_one, exactly_one, open_if_closed, with_open,
};
use crate::cache::{self, CommandFlags, ExecutionKind, Identity};
use crate::error::SqlMapperError;
use crate::executor::{Column, Command, Connection, DataReader, OutputValues};
use crate::mapping::row::conversion_error;
use crate::mapping::{FromDbValue, FromRow, RowReader, SplitTuple};
use crate::params::ParamSource;
use crate::types::DbValue;

/// Read the rows of the current set. `Take::First` keeps one row and `Take::Single` keeps two;
/// the remaining rows are read and discarded.
pub(super) fn collect_rows<T, R>(
    reader: &mut R,
    row_reader: &RowReader<T>,
    take: Take,
    command: &Command,
) -> Result<Vec<T>, SqlMapperError>
where
    R: DataReader + ?Sized,
{
    let keep = match take {
        Take::All => usize::MAX,
        Take::First => 1,
        Take::Single => 2,
    };
    let mut rows = Vec::new();
    while let Some(raw) = reader.next_row()? {
        command.check_cancelled()?;
        if rows.len() < keep {
            rows.push(row_reader.read(&raw)?);
        }
    }
    Ok(rows)
}

/// Skip the remaining result sets; output values are complete afterwards.
pub(super) fn drain<R: DataReader + ?Sized>(
    reader: &mut R,
) -> Result<OutputValues, SqlMapperError> {
    while reader.next_result()? {}
    Ok(reader.output_values())
}

fn query_with<C, T, F>(
    conn: &mut C,
    def: &CommandDefinition<'_>,
    identity: &Identity,
    take: Take,
    compile: F,
) -> Result<Vec<T>, SqlMapperError>
where
    C: Connection + ?Sized,
    T: Send + 'static,
    F: FnOnce(&[Column]) -> Result<RowReader<T>, SqlMapperError>,
{
    let info = cache::lookup(identity)?;
    let command = def.build_command(&info, take.behavior())?;
    with_open(conn, |conn| {
        command.check_cancelled()?;
        let mut reader = conn.execute_reader(&command)?;
        let columns = reader.columns().to_vec();
        let rows = if columns.is_empty() {
            Vec::new()
        } else {
            let row_reader = info.reader_for(&columns, compile)?;
            collect_rows(reader.as_mut(), &row_reader, take, &command)?
        };
        let outputs = drain(reader.as_mut())?;
        def.complete(&outputs)?;
        Ok(rows)
    })
}

/// Convert the first column of `row`; a missing row or a null reads as `T::null_value()`.
pub(super) fn scalar_value<T: FromDbValue>(
    row: Option<Vec<DbValue>>,
    column: &str,
) -> Result<T, SqlMapperError> {
    match row.and_then(|row| row.into_iter().next()) {
        None | Some(DbValue::Null) => Ok(T::null_value()),
        Some(value) => T::from_db_value(&value).map_err(|err| {
            conversion_error(0, column, &value, type_name::<T>().to_string(), err)
        }),
    }
}

pub(super) fn compile_all<T: FromRow>(columns: &[Column]) -> Result<RowReader<T>, SqlMapperError> {
    T::compile(columns, 0..columns.len())
}

/// Mapping operations over any synchronous [`Connection`].
///
/// Every method accepts SQL text directly or a [`CommandDefinition`]. A closed connection is
/// opened for the duration of the call.
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// # fn demo() -> Result<(), SqlMapperError> {
/// let mut conn = SqliteConnection::in_memory();
/// conn.open()?;
/// conn.execute("create table t (id integer, name text)")?;
/// let params = [("id", DbValue::Int(1)), ("name", DbValue::Text("ann".into()))];
/// conn.execute(CommandDefinition::new("insert into t values (@id, @name)").params(&params))?;
/// let names: Vec<String> = conn.query("select name from t")?;
/// assert_eq!(names, vec!["ann".to_string()]);
/// # Ok(())
/// # }
/// # demo().unwrap();
/// ```
pub trait SqlMapper: Connection {
    /// Start a fluent command on this connection.
    fn sql<'c, 'p>(&'c mut self, sql: impl Into<Cow<'p, str>>) -> SqlCommand<'c, 'p, Self> {
        SqlCommand {
            conn: self,
            definition: CommandDefinition::new(sql),
        }
    }

    /// Run a command and return the number of affected rows.
    ///
    /// # Errors
    /// Returns binding, executor and cancellation errors.
    fn execute<'p>(
        &mut self,
        def: impl Into<CommandDefinition<'p>>,
    ) -> Result<u64, SqlMapperError> {
        let def = def.into();
        let info = cache::lookup(&def.identity(ExecutionKind::Execute))?;
        let command = def.build_command(&info, Take::All.behavior())?;
        with_open(self, |conn| {
            command.check_cancelled()?;
            let outcome = conn.execute_non_query(&command)?;
            def.complete(&outcome.outputs)?;
            Ok(outcome.rows_affected)
        })
    }

    /// Run a command once per parameter set and sum the affected rows.
    ///
    /// # Errors
    /// Stops at the first failing execution and returns its error.
    fn execute_many<'p, P: ParamSource>(
        &mut self,
        def: impl Into<CommandDefinition<'p>>,
        param_sets: &[P],
    ) -> Result<u64, SqlMapperError> {
        let def = def.into();
        let Some(first) = param_sets.first() else {
            return Ok(0);
        };
        let identity = def
            .identity(ExecutionKind::Execute)
            .with_param_shape(first.shape());
        let info = cache::lookup(&identity)?;
        with_open(self, |conn| {
            let mut total = 0;
            for set in param_sets {
                let per_set = def.clone().params_dyn(Some(set as &dyn ParamSource));
                let command = per_set.build_command(&info, Take::All.behavior())?;
                command.check_cancelled()?;
                let outcome = conn.execute_non_query(&command)?;
                per_set.complete(&outcome.outputs)?;
                total += outcome.rows_affected;
            }
            Ok(total)
        })
    }

    /// First column of the first row; no rows or null read as `T`'s null value.
    ///
    /// # Errors
    /// Returns a conversion error when the value does not fit `T`.
    fn execute_scalar<'p, T: FromDbValue + 'static>(
        &mut self,
        def: impl Into<CommandDefinition<'p>>,
    ) -> Result<T, SqlMapperError> {
        let def = def.into();
        let identity = def.identity(ExecutionKind::Scalar).with_target::<T>();
        let info = cache::lookup(&identity)?;
        let command = def.build_command(&info, Take::First.behavior())?;
        with_open(self, |conn| {
            command.check_cancelled()?;
            let mut reader = conn.execute_reader(&command)?;
            let column = reader
                .columns()
                .first()
                .map(|c| c.name.clone())
                .unwrap_or_default();
            let first = reader.next_row()?;
            while reader.next_row()?.is_some() {}
            let outputs = drain(reader.as_mut())?;
            def.complete(&outputs)?;
            scalar_value(first, &column)
        })
    }

    /// Map every row of the first result set to `T`.
    ///
    /// # Errors
    /// Returns binding, executor, deserialization and cancellation errors.
    fn query<'p, T: FromRow>(
        &mut self,
        def: impl Into<CommandDefinition<'p>>,
    ) -> Result<Vec<T>, SqlMapperError> {
        let def = def.into();
        let identity = def.identity(ExecutionKind::Query).with_target::<T>();
        query_with(self, &def, &identity, Take::All, compile_all::<T>)
    }

    /// Map rows lazily; the reader (and a connection opened for the call) is released when the
    /// iterator is exhausted or dropped.
    ///
    /// # Errors
    /// Returns binding, executor and reader-build errors before the first row.
    fn query_unbuffered<'c, 'p: 'c, T: FromRow>(
        &'c mut self,
        def: impl Into<CommandDefinition<'p>>,
    ) -> Result<Rows<'c, T>, SqlMapperError>
    where
        Self: Sized,
    {
        let def = def.into();
        let flags = def.flags.without(CommandFlags::BUFFERED);
        let identity = def
            .identity(ExecutionKind::Query)
            .with_target::<T>()
            .with_flags(flags);
        let info = cache::lookup(&identity)?;
        let command = def.build_command(&info, Take::All.behavior())?;
        let opened = open_if_closed(self)?;

        let prepared = command
            .check_cancelled()
            .and_then(|()| self.execute_reader(&command))
            .and_then(|reader| {
                let columns = reader.columns().to_vec();
                if columns.is_empty() {
                    Ok((reader, None))
                } else {
                    info.reader_for(&columns, compile_all::<T>)
                        .map(|row_reader| (reader, Some(row_reader)))
                }
            });
        let (reader, row_reader) = match prepared {
            Ok(parts) => parts,
            Err(err) => {
                if opened {
                    let _ = self.close();
                }
                return Err(err);
            }
        };

        Ok(Rows {
            reader: Some(reader),
            row_reader,
            command,
            params: def.params,
            conn: if opened {
                Some(self as &mut dyn Connection)
            } else {
                None
            },
        })
    }

    /// The first row mapped to `T`.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::NoRows`] when the result set is empty.
    fn query_first<'p, T: FromRow>(
        &mut self,
        def: impl Into<CommandDefinition<'p>>,
    ) -> Result<T, SqlMapperError> {
        let def = def.into();
        let identity = def.identity(ExecutionKind::Query).with_target::<T>();
        query_with(self, &def, &identity, Take::First, compile_all::<T>)?
            .into_iter()
            .next()
            .ok_or(SqlMapperError::NoRows)
    }

    /// The first row mapped to `T`, or `None` for an empty result set.
    ///
    /// # Errors
    /// Returns binding, executor and deserialization errors.
    fn query_first_or_default<'p, T: FromRow>(
        &mut self,
        def: impl Into<CommandDefinition<'p>>,
    ) -> Result<Option<T>, SqlMapperError> {
        let def = def.into();
        let identity = def.identity(ExecutionKind::Query).with_target::<T>();
        Ok(query_with(self, &def, &identity, Take::First, compile_all::<T>)?
            .into_iter()
            .next())
    }

    /// The only row mapped to `T`.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::NoRows`] or [`SqlMapperError::MultipleRows`].
    fn query_single<'p, T: FromRow>(
        &mut self,
        def: impl Into<CommandDefinition<'p>>,
    ) -> Result<T, SqlMapperError> {
        let def = def.into();
        let identity = def.identity(ExecutionKind::Query).with_target::<T>();
        exactly_one(query_with(self, &def, &identity, Take::Single, compile_all::<T>)?)
    }

    /// The only row mapped to `T`, or `None` for an empty result set.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::MultipleRows`] when more than one row comes back.
    fn query_single_or_default<'p, T: FromRow>(
        &mut self,
        def: impl Into<CommandDefinition<'p>>,
    ) -> Result<Option<T>, SqlMapperError> {
        let def = def.into();
        let identity = def.identity(ExecutionKind::Query).with_target::<T>();
        at_most_one(query_with(self, &def, &identity, Take::Single, compile_all::<T>)?)
    }

    /// Split each row at `split_on` columns, map the parts to the tuple's types and combine them.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::SplitConfiguration`] before any row is read when the split
    /// columns cannot be found.
    fn query_map<'p, Tup, R, F>(
        &mut self,
        def: impl Into<CommandDefinition<'p>>,
        split_on: &str,
        map: F,
    ) -> Result<Vec<R>, SqlMapperError>
    where
        Tup: SplitTuple,
        F: FnMut(Tup) -> R,
    {
        let def = def.into();
        let identity = def
            .identity(ExecutionKind::Query)
            .with_target::<Tup>()
            .with_split_on(split_on);
        let rows = query_with(self, &def, &identity, Take::All, |columns| {
            Tup::compile(columns, split_on)
        })?;
        Ok(rows.into_iter().map(map).collect())
    }

    /// Run a command producing several result sets and read them one after another.
    ///
    /// # Errors
    /// Returns binding and executor errors.
    fn query_multiple<'c, 'p: 'c>(
        &'c mut self,
        def: impl Into<CommandDefinition<'p>>,
    ) -> Result<GridReader<'c>, SqlMapperError>
    where
        Self: Sized,
    {
        let def = def.into();
        let identity = def.identity(ExecutionKind::Grid);
        let info = cache::lookup(&identity)?;
        let mut command = def.build_command(&info, Take::All.behavior())?;
        command.behavior.single_result = false;
        let opened = open_if_closed(self)?;
        let reader = match command
            .check_cancelled()
            .and_then(|()| self.execute_reader(&command))
        {
            Ok(reader) => reader,
            Err(err) => {
                if opened {
                    let _ = self.close();
                }
                return Err(err);
            }
        };
        let conn = if opened {
            Some(self as &mut dyn Connection)
        } else {
            None
        };
        Ok(GridReader::new(reader, identity, command, def.params, conn))
    }
}

impl<C: Connection + ?Sized> SqlMapper for C {}

/// Lazily mapped rows of an unbuffered query.
pub struct Rows<'c, T> {
    reader: Option<Box<dyn DataReader + Send>>,
    row_reader: Option<RowReader<T>>,
    command: Command,
    params: Option<&'c dyn ParamSource>,
    conn: Option<&'c mut dyn Connection>,
}

impl<T> Rows<'_, T> {
    fn finish(&mut self) -> Result<(), SqlMapperError> {
        let drained = match self.reader.as_mut() {
            Some(reader) => drain(reader.as_mut()),
            None => Ok(OutputValues::new()),
        };
        let completed = drained.and_then(|outputs| match self.params {
            Some(params) => params.on_completed(&outputs),
            None => Ok(()),
        });
        let released = self.release();
        completed.and(released)
    }

    fn release(&mut self) -> Result<(), SqlMapperError> {
        self.reader = None;
        self.row_reader = None;
        match self.conn.take() {
            Some(conn) => {
                debug!("closing connection opened for an unbuffered query");
                conn.close()
            }
            None => Ok(()),
        }
    }
}

impl<T> Iterator for Rows<'_, T> {
    type Item = Result<T, SqlMapperError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.as_ref()?;
        if let Err(err) = self.command.check_cancelled() {
            let _ = self.release();
            return Some(Err(err));
        }
        let next = self.reader.as_mut()?.next_row();
        match next {
            Ok(Some(raw)) => match self.row_reader.as_ref() {
                Some(row_reader) => Some(row_reader.read(&raw)),
                None => None,
            },
            Ok(None) => self.finish().err().map(Err),
            Err(err) => {
                let _ = self.release();
                Some(Err(err))
            }
        }
    }
}

impl<T> Drop for Rows<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            debug!(error = %err, "failed to release unbuffered query");
        }
    }
}

/// Fluent command bound to a synchronous connection.
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// # fn demo() -> Result<(), SqlMapperError> {
/// let mut conn = SqliteConnection::in_memory();
/// conn.open()?;
/// let ids = vec![1_i64, 2, 3];
/// let params = sql_mapper::params! { "ids" => ids };
/// let found: Vec<i64> = conn
///     .sql("select value from (select 1 as value union all select 4) where value in @ids")
///     .params(&params)
///     .query()?;
/// assert_eq!(found, vec![1]);
/// # Ok(())
/// # }
/// # demo().unwrap();
/// ```
pub struct SqlCommand<'c, 'p, C: ?Sized> {
    conn: &'c mut C,
    definition: CommandDefinition<'p>,
}

impl<'c, 'p, C: ?Sized> SqlCommand<'c, 'p, C> {
    super::fluent_setters!('p);
}

impl<'c, 'p, C: Connection + ?Sized> SqlCommand<'c, 'p, C> {
    /// # Errors
    /// See [`SqlMapper::execute`].
    pub fn execute(self) -> Result<u64, SqlMapperError> {
        self.conn.execute(self.definition)
    }

    /// # Errors
    /// See [`SqlMapper::execute_many`].
    pub fn execute_many<P: ParamSource>(self, param_sets: &[P]) -> Result<u64, SqlMapperError> {
        self.conn.execute_many(self.definition, param_sets)
    }

    /// # Errors
    /// See [`SqlMapper::execute_scalar`].
    pub fn execute_scalar<T: FromDbValue + 'static>(self) -> Result<T, SqlMapperError> {
        self.conn.execute_scalar(self.definition)
    }

    /// # Errors
    /// See [`SqlMapper::query`].
    pub fn query<T: FromRow>(self) -> Result<Vec<T>, SqlMapperError> {
        self.conn.query(self.definition)
    }

    /// # Errors
    /// See [`SqlMapper::query_first`].
    pub fn query_first<T: FromRow>(self) -> Result<T, SqlMapperError> {
        self.conn.query_first(self.definition)
    }

    /// # Errors
    /// See [`SqlMapper::query_first_or_default`].
    pub fn query_first_or_default<T: FromRow>(self) -> Result<Option<T>, SqlMapperError> {
        self.conn.query_first_or_default(self.definition)
    }

    /// # Errors
    /// See [`SqlMapper::query_single`].
    pub fn query_single<T: FromRow>(self) -> Result<T, SqlMapperError> {
        self.conn.query_single(self.definition)
    }

    /// # Errors
    /// See [`SqlMapper::query_single_or_default`].
    pub fn query_single_or_default<T: FromRow>(self) -> Result<Option<T>, SqlMapperError> {
        self.conn.query_single_or_default(self.definition)
    }

    /// # Errors
    /// See [`SqlMapper::query_map`].
    pub fn query_map<Tup, R, F>(self, split_on: &str, map: F) -> Result<Vec<R>, SqlMapperError>
    where
        Tup: SplitTuple,
        F: FnMut(Tup) -> R,
    {
        self.conn.query_map(self.definition, split_on, map)
    }
}

impl<'c, 'p: 'c, C: Connection> SqlCommand<'c, 'p, C> {
    /// # Errors
    /// See [`SqlMapper::query_unbuffered`].
    pub fn query_unbuffered<T: FromRow>(self) -> Result<Rows<'c, T>, SqlMapperError> {
        self.conn.query_unbuffered(self.definition)
    }

    /// # Errors
    /// See [`SqlMapper::query_multiple`].
    pub fn query_multiple(self) -> Result<GridReader<'c>, SqlMapperError> {
        self.conn.query_multiple(self.definition)
    }
}

use tracing::debug;

use super::sync_ops::{collect_rows, compile_all, drain};
use super::{Take, at_most_one, exactly_one};
use crate::cache::{self, Identity};
use crate::error::SqlMapperError;
use crate::executor::{Column, Command, Connection, DataReader, OutputValues};
use crate::mapping::{FromRow, RowReader, SplitTuple};
use crate::params::ParamSource;

/// Sequential access to the result sets of one command.
///
/// Each `read*` call consumes exactly one result set, in order. Once the last set has been read
/// (or the reader is disposed) output values are handed to the parameter source and a
/// connection opened for the call is closed.
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// # fn demo() -> Result<(), SqlMapperError> {
/// let mut conn = SqliteConnection::in_memory();
/// let mut grid = conn.query_multiple("select 1; select 'a' union all select 'b'")?;
/// let first: i64 = grid.read_single()?;
/// let second: Vec<String> = grid.read()?;
/// assert_eq!(first, 1);
/// assert_eq!(second.len(), 2);
/// assert!(grid.is_consumed());
/// # Ok(())
/// # }
/// # demo().unwrap();
/// ```
pub struct GridReader<'c> {
    reader: Option<Box<dyn DataReader + Send>>,
    identity: Identity,
    command: Command,
    params: Option<&'c dyn ParamSource>,
    conn: Option<&'c mut dyn Connection>,
    grid_index: usize,
}

impl<'c> GridReader<'c> {
    pub(crate) fn new(
        reader: Box<dyn DataReader + Send>,
        identity: Identity,
        command: Command,
        params: Option<&'c dyn ParamSource>,
        conn: Option<&'c mut dyn Connection>,
    ) -> Self {
        Self {
            reader: Some(reader),
            identity,
            command,
            params,
            conn,
            grid_index: 0,
        }
    }

    /// Every row of the next result set.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::Disposed`] once every set has been read.
    pub fn read<T: FromRow>(&mut self) -> Result<Vec<T>, SqlMapperError> {
        let identity = self.identity.for_grid::<T>(self.grid_index);
        self.read_set(&identity, Take::All, compile_all::<T>)
    }

    /// # Errors
    /// Returns [`SqlMapperError::NoRows`] when the next set is empty.
    pub fn read_first<T: FromRow>(&mut self) -> Result<T, SqlMapperError> {
        let identity = self.identity.for_grid::<T>(self.grid_index);
        self.read_set(&identity, Take::First, compile_all::<T>)?
            .into_iter()
            .next()
            .ok_or(SqlMapperError::NoRows)
    }

    /// # Errors
    /// Returns [`SqlMapperError::Disposed`] once every set has been read.
    pub fn read_first_or_default<T: FromRow>(&mut self) -> Result<Option<T>, SqlMapperError> {
        let identity = self.identity.for_grid::<T>(self.grid_index);
        Ok(self
            .read_set(&identity, Take::First, compile_all::<T>)?
            .into_iter()
            .next())
    }

    /// # Errors
    /// Returns [`SqlMapperError::NoRows`] or [`SqlMapperError::MultipleRows`].
    pub fn read_single<T: FromRow>(&mut self) -> Result<T, SqlMapperError> {
        let identity = self.identity.for_grid::<T>(self.grid_index);
        exactly_one(self.read_set(&identity, Take::Single, compile_all::<T>)?)
    }

    /// # Errors
    /// Returns [`SqlMapperError::MultipleRows`] when the set holds more than one row.
    pub fn read_single_or_default<T: FromRow>(&mut self) -> Result<Option<T>, SqlMapperError> {
        let identity = self.identity.for_grid::<T>(self.grid_index);
        at_most_one(self.read_set(&identity, Take::Single, compile_all::<T>)?)
    }

    /// Multi-map the next result set.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::SplitConfiguration`] when the split columns cannot be found.
    pub fn read_map<Tup, R, F>(&mut self, split_on: &str, map: F) -> Result<Vec<R>, SqlMapperError>
    where
        Tup: SplitTuple,
        F: FnMut(Tup) -> R,
    {
        let identity = self
            .identity
            .for_grid::<Tup>(self.grid_index)
            .with_split_on(split_on);
        let rows = self.read_set(&identity, Take::All, |columns| {
            Tup::compile(columns, split_on)
        })?;
        Ok(rows.into_iter().map(map).collect())
    }

    /// `true` once every result set has been read or the reader was disposed.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.reader.is_none()
    }

    /// Skip the remaining sets, complete output parameters and release the connection.
    ///
    /// # Errors
    /// Returns the first error raised while draining, completing or closing.
    pub fn dispose(&mut self) -> Result<(), SqlMapperError> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(());
        };
        let drained = drain(reader.as_mut());
        drop(reader);
        let completed = drained.and_then(|outputs| self.complete(&outputs));
        let closed = match self.conn.take() {
            Some(conn) => {
                debug!("closing connection opened for a multi-result query");
                conn.close()
            }
            None => Ok(()),
        };
        completed.and(closed)
    }

    fn complete(&self, outputs: &OutputValues) -> Result<(), SqlMapperError> {
        match self.params {
            Some(params) => params.on_completed(outputs),
            None => Ok(()),
        }
    }

    fn read_set<T, F>(
        &mut self,
        identity: &Identity,
        take: Take,
        compile: F,
    ) -> Result<Vec<T>, SqlMapperError>
    where
        T: Send + 'static,
        F: FnOnce(&[Column]) -> Result<RowReader<T>, SqlMapperError>,
    {
        let rows = self.read_rows(identity, take, compile);
        match rows {
            Ok(rows) => {
                self.advance()?;
                Ok(rows)
            }
            Err(SqlMapperError::Disposed) => Err(SqlMapperError::Disposed),
            Err(err) => {
                if let Err(dispose_err) = self.dispose() {
                    debug!(error = %dispose_err, "failed to dispose grid reader after error");
                }
                Err(err)
            }
        }
    }

    fn read_rows<T, F>(
        &mut self,
        identity: &Identity,
        take: Take,
        compile: F,
    ) -> Result<Vec<T>, SqlMapperError>
    where
        T: Send + 'static,
        F: FnOnce(&[Column]) -> Result<RowReader<T>, SqlMapperError>,
    {
        let reader = self.reader.as_mut().ok_or(SqlMapperError::Disposed)?;
        self.command.check_cancelled()?;
        let columns = reader.columns().to_vec();
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let info = cache::lookup(identity)?;
        let row_reader = info.reader_for(&columns, compile)?;
        collect_rows(reader.as_mut(), &row_reader, take, &self.command)
    }

    fn advance(&mut self) -> Result<(), SqlMapperError> {
        let more = match self.reader.as_mut() {
            Some(reader) => reader.next_result()?,
            None => false,
        };
        if more {
            self.grid_index += 1;
            Ok(())
        } else {
            self.dispose()
        }
    }
}

impl Drop for GridReader<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            debug!(error = %err, "failed to dispose grid reader");
        }
    }
}

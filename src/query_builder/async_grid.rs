use tracing::debug;

use super::async_ops::{cancellable, collect_rows, drain};
use super::sync_ops::compile_all;
use super::{Take, at_most_one, exactly_one};
use crate::cache::{self, Identity};
use crate::error::SqlMapperError;
use crate::executor::{AsyncConnection, AsyncDataReader, Column, Command};
use crate::mapping::{FromRow, RowReader, SplitTuple};
use crate::params::ParamSource;

/// Asynchronous counterpart of [`super::GridReader`].
///
/// Call [`dispose`](Self::dispose) when not every set is read: dropping the reader cannot close
/// a connection that was opened for the call.
pub struct AsyncGridReader<'c> {
    reader: Option<Box<dyn AsyncDataReader>>,
    identity: Identity,
    command: Command,
    params: Option<&'c dyn ParamSource>,
    conn: Option<&'c mut dyn AsyncConnection>,
    grid_index: usize,
}

impl<'c> AsyncGridReader<'c> {
    pub(crate) fn new(
        reader: Box<dyn AsyncDataReader>,
        identity: Identity,
        command: Command,
        params: Option<&'c dyn ParamSource>,
        conn: Option<&'c mut dyn AsyncConnection>,
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

    /// # Errors
    /// Returns [`SqlMapperError::Disposed`] once every set has been read.
    pub async fn read<T: FromRow>(&mut self) -> Result<Vec<T>, SqlMapperError> {
        let identity = self.identity.for_grid::<T>(self.grid_index);
        self.read_set(&identity, Take::All, compile_all::<T>).await
    }

    /// # Errors
    /// Returns [`SqlMapperError::NoRows`] when the next set is empty.
    pub async fn read_first<T: FromRow>(&mut self) -> Result<T, SqlMapperError> {
        let identity = self.identity.for_grid::<T>(self.grid_index);
        self.read_set(&identity, Take::First, compile_all::<T>)
            .await?
            .into_iter()
            .next()
            .ok_or(SqlMapperError::NoRows)
    }

    /// # Errors
    /// Returns [`SqlMapperError::Disposed`] once every set has been read.
    pub async fn read_first_or_default<T: FromRow>(&mut self) -> Result<Option<T>, SqlMapperError> {
        let identity = self.identity.for_grid::<T>(self.grid_index);
        Ok(self
            .read_set(&identity, Take::First, compile_all::<T>)
            .await?
            .into_iter()
            .next())
    }

    /// # Errors
    /// Returns [`SqlMapperError::NoRows`] or [`SqlMapperError::MultipleRows`].
    pub async fn read_single<T: FromRow>(&mut self) -> Result<T, SqlMapperError> {
        let identity = self.identity.for_grid::<T>(self.grid_index);
        exactly_one(self.read_set(&identity, Take::Single, compile_all::<T>).await?)
    }

    /// # Errors
    /// Returns [`SqlMapperError::MultipleRows`] when the set holds more than one row.
    pub async fn read_single_or_default<T: FromRow>(
        &mut self,
    ) -> Result<Option<T>, SqlMapperError> {
        let identity = self.identity.for_grid::<T>(self.grid_index);
        at_most_one(self.read_set(&identity, Take::Single, compile_all::<T>).await?)
    }

    /// # Errors
    /// Returns [`SqlMapperError::SplitConfiguration`] when the split columns cannot be found.
    pub async fn read_map<Tup, R, F>(
        &mut self,
        split_on: &str,
        map: F,
    ) -> Result<Vec<R>, SqlMapperError>
    where
        Tup: SplitTuple,
        F: FnMut(Tup) -> R,
    {
        let identity = self
            .identity
            .for_grid::<Tup>(self.grid_index)
            .with_split_on(split_on);
        let rows = self
            .read_set(&identity, Take::All, |columns| Tup::compile(columns, split_on))
            .await?;
        Ok(rows.into_iter().map(map).collect())
    }

    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.reader.is_none()
    }

    /// Skip the remaining sets, complete output parameters and close a connection opened for
    /// the call.
    ///
    /// # Errors
    /// Returns the first error raised while draining, completing or closing.
    pub async fn dispose(&mut self) -> Result<(), SqlMapperError> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(());
        };
        let drained = drain(reader.as_mut()).await;
        drop(reader);
        let completed = drained.and_then(|outputs| match self.params {
            Some(params) => params.on_completed(&outputs),
            None => Ok(()),
        });
        let closed = match self.conn.take() {
            Some(conn) => {
                debug!("closing connection opened for a multi-result query");
                conn.close().await
            }
            None => Ok(()),
        };
        completed.and(closed)
    }

    async fn read_set<T, F>(
        &mut self,
        identity: &Identity,
        take: Take,
        compile: F,
    ) -> Result<Vec<T>, SqlMapperError>
    where
        T: Send + 'static,
        F: FnOnce(&[Column]) -> Result<RowReader<T>, SqlMapperError>,
    {
        match self.read_rows(identity, take, compile).await {
            Ok(rows) => {
                self.advance().await?;
                Ok(rows)
            }
            Err(SqlMapperError::Disposed) => Err(SqlMapperError::Disposed),
            Err(err) => {
                if let Err(dispose_err) = self.dispose().await {
                    debug!(error = %dispose_err, "failed to dispose grid reader after error");
                }
                Err(err)
            }
        }
    }

    async fn read_rows<T, F>(
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
        let columns = reader.columns().to_vec();
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let info = cache::lookup(identity)?;
        let row_reader = info.reader_for(&columns, compile)?;
        let command = &self.command;
        cancellable(command, collect_rows(reader.as_mut(), &row_reader, take, command)).await
    }

    async fn advance(&mut self) -> Result<(), SqlMapperError> {
        let more = match self.reader.as_mut() {
            Some(reader) => cancellable(&self.command, reader.next_result()).await?,
            None => false,
        };
        if more {
            self.grid_index += 1;
            Ok(())
        } else {
            self.dispose().await
        }
    }
}

impl Drop for AsyncGridReader<'_> {
    fn drop(&mut self) {
        if self.reader.is_some() && self.conn.is_some() {
            debug!("grid reader dropped before disposal; connection left open");
        }
    }
}

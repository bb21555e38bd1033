//! The public call surface: command definitions, the fluent builders and the sync / async
//! mapper traits.
//!
//! Every call follows the same path: look up the cached plan for the command identity, bind the
//! parameters (rewriting lists and literals), hand the command to the executor, map rows with
//! the cached reader and finally hand output values back to the parameter source.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{CacheInfo, CommandFlags, ExecutionKind, Identity};
use crate::error::SqlMapperError;
use crate::executor::{Command, CommandBehavior, Connection, OutputValues};
use crate::params::{ParamSource, bind};
use crate::settings::Settings;
use crate::types::{CommandKind, ConnectionState};

/// Builder methods shared by the sync and async fluent commands; each forwards to the wrapped
/// [`CommandDefinition`].
macro_rules! fluent_setters {
    ($p:lifetime) => {
        /// Provide the parameter source for this command.
        #[must_use]
        pub fn params<P: $crate::params::ParamSource>(mut self, params: &$p P) -> Self {
            self.definition = self.definition.params(params);
            self
        }

        /// Treat the text as the name of a stored procedure.
        #[must_use]
        pub fn stored_procedure(mut self) -> Self {
            self.definition = self.definition.stored_procedure();
            self
        }

        #[must_use]
        pub fn timeout(mut self, timeout: ::std::time::Duration) -> Self {
            self.definition = self.definition.timeout(timeout);
            self
        }

        #[must_use]
        pub fn options(mut self, flags: $crate::cache::CommandFlags) -> Self {
            self.definition = self.definition.options(flags);
            self
        }

        #[must_use]
        pub fn no_cache(mut self) -> Self {
            self.definition = self.definition.no_cache();
            self
        }

        #[must_use]
        pub fn cancellation(mut self, token: ::tokio_util::sync::CancellationToken) -> Self {
            self.definition = self.definition.cancellation(token);
            self
        }

        /// The definition built so far.
        #[must_use]
        pub fn definition(&self) -> &$crate::query_builder::CommandDefinition<$p> {
            &self.definition
        }
    };
}

pub(crate) use fluent_setters;

mod async_grid;
mod async_ops;
mod grid;
mod sync_ops;

pub use async_grid::AsyncGridReader;
pub use async_ops::{AsyncRows, AsyncSqlCommand, AsyncSqlMapper};
pub use grid::GridReader;
pub use sync_ops::{Rows, SqlCommand, SqlMapper};

/// Everything that describes one call: SQL, parameters and per-call options.
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// let params = [("id", 5_i32)];
/// let definition = CommandDefinition::new("select * from users where id = @id")
///     .params(&params)
///     .timeout(std::time::Duration::from_secs(5))
///     .no_cache();
/// assert!(definition.flags.contains(CommandFlags::NO_CACHE));
/// ```
#[derive(Clone)]
pub struct CommandDefinition<'p> {
    pub sql: Cow<'p, str>,
    pub params: Option<&'p dyn ParamSource>,
    pub kind: CommandKind,
    pub timeout: Option<Duration>,
    pub flags: CommandFlags,
    pub cancellation: Option<CancellationToken>,
}

impl fmt::Debug for CommandDefinition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("sql", &self.sql)
            .field("has_params", &self.params.is_some())
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl<'p> From<&'p str> for CommandDefinition<'p> {
    fn from(sql: &'p str) -> Self {
        CommandDefinition::new(sql)
    }
}

impl From<String> for CommandDefinition<'static> {
    fn from(sql: String) -> Self {
        CommandDefinition::new(sql)
    }
}

impl<'p> CommandDefinition<'p> {
    #[must_use]
    pub fn new(sql: impl Into<Cow<'p, str>>) -> Self {
        Self {
            sql: sql.into(),
            params: None,
            kind: CommandKind::Text,
            timeout: None,
            flags: CommandFlags::default(),
            cancellation: None,
        }
    }

    /// Provide the parameter source for this command.
    #[must_use]
    pub fn params<P: ParamSource>(mut self, params: &'p P) -> Self {
        self.params = Some(params);
        self
    }

    /// Provide an already type-erased parameter source.
    #[must_use]
    pub fn params_dyn(mut self, params: Option<&'p dyn ParamSource>) -> Self {
        self.params = params;
        self
    }

    /// Treat the text as the name of a stored procedure.
    #[must_use]
    pub fn stored_procedure(mut self) -> Self {
        self.kind = CommandKind::StoredProcedure;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace every flag.
    #[must_use]
    pub fn options(mut self, flags: CommandFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.flags = self.flags.with(CommandFlags::NO_CACHE);
        self
    }

    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub(crate) fn identity(&self, execution: ExecutionKind) -> Identity {
        Identity::new(self.sql.as_ref(), self.kind, execution)
            .with_param_shape(self.params.and_then(|p| p.shape()))
            .with_flags(self.flags)
    }

    /// Bind parameters and apply per-call options.
    pub(crate) fn build_command(
        &self,
        info: &CacheInfo,
        behavior: CommandBehavior,
    ) -> Result<Command, SqlMapperError> {
        let mut command = bind(&self.sql, self.kind, self.params, info.param_plan())?;
        command.timeout = self.timeout.or_else(Settings::command_timeout);
        command.behavior = behavior;
        command.cancellation.clone_from(&self.cancellation);
        Ok(command)
    }

    /// Hand output values back to the parameter source.
    pub(crate) fn complete(&self, outputs: &OutputValues) -> Result<(), SqlMapperError> {
        match self.params {
            Some(params) => params.on_completed(outputs),
            None => Ok(()),
        }
    }
}

/// How many rows a call consumes and what it demands of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Take {
    All,
    First,
    Single,
}

impl Take {
    pub(crate) fn behavior(self) -> CommandBehavior {
        match self {
            Take::All => CommandBehavior {
                single_result: true,
                single_row: false,
            },
            Take::First => CommandBehavior {
                single_result: true,
                single_row: Settings::use_single_row_optimization(),
            },
            Take::Single => CommandBehavior {
                single_result: true,
                single_row: false,
            },
        }
    }
}

/// Reduce the rows read under `Take::First` / `Take::Single` to one value.
pub(crate) fn exactly_one<T>(rows: Vec<T>) -> Result<T, SqlMapperError> {
    let mut rows = rows.into_iter();
    match (rows.next(), rows.next()) {
        (Some(value), None) => Ok(value),
        (None, _) => Err(SqlMapperError::NoRows),
        (Some(_), Some(_)) => Err(SqlMapperError::MultipleRows),
    }
}

/// Like [`exactly_one`], with no rows meaning `None`.
pub(crate) fn at_most_one<T>(rows: Vec<T>) -> Result<Option<T>, SqlMapperError> {
    let mut rows = rows.into_iter();
    match (rows.next(), rows.next()) {
        (value, None) => Ok(value),
        (Some(_), Some(_)) => Err(SqlMapperError::MultipleRows),
        (None, Some(_)) => Err(SqlMapperError::NoRows),
    }
}

/// Run `f` with the connection open, opening and closing it around the call when it was closed.
pub(crate) fn with_open<C, R, F>(conn: &mut C, f: F) -> Result<R, SqlMapperError>
where
    C: Connection + ?Sized,
    F: FnOnce(&mut C) -> Result<R, SqlMapperError>,
{
    let opened = open_if_closed(conn)?;
    let result = f(conn);
    if opened {
        debug!("closing connection opened for the call");
        let closed = conn.close();
        if result.is_ok() {
            closed?;
        }
    }
    result
}

pub(crate) fn open_if_closed<C: Connection + ?Sized>(conn: &mut C) -> Result<bool, SqlMapperError> {
    if conn.state() == ConnectionState::Closed {
        debug!("opening closed connection for the call");
        conn.open()?;
        Ok(true)
    } else {
        Ok(false)
    }
}

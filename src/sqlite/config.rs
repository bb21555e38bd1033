use std::time::Duration;

use crate::error::SqlMapperError;

use super::connection::SqliteConnection;
use super::worker::AsyncSqliteConnection;

/// Path used for a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Options for opening a `SQLite` database.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    pub busy_timeout: Duration,
    /// Switch file databases to WAL journaling on open.
    pub wal: bool,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            busy_timeout: Duration::from_secs(5),
            wal: true,
        }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.db_path == IN_MEMORY
    }

    pub(crate) fn open_raw(&self) -> Result<rusqlite::Connection, SqlMapperError> {
        let conn = if self.is_in_memory() {
            rusqlite::Connection::open_in_memory()?
        } else {
            rusqlite::Connection::open(&self.db_path)?
        };
        conn.busy_timeout(self.busy_timeout)?;
        if self.wal && !self.is_in_memory() {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        Ok(conn)
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// A closed synchronous connection; it is opened on first use.
    #[must_use]
    pub fn build(self) -> SqliteConnection {
        SqliteConnection::new(self.finish())
    }

    /// A closed worker-backed asynchronous connection.
    #[must_use]
    pub fn build_async(self) -> AsyncSqliteConnection {
        AsyncSqliteConnection::new(self.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_carries_overrides() {
        let opts = SqliteOptionsBuilder::new(IN_MEMORY.to_string())
            .busy_timeout(Duration::from_millis(250))
            .wal(false)
            .finish();
        assert!(opts.is_in_memory());
        assert_eq!(opts.busy_timeout, Duration::from_millis(250));
        assert!(!opts.wal);
    }

    #[test]
    fn file_databases_open_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.db");
        let opts = SqliteOptions::new(path.to_string_lossy().into_owned());
        let conn = opts.open_raw().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}

//! SQLite store handle.
//!
//! A [`Store`] owns one connection. It is opened for the load stage and the
//! connection is released when the handle is dropped, on success and on
//! failure alike.

use crate::error::LoadError;
use crate::model::TableKind;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let conn = Connection::open(path).map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Opened store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, LoadError> {
        let conn = Connection::open_in_memory().map_err(|source| LoadError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Whether `table` currently exists.
    pub fn has_table(&self, table: TableKind) -> Result<bool, LoadError> {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|source| sqlite_error(table.as_str(), source))
    }

    /// Row count of `table`, or `None` if it has never been loaded.
    pub fn row_count(&self, table: TableKind) -> Result<Option<i64>, LoadError> {
        if !self.has_table(table)? {
            return Ok(None);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
        self.conn
            .query_row(&sql, [], |row| row.get(0))
            .map(Some)
            .map_err(|source| sqlite_error(table.as_str(), source))
    }

    /// Names of the explicit indexes on `table`, sorted.
    pub fn index_names(&self, table: TableKind) -> Result<Vec<String>, LoadError> {
        let map_err = |source| sqlite_error(table.as_str(), source);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL \
                 ORDER BY name",
            )
            .map_err(map_err)?;
        let names = stmt
            .query_map([table.as_str()], |row| row.get::<_, String>(0))
            .map_err(map_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_err)?;
        Ok(names)
    }

    /// Close the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> Result<(), LoadError> {
        self.conn
            .close()
            .map_err(|(_, source)| sqlite_error("*", source))
    }
}

pub(crate) fn sqlite_error(table: &str, source: rusqlite::Error) -> LoadError {
    LoadError::Sqlite {
        table: table.to_string(),
        source,
    }
}

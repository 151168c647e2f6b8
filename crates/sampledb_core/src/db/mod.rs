//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the object history store.
//! - Apply schema migrations in deterministic order.
//! - Let repositories reject connections that skipped bootstrap.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Version rows must not be read or written before migrations succeed.

use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

/// Relation holding the single mutable row per object.
pub const CURRENT_TABLE: &str = "objects_current";
/// Append-only relation holding superseded versions.
pub const PREVIOUS_TABLE: &str = "objects_previous";

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Connection was opened without running migrations.
    Uninitialized {
        expected_version: u32,
        actual_version: u32,
    },
    MissingTable(&'static str),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Uninitialized {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection is not migrated: expected schema version {expected_version}, found {actual_version}"
            ),
            Self::MissingTable(table) => write!(f, "required table `{table}` is missing"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Checks that `conn` went through [`open_db`]/[`open_db_in_memory`].
///
/// Repositories call this at construction so that a raw connection fails
/// early instead of on the first query.
pub fn ensure_migrated(conn: &Connection) -> DbResult<()> {
    let expected_version = migrations::latest_version();
    let actual_version = migrations::current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(DbError::Uninitialized {
            expected_version,
            actual_version,
        });
    }

    for table in [CURRENT_TABLE, PREVIOUS_TABLE] {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(DbError::MissingTable(table));
        }
    }

    Ok(())
}

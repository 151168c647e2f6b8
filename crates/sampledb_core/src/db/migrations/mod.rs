//! Schema steps for the object history tables.
//!
//! Step 1 creates `objects_current` and `objects_previous`; step 2 indexes
//! both by `user_id`. The step number of the last applied step is kept in
//! `PRAGMA user_version`, and all pending steps run in one transaction so a
//! database is never left between two layouts.
//!
//! Steps only add tables and indexes. None of them touches stored versions.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "object_versions",
        sql: include_str!("0001_object_versions.sql"),
    },
    SchemaStep {
        version: 2,
        name: "object_user_index",
        sql: include_str!("0002_object_user_index.sql"),
    },
];

/// Returns the schema version this build writes.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

fn pending_steps(applied: u32) -> impl Iterator<Item = &'static SchemaStep> {
    STEPS.iter().filter(move |step| step.version > applied)
}

/// Brings the object tables up to [`latest_version`].
///
/// # Errors
/// - `DbError::UnsupportedSchemaVersion` when the file was written by a newer
///   build. Nothing is changed in that case.
/// - `DbError::Sqlite` when a step fails; earlier steps of the same call are
///   rolled back with it.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let applied = current_user_version(conn)?;
    let latest = latest_version();
    if applied > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: applied,
            latest_supported: latest,
        });
    }
    if applied == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in pending_steps(applied) {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
    }
    tx.commit()?;

    info!("event=db_migrate module=db status=ok from_version={applied} to_version={latest}");
    Ok(())
}

/// Reads the applied schema version.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?)
}

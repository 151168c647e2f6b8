//! Version store contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist an append-only history of schema-validated object versions.
//! - Keep the current/previous relation split inside the persistence
//!   boundary.
//!
//! # Invariants
//! - Exactly one row per object lives in `objects_current`.
//! - `update_object` moves the current row to `objects_previous` and
//!   rewrites it with `version_id + 1` in one transaction.
//! - Rows in `objects_previous` are never updated or deleted.
//! - Read paths reject undecodable persisted rows instead of masking them.

use crate::db::{ensure_migrated, DbError, CURRENT_TABLE, PREVIOUS_TABLE};
use crate::model::version::{ObjectId, UserId, Version, VersionId};
use crate::schema::{validate, SchemaValidationError};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

const VERSION_COLUMNS: &str = "object_id, version_id, data, schema, user_id, utc_datetime";

pub type RepoResult<T> = Result<T, RepoError>;

/// Version store error for persistence and validation failures.
#[derive(Debug)]
pub enum RepoError {
    SchemaValidation(SchemaValidationError),
    Db(DbError),
    /// `update_object` was called for an object that does not exist.
    NotFound(ObjectId),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SchemaValidation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "object not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted version data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SchemaValidation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<SchemaValidationError> for RepoError {
    fn from(value: SchemaValidationError) -> Self {
        Self::SchemaValidation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Append-only store of object versions.
pub trait VersionRepository {
    /// Validates `data` and stores it as version 0 of a new object.
    fn create_object(
        &mut self,
        data: &Value,
        schema: &Value,
        user_id: UserId,
        at: Option<DateTime<Utc>>,
    ) -> RepoResult<Version>;

    /// Validates `data` and stores it as the next version of `object_id`.
    fn update_object(
        &mut self,
        object_id: ObjectId,
        data: &Value,
        schema: &Value,
        user_id: UserId,
        at: Option<DateTime<Utc>>,
    ) -> RepoResult<Version>;

    fn get_current_object(&self, object_id: ObjectId) -> RepoResult<Option<Version>>;

    /// Returns current versions whose data satisfies `filter`, by object id.
    fn get_current_objects(&self, filter: &dyn Fn(&Value) -> bool) -> RepoResult<Vec<Version>>;

    fn get_object_version(
        &self,
        object_id: ObjectId,
        version_id: VersionId,
    ) -> RepoResult<Option<Version>>;

    /// Returns all versions of `object_id` ascending, current last.
    fn get_object_versions(&self, object_id: ObjectId) -> RepoResult<Vec<Version>>;
}

/// SQLite-backed version store.
pub struct SqliteVersionRepository<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteVersionRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    ///
    /// # Errors
    /// - Returns `RepoError::Db` when the connection skipped migrations.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        ensure_migrated(conn)?;
        Ok(Self { conn })
    }
}

impl VersionRepository for SqliteVersionRepository<'_> {
    fn create_object(
        &mut self,
        data: &Value,
        schema: &Value,
        user_id: UserId,
        at: Option<DateTime<Utc>>,
    ) -> RepoResult<Version> {
        validate(data, schema)?;
        let started_at = Instant::now();
        let utc_datetime = at.unwrap_or_else(Utc::now);
        let (data_text, schema_text) = (encode_json(data)?, encode_json(schema)?);

        let result = (|| -> RepoResult<ObjectId> {
            let tx = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                &format!(
                    "INSERT INTO {CURRENT_TABLE} (version_id, data, schema, user_id, utc_datetime)
                     VALUES (0, ?1, ?2, ?3, ?4);"
                ),
                params![data_text, schema_text, user_id, utc_datetime],
            )?;
            let object_id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(object_id)
        })();

        match result {
            Ok(object_id) => {
                info!(
                    "event=object_create module=repo status=ok object_id={object_id} version_id=0 duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(Version {
                    object_id,
                    version_id: 0,
                    data: data.clone(),
                    schema: schema.clone(),
                    user_id,
                    utc_datetime,
                })
            }
            Err(err) => {
                error!(
                    "event=object_create module=repo status=error duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    fn update_object(
        &mut self,
        object_id: ObjectId,
        data: &Value,
        schema: &Value,
        user_id: UserId,
        at: Option<DateTime<Utc>>,
    ) -> RepoResult<Version> {
        validate(data, schema)?;
        let started_at = Instant::now();
        let utc_datetime = at.unwrap_or_else(Utc::now);
        let (data_text, schema_text) = (encode_json(data)?, encode_json(schema)?);

        let result = (|| -> RepoResult<VersionId> {
            let tx = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)?;
            let copied = tx.execute(
                &format!(
                    "INSERT INTO {PREVIOUS_TABLE} ({VERSION_COLUMNS})
                     SELECT {VERSION_COLUMNS}
                     FROM {CURRENT_TABLE}
                     WHERE object_id = ?1;"
                ),
                [object_id],
            )?;
            if copied == 0 {
                return Err(RepoError::NotFound(object_id));
            }

            tx.execute(
                &format!(
                    "UPDATE {CURRENT_TABLE}
                     SET
                        version_id = version_id + 1,
                        data = ?2,
                        schema = ?3,
                        user_id = ?4,
                        utc_datetime = ?5
                     WHERE object_id = ?1;"
                ),
                params![object_id, data_text, schema_text, user_id, utc_datetime],
            )?;
            let version_id: VersionId = tx.query_row(
                &format!("SELECT version_id FROM {CURRENT_TABLE} WHERE object_id = ?1;"),
                [object_id],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(version_id)
        })();

        match result {
            Ok(version_id) => {
                info!(
                    "event=object_update module=repo status=ok object_id={object_id} version_id={version_id} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(Version {
                    object_id,
                    version_id,
                    data: data.clone(),
                    schema: schema.clone(),
                    user_id,
                    utc_datetime,
                })
            }
            Err(err) => {
                error!(
                    "event=object_update module=repo status=error object_id={object_id} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    fn get_current_object(&self, object_id: ObjectId) -> RepoResult<Option<Version>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {VERSION_COLUMNS} FROM {CURRENT_TABLE} WHERE object_id = ?1;"),
                [object_id],
                read_version_columns,
            )
            .optional()?;
        row.map(parse_version).transpose()
    }

    fn get_current_objects(&self, filter: &dyn Fn(&Value) -> bool) -> RepoResult<Vec<Version>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM {CURRENT_TABLE} ORDER BY object_id ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut versions = Vec::new();
        while let Some(row) = rows.next()? {
            let version = parse_version(read_version_columns(row)?)?;
            if filter(&version.data) {
                versions.push(version);
            }
        }
        Ok(versions)
    }

    fn get_object_version(
        &self,
        object_id: ObjectId,
        version_id: VersionId,
    ) -> RepoResult<Option<Version>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {VERSION_COLUMNS}
                     FROM (
                        SELECT {VERSION_COLUMNS}, 0 AS source FROM {PREVIOUS_TABLE}
                        WHERE object_id = ?1 AND version_id = ?2
                        UNION ALL
                        SELECT {VERSION_COLUMNS}, 1 AS source FROM {CURRENT_TABLE}
                        WHERE object_id = ?1 AND version_id = ?2
                     )
                     ORDER BY source ASC
                     LIMIT 1;"
                ),
                params![object_id, version_id],
                read_version_columns,
            )
            .optional()?;
        row.map(parse_version).transpose()
    }

    fn get_object_versions(&self, object_id: ObjectId) -> RepoResult<Vec<Version>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS}
             FROM (
                SELECT {VERSION_COLUMNS}, 0 AS source FROM {PREVIOUS_TABLE}
                WHERE object_id = ?1
                UNION ALL
                SELECT {VERSION_COLUMNS}, 1 AS source FROM {CURRENT_TABLE}
                WHERE object_id = ?1
             )
             ORDER BY source ASC, version_id ASC;"
        ))?;
        let mut rows = stmt.query([object_id])?;
        let mut versions = Vec::new();
        while let Some(row) = rows.next()? {
            versions.push(parse_version(read_version_columns(row)?)?);
        }
        Ok(versions)
    }
}

fn encode_json(value: &Value) -> RepoResult<String> {
    serde_json::to_string(value)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode json: {err}")))
}

/// Raw column values of one version row, before JSON decoding.
struct VersionRow {
    object_id: ObjectId,
    version_id: VersionId,
    data: String,
    schema: String,
    user_id: UserId,
    utc_datetime: DateTime<Utc>,
}

fn read_version_columns(row: &Row<'_>) -> rusqlite::Result<VersionRow> {
    Ok(VersionRow {
        object_id: row.get("object_id")?,
        version_id: row.get("version_id")?,
        data: row.get("data")?,
        schema: row.get("schema")?,
        user_id: row.get("user_id")?,
        utc_datetime: row.get("utc_datetime")?,
    })
}

fn parse_version(row: VersionRow) -> RepoResult<Version> {
    let decode = |column: &str, text: &str| {
        serde_json::from_str::<Value>(text).map_err(|err| {
            RepoError::InvalidData(format!(
                "invalid json in {column} of object {} version {}: {err}",
                row.object_id, row.version_id
            ))
        })
    };
    if row.version_id < 0 {
        return Err(RepoError::InvalidData(format!(
            "negative version_id {} for object {}",
            row.version_id, row.object_id
        )));
    }

    Ok(Version {
        object_id: row.object_id,
        version_id: row.version_id,
        data: decode("data", &row.data)?,
        schema: decode("schema", &row.schema)?,
        user_id: row.user_id,
        utc_datetime: row.utc_datetime,
    })
}

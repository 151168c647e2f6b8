//! Object history core for SampleDB.
//! Versioned object storage plus the schema-aware diff engine built on it.

pub mod db;
pub mod diff;
pub mod logging;
pub mod model;
pub mod repo;
pub mod schema;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use diff::{
    apply_diff, calculate_diff, calculate_value_diff, invert_diff, ArrayPosition, Diff,
    DiffFormatError, DiffMismatchError, Slot, TypeRegistry, TypedEquality, VALUE_NOT_SET,
};
pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::version::{ObjectId, UserId, Version, VersionId};
pub use repo::version_repo::{RepoError, RepoResult, SqliteVersionRepository, VersionRepository};
pub use schema::{validate, SchemaResult, SchemaValidationError};
pub use service::object_service::{ObjectService, ServiceError, ServiceResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

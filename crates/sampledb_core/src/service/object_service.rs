//! Object history use-case service.
//!
//! # Responsibility
//! - Expose the version store to callers through one facade.
//! - Compare, patch and restore stored versions with the diff engine.
//!
//! # Invariants
//! - Every write goes through the repository, so data is schema-validated
//!   and history is append-only.
//! - A failed diff application writes nothing.

use crate::diff::{apply_diff, calculate_value_diff, Diff, DiffMismatchError, Slot, TypeRegistry};
use crate::model::version::{ObjectId, UserId, Version, VersionId};
use crate::repo::version_repo::{RepoError, VersionRepository};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service error for object history use-cases.
#[derive(Debug)]
pub enum ServiceError {
    /// Target object does not exist.
    ObjectNotFound(ObjectId),
    /// Requested version of an existing or missing object does not exist.
    VersionNotFound {
        object_id: ObjectId,
        version_id: VersionId,
    },
    DiffMismatch(DiffMismatchError),
    Repo(RepoError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ObjectNotFound(object_id) => write!(f, "object not found: {object_id}"),
            Self::VersionNotFound {
                object_id,
                version_id,
            } => write!(f, "version {version_id} of object {object_id} not found"),
            Self::DiffMismatch(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DiffMismatch(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(object_id) => Self::ObjectNotFound(object_id),
            other => Self::Repo(other),
        }
    }
}

impl From<DiffMismatchError> for ServiceError {
    fn from(value: DiffMismatchError) -> Self {
        Self::DiffMismatch(value)
    }
}

/// Object history facade over a version repository.
pub struct ObjectService<R: VersionRepository> {
    repo: R,
    registry: TypeRegistry,
}

impl<R: VersionRepository> ObjectService<R> {
    /// Creates a service that compares typed values with the builtin types.
    pub fn new(repo: R) -> Self {
        Self::with_registry(repo, TypeRegistry::with_builtin_types())
    }

    pub fn with_registry(repo: R, registry: TypeRegistry) -> Self {
        Self { repo, registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn create_object(
        &mut self,
        data: &Value,
        schema: &Value,
        user_id: UserId,
        at: Option<DateTime<Utc>>,
    ) -> ServiceResult<Version> {
        Ok(self.repo.create_object(data, schema, user_id, at)?)
    }

    pub fn update_object(
        &mut self,
        object_id: ObjectId,
        data: &Value,
        schema: &Value,
        user_id: UserId,
        at: Option<DateTime<Utc>>,
    ) -> ServiceResult<Version> {
        Ok(self.repo.update_object(object_id, data, schema, user_id, at)?)
    }

    pub fn get_current_object(&self, object_id: ObjectId) -> ServiceResult<Option<Version>> {
        Ok(self.repo.get_current_object(object_id)?)
    }

    pub fn get_current_objects(
        &self,
        filter: &dyn Fn(&Value) -> bool,
    ) -> ServiceResult<Vec<Version>> {
        Ok(self.repo.get_current_objects(filter)?)
    }

    pub fn get_object_version(
        &self,
        object_id: ObjectId,
        version_id: VersionId,
    ) -> ServiceResult<Option<Version>> {
        Ok(self.repo.get_object_version(object_id, version_id)?)
    }

    pub fn get_object_versions(&self, object_id: ObjectId) -> ServiceResult<Vec<Version>> {
        Ok(self.repo.get_object_versions(object_id)?)
    }

    /// Returns the diff leading from version `from` to version `to` of one
    /// object, `None` when their data is equal.
    pub fn diff_versions(
        &self,
        object_id: ObjectId,
        from: VersionId,
        to: VersionId,
    ) -> ServiceResult<Option<Diff>> {
        let before = self.require_version(object_id, from)?;
        let after = self.require_version(object_id, to)?;
        Ok(calculate_value_diff(&before.data, &after.data))
    }

    /// Applies `diff` to the current version and stores the result as the
    /// next version under the current schema.
    ///
    /// # Errors
    /// - `ServiceError::ObjectNotFound` when the object does not exist.
    /// - `ServiceError::DiffMismatch` when the diff does not fit the current
    ///   data, including a diff that would delete the whole value.
    /// - `ServiceError::Repo` when the patched data fails schema validation
    ///   or persistence fails.
    pub fn apply_diff_to_current(
        &mut self,
        object_id: ObjectId,
        diff: &Diff,
        user_id: UserId,
    ) -> ServiceResult<Version> {
        let result = self.patch_current(object_id, diff, user_id);
        match &result {
            Ok(version) => info!(
                "event=object_apply_diff module=service status=ok object_id={object_id} version_id={}",
                version.version_id
            ),
            Err(err) => error!(
                "event=object_apply_diff module=service status=error object_id={object_id} error={err}"
            ),
        }
        result
    }

    /// Stores the data and schema of `version_id` as the next version.
    pub fn restore_version(
        &mut self,
        object_id: ObjectId,
        version_id: VersionId,
        user_id: UserId,
    ) -> ServiceResult<Version> {
        let result = self.require_version(object_id, version_id).and_then(|old| {
            Ok(self
                .repo
                .update_object(object_id, &old.data, &old.schema, user_id, None)?)
        });
        match &result {
            Ok(version) => info!(
                "event=object_restore module=service status=ok object_id={object_id} restored_version_id={version_id} version_id={}",
                version.version_id
            ),
            Err(err) => error!(
                "event=object_restore module=service status=error object_id={object_id} restored_version_id={version_id} error={err}"
            ),
        }
        result
    }

    fn patch_current(
        &mut self,
        object_id: ObjectId,
        diff: &Diff,
        user_id: UserId,
    ) -> ServiceResult<Version> {
        let current = self
            .repo
            .get_current_object(object_id)?
            .ok_or(ServiceError::ObjectNotFound(object_id))?;

        let patched = apply_diff(
            &Slot::Set(current.data),
            Some(diff),
            &current.schema,
            true,
            &self.registry,
        )?;
        let data = patched
            .into_value()
            .ok_or_else(|| DiffMismatchError::new("$", "diff deletes the whole object"))?;

        Ok(self
            .repo
            .update_object(object_id, &data, &current.schema, user_id, None)?)
    }

    fn require_version(&self, object_id: ObjectId, version_id: VersionId) -> ServiceResult<Version> {
        self.repo
            .get_object_version(object_id, version_id)?
            .ok_or(ServiceError::VersionNotFound {
                object_id,
                version_id,
            })
    }
}

//! Object version model.
//!
//! # Responsibility
//! - Define the immutable snapshot shared by current and previous relations.
//!
//! # Invariants
//! - `version_id` starts at 0 and grows by exactly 1 per update.
//! - A `Version` value is never mutated once persisted; updates produce a
//!   new `Version`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store-assigned object identifier.
pub type ObjectId = i64;

/// Per-object version counter.
pub type VersionId = i64;

/// Identifier of the user who authored a version.
pub type UserId = i64;

/// One snapshot of an object's data and schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub object_id: ObjectId,
    pub version_id: VersionId,
    /// Record payload, valid against `schema`.
    pub data: Value,
    /// Schema the payload was validated against when written.
    pub schema: Value,
    pub user_id: UserId,
    pub utc_datetime: DateTime<Utc>,
}

impl Version {
    /// Returns whether this is the initial version of its object.
    pub fn is_initial(&self) -> bool {
        self.version_id == 0
    }
}

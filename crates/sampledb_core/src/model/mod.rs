//! Domain model for versioned objects.
//!
//! # Responsibility
//! - Define the record shape stored by the version repository.
//!
//! # Invariants
//! - Every object is identified by a stable `ObjectId`.
//! - Objects are never deleted; history only grows.

pub mod version;

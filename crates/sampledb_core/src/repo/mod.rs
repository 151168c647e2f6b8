//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the version store contract used by services and collaborators.
//! - Isolate SQLite query details from use-case orchestration.
//!
//! # Invariants
//! - Write paths validate data against its schema before persistence.
//! - Lookups of missing objects/versions return `None`, not errors.

pub mod version_repo;

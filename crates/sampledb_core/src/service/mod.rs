//! Core use-case services.
//!
//! # Responsibility
//! - Combine the version store with the diff engine into use-case APIs.
//! - Keep callers decoupled from storage details.

pub mod object_service;

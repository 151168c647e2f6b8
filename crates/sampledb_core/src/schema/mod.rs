//! Schema validation for versioned object data.
//!
//! # Responsibility
//! - Check JSON data against JSON-Schema-like descriptors extended with
//!   SampleDB typed values (`text`, `quantity`, `datetime`, ...).
//! - Report the first violation with the JSON path where it occurred.
//!
//! # Invariants
//! - Validation never mutates data and is deterministic.
//! - No coercion: `null`, undeclared properties and unknown typed-value
//!   fields are rejected.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod validator;

pub use validator::validate;

/// Format used by `datetime` typed values and timeseries entries.
pub const UTC_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static PROPERTY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid property name regex"));

pub type SchemaResult<T> = Result<T, SchemaValidationError>;

/// Data (or the schema itself) violates the schema contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaValidationError {
    /// JSON path of the offending value, rooted at `$`.
    pub path: String,
    pub message: String,
}

impl SchemaValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl Display for SchemaValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "schema validation failed at `{}`: {}",
            self.path, self.message
        )
    }
}

impl Error for SchemaValidationError {}

/// Returns whether `name` may be used as an object property name.
pub fn is_valid_property_name(name: &str) -> bool {
    PROPERTY_NAME_RE.is_match(name)
}

/// Parses a `utc_datetime` string, accepting optional fractional seconds.
pub fn parse_utc_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, UTC_DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::{is_valid_property_name, parse_utc_datetime};

    #[test]
    fn property_names_must_be_identifiers() {
        assert!(is_valid_property_name("name"));
        assert!(is_valid_property_name("sample_2"));
        assert!(!is_valid_property_name("_type"));
        assert!(!is_valid_property_name("0"));
        assert!(!is_valid_property_name("+1"));
        assert!(!is_valid_property_name(""));
    }

    #[test]
    fn utc_datetime_accepts_fractional_seconds() {
        let plain = parse_utc_datetime("2024-01-02 03:04:05").unwrap();
        let fractional = parse_utc_datetime("2024-01-02 03:04:05.000000").unwrap();
        assert_eq!(plain, fractional);
        assert!(parse_utc_datetime("2024-01-02T03:04:05Z").is_none());
    }
}

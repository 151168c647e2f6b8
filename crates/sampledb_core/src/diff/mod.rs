//! Schema-aware structural diff, patch and inversion.
//!
//! # Responsibility
//! - Describe the delta between two JSON values as a recursive [`Diff`].
//! - Apply a diff to a base value, failing closed when the diff's recorded
//!   prior values do not match ([`DiffMismatchError`]).
//! - Invert a diff so it leads from the "after" state back to "before".
//! - Convert diffs to and from their JSON wire format.
//!
//! # Invariants
//! - `apply_diff(a, calculate_diff(a, b), schema(a)) == b`.
//! - `invert_diff(calculate_diff(a, b)) == Ok(calculate_diff(b, a))`, and
//!   inverting an inverted diff gives the diff back.
//! - `Diff::from_json(&d.to_json()) == Ok(d)` when every object property in
//!   the diffed values is a valid property name (see below).
//! - All functions are pure; none touches storage.
//!
//! # Wire format
//! - Generic leaf: `{"_before": v}`, `{"_after": v}` or both.
//! - Array: `{"<position>": diff}` where position is `n` (index in the
//!   prior array), `+n` (n-th appended item) or `-n` (n-th item counted
//!   from the end of the prior array). A JSON list is accepted as positional
//!   shorthand, `null` entries meaning "unchanged".
//! - Object: `{"<property>": diff}`.
//!
//! Parsing tells the shapes apart by key alone. Property names matching
//! [`is_valid_property_name`](crate::schema::is_valid_property_name), which
//! schema validation enforces, never collide with position keys or with
//! `_before`/`_after`. Object diffs over other names (`"0"`, `"_before"`)
//! encode fine but decode as a different shape.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

mod apply;
mod calculate;
mod invert;
mod registry;

pub use apply::apply_diff;
pub use calculate::{calculate_diff, calculate_value_diff};
pub use invert::invert_diff;
pub use registry::{TypeRegistry, TypedEquality};

const BEFORE_KEY: &str = "_before";
const AFTER_KEY: &str = "_after";

/// A property or array slot that may be absent.
///
/// `Slot::NotSet` is distinct from `Value::Null`: it means the slot does not
/// exist at all on one side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Set(Value),
    NotSet,
}

/// The "slot does not exist" marker.
pub const VALUE_NOT_SET: Slot = Slot::NotSet;

impl Slot {
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Set(value) => Some(value),
            Self::NotSet => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Set(value) => Some(value),
            Self::NotSet => None,
        }
    }
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Self::Set(value)
    }
}

impl From<Option<Value>> for Slot {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::NotSet, Self::Set)
    }
}

/// Key of one entry in an array diff.
///
/// Ordering is `Index` < `Append` < `FromEnd`, each by number, which keeps
/// serialized diffs stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArrayPosition {
    /// Index into the prior array.
    Index(usize),
    /// The n-th item appended past the end of the prior array.
    Append(usize),
    /// The item at `len - n` of the prior array; `n >= 1`.
    FromEnd(usize),
}

impl ArrayPosition {
    /// Resolves this position against a prior array of length `len`.
    ///
    /// Returns `None` when a `FromEnd` offset reaches before the start.
    pub fn resolve(self, len: usize) -> Option<usize> {
        match self {
            Self::Index(index) => Some(index),
            Self::Append(offset) => len.checked_add(offset),
            Self::FromEnd(offset) if offset >= 1 => len.checked_sub(offset),
            Self::FromEnd(_) => None,
        }
    }
}

impl Display for ArrayPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Append(offset) => write!(f, "+{offset}"),
            Self::FromEnd(offset) => write!(f, "-{offset}"),
        }
    }
}

impl FromStr for ArrayPosition {
    type Err = DiffFormatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || DiffFormatError::new("$", format!("invalid array position `{value}`"));
        let (sign, digits) = match value.as_bytes().first() {
            Some(b'+') => (Some('+'), &value[1..]),
            Some(b'-') => (Some('-'), &value[1..]),
            _ => (None, value),
        };
        let canonical = !digits.is_empty()
            && digits.bytes().all(|byte| byte.is_ascii_digit())
            && (digits == "0" || !digits.starts_with('0'));
        if !canonical {
            return Err(invalid());
        }
        let number: usize = digits.parse().map_err(|_| invalid())?;

        match sign {
            None => Ok(Self::Index(number)),
            Some('+') => Ok(Self::Append(number)),
            _ if number == 0 => Err(invalid()),
            _ => Ok(Self::FromEnd(number)),
        }
    }
}

/// Structural delta between two values.
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Per-position deltas over a sequence.
    Array(BTreeMap<ArrayPosition, Diff>),
    /// Per-property deltas over a plain object; omitted keys are unchanged.
    Object(BTreeMap<String, Diff>),
    /// Leaf replacement. `None` on a side means the slot is not set there;
    /// at least one side is always present.
    Generic {
        before: Option<Value>,
        after: Option<Value>,
    },
}

impl Diff {
    /// Builds a leaf diff between two slots, `None` when both are unset.
    pub fn generic(before: Slot, after: Slot) -> Option<Self> {
        let before = before.into_value();
        let after = after.into_value();
        if before.is_none() && after.is_none() {
            return None;
        }
        Some(Self::Generic { before, after })
    }

    /// Encodes this diff in its JSON wire format.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Array(positions) => Value::Object(
                positions
                    .iter()
                    .map(|(position, diff)| (position.to_string(), diff.to_json()))
                    .collect(),
            ),
            Self::Object(properties) => Value::Object(
                properties
                    .iter()
                    .map(|(name, diff)| (name.clone(), diff.to_json()))
                    .collect(),
            ),
            Self::Generic { before, after } => {
                let mut object = Map::new();
                if let Some(before) = before {
                    object.insert(BEFORE_KEY.to_string(), before.clone());
                }
                if let Some(after) = after {
                    object.insert(AFTER_KEY.to_string(), after.clone());
                }
                Value::Object(object)
            }
        }
    }

    /// Decodes a diff from its JSON wire format.
    ///
    /// # Errors
    /// - Returns `DiffFormatError` for empty diffs, `null` sub-diffs and
    ///   values that are neither objects nor lists.
    pub fn from_json(value: &Value) -> Result<Self, DiffFormatError> {
        parse_diff(value, "$")
    }
}

fn parse_diff(value: &Value, path: &str) -> Result<Diff, DiffFormatError> {
    match value {
        Value::Array(items) => {
            let mut positions = BTreeMap::new();
            for (index, item) in items.iter().enumerate() {
                if item.is_null() {
                    continue;
                }
                let diff = parse_diff(item, &format!("{path}[{index}]"))?;
                positions.insert(ArrayPosition::Index(index), diff);
            }
            if positions.is_empty() {
                return Err(DiffFormatError::new(path, "positional diff has no entries"));
            }
            Ok(Diff::Array(positions))
        }
        Value::Object(object) if object.is_empty() => {
            Err(DiffFormatError::new(path, "empty diff object"))
        }
        Value::Object(object) if object.keys().all(|key| key == BEFORE_KEY || key == AFTER_KEY) => {
            Ok(Diff::Generic {
                before: object.get(BEFORE_KEY).cloned(),
                after: object.get(AFTER_KEY).cloned(),
            })
        }
        Value::Object(object) => {
            let positions: Option<Vec<ArrayPosition>> = object
                .keys()
                .map(|key| key.parse::<ArrayPosition>().ok())
                .collect();
            match positions {
                Some(positions) => {
                    let mut entries = BTreeMap::new();
                    for (position, sub) in positions.into_iter().zip(object.values()) {
                        let diff = parse_sub_diff(sub, &format!("{path}[{position}]"))?;
                        entries.insert(position, diff);
                    }
                    Ok(Diff::Array(entries))
                }
                None => {
                    let mut entries = BTreeMap::new();
                    for (name, sub) in object {
                        let diff = parse_sub_diff(sub, &format!("{path}.{name}"))?;
                        entries.insert(name.clone(), diff);
                    }
                    Ok(Diff::Object(entries))
                }
            }
        }
        other => Err(DiffFormatError::new(
            path,
            format!("expected diff object or list, found `{other}`"),
        )),
    }
}

fn parse_sub_diff(value: &Value, path: &str) -> Result<Diff, DiffFormatError> {
    if value.is_null() {
        return Err(DiffFormatError::new(
            path,
            "unchanged entries must be omitted, not null",
        ));
    }
    parse_diff(value, path)
}

impl Serialize for Diff {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Diff {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Diff::from_json(&value).map_err(D::Error::custom)
    }
}

/// A diff does not describe a transition starting at the given value, or
/// the schema has no path matching the diff's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffMismatchError {
    /// JSON path where application failed, rooted at `$`.
    pub path: String,
    pub message: String,
}

impl DiffMismatchError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl Display for DiffMismatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "diff mismatch at `{}`: {}", self.path, self.message)
    }
}

impl Error for DiffMismatchError {}

/// Malformed diff JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffFormatError {
    pub path: String,
    pub message: String,
}

impl DiffFormatError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl Display for DiffFormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid diff at `{}`: {}", self.path, self.message)
    }
}

impl Error for DiffFormatError {}

/// Returns the `_type` discriminator of a typed value.
pub(crate) fn type_tag(value: &Value) -> Option<&str> {
    value.as_object()?.get("_type")?.as_str()
}

//! Semantic equality for typed values.
//!
//! # Responsibility
//! - Map `_type` discriminators to domain-level equality checks.
//! - Compare nested values using those checks wherever typed values occur.
//!
//! # Invariants
//! - The registry is an explicit value; nothing is registered globally.
//! - Types without a registered check fall back to structural equality.

use super::type_tag;
use crate::schema::parse_utc_datetime;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Decides whether two typed values with the same `_type` are equal.
pub type TypedEquality = fn(&Value, &Value) -> bool;

/// `_type` -> equality mapping used to check a diff's recorded prior values.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    equalities: HashMap<String, TypedEquality>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut type_names: Vec<&String> = self.equalities.keys().collect();
        type_names.sort();
        f.debug_struct("TypeRegistry")
            .field("types", &type_names)
            .finish()
    }
}

impl TypeRegistry {
    /// Creates an empty registry; every typed value compares structurally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry covering the SampleDB data types.
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        registry.register("text", text_equal);
        registry.register("bool", bool_equal);
        registry.register("quantity", quantity_equal);
        registry.register("datetime", datetime_equal);
        registry.register("tags", tags_equal);
        registry.register("timeseries", timeseries_equal);
        registry.register("sample", object_reference_equal);
        registry.register("measurement", object_reference_equal);
        registry.register("object_reference", object_reference_equal);
        registry.register("user", user_equal);
        registry.register("file", file_equal);
        registry
    }

    /// Registers `equality` for `type_name`, returning the replaced check.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        equality: TypedEquality,
    ) -> Option<TypedEquality> {
        self.equalities.insert(type_name.into(), equality)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.equalities.contains_key(type_name)
    }

    /// Compares two values, using registered checks for typed values.
    ///
    /// Arrays compare element-wise and plain objects property-wise; typed
    /// values with different `_type` are never equal.
    pub fn values_equal(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Array(left_items), Value::Array(right_items)) => {
                left_items.len() == right_items.len()
                    && left_items
                        .iter()
                        .zip(right_items)
                        .all(|(left, right)| self.values_equal(left, right))
            }
            (Value::Object(left_object), Value::Object(right_object)) => {
                match (type_tag(left), type_tag(right)) {
                    (Some(left_type), Some(right_type)) => {
                        left_type == right_type
                            && match self.equalities.get(left_type) {
                                Some(equality) => equality(left, right),
                                None => left == right,
                            }
                    }
                    (None, None) => self.objects_equal(left_object, right_object),
                    _ => false,
                }
            }
            _ => left == right,
        }
    }

    fn objects_equal(&self, left: &Map<String, Value>, right: &Map<String, Value>) -> bool {
        left.len() == right.len()
            && left.iter().all(|(key, left_value)| {
                right
                    .get(key)
                    .is_some_and(|right_value| self.values_equal(left_value, right_value))
            })
    }
}

fn text_equal(left: &Value, right: &Value) -> bool {
    fn translations(value: &Value) -> Option<BTreeMap<&str, &str>> {
        match value.get("text")? {
            Value::String(text) => Some(BTreeMap::from([("en", text.as_str())])),
            Value::Object(object) => object
                .iter()
                .map(|(language, text)| Some((language.as_str(), text.as_str()?)))
                .collect(),
            _ => None,
        }
    }
    fn is_markdown(value: &Value) -> bool {
        value
            .get("is_markdown")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    matches!((translations(left), translations(right)), (Some(l), Some(r)) if l == r)
        && is_markdown(left) == is_markdown(right)
}

fn bool_equal(left: &Value, right: &Value) -> bool {
    both_eq(left.get("value"), right.get("value"))
}

fn quantity_equal(left: &Value, right: &Value) -> bool {
    let number = |value: &Value, field: &str| value.get(field).and_then(Value::as_f64);

    if !both_eq(left.get("units"), right.get("units")) {
        return false;
    }
    match (number(left, "magnitude"), number(right, "magnitude")) {
        (Some(l), Some(r)) => l == r,
        _ => both_eq(
            number(left, "magnitude_in_base_units"),
            number(right, "magnitude_in_base_units"),
        ),
    }
}

fn datetime_equal(left: &Value, right: &Value) -> bool {
    let instant = |value: &Value| {
        value
            .get("utc_datetime")
            .and_then(Value::as_str)
            .and_then(parse_utc_datetime)
    };
    both_eq(instant(left), instant(right))
}

fn tags_equal(left: &Value, right: &Value) -> bool {
    both_eq(left.get("tags"), right.get("tags"))
}

fn timeseries_equal(left: &Value, right: &Value) -> bool {
    both_eq(left.get("units"), right.get("units")) && both_eq(left.get("data"), right.get("data"))
}

fn object_reference_equal(left: &Value, right: &Value) -> bool {
    let object_id = |value: &Value| value.get("object_id").and_then(Value::as_i64);
    both_eq(object_id(left), object_id(right))
        && both_eq(component_uuid(left), component_uuid(right))
}

fn user_equal(left: &Value, right: &Value) -> bool {
    let user_id = |value: &Value| value.get("user_id").and_then(Value::as_i64);
    both_eq(user_id(left), user_id(right))
        && both_eq(component_uuid(left), component_uuid(right))
}

fn file_equal(left: &Value, right: &Value) -> bool {
    let file_id = |value: &Value| value.get("file_id").and_then(Value::as_i64);
    both_eq(file_id(left), file_id(right))
}

/// Absent -> `Some(None)`, unparsable -> `None`.
fn component_uuid(value: &Value) -> Option<Option<Uuid>> {
    match value.get("component_uuid") {
        None => Some(None),
        Some(uuid) => uuid
            .as_str()
            .and_then(|text| Uuid::parse_str(text).ok())
            .map(Some),
    }
}

/// Equal and decodable on both sides.
fn both_eq<T: PartialEq>(left: Option<T>, right: Option<T>) -> bool {
    matches!((left, right), (Some(l), Some(r)) if l == r)
}

#[cfg(test)]
mod tests {
    use super::TypeRegistry;
    use serde_json::json;

    #[test]
    fn text_shorthand_equals_english_translation() {
        let registry = TypeRegistry::with_builtin_types();
        assert!(registry.values_equal(
            &json!({"_type": "text", "text": "Sample"}),
            &json!({"_type": "text", "text": {"en": "Sample"}, "is_markdown": false}),
        ));
        assert!(!registry.values_equal(
            &json!({"_type": "text", "text": "Sample"}),
            &json!({"_type": "text", "text": "Sample", "is_markdown": true}),
        ));
    }

    #[test]
    fn quantity_compares_decoded_magnitudes() {
        let registry = TypeRegistry::with_builtin_types();
        assert!(registry.values_equal(
            &json!({"_type": "quantity", "units": "g", "magnitude": 10}),
            &json!({"_type": "quantity", "units": "g", "magnitude": 10.0}),
        ));
        assert!(!registry.values_equal(
            &json!({"_type": "quantity", "units": "g", "magnitude": 10}),
            &json!({"_type": "quantity", "units": "g"}),
        ));
    }

    #[test]
    fn datetime_compares_instants() {
        let registry = TypeRegistry::with_builtin_types();
        assert!(registry.values_equal(
            &json!({"_type": "datetime", "utc_datetime": "2024-05-01 10:00:00"}),
            &json!({"_type": "datetime", "utc_datetime": "2024-05-01 10:00:00.000000"}),
        ));
    }

    #[test]
    fn object_references_ignore_uuid_case() {
        let registry = TypeRegistry::with_builtin_types();
        assert!(registry.values_equal(
            &json!({"_type": "sample", "object_id": 4, "component_uuid": "6c2b0e1a-1b7e-4f3c-9a55-0c5b1d1e2f3a"}),
            &json!({"_type": "sample", "object_id": 4, "component_uuid": "6C2B0E1A-1B7E-4F3C-9A55-0C5B1D1E2F3A"}),
        ));
        assert!(!registry.values_equal(
            &json!({"_type": "sample", "object_id": 4}),
            &json!({"_type": "measurement", "object_id": 4}),
        ));
    }

    #[test]
    fn nested_values_use_registered_checks() {
        let registry = TypeRegistry::with_builtin_types();
        assert!(registry.values_equal(
            &json!({"names": [{"_type": "text", "text": "a"}]}),
            &json!({"names": [{"_type": "text", "text": {"en": "a"}}]}),
        ));
        assert!(!registry.values_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    }

    #[test]
    fn empty_registry_compares_structurally() {
        let registry = TypeRegistry::new();
        assert!(!registry.is_registered("text"));
        assert!(!registry.values_equal(
            &json!({"_type": "text", "text": "a"}),
            &json!({"_type": "text", "text": {"en": "a"}}),
        ));
    }
}

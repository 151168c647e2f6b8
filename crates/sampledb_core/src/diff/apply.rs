//! Diff application.

use super::{ArrayPosition, Diff, DiffMismatchError, Slot, TypeRegistry};
use crate::schema::validate;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

type ApplyResult = Result<Option<Value>, DiffMismatchError>;

/// Applies `diff` to `before`, returning the resulting slot.
///
/// When `validate_before` is true, `before` is first validated against
/// `schema_before`; nested applications skip that step and rely on the
/// outermost check. `registry` decides equality of typed values recorded
/// as a diff's prior value.
///
/// A `None` diff keeps `before` unchanged. A result of [`Slot::NotSet`]
/// means the diff deleted the value.
///
/// # Errors
/// - Returns `DiffMismatchError` when `before` does not match its schema,
///   when a recorded prior value differs from the actual one, or when the
///   schema has no `items`/property for a path the diff touches.
pub fn apply_diff(
    before: &Slot,
    diff: Option<&Diff>,
    schema_before: &Value,
    validate_before: bool,
    registry: &TypeRegistry,
) -> Result<Slot, DiffMismatchError> {
    if validate_before {
        if let Some(value) = before.as_value() {
            validate(value, schema_before).map_err(|err| {
                DiffMismatchError::new(
                    err.path.clone(),
                    format!("base value does not match its schema: {}", err.message),
                )
            })?;
        }
    }

    let applier = Applier { registry };
    applier
        .apply(before.as_value(), diff, schema_before, "$")
        .map(Slot::from)
}

struct Applier<'a> {
    registry: &'a TypeRegistry,
}

impl Applier<'_> {
    fn apply(
        &self,
        before: Option<&Value>,
        diff: Option<&Diff>,
        schema: &Value,
        path: &str,
    ) -> ApplyResult {
        match diff {
            None => before.cloned().map(Some).ok_or_else(|| {
                DiffMismatchError::new(path, "no diff given for a value that is not set")
            }),
            Some(Diff::Array(positions)) => self.apply_array(before, positions, schema, path),
            Some(Diff::Object(properties)) => self.apply_object(before, properties, schema, path),
            Some(Diff::Generic {
                before: expected,
                after,
            }) => self.apply_generic(before, expected.as_ref(), after.as_ref(), schema, path),
        }
    }

    fn apply_array(
        &self,
        before: Option<&Value>,
        positions: &BTreeMap<ArrayPosition, Diff>,
        schema: &Value,
        path: &str,
    ) -> ApplyResult {
        let items = before
            .and_then(Value::as_array)
            .ok_or_else(|| DiffMismatchError::new(path, "array diff needs an array"))?;
        let item_schema = schema
            .get("items")
            .ok_or_else(|| DiffMismatchError::new(path, "schema declares no `items`"))?;

        let len = items.len();
        // `None` marks a deleted item.
        let mut kept: Vec<Option<Value>> = items.iter().cloned().map(Some).collect();
        let mut appended = BTreeMap::new();
        let mut touched = BTreeSet::new();

        for (position, item_diff) in positions {
            let item_path = format!("{path}[{position}]");
            let index = position.resolve(len).ok_or_else(|| {
                DiffMismatchError::new(&item_path, format!("position is outside array of {len}"))
            })?;
            if !touched.insert(index) {
                return Err(DiffMismatchError::new(
                    item_path,
                    format!("index {index} is addressed twice"),
                ));
            }

            let result =
                self.apply(items.get(index), Some(item_diff), item_schema, &item_path)?;
            if index < len {
                kept[index] = result;
            } else if let Some(value) = result {
                appended.insert(index, value);
            }
        }

        for (offset, index) in appended.keys().enumerate() {
            if *index != len + offset {
                return Err(DiffMismatchError::new(
                    path,
                    format!("appended item at {index} leaves a gap after {}", len + offset),
                ));
            }
        }

        let mut result: Vec<Value> = kept.into_iter().flatten().collect();
        result.extend(appended.into_values());
        Ok(Some(Value::Array(result)))
    }

    fn apply_object(
        &self,
        before: Option<&Value>,
        properties: &BTreeMap<String, Diff>,
        schema: &Value,
        path: &str,
    ) -> ApplyResult {
        let object = before
            .and_then(Value::as_object)
            .ok_or_else(|| DiffMismatchError::new(path, "object diff needs an object"))?;
        let property_schemas = schema.get("properties").and_then(Value::as_object);

        let mut patched: Map<String, Value> = object.clone();
        for (name, property_diff) in properties {
            let property_path = format!("{path}.{name}");
            let property_schema = property_schemas
                .and_then(|schemas| schemas.get(name))
                .ok_or_else(|| {
                    DiffMismatchError::new(&property_path, "schema declares no such property")
                })?;

            let applied = self.apply(
                object.get(name),
                Some(property_diff),
                property_schema,
                &property_path,
            )?;
            match applied {
                Some(value) => {
                    patched.insert(name.clone(), value);
                }
                None => {
                    patched.remove(name);
                }
            }
        }
        Ok(Some(Value::Object(patched)))
    }

    fn apply_generic(
        &self,
        before: Option<&Value>,
        expected: Option<&Value>,
        after: Option<&Value>,
        schema: &Value,
        path: &str,
    ) -> ApplyResult {
        match (expected, before) {
            (Some(expected), Some(actual)) => {
                validate(expected, schema).map_err(|err| {
                    DiffMismatchError::new(
                        path,
                        format!("recorded prior value does not match the schema: {err}"),
                    )
                })?;
                if !self.registry.values_equal(expected, actual) {
                    return Err(DiffMismatchError::new(
                        path,
                        "prior value differs from the one recorded in the diff",
                    ));
                }
            }
            (Some(_), None) => {
                return Err(DiffMismatchError::new(
                    path,
                    "diff records a prior value but none is set",
                ))
            }
            (None, Some(_)) => {
                return Err(DiffMismatchError::new(
                    path,
                    "diff records no prior value but one is set",
                ))
            }
            (None, None) => {}
        }
        Ok(after.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::apply_diff;
    use crate::diff::{Diff, DiffMismatchError, Slot, TypeRegistry};
    use serde_json::{json, Value};

    fn apply(before: Value, diff: Value, schema: Value) -> Result<Slot, DiffMismatchError> {
        let diff = Diff::from_json(&diff).unwrap();
        apply_diff(
            &Slot::Set(before),
            Some(&diff),
            &schema,
            true,
            &TypeRegistry::with_builtin_types(),
        )
    }

    fn list_schema() -> Value {
        json!({"type": "array", "items": {"type": "bool"}})
    }

    fn flag(value: bool) -> Value {
        json!({"_type": "bool", "value": value})
    }

    #[test]
    fn none_diff_copies_value_and_rejects_unset() {
        let registry = TypeRegistry::with_builtin_types();
        let before = Slot::Set(json!([flag(true)]));
        let result = apply_diff(&before, None, &list_schema(), true, &registry).unwrap();
        assert_eq!(result, before);

        let err = apply_diff(&Slot::NotSet, None, &list_schema(), true, &registry).unwrap_err();
        assert_eq!(err.path, "$");
    }

    #[test]
    fn generic_deletion_returns_not_set() {
        let diff = json!({"_before": flag(true)});
        let result = apply(flag(true), diff, json!({"type": "bool"})).unwrap();
        assert_eq!(result, Slot::NotSet);
    }

    #[test]
    fn generic_assertion_uses_semantic_equality() {
        let schema = json!({"type": "text"});
        let before = json!({"_type": "text", "text": {"en": "A"}});
        let diff = json!({
            "_before": {"_type": "text", "text": "A"},
            "_after": {"_type": "text", "text": "B"}
        });
        let result = apply(before, diff, schema).unwrap();
        assert_eq!(result, Slot::Set(json!({"_type": "text", "text": "B"})));
    }

    #[test]
    fn invalid_base_value_is_a_mismatch() {
        let diff = json!({"0": {"_before": 1, "_after": 2}});
        let err = apply(json!([1]), diff, list_schema()).unwrap_err();
        assert_eq!(err.path, "$[0]");
    }

    #[test]
    fn array_diff_requires_items_schema() {
        let registry = TypeRegistry::with_builtin_types();
        let diff = Diff::from_json(&json!({"+0": {"_after": 1}})).unwrap();
        let err = apply_diff(
            &Slot::Set(json!([])),
            Some(&diff),
            &json!({"type": "array"}),
            false,
            &registry,
        )
        .unwrap_err();
        assert!(err.message.contains("items"));
    }

    #[test]
    fn appends_must_be_contiguous() {
        let diff = json!({"+1": {"_after": flag(true)}});
        let err = apply(json!([]), diff, list_schema()).unwrap_err();
        assert!(err.message.contains("gap"));
    }

    #[test]
    fn from_end_beyond_start_is_a_mismatch() {
        let diff = json!({"-2": {"_before": flag(true)}});
        let err = apply(json!([flag(true)]), diff, list_schema()).unwrap_err();
        assert_eq!(err.path, "$[-2]");
    }

    #[test]
    fn duplicate_index_is_a_mismatch() {
        let diff = json!({
            "0": {"_before": flag(true), "_after": flag(false)},
            "-1": {"_before": flag(true)}
        });
        let err = apply(json!([flag(true)]), diff, list_schema()).unwrap_err();
        assert!(err.message.contains("addressed twice"));
    }

    #[test]
    fn object_diff_needs_declared_property() {
        let schema = json!({"type": "object", "properties": {}});
        let err = apply(json!({}), json!({"a": {"_after": flag(true)}}), schema).unwrap_err();
        assert_eq!(err.path, "$.a");
    }

    #[test]
    fn list_shorthand_applies_positionally() {
        let diff = json!([null, {"_after": flag(false)}]);
        let result = apply(json!([flag(true)]), diff, list_schema()).unwrap();
        assert_eq!(result, Slot::Set(json!([flag(true), flag(false)])));
    }
}

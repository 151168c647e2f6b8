//! Diff calculation.

use super::{type_tag, ArrayPosition, Diff, Slot};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Shape guess used to decide whether two values can be diffed structurally.
enum Shape<'a> {
    Array(&'a [Value]),
    Object(&'a Map<String, Value>),
    /// Typed values and scalars are compared as whole leaves.
    Leaf,
}

fn guess_shape(value: Option<&Value>) -> Shape<'_> {
    match value {
        Some(Value::Array(items)) => Shape::Array(items),
        Some(value) if type_tag(value).is_some() => Shape::Leaf,
        Some(Value::Object(object)) => Shape::Object(object),
        _ => Shape::Leaf,
    }
}

/// Calculates the diff leading from `before` to `after`.
///
/// Returns `None` when both slots are equal. Arrays recurse per position
/// and plain objects per property; anything else (type changes, typed
/// values, scalars, unset slots) yields a [`Diff::Generic`] leaf.
///
/// Array positions present on both sides are keyed by index, positions
/// only present in `after` as appended (`+n`) and positions only present
/// in `before` as counted from the end (`-n`).
///
/// The result survives a JSON round trip only when plain-object property
/// names are valid schema property names; schema-validated data always
/// satisfies this.
pub fn calculate_diff(before: &Slot, after: &Slot) -> Option<Diff> {
    diff_slots(before.as_value(), after.as_value())
}

/// Calculates the diff between two values that are both set.
pub fn calculate_value_diff(before: &Value, after: &Value) -> Option<Diff> {
    diff_slots(Some(before), Some(after))
}

fn diff_slots(before: Option<&Value>, after: Option<&Value>) -> Option<Diff> {
    if before == after {
        return None;
    }

    match (guess_shape(before), guess_shape(after)) {
        (Shape::Array(before_items), Shape::Array(after_items)) => {
            diff_arrays(before_items, after_items)
        }
        (Shape::Object(before_object), Shape::Object(after_object)) => {
            diff_objects(before_object, after_object)
        }
        _ => Diff::generic(before.cloned().into(), after.cloned().into()),
    }
}

fn diff_arrays(before: &[Value], after: &[Value]) -> Option<Diff> {
    let mut positions = BTreeMap::new();
    for index in 0..before.len().max(after.len()) {
        let Some(diff) = diff_slots(before.get(index), after.get(index)) else {
            continue;
        };
        let position = if index >= before.len() {
            ArrayPosition::Append(index - before.len())
        } else if index >= after.len() {
            ArrayPosition::FromEnd(before.len() - index)
        } else {
            ArrayPosition::Index(index)
        };
        positions.insert(position, diff);
    }

    (!positions.is_empty()).then_some(Diff::Array(positions))
}

fn diff_objects(before: &Map<String, Value>, after: &Map<String, Value>) -> Option<Diff> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    let properties: BTreeMap<String, Diff> = keys
        .into_iter()
        .filter_map(|key| {
            diff_slots(before.get(key), after.get(key)).map(|diff| (key.clone(), diff))
        })
        .collect();

    (!properties.is_empty()).then_some(Diff::Object(properties))
}

use proptest::prelude::*;
use proptest::sample::subsequence;
use sampledb_core::{
    apply_diff, calculate_value_diff, invert_diff, ArrayPosition, Diff, Slot, TypeRegistry,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn record_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "text"},
            "flags": {"type": "array", "items": {"type": "bool"}},
            "rows": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "label": {"type": "text"},
                        "count": {"type": "quantity"},
                        "marks": {"type": "tags"}
                    },
                    "required": ["label"]
                }
            }
        },
        "required": ["flags", "rows"]
    })
}

fn flag(value: bool) -> Value {
    json!({"_type": "bool", "value": value})
}

fn text() -> impl Strategy<Value = Value> {
    "[a-c]{0,2}".prop_map(|text| json!({"_type": "text", "text": text}))
}

fn quantity() -> impl Strategy<Value = Value> {
    (0i64..4).prop_map(|magnitude| {
        json!({"_type": "quantity", "units": "g", "magnitude": magnitude})
    })
}

fn marks() -> impl Strategy<Value = Value> {
    subsequence(vec!["dry", "wet", "cold"], 0..=3)
        .prop_map(|tags| json!({"_type": "tags", "tags": tags}))
}

fn row() -> impl Strategy<Value = Value> {
    (text(), proptest::option::of(quantity()), proptest::option::of(marks())).prop_map(
        |(label, count, marks)| {
            let mut row = json!({"label": label});
            if let Some(count) = count {
                row["count"] = count;
            }
            if let Some(marks) = marks {
                row["marks"] = marks;
            }
            row
        },
    )
}

fn record() -> impl Strategy<Value = Value> {
    (
        proptest::option::of(text()),
        prop::collection::vec(any::<bool>().prop_map(flag), 0..4),
        prop::collection::vec(row(), 0..4),
    )
        .prop_map(|(name, flags, rows)| {
            let mut record = json!({"flags": flags, "rows": rows});
            if let Some(name) = name {
                record["name"] = name;
            }
            record
        })
}

/// A bool list with an edit: which kept items flip, how many trailing items
/// go, and which items get appended.
fn list_edit() -> impl Strategy<Value = (Vec<bool>, Vec<bool>, usize, Vec<bool>)> {
    prop::collection::vec(any::<bool>(), 0..6).prop_flat_map(|items| {
        let len = items.len();
        (
            Just(items),
            prop::collection::vec(any::<bool>(), len),
            0..=len,
            prop::collection::vec(any::<bool>(), 0..4),
        )
    })
}

fn apply_to(value: &Value, diff: &Diff, schema: &Value) -> Slot {
    apply_diff(
        &Slot::Set(value.clone()),
        Some(diff),
        schema,
        true,
        &TypeRegistry::with_builtin_types(),
    )
    .unwrap()
}

proptest! {
    #[test]
    fn calculated_diffs_round_trip(a in record(), b in record()) {
        let schema = record_schema();
        let forward = calculate_value_diff(&a, &b);
        let backward = calculate_value_diff(&b, &a);
        prop_assert_eq!(forward.is_none(), a == b);

        let applied = apply_diff(
            &Slot::Set(a.clone()),
            forward.as_ref(),
            &schema,
            true,
            &TypeRegistry::with_builtin_types(),
        )
        .unwrap();
        prop_assert_eq!(applied, Slot::Set(b.clone()));

        if let (Some(forward), Some(backward)) = (forward, backward) {
            let inverse = invert_diff(&forward).unwrap();
            prop_assert_eq!(&inverse, &backward);
            prop_assert_eq!(invert_diff(&inverse).unwrap(), forward.clone());
            prop_assert_eq!(Diff::from_json(&forward.to_json()).unwrap(), forward.clone());
            prop_assert_eq!(apply_to(&b, &inverse, &schema), Slot::Set(a));
        }
    }

    #[test]
    fn edited_lists_are_restored_by_the_inverse(
        (items, flips, removed, appended) in list_edit()
    ) {
        let schema = json!({"type": "array", "items": {"type": "bool"}});
        let len = items.len();
        let kept = len - removed;

        let mut positions = BTreeMap::new();
        let mut expected = Vec::new();
        for index in 0..kept {
            let value = items[index] != flips[index];
            if flips[index] {
                positions.insert(
                    ArrayPosition::Index(index),
                    Diff::Generic { before: Some(flag(items[index])), after: Some(flag(value)) },
                );
            }
            expected.push(flag(value));
        }
        for offset in 1..=removed {
            positions.insert(
                ArrayPosition::FromEnd(offset),
                Diff::Generic { before: Some(flag(items[len - offset])), after: None },
            );
        }
        for (offset, value) in appended.iter().enumerate() {
            positions.insert(
                ArrayPosition::Append(offset),
                Diff::Generic { before: None, after: Some(flag(*value)) },
            );
            expected.push(flag(*value));
        }
        prop_assume!(!positions.is_empty());

        let diff = Diff::Array(positions);
        let original = Value::Array(items.iter().copied().map(flag).collect());
        let edited = apply_to(&original, &diff, &schema);
        prop_assert_eq!(&edited, &Slot::Set(Value::Array(expected.clone())));

        let inverse = invert_diff(&diff).unwrap();
        prop_assert_eq!(apply_to(&Value::Array(expected), &inverse, &schema), Slot::Set(original));
        prop_assert_eq!(invert_diff(&inverse).unwrap(), diff.clone());
        prop_assert_eq!(Diff::from_json(&diff.to_json()).unwrap(), diff);
    }
}

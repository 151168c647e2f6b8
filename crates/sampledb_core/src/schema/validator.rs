//! Recursive data validator.
//!
//! Object and array schemas recurse into `properties` / `items`; every other
//! `type` names a typed value whose `_type` discriminator must match it.

use super::{is_valid_property_name, parse_utc_datetime, SchemaResult, SchemaValidationError};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

const TEXT_FIELDS: &[&str] = &["_type", "text", "is_markdown"];
const BOOL_FIELDS: &[&str] = &["_type", "value"];
const QUANTITY_FIELDS: &[&str] = &[
    "_type",
    "units",
    "magnitude",
    "magnitude_in_base_units",
    "dimensionality",
];
const DATETIME_FIELDS: &[&str] = &["_type", "utc_datetime"];
const TAGS_FIELDS: &[&str] = &["_type", "tags"];
const TIMESERIES_FIELDS: &[&str] = &["_type", "units", "data"];
const OBJECT_REFERENCE_FIELDS: &[&str] = &[
    "_type",
    "object_id",
    "component_uuid",
    "eln_source_url",
    "eln_object_url",
];
const USER_FIELDS: &[&str] = &["_type", "user_id", "component_uuid"];
const FILE_FIELDS: &[&str] = &["_type", "file_id"];

/// Validates `data` against `schema`.
///
/// # Errors
/// - Returns the first violation found, with its JSON path.
/// - A malformed schema (missing `type`, unknown type, missing `items`) is
///   reported the same way, at the path where it was needed.
pub fn validate(data: &Value, schema: &Value) -> SchemaResult<()> {
    validate_at(data, schema, "$")
}

fn validate_at(data: &Value, schema: &Value, path: &str) -> SchemaResult<()> {
    if data.is_null() {
        return Err(SchemaValidationError::new(path, "null is not allowed"));
    }

    match schema_type(schema, path)? {
        "object" => validate_object(data, schema, path),
        "array" => validate_array(data, schema, path),
        type_name => validate_typed(data, type_name, path),
    }
}

fn schema_type<'a>(schema: &'a Value, path: &str) -> SchemaResult<&'a str> {
    schema
        .as_object()
        .and_then(|schema| schema.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| SchemaValidationError::new(path, "schema has no string `type`"))
}

fn validate_object(data: &Value, schema: &Value, path: &str) -> SchemaResult<()> {
    let object = data
        .as_object()
        .ok_or_else(|| type_mismatch(path, "object", data))?;

    let empty = Map::new();
    let properties = match schema.get("properties") {
        None => &empty,
        Some(Value::Object(properties)) => properties,
        Some(_) => {
            return Err(SchemaValidationError::new(
                path,
                "schema `properties` must be an object",
            ))
        }
    };

    if let Some(name) = properties.keys().find(|name| !is_valid_property_name(name)) {
        return Err(SchemaValidationError::new(
            path,
            format!("schema declares invalid property name `{name}`"),
        ));
    }

    for name in required_properties(schema, path)? {
        if !properties.contains_key(name) {
            return Err(SchemaValidationError::new(
                path,
                format!("schema requires undeclared property `{name}`"),
            ));
        }
        if !object.contains_key(name) {
            return Err(SchemaValidationError::new(
                child_path(path, name),
                "missing required property",
            ));
        }
    }

    for (name, value) in object {
        let property_path = child_path(path, name);
        let property_schema = properties
            .get(name)
            .ok_or_else(|| SchemaValidationError::new(&property_path, "undeclared property"))?;
        validate_at(value, property_schema, &property_path)?;
    }

    Ok(())
}

fn required_properties<'a>(schema: &'a Value, path: &str) -> SchemaResult<Vec<&'a str>> {
    let Some(required) = schema.get("required") else {
        return Ok(Vec::new());
    };
    let invalid = || SchemaValidationError::new(path, "schema `required` must list strings");
    required
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|name| name.as_str().ok_or_else(invalid))
        .collect()
}

fn validate_array(data: &Value, schema: &Value, path: &str) -> SchemaResult<()> {
    let items = data
        .as_array()
        .ok_or_else(|| type_mismatch(path, "array", data))?;
    let item_schema = schema
        .get("items")
        .ok_or_else(|| SchemaValidationError::new(path, "array schema has no `items`"))?;

    if let Some(min_items) = schema.get("minItems").and_then(Value::as_u64) {
        if (items.len() as u64) < min_items {
            return Err(SchemaValidationError::new(
                path,
                format!("expected at least {min_items} items, found {}", items.len()),
            ));
        }
    }
    if let Some(max_items) = schema.get("maxItems").and_then(Value::as_u64) {
        if (items.len() as u64) > max_items {
            return Err(SchemaValidationError::new(
                path,
                format!("expected at most {max_items} items, found {}", items.len()),
            ));
        }
    }

    for (index, item) in items.iter().enumerate() {
        validate_at(item, item_schema, &format!("{path}[{index}]"))?;
    }
    Ok(())
}

fn validate_typed(data: &Value, type_name: &str, path: &str) -> SchemaResult<()> {
    let allowed = match type_name {
        "text" => TEXT_FIELDS,
        "bool" => BOOL_FIELDS,
        "quantity" => QUANTITY_FIELDS,
        "datetime" => DATETIME_FIELDS,
        "tags" => TAGS_FIELDS,
        "timeseries" => TIMESERIES_FIELDS,
        "sample" | "measurement" | "object_reference" => OBJECT_REFERENCE_FIELDS,
        "user" => USER_FIELDS,
        "file" => FILE_FIELDS,
        other => {
            return Err(SchemaValidationError::new(
                path,
                format!("unknown schema type `{other}`"),
            ))
        }
    };

    let object = data
        .as_object()
        .ok_or_else(|| type_mismatch(path, type_name, data))?;
    match object.get("_type").and_then(Value::as_str) {
        Some(found) if found == type_name => {}
        Some(found) => {
            return Err(SchemaValidationError::new(
                path,
                format!("expected `_type` {type_name}, found {found}"),
            ))
        }
        None => return Err(SchemaValidationError::new(path, "missing `_type`")),
    }
    if let Some(field) = object.keys().find(|key| !allowed.contains(&key.as_str())) {
        return Err(SchemaValidationError::new(
            child_path(path, field),
            format!("unexpected field for {type_name}"),
        ));
    }

    let fields = TypedFields { object, path };
    match type_name {
        "text" => {
            match fields.require("text")? {
                Value::String(_) => {}
                Value::Object(translations) => {
                    for (language, text) in translations {
                        if language.is_empty() || !text.is_string() {
                            return Err(fields.invalid("text", "expected language code to string"));
                        }
                    }
                }
                _ => return Err(fields.invalid("text", "expected string or translations")),
            }
            fields.optional("is_markdown", Value::is_boolean, "expected bool")
        }
        "bool" => fields.expect("value", Value::is_boolean, "expected bool"),
        "quantity" => {
            fields.expect("units", Value::is_string, "expected string")?;
            fields.optional("magnitude", Value::is_number, "expected number")?;
            fields.optional("magnitude_in_base_units", Value::is_number, "expected number")?;
            fields.optional("dimensionality", Value::is_string, "expected string")?;
            if !object.contains_key("magnitude") && !object.contains_key("magnitude_in_base_units")
            {
                return Err(SchemaValidationError::new(
                    path,
                    "quantity needs `magnitude` or `magnitude_in_base_units`",
                ));
            }
            Ok(())
        }
        "datetime" => fields.expect("utc_datetime", is_utc_datetime, "expected utc datetime"),
        "tags" => {
            let tags = fields
                .require("tags")?
                .as_array()
                .ok_or_else(|| fields.invalid("tags", "expected array"))?;
            let mut seen = BTreeSet::new();
            for tag in tags {
                match tag.as_str() {
                    Some(tag) if !tag.trim().is_empty() && seen.insert(tag) => {}
                    _ => return Err(fields.invalid("tags", "expected unique non-empty strings")),
                }
            }
            Ok(())
        }
        "timeseries" => {
            fields.expect("units", Value::is_string, "expected string")?;
            fields.expect("data", is_timeseries_data, "expected [datetime, number] rows")
        }
        "sample" | "measurement" | "object_reference" => {
            fields.expect("object_id", Value::is_i64, "expected integer")?;
            fields.optional("component_uuid", is_uuid, "expected uuid")?;
            fields.optional("eln_source_url", Value::is_string, "expected string")?;
            fields.optional("eln_object_url", Value::is_string, "expected string")
        }
        "user" => {
            fields.expect("user_id", Value::is_i64, "expected integer")?;
            fields.optional("component_uuid", is_uuid, "expected uuid")
        }
        _ => fields.expect("file_id", Value::is_i64, "expected integer"),
    }
}

struct TypedFields<'a> {
    object: &'a Map<String, Value>,
    path: &'a str,
}

impl<'a> TypedFields<'a> {
    fn require(&self, field: &str) -> SchemaResult<&'a Value> {
        self.object
            .get(field)
            .ok_or_else(|| SchemaValidationError::new(child_path(self.path, field), "missing field"))
    }

    fn expect(&self, field: &str, check: fn(&Value) -> bool, message: &str) -> SchemaResult<()> {
        if check(self.require(field)?) {
            Ok(())
        } else {
            Err(self.invalid(field, message))
        }
    }

    fn optional(&self, field: &str, check: fn(&Value) -> bool, message: &str) -> SchemaResult<()> {
        match self.object.get(field) {
            Some(value) if !check(value) => Err(self.invalid(field, message)),
            _ => Ok(()),
        }
    }

    fn invalid(&self, field: &str, message: &str) -> SchemaValidationError {
        SchemaValidationError::new(child_path(self.path, field), message)
    }
}

fn is_utc_datetime(value: &Value) -> bool {
    value.as_str().and_then(parse_utc_datetime).is_some()
}

fn is_uuid(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|text| Uuid::parse_str(text).is_ok())
}

fn is_timeseries_data(value: &Value) -> bool {
    let Some(rows) = value.as_array() else {
        return false;
    };
    rows.iter().all(|row| match row.as_array() {
        Some(entry) if entry.len() == 2 || entry.len() == 3 => {
            is_utc_datetime(&entry[0]) && entry[1..].iter().all(Value::is_number)
        }
        _ => false,
    })
}

fn child_path(path: &str, name: &str) -> String {
    format!("{path}.{name}")
}

fn type_mismatch(path: &str, expected: &str, found: &Value) -> SchemaValidationError {
    SchemaValidationError::new(
        path,
        format!("expected {expected}, found {}", json_type_name(found)),
    )
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

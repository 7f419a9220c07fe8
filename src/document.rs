use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

/// A document from the backend's document store.
///
/// Every data endpoint returns this envelope: a resource `name`, a `fields`
/// object keyed by field name, and server-side create/update timestamps.
/// Each entry in `fields` wraps its value in a single-key object naming the
/// value type, for example `{"serial": {"stringValue": "AB123"}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

impl Document {
    /// The resource path relative to the store root, for error context.
    ///
    /// Full names look like
    /// `projects/p/databases/(default)/documents/devices/AB123`; callers
    /// only care about the part after `documents/`.
    pub fn path(&self) -> &str {
        match &self.name {
            Some(name) => name
                .split_once("/documents/")
                .map(|(_, path)| path)
                .unwrap_or(name),
            None => "<unnamed document>",
        }
    }
}

/// Extract a `stringValue` field. Absent or differently-typed fields are `None`.
pub(crate) fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields
        .get(name)?
        .get("stringValue")?
        .as_str()
        .map(|s| s.to_string())
}

/// Extract an `integerValue` field.
///
/// The store serializes 64-bit integers as JSON strings to survive
/// lossy JSON parsers, but some writers emit plain numbers. Accept both.
pub(crate) fn integer_field(fields: &Map<String, Value>, name: &str) -> Option<i64> {
    match fields.get(name)?.get("integerValue")? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Extract a `doubleValue` field, tolerating string-encoded numbers.
pub(crate) fn double_field(fields: &Map<String, Value>, name: &str) -> Option<f64> {
    match fields.get(name)?.get("doubleValue")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Extract a numeric field regardless of whether the writer stored it as a
/// `doubleValue` or an `integerValue`. Whole-degree readings arrive as
/// integers; fractional ones as doubles.
pub(crate) fn number_field(fields: &Map<String, Value>, name: &str) -> Option<f64> {
    double_field(fields, name).or_else(|| integer_field(fields, name).map(|n| n as f64))
}

/// Extract a `booleanValue` field.
pub(crate) fn boolean_field(fields: &Map<String, Value>, name: &str) -> Option<bool> {
    fields.get(name)?.get("booleanValue")?.as_bool()
}

/// Extract a `timestampValue` field as UTC. Timestamps are RFC 3339 with
/// optional fractional seconds and any offset.
pub(crate) fn timestamp_field(fields: &Map<String, Value>, name: &str) -> Option<DateTime<Utc>> {
    let raw = fields.get(name)?.get("timestampValue")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Extract the inner fields of a `mapValue` field.
pub(crate) fn map_field<'a>(
    fields: &'a Map<String, Value>,
    name: &str,
) -> Option<&'a Map<String, Value>> {
    fields
        .get(name)?
        .get("mapValue")?
        .get("fields")?
        .as_object()
}

/// Extract the values of an `arrayValue` field.
pub(crate) fn array_field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Vec<Value>> {
    fields.get(name)?.get("arrayValue")?.get("values")?.as_array()
}

/// The inner fields of one `mapValue` element inside an array.
pub(crate) fn map_element(value: &Value) -> Option<&Map<String, Value>> {
    value.get("mapValue")?.get("fields")?.as_object()
}

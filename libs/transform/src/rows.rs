use serde_json::{Map, Value};

/// First positional row under `key`: `payload[key][0]` read by index.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Row<'a>(Option<&'a [Value]>);

impl<'a> Row<'a> {
    pub(crate) fn first(payload: &'a Map<String, Value>, key: &str) -> Self {
        Row(payload
            .get(key)
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .filter(|row| !row.is_empty()))
    }

    pub(crate) fn is_present(&self) -> bool {
        self.0.is_some()
    }

    /// Field at `index` as trimmed text; missing indices read as empty.
    pub(crate) fn text(&self, index: usize) -> String {
        self.0
            .and_then(|row| row.get(index))
            .map(scalar)
            .unwrap_or_default()
    }
}

/// Scalar JSON value as text; objects, arrays and null read as empty.
pub(crate) fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// `map[key]` as text, empty when absent.
pub(crate) fn field(map: Option<&Map<String, Value>>, key: &str) -> String {
    map.and_then(|m| m.get(key)).map(scalar).unwrap_or_default()
}

/// First object of the array under `key`.
pub(crate) fn first_object<'a>(
    payload: &'a Map<String, Value>,
    key: &str,
) -> Option<&'a Map<String, Value>> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(Value::as_object)
}

pub(crate) fn or_default(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

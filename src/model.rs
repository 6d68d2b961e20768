use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of a backend resource, kept as the backend sent it.
pub type Record = Map<String, Value>;

/// Query parameters forwarded to a list call, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    params: Vec<(String, String)>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`; a blank value removes the parameter.
    pub fn set(&mut self, key: &str, value: &str) {
        self.params.retain(|(k, _)| k != key);
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            self.params.push((key.to_string(), trimmed.to_string()));
        }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.params
    }
}

/// A file picked in the edit dialog and not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Text form of a scalar JSON value. Objects, arrays and null have none.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Display form of a field: scalars as text, nested references by `name`.
pub fn display_text(value: &Value) -> Option<String> {
    match value {
        Value::Object(inner) => inner.get("name").and_then(scalar_text),
        other => scalar_text(other),
    }
}

/// The identity of `record` under `id_key`, as a path segment.
pub fn record_id(record: &Record, id_key: &str) -> Option<String> {
    record
        .get(id_key)
        .and_then(scalar_text)
        .filter(|id| !id.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_query_blank_value_removes_param() {
        let mut q = ListQuery::new().with("from", "2024-01-01").with("region", "North");
        assert_eq!(q.get("region"), Some("North"));
        q.set("region", "  ");
        assert_eq!(q.get("region"), None);
        assert_eq!(q.pairs().len(), 1);
    }

    #[test]
    fn display_text_reads_nested_name() {
        assert_eq!(
            display_text(&json!({ "categoryId": 3, "name": "Seeds" })).as_deref(),
            Some("Seeds")
        );
        assert_eq!(display_text(&json!(12.5)).as_deref(), Some("12.5"));
        assert_eq!(display_text(&Value::Null), None);
    }

    #[test]
    fn record_id_handles_numbers_and_blanks() {
        let rec = json!({ "userId": 42, "blank": "" });
        let rec = rec.as_object().unwrap();
        assert_eq!(record_id(rec, "userId").as_deref(), Some("42"));
        assert_eq!(record_id(rec, "blank"), None);
        assert_eq!(record_id(rec, "missing"), None);
    }
}

//! Normalisation of the response shapes the backend is known to return.
use serde_json::Value;
use tracing::warn;

use crate::model::Record;

/// Reduce a list response to its records.
///
/// Accepted shapes: `[..]`, `{<key>: [..]}`, `{data: [..]}` and
/// `{data: {<key>: [..]}}`. Anything else yields an empty list.
pub fn normalize_list(body: Value, envelope_key: &str) -> Vec<Record> {
    match body {
        Value::Array(items) => objects(items),
        Value::Object(mut outer) => {
            if let Some(Value::Array(items)) = outer.remove(envelope_key) {
                return objects(items);
            }
            match outer.remove("data") {
                Some(Value::Array(items)) => objects(items),
                Some(Value::Object(mut data)) => match data.remove(envelope_key) {
                    Some(Value::Array(items)) => objects(items),
                    _ => unrecognized(envelope_key),
                },
                _ => unrecognized(envelope_key),
            }
        }
        _ => unrecognized(envelope_key),
    }
}

/// Reduce a single-record response: a bare object carrying `id_key`, or an
/// object wrapping one under `data` or any single key.
pub fn normalize_one(body: Value, id_key: &str) -> Option<Record> {
    let Value::Object(outer) = body else {
        return None;
    };
    if outer.contains_key(id_key) {
        return Some(outer);
    }
    let wrapped = outer.get("data").and_then(Value::as_object).cloned().or_else(|| {
        outer
            .values()
            .filter_map(Value::as_object)
            .find(|inner| inner.contains_key(id_key))
            .cloned()
    });
    match wrapped {
        Some(inner) => Some(inner),
        None if outer.is_empty() => None,
        None => Some(outer),
    }
}

fn objects(items: Vec<Value>) -> Vec<Record> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

fn unrecognized(envelope_key: &str) -> Vec<Record> {
    warn!(envelope_key, "unrecognized list response shape; treating as empty");
    Vec::new()
}

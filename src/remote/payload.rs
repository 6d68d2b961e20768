//! Outbound request bodies built from edit drafts.
use reqwest::multipart::{Form, Part};
use serde_json::Value;

use crate::error::ApiError;
use crate::model::{scalar_text, Attachment, Record};
use crate::resource::ResourceSpec;

/// Map draft fields onto the backend's payload keys. Only the resource's
/// editable fields are sent, with text trimmed; nulls, the identity key and
/// transient fields never are.
pub fn encode_payload(spec: &ResourceSpec, fields: &Record) -> Record {
    let mut payload = Record::new();
    for (key, value) in fields {
        if key == &spec.id_key || spec.is_transient(key) || !spec.template.contains_key(key) {
            continue;
        }
        if let Some(flag) = spec.flag_label.as_ref().filter(|f| &f.label_field == key) {
            let on = value.as_str().map(|v| v.trim() == flag.on).unwrap_or(false);
            payload.insert(flag.flag_field.clone(), Value::Bool(on));
            continue;
        }
        if let Some(reference) = spec.reference.as_ref().filter(|r| &r.field == key) {
            if let Some(id) = value.get(&reference.id_key).filter(|id| !id.is_null()) {
                payload
                    .entry(reference.id_key.clone())
                    .or_insert_with(|| id.clone());
            }
            continue;
        }
        let value = match value {
            Value::Null => continue,
            Value::String(text) => Value::String(text.trim().to_string()),
            other => other.clone(),
        };
        let target = spec
            .outbound_renames
            .iter()
            .find(|(from, _)| from == key)
            .map(|(_, to)| to.clone())
            .unwrap_or_else(|| key.clone());
        payload.insert(target, value);
    }
    if let Some(reference) = &spec.reference {
        if let Some(id) = fields.get(&reference.id_key).filter(|id| !id.is_null()) {
            payload.insert(reference.id_key.clone(), id.clone());
        }
    }
    payload
}

/// Multipart form for resources that accept file attachments. Null values
/// are omitted; nested values are sent as JSON text.
pub fn multipart_form(payload: &Record, attachment: Option<&Attachment>) -> Result<Form, ApiError> {
    let mut form = Form::new();
    for (key, value) in payload {
        let text = match value {
            Value::Null => continue,
            Value::Object(_) | Value::Array(_) => value.to_string(),
            scalar => scalar_text(scalar).unwrap_or_default(),
        };
        form = form.text(key.clone(), text);
    }
    if let Some(file) = attachment {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| ApiError::Decode(format!("invalid attachment type: {}", e)))?;
        form = form.part(file.field.clone(), part);
    }
    Ok(form)
}

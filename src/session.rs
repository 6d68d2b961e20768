//! Edit dialog state: a draft of one record and the calls that persist it.
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};

use crate::error::{ApiError, FieldError};
use crate::model::{display_text, record_id, Attachment, Record};
use crate::remote::RemoteCollection;
use crate::resource::{lookup_reference_id, ResourceSpec};

/// Working copy of a record. Every edit returns a new draft.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    fields: Record,
    attachment: Option<Attachment>,
}

impl Draft {
    pub fn from_fields(fields: Record) -> Self {
        Self {
            fields,
            attachment: None,
        }
    }

    pub fn fields(&self) -> &Record {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn with_field(&self, key: &str, value: Value) -> Draft {
        let mut next = self.clone();
        next.fields.insert(key.to_string(), value);
        next
    }

    pub fn with_attachment(&self, attachment: Attachment) -> Draft {
        let mut next = self.clone();
        next.attachment = Some(attachment);
        next
    }

    pub fn without_fields<'a, I>(&self, keys: I) -> Draft
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut next = self.clone();
        for key in keys {
            next.fields.remove(key);
        }
        next
    }

    pub fn identity(&self, id_key: &str) -> Option<String> {
        record_id(&self.fields, id_key)
    }
}

/// Required-field check; every missing field is reported, followed by a
/// reference name that could not be resolved to an id.
pub fn validate(spec: &ResourceSpec, draft: &Draft) -> Vec<FieldError> {
    let mut errors: Vec<FieldError> = spec
        .required
        .iter()
        .filter(|field| is_blank(draft.get(field)))
        .map(|field| FieldError::required(field))
        .collect();
    if let Some(name) = unresolved_reference(spec, draft) {
        if let Some(reference) = &spec.reference {
            errors.push(FieldError {
                field: reference.field.clone(),
                message: format!("unknown {} '{}'", reference.field, name),
            });
        }
    }
    errors
}

/// Name in the reference field with no id to submit alongside it.
fn unresolved_reference(spec: &ResourceSpec, draft: &Draft) -> Option<String> {
    let reference = spec.reference.as_ref()?;
    let name = draft.get(&reference.field).and_then(Value::as_str)?.trim();
    if name.is_empty() || !is_blank(draft.get(&reference.id_key)) {
        return None;
    }
    Some(name.to_string())
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationCall {
    Create,
    Update,
    Narrow(String),
}

impl fmt::Display for MutationCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationCall::Create => f.write_str("create"),
            MutationCall::Update => f.write_str("update"),
            MutationCall::Narrow(field) => write!(f, "update {}", field),
        }
    }
}

#[derive(Debug)]
pub struct CommitStep {
    pub call: MutationCall,
    pub outcome: Result<Option<Record>, ApiError>,
}

/// Outcome of every call a commit attempted, in issue order.
#[derive(Debug, Default)]
pub struct CommitReport {
    pub steps: Vec<CommitStep>,
}

impl CommitReport {
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.outcome.is_ok())
    }

    /// True when at least one call reached the backend successfully.
    pub fn any_landed(&self) -> bool {
        self.steps.iter().any(|s| s.outcome.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&MutationCall, &ApiError)> {
        self.steps
            .iter()
            .filter_map(|s| s.outcome.as_ref().err().map(|e| (&s.call, e)))
    }

    /// Record returned by the create or general update call, if any.
    pub fn record(&self) -> Option<&Record> {
        self.steps
            .iter()
            .find_map(|s| s.outcome.as_ref().ok().and_then(Option::as_ref))
    }

    pub fn calls(&self) -> Vec<MutationCall> {
        self.steps.iter().map(|s| s.call.clone()).collect()
    }
}

/// One open create/edit dialog.
#[derive(Debug, Clone)]
pub struct EditSession {
    spec: ResourceSpec,
    baseline: Option<Record>,
    draft: Draft,
}

impl EditSession {
    /// Start a session: `None` yields the resource template, `Some` a copy of
    /// the record with its identity kept and dialog-only fields cleared.
    pub fn begin(spec: &ResourceSpec, record: Option<&Record>) -> Self {
        let Some(record) = record else {
            return Self {
                spec: spec.clone(),
                baseline: None,
                draft: Draft::from_fields(spec.template.clone()),
            };
        };

        let mut fields = record.clone();
        for field in &spec.transient_fields {
            fields.remove(field);
        }
        if let Some(flag) = &spec.flag_label {
            if let Some(active) = fields.remove(&flag.flag_field) {
                let label = if active.as_bool().unwrap_or(false) {
                    &flag.on
                } else {
                    &flag.off
                };
                fields.insert(flag.label_field.clone(), Value::String(label.clone()));
            }
        }
        if let Some(reference) = &spec.reference {
            if let Some(Value::Object(nested)) = fields.get(&reference.field).cloned() {
                if let Some(id) = nested.get(&reference.id_key) {
                    fields
                        .entry(reference.id_key.clone())
                        .or_insert_with(|| id.clone());
                }
                let name = nested.get("name").and_then(display_text).unwrap_or_default();
                fields.insert(reference.field.clone(), Value::String(name));
            }
        }
        Self {
            spec: spec.clone(),
            baseline: Some(fields.clone()),
            draft: Draft::from_fields(fields),
        }
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn is_creation(&self) -> bool {
        self.draft.identity(&self.spec.id_key).is_none()
    }

    /// Set one field. Renaming the reference drops the id it resolved to.
    pub fn set_field(&mut self, key: &str, value: Value) {
        let stale_reference = self
            .spec
            .reference
            .as_ref()
            .filter(|r| r.field == key && self.draft.get(key) != Some(&value))
            .map(|r| r.id_key.as_str());
        let draft = match stale_reference {
            Some(id_key) => self.draft.without_fields([id_key]),
            None => self.draft.clone(),
        };
        self.draft = draft.with_field(key, value);
    }

    /// The reference name awaiting resolution, if any.
    pub fn unresolved_reference(&self) -> Option<String> {
        unresolved_reference(&self.spec, &self.draft)
    }

    /// Resolve the reference name against `known` records of its source
    /// resource. Returns false when no record carries that name.
    pub fn resolve_reference(&mut self, known: &[Record]) -> bool {
        let (Some(reference), Some(name)) = (self.spec.reference.clone(), self.unresolved_reference()) else {
            return true;
        };
        match lookup_reference_id(known, &name, &reference.id_key) {
            Some(id) => {
                self.draft = self.draft.with_field(&reference.id_key, id);
                true
            }
            None => false,
        }
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.draft = self.draft.with_attachment(attachment);
    }

    pub fn validate(&self) -> Vec<FieldError> {
        validate(&self.spec, &self.draft)
    }

    /// Fields whose value differs from the record the session began with.
    /// A pending attachment counts as a change of its field.
    pub fn changed_fields(&self) -> Vec<String> {
        let mut changed: Vec<String> = match &self.baseline {
            Some(baseline) => self
                .draft
                .fields()
                .iter()
                .filter(|(k, v)| baseline.get(*k) != Some(*v))
                .map(|(k, _)| k.clone())
                .chain(
                    baseline
                        .keys()
                        .filter(|k| !self.draft.fields().contains_key(*k))
                        .cloned(),
                )
                .collect(),
            None => self.draft.fields().keys().cloned().collect(),
        };
        if let Some(attachment) = self.draft.attachment() {
            changed.push(attachment.field.clone());
        }
        changed
    }

    /// Persist the draft. Validation failures abort before any call.
    ///
    /// An update issues the narrow-field call for each changed narrow field
    /// and the general update when anything else changed (or nothing did).
    /// Each call is attempted regardless of the others and reported
    /// separately.
    pub async fn commit(&self, remote: &dyn RemoteCollection) -> Result<CommitReport, ApiError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }

        let spec = &self.spec;
        let mut report = CommitReport::default();
        let Some(id) = self.draft.identity(&spec.id_key) else {
            let outcome = remote.create(&self.draft).await.map(Some);
            log_step(spec, &MutationCall::Create, &outcome);
            report.steps.push(CommitStep {
                call: MutationCall::Create,
                outcome,
            });
            return Ok(report);
        };

        let changed = self.changed_fields();
        let general = changed.is_empty() || changed.iter().any(|f| spec.narrow_field(f).is_none());
        if general {
            let body = self
                .draft
                .without_fields(spec.narrow_fields.iter().map(|n| n.field.as_str()));
            let outcome = remote.update(&id, &body).await.map(Some);
            log_step(spec, &MutationCall::Update, &outcome);
            report.steps.push(CommitStep {
                call: MutationCall::Update,
                outcome,
            });
        }

        for narrow in spec.narrow_fields.iter().filter(|n| changed.contains(&n.field)) {
            let value = self.draft.get(&narrow.field).cloned().unwrap_or(Value::Null);
            let call = MutationCall::Narrow(narrow.field.clone());
            let outcome = remote.update_narrow(&id, narrow, &value).await.map(|_| None);
            log_step(spec, &call, &outcome);
            report.steps.push(CommitStep { call, outcome });
        }

        Ok(report)
    }
}

fn log_step(spec: &ResourceSpec, call: &MutationCall, outcome: &Result<Option<Record>, ApiError>) {
    match outcome {
        Ok(_) => info!(resource = %spec.kind, %call, "mutation succeeded"),
        Err(err) => warn!(resource = %spec.kind, %call, %err, "mutation failed"),
    }
}

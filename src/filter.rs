//! Composable field-level filters evaluated against cached records.
//!
//! A record is visible when every configured filter accepts it. A blank
//! filter value never excludes anything.
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{display_text, scalar_text, Record};

const ALL_SENTINEL: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    /// Case-insensitive substring of one field.
    Contains { field: String },
    /// Case-sensitive equality with a scalar field or a nested `name`.
    Equals { field: String },
    /// Excludes records dated before the bound.
    DateFrom { fields: Vec<String> },
    /// Excludes records dated after the bound.
    DateTo { fields: Vec<String> },
    /// Case-insensitive substring of any scalar or one-level-nested value.
    AnyField,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    pub key: String,
    pub kind: FilterKind,
}

impl FilterSpec {
    pub fn new(key: &str, kind: FilterKind) -> Self {
        Self {
            key: key.to_string(),
            kind,
        }
    }
}

/// Current filter values keyed by filter key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    values: BTreeMap<String, String>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: &str) {
        if value.trim().is_empty() {
            self.values.remove(key);
        } else {
            self.values.insert(key.to_string(), value.to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// True when every filter in `specs` accepts `record` under `set`.
pub fn matches(record: &Record, specs: &[FilterSpec], set: &FilterSet) -> bool {
    specs.iter().all(|spec| match set.get(&spec.key) {
        Some(value) => accepts(record, &spec.kind, value.trim()),
        None => true,
    })
}

/// Records accepted by `specs`, in their original order.
pub fn visible<'a>(records: &'a [Record], specs: &[FilterSpec], set: &FilterSet) -> Vec<&'a Record> {
    records
        .iter()
        .filter(|record| matches(record, specs, set))
        .collect()
}

/// Count records by the display value of `field`. Records without it are
/// counted under an empty key.
pub fn tally<'a, I>(records: I, field: &str) -> BTreeMap<String, usize>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut counts = BTreeMap::new();
    for record in records {
        let key = record.get(field).and_then(display_text).unwrap_or_default();
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

fn accepts(record: &Record, kind: &FilterKind, value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    match kind {
        FilterKind::Contains { field } => record
            .get(field)
            .and_then(scalar_text)
            .map(|text| contains_ignore_case(&text, value))
            .unwrap_or(false),
        FilterKind::Equals { field } => {
            if value.eq_ignore_ascii_case(ALL_SENTINEL) {
                return true;
            }
            record.get(field).and_then(display_text).as_deref() == Some(value)
        }
        FilterKind::DateFrom { fields } => match (record_date(record, fields), parse_bound(value)) {
            (Some(date), Some(bound)) => date >= bound,
            _ => true,
        },
        FilterKind::DateTo { fields } => match (record_date(record, fields), parse_bound(value)) {
            (Some(date), Some(bound)) => date <= bound,
            _ => true,
        },
        FilterKind::AnyField => record.values().any(|v| value_contains(v, value, true)),
    }
}

fn value_contains(value: &Value, needle: &str, descend: bool) -> bool {
    match value {
        Value::Object(inner) if descend => inner.values().any(|v| value_contains(v, needle, false)),
        Value::Array(items) if descend => items.iter().any(|v| value_contains(v, needle, false)),
        other => scalar_text(other)
            .map(|text| contains_ignore_case(&text, needle))
            .unwrap_or(false),
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn record_date(record: &Record, fields: &[String]) -> Option<NaiveDateTime> {
    fields
        .iter()
        .find_map(|f| record.get(f).filter(|v| !v.is_null()))
        .and_then(parse_date)
}

fn parse_bound(value: &str) -> Option<NaiveDateTime> {
    parse_date_str(value)
}

/// Parse a record date: RFC 3339, ISO local date-time, ISO date, epoch
/// milliseconds, or a `[y, m, d, h, min, s]` component array.
pub fn parse_date(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => parse_date_str(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.naive_utc()),
        Value::Array(parts) => {
            let parts: Vec<u32> = parts
                .iter()
                .map(|p| p.as_u64().and_then(|n| u32::try_from(n).ok()))
                .collect::<Option<_>>()?;
            let year = i32::try_from(*parts.first()?).ok()?;
            let date = NaiveDate::from_ymd_opt(year, *parts.get(1)?, *parts.get(2)?)?;
            let at = |i: usize| parts.get(i).copied().unwrap_or(0);
            date.and_hms_opt(at(3), at(4), at(5))
        }
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

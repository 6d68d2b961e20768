//! Error taxonomy shared by the remote client, edit sessions and controllers.
use std::fmt;
use thiserror::Error;

/// A single required-field failure found before submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn required(field: &str) -> Self {
        Self {
            field: field.to_string(),
            message: format!("{} is required", field),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {}", join_field_errors(.0))]
    Validation(Vec<FieldError>),
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_every_field() {
        let err = ApiError::Validation(vec![
            FieldError::required("name"),
            FieldError::required("location"),
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: name is required, location is required"
        );
    }

    #[test]
    fn not_found_is_detected() {
        assert!(ApiError::NotFound("agents/7".into()).is_not_found());
        assert!(!ApiError::Network("timeout".into()).is_not_found());
    }
}

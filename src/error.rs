//! Error types for formwright.
//!
//! Two different things are called "errors" in a form.  [`FieldError`] is the
//! user-facing message attached to a path; it is data, produced by validation and
//! shown by the host UI.  [`FormError`] is the operational failure of a session API
//! call such as a malformed configuration or a default-value loader that failed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

////////////////////////////////////////////// FieldError //////////////////////////////////////////////

/// Messages recorded for one error code inside a [`FieldError::Detailed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorMessages {
    /// The code occurred once.
    One(String),
    /// The code occurred more than once, in issue order.
    Many(Vec<String>),
}

impl ErrorMessages {
    /// Adds a further message for the same code.
    pub fn push(&mut self, message: String) {
        match self {
            ErrorMessages::One(first) => {
                *self = ErrorMessages::Many(vec![std::mem::take(first), message]);
            }
            ErrorMessages::Many(messages) => messages.push(message),
        }
    }

    /// The first message recorded for the code.
    pub fn first(&self) -> Option<&str> {
        match self {
            ErrorMessages::One(message) => Some(message),
            ErrorMessages::Many(messages) => messages.first().map(String::as_str),
        }
    }
}

/// The error attached to one path.
///
/// A field with a single failure always carries the plain [`FieldError::Simple`]
/// form.  The structured form only appears when multi-error aggregation is enabled and
/// a path failed more than one rule, or when a caller sets an error with an explicit
/// type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldError {
    /// A plain message.
    Simple(String),
    /// A typed message, optionally with every failing code.
    Detailed {
        /// The code of the first failure.
        #[serde(rename = "type")]
        kind: String,
        /// The message of the first failure.
        message: String,
        /// Every failing code mapped to its message(s).
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        types: BTreeMap<String, ErrorMessages>,
    },
}

impl FieldError {
    /// A plain message error.
    pub fn simple(message: impl Into<String>) -> Self {
        FieldError::Simple(message.into())
    }

    /// A typed error without per-code detail, as set programmatically.
    pub fn typed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        FieldError::Detailed {
            kind: kind.into(),
            message: message.into(),
            types: BTreeMap::new(),
        }
    }

    /// The message to display.
    pub fn message(&self) -> &str {
        match self {
            FieldError::Simple(message) => message,
            FieldError::Detailed { message, .. } => message,
        }
    }

    /// The error code, when the error carries one.
    pub fn kind(&self) -> Option<&str> {
        match self {
            FieldError::Simple(_) => None,
            FieldError::Detailed { kind, .. } => Some(kind),
        }
    }

    /// Every failing code, or `None` for plain errors.
    pub fn types(&self) -> Option<&BTreeMap<String, ErrorMessages>> {
        match self {
            FieldError::Simple(_) => None,
            FieldError::Detailed { types, .. } => Some(types),
        }
    }
}

impl From<&str> for FieldError {
    fn from(message: &str) -> Self {
        FieldError::simple(message)
    }
}

impl From<String> for FieldError {
    fn from(message: String) -> Self {
        FieldError::Simple(message)
    }
}

/////////////////////////////////////////////// FormError //////////////////////////////////////////////

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    /// A path is empty or names a refused segment.
    #[error("field path {0:?} cannot be registered")]
    InvalidPath(String),
    /// The asynchronous default-value loader failed.
    #[error("default values could not be loaded: {0}")]
    DefaultValues(String),
    /// No default-value loader was configured.
    #[error("no default value loader is configured")]
    NoLoader,
    /// A schema handed to the bundled validator is malformed.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// JSON configuration could not be parsed.
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    /// YAML configuration could not be parsed.
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_grow_into_a_list() {
        let mut messages = ErrorMessages::One("first".to_string());
        messages.push("second".to_string());
        assert_eq!(
            messages,
            ErrorMessages::Many(vec!["first".to_string(), "second".to_string()])
        );
        assert_eq!(messages.first(), Some("first"));
    }

    #[test]
    fn simple_serializes_as_string() {
        let error = FieldError::simple("Required");
        assert_eq!(serde_json::to_value(&error).unwrap(), json!("Required"));
        assert_eq!(error.kind(), None);
        assert!(error.types().is_none());
    }

    #[test]
    fn detailed_serializes_with_type_key() {
        let mut types = BTreeMap::new();
        types.insert("too_small".to_string(), ErrorMessages::One("short".into()));
        types.insert(
            "invalid_string".to_string(),
            ErrorMessages::Many(vec!["digit".into(), "upper".into()]),
        );
        let error = FieldError::Detailed {
            kind: "too_small".to_string(),
            message: "short".to_string(),
            types,
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({
                "type": "too_small",
                "message": "short",
                "types": {"invalid_string": ["digit", "upper"], "too_small": "short"}
            })
        );
        let back: FieldError = serde_json::from_value(serde_json::to_value(&error).unwrap()).unwrap();
        assert_eq!(back, error);
    }

    #[test]
    fn typed_has_no_detail() {
        let error = FieldError::typed("server", "Email already taken");
        assert_eq!(error.kind(), Some("server"));
        assert_eq!(error.message(), "Email already taken");
        assert!(error.types().unwrap().is_empty());
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"type": "server", "message": "Email already taken"})
        );
    }
}

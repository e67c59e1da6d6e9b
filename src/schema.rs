//! The schema collaborator.
//!
//! A session never interprets validation rules itself.  It hands the complete data
//! tree to a [`Schema`] and receives either success or a list of [`SchemaIssue`]s.
//! Field-scoped validation is always a filter over the issues of a full parse.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{self, PathSegment};

/// One failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIssue {
    /// Location of the failing value.
    pub path: Vec<PathSegment>,
    /// Classification of the failure, e.g. `too_small`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl SchemaIssue {
    /// Creates an issue.
    pub fn new(
        path: impl IntoIterator<Item = PathSegment>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SchemaIssue {
            path: path.into_iter().collect(),
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates an issue addressed by a dotted path.
    pub fn at(path: &str, code: impl Into<String>, message: impl Into<String>) -> Self {
        let segments = path::segments(path).into_iter().map(|segment| {
            if path::is_index(segment) {
                segment
                    .parse::<usize>()
                    .map(PathSegment::Index)
                    .unwrap_or_else(|_| PathSegment::Key(segment.to_string()))
            } else {
                PathSegment::Key(segment.to_string())
            }
        });
        SchemaIssue::new(segments, code, message)
    }

    /// The dotted form of [`SchemaIssue::path`].
    pub fn dotted_path(&self) -> String {
        path::from_segments(&self.path)
    }
}

/// Outcome of a schema parse.
pub type ParseResult = Result<(), Vec<SchemaIssue>>;

/// The future returned by [`Schema::parse`].
pub type ParseFuture = Pin<Box<dyn Future<Output = ParseResult> + Send + 'static>>;

/// Parses a full form data tree.
pub trait Schema: Send + Sync {
    /// Parses `data`.  Failures are reported as issues, never as panics.
    fn parse(&self, data: Value) -> ParseFuture;
}

/// Adapts an async closure into a [`Schema`].
///
/// ```rust
/// use formwright::{FnSchema, Schema, SchemaIssue};
/// use serde_json::json;
///
/// let schema = FnSchema::new(|data: serde_json::Value| async move {
///     if data["name"].as_str().unwrap_or_default().is_empty() {
///         Err(vec![SchemaIssue::at("name", "too_small", "Name is required")])
///     } else {
///         Ok(())
///     }
/// });
/// # let _ = schema.parse(json!({}));
/// ```
pub struct FnSchema<F> {
    parse: F,
}

impl<F> FnSchema<F> {
    /// Wraps `parse`.
    pub fn new<Fut>(parse: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync,
        Fut: Future<Output = ParseResult> + Send + 'static,
    {
        FnSchema { parse }
    }
}

impl<F, Fut> Schema for FnSchema<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = ParseResult> + Send + 'static,
{
    fn parse(&self, data: Value) -> ParseFuture {
        Box::pin((self.parse)(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn issue_from_dotted_path() {
        let issue = SchemaIssue::at("items.0.name", "too_small", "Too short");
        assert_eq!(
            issue.path,
            vec![
                PathSegment::Key("items".into()),
                PathSegment::Index(0),
                PathSegment::Key("name".into())
            ]
        );
        assert_eq!(issue.dotted_path(), "items.0.name");
    }

    #[tokio::test]
    async fn closure_schema_parses() {
        let schema = FnSchema::new(|data: Value| async move {
            if data["ok"] == json!(true) {
                Ok(())
            } else {
                Err(vec![SchemaIssue::at("ok", "custom", "not ok")])
            }
        });
        assert!(schema.parse(json!({"ok": true})).await.is_ok());
        let issues = schema.parse(json!({"ok": false})).await.unwrap_err();
        assert_eq!(issues[0].code, "custom");
    }
}

//! # JSON Schema Validation
//!
//! [`JsonSchemaValidator`] is a ready-made [`Schema`] for forms whose rules fit a
//! subset of JSON Schema.  Unlike a first-failure validator it walks the entire tree
//! and reports every failing rule, each addressed by path and classified by code, so
//! a session can attach messages to individual fields.
//!
//! ## Supported keywords
//!
//! - `type`: null, boolean, integer, number, string, array, object
//! - `properties`, `required`
//! - `items` (one schema for every element, or an array of per-position schemas)
//! - `enum`, `oneOf`
//! - `minLength`, `maxLength`, `pattern`, `format: "email"`
//! - `minimum`, `maximum`
//! - `minItems`, `maxItems`
//! - `errorMessage`: a string replacing every message raised at that node, or an
//!   object mapping keyword names to messages
//!
//! ## Issue codes
//!
//! | code | raised by |
//! |---|---|
//! | `invalid_type` | `type` |
//! | `required` | `required` |
//! | `invalid_enum_value` | `enum` |
//! | `too_small` | `minLength`, `minimum`, `minItems` |
//! | `too_big` | `maxLength`, `maximum`, `maxItems` |
//! | `invalid_string` | `pattern`, `format` |
//! | `invalid_union` | `oneOf` |
//! | `invalid_schema` | a malformed schema node |
//!
//! ```rust
//! use formwright::JsonSchemaValidator;
//! use serde_json::json;
//!
//! let schema = JsonSchemaValidator::new(json!({
//!     "type": "object",
//!     "properties": {
//!         "email": {"type": "string", "format": "email"},
//!         "password": {"type": "string", "minLength": 8}
//!     },
//!     "required": ["email", "password"]
//! }))
//! .unwrap();
//!
//! let issues = schema.check(&json!({"email": "nope", "password": "short"}));
//! assert_eq!(issues.len(), 2);
//! assert_eq!(issues[0].dotted_path(), "email");
//! assert_eq!(issues[1].code, "too_small");
//! ```

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::FormError;
use crate::path::PathSegment;
use crate::schema::{ParseFuture, Schema, SchemaIssue};

pub(crate) const TYPE_KEY: &str = "type";
pub(crate) const PROPERTIES_KEY: &str = "properties";
pub(crate) const REQUIRED_KEY: &str = "required";
pub(crate) const ITEMS_KEY: &str = "items";
pub(crate) const ENUM_KEY: &str = "enum";
pub(crate) const ONE_OF_KEY: &str = "oneOf";
pub(crate) const MIN_LENGTH_KEY: &str = "minLength";
pub(crate) const MAX_LENGTH_KEY: &str = "maxLength";
pub(crate) const PATTERN_KEY: &str = "pattern";
pub(crate) const FORMAT_KEY: &str = "format";
pub(crate) const MINIMUM_KEY: &str = "minimum";
pub(crate) const MAXIMUM_KEY: &str = "maximum";
pub(crate) const MIN_ITEMS_KEY: &str = "minItems";
pub(crate) const MAX_ITEMS_KEY: &str = "maxItems";
pub(crate) const ERROR_MESSAGE_KEY: &str = "errorMessage";

pub(crate) const TYPE_NULL: &str = "null";
pub(crate) const TYPE_BOOLEAN: &str = "boolean";
pub(crate) const TYPE_INTEGER: &str = "integer";
pub(crate) const TYPE_NUMBER: &str = "number";
pub(crate) const TYPE_STRING: &str = "string";
pub(crate) const TYPE_ARRAY: &str = "array";
pub(crate) const TYPE_OBJECT: &str = "object";

/// Issue code for a value of the wrong type.
pub const CODE_INVALID_TYPE: &str = "invalid_type";
/// Issue code for a missing required property.
pub const CODE_REQUIRED: &str = "required";
/// Issue code for a value outside an `enum`.
pub const CODE_INVALID_ENUM: &str = "invalid_enum_value";
/// Issue code for a lower bound violation.
pub const CODE_TOO_SMALL: &str = "too_small";
/// Issue code for an upper bound violation.
pub const CODE_TOO_BIG: &str = "too_big";
/// Issue code for a failed `pattern` or `format`.
pub const CODE_INVALID_STRING: &str = "invalid_string";
/// Issue code for a value matching no `oneOf` branch.
pub const CODE_INVALID_UNION: &str = "invalid_union";
/// Issue code for a malformed schema node.
pub const CODE_INVALID_SCHEMA: &str = "invalid_schema";

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

/// Returns the JSON Schema type name of `value`.
pub fn get_value_type(value: &Value) -> String {
    match value {
        Value::Null => TYPE_NULL,
        Value::Bool(_) => TYPE_BOOLEAN,
        Value::Number(n) if n.is_i64() || n.is_u64() => TYPE_INTEGER,
        Value::Number(_) => TYPE_NUMBER,
        Value::String(_) => TYPE_STRING,
        Value::Array(_) => TYPE_ARRAY,
        Value::Object(_) => TYPE_OBJECT,
    }
    .to_string()
}

////////////////////////////////////////// JsonSchemaValidator /////////////////////////////////////////

/// A [`Schema`] backed by a JSON Schema document.
#[derive(Debug, Clone)]
pub struct JsonSchemaValidator {
    schema: Arc<Value>,
    patterns: Arc<Patterns>,
    latency: Option<Duration>,
}

impl JsonSchemaValidator {
    /// Wraps a schema document.  The root must be an object.
    pub fn new(schema: Value) -> Result<Self, FormError> {
        if !schema.is_object() {
            return Err(FormError::InvalidSchema(
                "Schema must be an object".to_string(),
            ));
        }
        let patterns = compile_patterns(&schema);
        Ok(JsonSchemaValidator {
            schema: Arc::new(schema),
            patterns: Arc::new(patterns),
            latency: None,
        })
    }

    /// Parses a schema document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, FormError> {
        Self::new(serde_json::from_str(text)?)
    }

    /// Parses a schema document from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, FormError> {
        Self::new(serde_yml::from_str(text)?)
    }

    /// Delays every parse by `latency`, as a remote validator would.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The schema document.
    pub fn as_value(&self) -> &Value {
        &self.schema
    }

    /// Synchronously collects every issue for `value`.
    pub fn check(&self, value: &Value) -> Vec<SchemaIssue> {
        walk(value, &self.schema, &self.patterns)
    }
}

impl Schema for JsonSchemaValidator {
    fn parse(&self, data: Value) -> ParseFuture {
        let schema = Arc::clone(&self.schema);
        let patterns = Arc::clone(&self.patterns);
        let latency = self.latency;
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let issues = walk(&data, &schema, &patterns);
            if issues.is_empty() {
                Ok(())
            } else {
                Err(issues)
            }
        })
    }
}

/// Collects every issue raised by validating `value` against `schema`.
pub fn collect_issues(value: &Value, schema: &Value) -> Vec<SchemaIssue> {
    walk(value, schema, &compile_patterns(schema))
}

fn walk(value: &Value, schema: &Value, patterns: &Patterns) -> Vec<SchemaIssue> {
    let mut walker = Walker::new(patterns);
    walker.check(value, schema);
    walker.issues
}

/// Compiled `pattern` keywords, keyed by their source.
type Patterns = HashMap<String, Regex>;

/// Compiles every `pattern` in `schema`.  Invalid patterns are left out and are
/// reported when a value reaches them.
fn compile_patterns(schema: &Value) -> Patterns {
    fn visit(node: &Value, patterns: &mut Patterns) {
        match node {
            Value::Object(map) => {
                if let Some(source) = map.get(PATTERN_KEY).and_then(Value::as_str) {
                    if !patterns.contains_key(source) {
                        if let Ok(regex) = Regex::new(source) {
                            patterns.insert(source.to_string(), regex);
                        }
                    }
                }
                map.values().for_each(|child| visit(child, patterns));
            }
            Value::Array(items) => items.iter().for_each(|child| visit(child, patterns)),
            _ => {}
        }
    }
    let mut patterns = Patterns::new();
    visit(schema, &mut patterns);
    patterns
}

//////////////////////////////////////////////// Walker ////////////////////////////////////////////////

struct Walker<'a> {
    patterns: &'a Patterns,
    path: Vec<PathSegment>,
    issues: Vec<SchemaIssue>,
}

fn message_for(schema: &Map<String, Value>, keyword: &str, default: String) -> String {
    match schema.get(ERROR_MESSAGE_KEY) {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Object(messages)) => messages
            .get(keyword)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(default),
        _ => default,
    }
}

fn type_matches(value: &Value, expected: &str) -> Option<bool> {
    let matches = match expected {
        TYPE_NULL => value.is_null(),
        TYPE_BOOLEAN => value.is_boolean(),
        TYPE_INTEGER => matches!(value, Value::Number(n) if n.is_i64() || n.is_u64()),
        TYPE_NUMBER => value.is_number(),
        TYPE_STRING => value.is_string(),
        TYPE_ARRAY => value.is_array(),
        TYPE_OBJECT => value.is_object(),
        _ => return None,
    };
    Some(matches)
}

impl<'a> Walker<'a> {
    fn new(patterns: &'a Patterns) -> Self {
        Walker {
            patterns,
            path: Vec::new(),
            issues: Vec::new(),
        }
    }

    fn push(&mut self, code: &str, message: String) {
        self.issues
            .push(SchemaIssue::new(self.path.iter().cloned(), code, message));
    }

    fn invalid_schema(&mut self, message: impl Into<String>) {
        self.push(CODE_INVALID_SCHEMA, message.into());
    }

    fn descend(&mut self, segment: PathSegment, value: &Value, schema: &Value) {
        self.path.push(segment);
        self.check(value, schema);
        self.path.pop();
    }

    fn check(&mut self, value: &Value, schema: &Value) {
        let Some(schema_obj) = schema.as_object() else {
            self.invalid_schema("Schema must be an object");
            return;
        };

        if let Some(one_of) = schema_obj.get(ONE_OF_KEY) {
            self.check_one_of(value, one_of, schema_obj);
            return;
        }

        if let Some(expected) = schema_obj.get(TYPE_KEY) {
            let Some(expected) = expected.as_str() else {
                self.invalid_schema("Schema type must be a string");
                return;
            };
            match type_matches(value, expected) {
                Some(true) => {}
                Some(false) => {
                    let default = format!(
                        "Expected {}, received {}",
                        expected,
                        get_value_type(value)
                    );
                    let message = message_for(schema_obj, TYPE_KEY, default);
                    self.push(CODE_INVALID_TYPE, message);
                    return;
                }
                None => {
                    self.invalid_schema(format!("Unknown schema type: {}", expected));
                    return;
                }
            }
        }

        match value {
            Value::String(s) => self.check_string(s, schema_obj),
            Value::Number(_) => self.check_number(value, schema_obj),
            Value::Array(items) => self.check_array(items, schema_obj),
            Value::Object(object) => self.check_object(object, schema_obj),
            _ => {}
        }

        if let Some(allowed) = schema_obj.get(ENUM_KEY) {
            self.check_enum(value, allowed, schema_obj);
        }
    }

    fn check_one_of(&mut self, value: &Value, one_of: &Value, schema: &Map<String, Value>) {
        let Some(branches) = one_of.as_array() else {
            self.invalid_schema("oneOf must be an array");
            return;
        };
        let matched = branches.iter().any(|branch| {
            let mut nested = Walker::new(self.patterns);
            nested.check(value, branch);
            nested.issues.is_empty()
        });
        if !matched {
            let message = message_for(schema, ONE_OF_KEY, "Invalid input".to_string());
            self.push(CODE_INVALID_UNION, message);
        }
    }

    fn check_enum(&mut self, value: &Value, allowed: &Value, schema: &Map<String, Value>) {
        let Some(allowed) = allowed.as_array() else {
            self.invalid_schema("Enum must be an array");
            return;
        };
        if !allowed.contains(value) {
            let options = allowed
                .iter()
                .map(|v| match v {
                    Value::String(s) => format!("'{}'", s),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" | ");
            let default = format!("Invalid enum value. Expected {}", options);
            let message = message_for(schema, ENUM_KEY, default);
            self.push(CODE_INVALID_ENUM, message);
        }
    }

    fn check_string(&mut self, value: &str, schema: &Map<String, Value>) {
        let length = value.chars().count() as u64;

        if let Some(min) = schema.get(MIN_LENGTH_KEY).and_then(Value::as_u64) {
            if length < min {
                let default = format!("String must contain at least {} character(s)", min);
                let message = message_for(schema, MIN_LENGTH_KEY, default);
                self.push(CODE_TOO_SMALL, message);
            }
        }

        if let Some(max) = schema.get(MAX_LENGTH_KEY).and_then(Value::as_u64) {
            if length > max {
                let default = format!("String must contain at most {} character(s)", max);
                let message = message_for(schema, MAX_LENGTH_KEY, default);
                self.push(CODE_TOO_BIG, message);
            }
        }

        if let Some(pattern) = schema.get(PATTERN_KEY) {
            let compiled = pattern.as_str().map(|source| match self.patterns.get(source) {
                Some(regex) => Ok(regex.clone()),
                None => Regex::new(source),
            });
            match compiled {
                Some(Ok(regex)) => {
                    if !regex.is_match(value) {
                        let message = message_for(schema, PATTERN_KEY, "Invalid".to_string());
                        self.push(CODE_INVALID_STRING, message);
                    }
                }
                Some(Err(e)) => self.invalid_schema(format!("Invalid pattern: {}", e)),
                None => self.invalid_schema("Pattern must be a string"),
            }
        }

        if let Some(format) = schema.get(FORMAT_KEY).and_then(Value::as_str) {
            // Unknown formats are annotations only.
            if format == "email" && !EMAIL.is_match(value) {
                let message = message_for(schema, FORMAT_KEY, "Invalid email".to_string());
                self.push(CODE_INVALID_STRING, message);
            }
        }
    }

    fn check_number(&mut self, value: &Value, schema: &Map<String, Value>) {
        let Some(number) = value.as_f64() else {
            return;
        };

        if let Some(min) = schema.get(MINIMUM_KEY).and_then(Value::as_f64) {
            if number < min {
                let default = format!("Number must be greater than or equal to {}", min);
                let message = message_for(schema, MINIMUM_KEY, default);
                self.push(CODE_TOO_SMALL, message);
            }
        }

        if let Some(max) = schema.get(MAXIMUM_KEY).and_then(Value::as_f64) {
            if number > max {
                let default = format!("Number must be less than or equal to {}", max);
                let message = message_for(schema, MAXIMUM_KEY, default);
                self.push(CODE_TOO_BIG, message);
            }
        }
    }

    fn check_array(&mut self, items: &[Value], schema: &Map<String, Value>) {
        let length = items.len() as u64;

        if let Some(min) = schema.get(MIN_ITEMS_KEY).and_then(Value::as_u64) {
            if length < min {
                let default = format!("Array must contain at least {} element(s)", min);
                let message = message_for(schema, MIN_ITEMS_KEY, default);
                self.push(CODE_TOO_SMALL, message);
            }
        }

        if let Some(max) = schema.get(MAX_ITEMS_KEY).and_then(Value::as_u64) {
            if length > max {
                let default = format!("Array must contain at most {} element(s)", max);
                let message = message_for(schema, MAX_ITEMS_KEY, default);
                self.push(CODE_TOO_BIG, message);
            }
        }

        match schema.get(ITEMS_KEY) {
            Some(Value::Array(positional)) => {
                for (index, (item, item_schema)) in items.iter().zip(positional).enumerate() {
                    self.descend(PathSegment::Index(index), item, item_schema);
                }
            }
            Some(item_schema) => {
                for (index, item) in items.iter().enumerate() {
                    self.descend(PathSegment::Index(index), item, item_schema);
                }
            }
            None => {}
        }
    }

    fn check_object(&mut self, object: &Map<String, Value>, schema: &Map<String, Value>) {
        let properties = match schema.get(PROPERTIES_KEY) {
            Some(Value::Object(properties)) => Some(properties),
            Some(_) => {
                self.invalid_schema("Properties must be an object");
                None
            }
            None => None,
        };

        if let Some(properties) = properties {
            for (name, property_schema) in properties {
                if let Some(property) = object.get(name) {
                    self.descend(PathSegment::Key(name.clone()), property, property_schema);
                }
            }
        }

        let Some(required) = schema.get(REQUIRED_KEY) else {
            return;
        };
        let Some(required) = required.as_array() else {
            self.invalid_schema("Required must be an array");
            return;
        };
        for name in required {
            let Some(name) = name.as_str() else {
                self.invalid_schema("Required property names must be strings");
                continue;
            };
            if object.contains_key(name) {
                continue;
            }
            let message = properties
                .and_then(|p| p.get(name))
                .and_then(Value::as_object)
                .map(|s| message_for(s, REQUIRED_KEY, "Required".to_string()))
                .unwrap_or_else(|| "Required".to_string());
            self.path.push(PathSegment::Key(name.to_string()));
            self.push(CODE_REQUIRED, message);
            self.path.pop();
        }
    }
}

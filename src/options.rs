//! Session and operation options.
//!
//! [`FormOptions`] is plain configuration and can be loaded from JSON or YAML:
//!
//! ```rust
//! use formwright::{CriteriaMode, FormOptions, ValidationMode};
//!
//! let options = FormOptions::from_yaml(
//!     "mode: on_blur\ncriteria_mode: all\ndelay_error_ms: 250\ndefault_values:\n  email: ''\n",
//! )
//! .unwrap();
//! assert_eq!(options.mode, ValidationMode::OnBlur);
//! assert_eq!(options.criteria_mode, CriteriaMode::All);
//! assert_eq!(options.delay_error_ms, 250);
//! assert!(options.should_focus_error);
//! ```
//!
//! The remaining structs configure individual calls.  All of them default to the
//! behavior of the call without options.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FieldError, FormError};
use crate::mode::{CriteriaMode, ReValidateMode, ValidationMode};

/////////////////////////////////////////////// FormOptions ////////////////////////////////////////////

/// Session-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    /// When validation fires before the first submission.
    pub mode: ValidationMode,
    /// When validation fires after the first submission.
    pub re_validate_mode: ReValidateMode,
    /// How many issues each field error keeps.
    pub criteria_mode: CriteriaMode,
    /// Milliseconds a schema error waits before it is displayed.  Zero shows it at once.
    pub delay_error_ms: u64,
    /// Whether detaching a field's adapter unregisters the field.
    pub should_unregister: bool,
    /// Whether a failed submission focuses the first errored field.
    pub should_focus_error: bool,
    /// The initial values, also used by `reset` without arguments.
    pub default_values: Value,
    /// Externally-driven values that replace the form data.
    pub values: Option<Value>,
    /// Externally-driven errors, displayed over internally computed ones.
    pub errors: BTreeMap<String, FieldError>,
}

impl Default for FormOptions {
    fn default() -> Self {
        FormOptions {
            mode: ValidationMode::default(),
            re_validate_mode: ReValidateMode::default(),
            criteria_mode: CriteriaMode::default(),
            delay_error_ms: 0,
            should_unregister: false,
            should_focus_error: true,
            default_values: Value::Object(Map::new()),
            values: None,
            errors: BTreeMap::new(),
        }
    }
}

impl FormOptions {
    /// Parses options from JSON text.
    pub fn from_json(text: &str) -> Result<Self, FormError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parses options from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, FormError> {
        Ok(serde_yml::from_str(text)?)
    }

    /// Sets the validation mode.
    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the re-validation mode.
    pub fn with_re_validate_mode(mut self, mode: ReValidateMode) -> Self {
        self.re_validate_mode = mode;
        self
    }

    /// Sets the criteria mode.
    pub fn with_criteria_mode(mut self, mode: CriteriaMode) -> Self {
        self.criteria_mode = mode;
        self
    }

    /// Sets the error display delay.
    pub fn with_delay_error(mut self, delay: Duration) -> Self {
        self.delay_error_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the default values.
    pub fn with_default_values(mut self, values: Value) -> Self {
        self.default_values = values;
        self
    }

    /// Sets the unregister-on-detach default.
    pub fn with_should_unregister(mut self, should_unregister: bool) -> Self {
        self.should_unregister = should_unregister;
        self
    }

    pub(crate) fn delay_error(&self) -> Duration {
        Duration::from_millis(self.delay_error_ms)
    }
}

//////////////////////////////////////////// Custom validators /////////////////////////////////////////

/// The future returned by a [`CustomValidator`].  `Err` carries the message.
pub type ValidatorFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'static>>;

/// A per-field validator run on input, independent of the schema.
pub type CustomValidator = Arc<dyn Fn(Value) -> ValidatorFuture + Send + Sync>;

/// Wraps an async closure as a [`CustomValidator`].
///
/// ```rust
/// use formwright::custom_validator;
///
/// let username_free = custom_validator(|value| async move {
///     if value == "admin" {
///         Err("That name is taken".to_string())
///     } else {
///         Ok(())
///     }
/// });
/// # let _ = username_free;
/// ```
pub fn custom_validator<F, Fut>(validate: F) -> CustomValidator
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Arc::new(move |value: Value| Box::pin(validate(value)) as ValidatorFuture)
}

////////////////////////////////////////////// RegisterOptions /////////////////////////////////////////

/// Options for registering a field.
#[derive(Clone, Default)]
pub struct RegisterOptions {
    /// Value flows through a [`ControlledBinding`](crate::ControlledBinding) instead of
    /// adapter events.
    pub controlled: bool,
    /// Disabled fields skip custom validation and are left out of submitted data.
    pub disabled: bool,
    /// Overrides the session's unregister-on-detach policy.
    pub should_unregister: Option<bool>,
    /// Paths re-validated whenever this field validates.
    pub deps: Vec<String>,
    /// A custom validator.
    pub validator: Option<CustomValidator>,
    /// Milliseconds to wait after the last input before running the custom validator.
    pub validate_debounce_ms: u64,
}

impl Debug for RegisterOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("RegisterOptions")
            .field("controlled", &self.controlled)
            .field("disabled", &self.disabled)
            .field("should_unregister", &self.should_unregister)
            .field("deps", &self.deps)
            .field("validator", &self.validator.is_some())
            .field("validate_debounce_ms", &self.validate_debounce_ms)
            .finish()
    }
}

impl RegisterOptions {
    /// Marks the field controlled.
    pub fn controlled(mut self) -> Self {
        self.controlled = true;
        self
    }

    /// Marks the field disabled.
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Sets the dependent paths.
    pub fn deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches a custom validator.
    pub fn validator(mut self, validator: CustomValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Sets the custom validator's debounce.
    pub fn validate_debounce(mut self, debounce: Duration) -> Self {
        self.validate_debounce_ms = debounce.as_millis() as u64;
        self
    }

    /// Overrides the unregister-on-detach policy.
    pub fn should_unregister(mut self, should_unregister: bool) -> Self {
        self.should_unregister = Some(should_unregister);
        self
    }
}

/////////////////////////////////////////// Operation options //////////////////////////////////////////

/// Options for `unregister`.  Every flag keeps one piece of state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnregisterOptions {
    /// Keep the field's value.
    pub keep_value: bool,
    /// Keep the field's errors.
    pub keep_error: bool,
    /// Keep the touched flag.
    pub keep_touched: bool,
    /// Keep the dirty flag.
    pub keep_dirty: bool,
}

/// Options for `set_value`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetValueOptions {
    /// Validate the path afterwards.
    pub should_validate: bool,
    /// Recompute the dirty flag against the default value.
    pub should_dirty: bool,
    /// Mark the field touched.
    pub should_touch: bool,
}

impl SetValueOptions {
    /// Validate, dirty, and touch.
    pub fn all() -> Self {
        SetValueOptions {
            should_validate: true,
            should_dirty: true,
            should_touch: true,
        }
    }
}

/// Options for `reset`.  Every flag keeps one piece of state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetOptions {
    /// Keep current errors.
    pub keep_errors: bool,
    /// Keep dirty flags.
    pub keep_dirty: bool,
    /// Keep touched flags.
    pub keep_touched: bool,
    /// Keep the stored defaults when new values are supplied.
    pub keep_default_values: bool,
    /// Keep the submission counter.
    pub keep_submit_count: bool,
    /// Keep the submitted and successful flags.
    pub keep_is_submitted: bool,
    /// Keep the submitting flag.
    pub keep_is_submitting: bool,
}

/// Options for `reset_field`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetFieldOptions {
    /// Keep the field's errors.
    pub keep_error: bool,
    /// Keep the dirty flag.
    pub keep_dirty: bool,
    /// Keep the touched flag.
    pub keep_touched: bool,
    /// Replaces the field's stored default before resetting to it.
    pub default_value: Option<Value>,
}

/// Options for `set_focus`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusOptions {
    /// Select the input's text as well.
    pub should_select: bool,
}

/// Options for `set_error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetErrorOptions {
    /// Focus the field.
    pub should_focus: bool,
}

/// Length rules of a field array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldArrayRules {
    /// Removals that would leave fewer items are refused.
    pub min_length: Option<usize>,
    /// Insertions that would leave more items are refused.
    pub max_length: Option<usize>,
}

/// Where focus goes after a field-array insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldArrayFocus {
    /// Focus at all.
    pub should_focus: bool,
    /// Element to focus; defaults to the first inserted element.
    pub focus_index: Option<usize>,
    /// Sub-field of the element to focus.
    pub focus_name: Option<String>,
}

impl FieldArrayFocus {
    /// Focus the first inserted element's `name` sub-field.
    pub fn on(name: impl Into<String>) -> Self {
        FieldArrayFocus {
            should_focus: true,
            focus_index: None,
            focus_name: Some(name.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_behavior() {
        let options = FormOptions::default();
        assert_eq!(options.mode, ValidationMode::OnSubmit);
        assert_eq!(options.re_validate_mode, ReValidateMode::OnChange);
        assert_eq!(options.criteria_mode, CriteriaMode::FirstError);
        assert!(options.should_focus_error);
        assert!(!options.should_unregister);
        assert_eq!(options.default_values, json!({}));
    }

    #[test]
    fn json_options_fill_missing_fields() {
        let options = FormOptions::from_json(
            r#"{"mode": "on_change", "errors": {"email": "Taken"}, "default_values": {"email": ""}}"#,
        )
        .unwrap();
        assert_eq!(options.mode, ValidationMode::OnChange);
        assert_eq!(options.errors["email"], FieldError::simple("Taken"));
        assert_eq!(options.delay_error_ms, 0);
        assert!(options.should_focus_error);
    }

    #[test]
    fn malformed_options_are_errors() {
        assert!(matches!(
            FormOptions::from_json("{\"mode\": \"sometimes\"}"),
            Err(FormError::Json(_))
        ));
        assert!(matches!(
            FormOptions::from_yaml("mode: [1, 2"),
            Err(FormError::Yaml(_))
        ));
    }

    #[test]
    fn register_options_builder() {
        let options = RegisterOptions::default()
            .controlled()
            .deps(["confirm"])
            .validate_debounce(Duration::from_millis(300));
        assert!(options.controlled);
        assert_eq!(options.deps, vec!["confirm".to_string()]);
        assert_eq!(options.validate_debounce_ms, 300);
        assert!(format!("{:?}", options).contains("validator: false"));
    }
}

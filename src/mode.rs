//! Validation trigger policy.
//!
//! The engine can always be asked to validate.  These modes only decide whether a
//! field event asks for it automatically.

use serde::{Deserialize, Serialize};

/// When schema validation fires before the first submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Only on submission or an explicit call.
    #[default]
    OnSubmit,
    /// On every input event.
    OnChange,
    /// On blur.
    OnBlur,
    /// Not until the field has been blurred once; then on every input as well.
    OnTouched,
    /// On input and on blur.
    All,
}

/// When schema validation fires after the first submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReValidateMode {
    /// On every input event.
    #[default]
    OnChange,
    /// On blur.
    OnBlur,
    /// Only on submission or an explicit call.
    OnSubmit,
}

/// How many issues a field's error retains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaMode {
    /// Keep only the first issue's message.
    #[default]
    FirstError,
    /// Keep every issue when there is more than one.
    All,
}

/// A field event that may trigger validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEvent {
    /// The field's value changed.
    Input,
    /// The field lost focus.
    Blur,
}

/// Decides whether `event` should trigger validation of a field.
///
/// ```rust
/// use formwright::{FieldEvent, ReValidateMode, ValidationMode, should_validate};
///
/// // Validate on submit first, then on every change.
/// let fires = |submitted| {
///     should_validate(
///         FieldEvent::Input,
///         ValidationMode::OnSubmit,
///         ReValidateMode::OnChange,
///         false,
///         submitted,
///     )
/// };
/// assert!(!fires(false));
/// assert!(fires(true));
/// ```
pub fn should_validate(
    event: FieldEvent,
    mode: ValidationMode,
    re_validate_mode: ReValidateMode,
    is_touched: bool,
    is_submitted: bool,
) -> bool {
    let is_blur = event == FieldEvent::Blur;
    if mode == ValidationMode::All {
        return true;
    }
    if is_submitted {
        return match re_validate_mode {
            ReValidateMode::OnChange => !is_blur,
            ReValidateMode::OnBlur => is_blur,
            ReValidateMode::OnSubmit => false,
        };
    }
    match mode {
        ValidationMode::OnSubmit => false,
        ValidationMode::OnChange => !is_blur,
        ValidationMode::OnBlur => is_blur,
        ValidationMode::OnTouched => is_touched || is_blur,
        ValidationMode::All => true,
    }
}

//! Field adapters.
//!
//! An adapter is the session's handle on an input that lives outside of it: a text
//! box, a checkbox, a select.  The session pulls raw values out of uncontrolled
//! adapters, pushes values back in after `set_value` or `reset`, and asks them to
//! take focus.  [`AdapterKind`] is the only thing the session inspects to decide
//! between value and checked semantics.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The shape of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// A text-like input holding a string.
    Text,
    /// A checkbox-like input holding a checked flag.
    Checkbox,
    /// A select-like input holding the selected option's value.
    Select,
}

/// The raw state of an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    /// A string value.
    Text(String),
    /// A checked flag.
    Checked(bool),
}

impl RawValue {
    /// Converts raw input state into form data.
    pub fn into_value(self) -> Value {
        match self {
            RawValue::Text(text) => Value::String(text),
            RawValue::Checked(checked) => Value::Bool(checked),
        }
    }

    /// Converts form data into the raw state an input of `kind` can display.
    pub fn from_value(kind: AdapterKind, value: &Value) -> RawValue {
        match kind {
            AdapterKind::Checkbox => RawValue::Checked(match value {
                Value::Bool(checked) => *checked,
                Value::Null => false,
                Value::String(s) => !s.is_empty() && s != "false",
                Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
                Value::Array(items) => !items.is_empty(),
                Value::Object(_) => true,
            }),
            AdapterKind::Text | AdapterKind::Select => RawValue::Text(match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            }),
        }
    }
}

/// An external input bound to a field.
pub trait FieldAdapter: Send + Sync {
    /// The input's shape.
    fn kind(&self) -> AdapterKind;
    /// The input's current raw state.
    fn raw_value(&self) -> RawValue;
    /// Replaces the input's raw state.
    fn set_raw_value(&self, value: RawValue);
    /// Moves focus to the input.
    fn focus(&self);
    /// Selects the input's text, when it has any.
    fn select(&self) {}
}

/////////////////////////////////////////////// MemoryAdapter //////////////////////////////////////////

/// An in-memory [`FieldAdapter`] for headless hosts and tests.
#[derive(Debug)]
pub struct MemoryAdapter {
    kind: AdapterKind,
    value: Mutex<RawValue>,
    focused: AtomicUsize,
    selected: AtomicBool,
}

impl MemoryAdapter {
    /// A text input.
    pub fn text(initial: impl Into<String>) -> Self {
        Self::new(AdapterKind::Text, RawValue::Text(initial.into()))
    }

    /// A checkbox.
    pub fn checkbox(checked: bool) -> Self {
        Self::new(AdapterKind::Checkbox, RawValue::Checked(checked))
    }

    /// A select.
    pub fn select_input(selected: impl Into<String>) -> Self {
        Self::new(AdapterKind::Select, RawValue::Text(selected.into()))
    }

    fn new(kind: AdapterKind, value: RawValue) -> Self {
        MemoryAdapter {
            kind,
            value: Mutex::new(value),
            focused: AtomicUsize::new(0),
            selected: AtomicBool::new(false),
        }
    }

    /// Simulates the user typing `text`.
    pub fn type_text(&self, text: impl Into<String>) {
        self.set_raw_value(RawValue::Text(text.into()));
    }

    /// Simulates the user toggling a checkbox.
    pub fn set_checked(&self, checked: bool) {
        self.set_raw_value(RawValue::Checked(checked));
    }

    /// The displayed text, or `None` for a checkbox.
    pub fn text_value(&self) -> Option<String> {
        match self.raw_value() {
            RawValue::Text(text) => Some(text),
            RawValue::Checked(_) => None,
        }
    }

    /// How many times focus was requested.
    pub fn focus_count(&self) -> usize {
        self.focused.load(Ordering::SeqCst)
    }

    /// Whether the text was selected.
    pub fn was_selected(&self) -> bool {
        self.selected.load(Ordering::SeqCst)
    }
}

impl FieldAdapter for MemoryAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn raw_value(&self) -> RawValue {
        self.value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_raw_value(&self, value: RawValue) {
        *self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
    }

    fn focus(&self) {
        self.focused.fetch_add(1, Ordering::SeqCst);
    }

    fn select(&self) {
        self.selected.store(true, Ordering::SeqCst);
    }
}

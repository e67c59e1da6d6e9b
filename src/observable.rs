//! Observable form state.
//!
//! Every mutation of a session publishes a [`FormSnapshot`] through a
//! `tokio::sync::watch` channel.  A snapshot carries a version that advances only
//! when something observable changed, so consumers can diff cheaply or simply await
//! the next change.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::error::FieldError;
use crate::item_key::ItemKey;
use crate::path;

/// Everything a host UI renders from a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormSnapshot {
    /// Advances on every observable change.
    pub version: u64,
    /// The form data.
    pub values: Value,
    /// Displayed errors, external errors overriding internal ones.
    pub errors: BTreeMap<String, FieldError>,
    /// Paths flagged dirty.
    pub dirty_fields: BTreeSet<String>,
    /// Paths flagged touched.
    pub touched_fields: BTreeSet<String>,
    /// Scopes with validation in flight; whole-form validation appears as `_form`.
    pub validating_fields: BTreeSet<String>,
    /// Item keys of every tracked field array, in order.
    pub field_arrays: BTreeMap<String, Vec<ItemKey>>,
    /// Whether any field is dirty.
    pub is_dirty: bool,
    /// Whether no error is displayed.
    pub is_valid: bool,
    /// Whether any validation is in flight.
    pub is_validating: bool,
    /// Whether asynchronous default values are loading.
    pub is_loading: bool,
    /// Whether a submission is in flight.
    pub is_submitting: bool,
    /// Whether a submission has completed.
    pub is_submitted: bool,
    /// Whether the last submission passed validation.
    pub is_submit_successful: bool,
    /// Completed submissions.
    pub submit_count: u32,
    /// Why loading default values failed, if it did.
    pub default_values_error: Option<String>,
}

impl FormSnapshot {
    /// The value at `path`, `Null` when absent.
    pub fn value(&self, path: &str) -> Value {
        path::get(&self.values, path).cloned().unwrap_or(Value::Null)
    }

    /// The error displayed at `path`.
    pub fn error(&self, path: &str) -> Option<&FieldError> {
        self.errors.get(path)
    }

    fn same_state(&self, other: &FormSnapshot) -> bool {
        self.values == other.values
            && self.errors == other.errors
            && self.dirty_fields == other.dirty_fields
            && self.touched_fields == other.touched_fields
            && self.validating_fields == other.validating_fields
            && self.field_arrays == other.field_arrays
            && self.is_loading == other.is_loading
            && self.is_submitting == other.is_submitting
            && self.is_submitted == other.is_submitted
            && self.is_submit_successful == other.is_submit_successful
            && self.submit_count == other.submit_count
            && self.default_values_error == other.default_values_error
    }
}

/// Publishes snapshots, bumping the version only on change.
pub(crate) struct SnapshotPublisher {
    sender: watch::Sender<FormSnapshot>,
}

impl SnapshotPublisher {
    pub(crate) fn new(initial: FormSnapshot) -> Self {
        let (sender, _) = watch::channel(initial);
        SnapshotPublisher { sender }
    }

    pub(crate) fn publish(&self, next: FormSnapshot) -> bool {
        self.sender.send_if_modified(move |current| {
            if current.same_state(&next) {
                return false;
            }
            let version = current.version + 1;
            *current = next;
            current.version = version;
            true
        })
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<FormSnapshot> {
        self.sender.subscribe()
    }

    pub(crate) fn current(&self) -> FormSnapshot {
        self.sender.borrow().clone()
    }
}

////////////////////////////////////////////// FieldWatcher ////////////////////////////////////////////

/// Follows the value at one path, or the whole form.
///
/// ```rust
/// # tokio_test();
/// # fn tokio_test() {
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
/// # rt.block_on(async {
/// use formwright::{FnSchema, FormOptions, FormSession, SetValueOptions};
/// use serde_json::json;
///
/// let session = FormSession::new(
///     FnSchema::new(|_| async { Ok(()) }),
///     FormOptions::default().with_default_values(json!({"name": "Ada"})),
/// );
/// let mut watcher = session.watch("name");
/// assert_eq!(watcher.current(), json!("Ada"));
///
/// session.set_value("name", json!("Grace"), SetValueOptions::default());
/// assert_eq!(watcher.changed().await, Some(json!("Grace")));
/// # });
/// # }
/// ```
pub struct FieldWatcher {
    path: Option<String>,
    receiver: watch::Receiver<FormSnapshot>,
    last: Value,
}

impl FieldWatcher {
    pub(crate) fn new(path: Option<String>, mut receiver: watch::Receiver<FormSnapshot>) -> Self {
        let last = extract(&receiver.borrow_and_update(), path.as_deref());
        FieldWatcher {
            path,
            receiver,
            last,
        }
    }

    /// The watched path; `None` watches every value.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// The current value.
    pub fn current(&self) -> Value {
        extract(&self.receiver.borrow(), self.path.as_deref())
    }

    /// Waits until the watched value differs from the last one seen.  Returns `None`
    /// once the session is gone.
    pub async fn changed(&mut self) -> Option<Value> {
        loop {
            self.receiver.changed().await.ok()?;
            let value = extract(&self.receiver.borrow_and_update(), self.path.as_deref());
            if value != self.last {
                self.last = value.clone();
                return Some(value);
            }
        }
    }
}

fn extract(snapshot: &FormSnapshot, path: Option<&str>) -> Value {
    match path {
        Some(path) => snapshot.value(path),
        None => snapshot.values.clone(),
    }
}

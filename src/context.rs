//! The state one session owns, and the lock around it.
//!
//! Every mutation goes through [`FormContext::update`], which applies the change
//! synchronously and publishes a new snapshot before releasing the lock.  The lock
//! is never held across an `.await` and adapters are never called while it is held.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::warn;

use crate::error::{FieldError, FormError};
use crate::field_array::FieldArrayManager;
use crate::field_state::FieldStateTracker;
use crate::mode::{FieldEvent, should_validate};
use crate::observable::{FormSnapshot, SnapshotPublisher};
use crate::options::FormOptions;
use crate::registry::FieldRegistry;
use crate::schema::Schema;
use crate::validation::{self, ValidationEngine};

/// The future returned by a default-value loader.
pub type DefaultValuesFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send + 'static>>;

/// Produces default values asynchronously.
pub type DefaultValuesLoader = Arc<dyn Fn() -> DefaultValuesFuture + Send + Sync>;

/// Called when the default-value loader fails.
pub type DefaultValuesErrorHook = Arc<dyn Fn(&FormError) + Send + Sync>;

/////////////////////////////////////////////// Submission /////////////////////////////////////////////

#[derive(Debug, Clone, Default)]
pub(crate) struct Submission {
    pub(crate) count: u32,
    pub(crate) is_submitting: bool,
    pub(crate) is_submitted: bool,
    pub(crate) is_submit_successful: bool,
}

/////////////////////////////////////////////// FormState //////////////////////////////////////////////

pub(crate) struct FormState {
    pub(crate) options: FormOptions,
    pub(crate) values: Value,
    pub(crate) defaults: Value,
    pub(crate) fields: FieldStateTracker,
    pub(crate) external_errors: BTreeMap<String, FieldError>,
    pub(crate) engine: ValidationEngine,
    pub(crate) registry: FieldRegistry,
    pub(crate) arrays: FieldArrayManager,
    pub(crate) submission: Submission,
    pub(crate) is_loading: bool,
    pub(crate) default_values_error: Option<String>,
}

impl FormState {
    /// Internal errors with external errors laid over them.
    pub(crate) fn merged_errors(&self) -> BTreeMap<String, FieldError> {
        let mut errors = self.fields.errors().clone();
        errors.extend(
            self.external_errors
                .iter()
                .map(|(path, error)| (path.clone(), error.clone())),
        );
        errors
    }

    /// Whether `event` on `path` triggers schema validation under the current modes.
    pub(crate) fn fires(&self, event: FieldEvent, path: &str) -> bool {
        should_validate(
            event,
            self.options.mode,
            self.options.re_validate_mode,
            self.fields.is_touched(path),
            self.submission.is_submitted,
        )
    }

    fn snapshot(&self) -> FormSnapshot {
        let errors = self.merged_errors();
        let validating_fields = self.engine.validating_fields();
        FormSnapshot {
            version: 0,
            values: self.values.clone(),
            is_dirty: !self.fields.dirty().is_empty(),
            is_valid: errors.is_empty(),
            is_validating: !validating_fields.is_empty(),
            errors,
            dirty_fields: self.fields.dirty().clone(),
            touched_fields: self.fields.touched().clone(),
            validating_fields,
            field_arrays: self.arrays.keys(),
            is_loading: self.is_loading,
            is_submitting: self.submission.is_submitting,
            is_submitted: self.submission.is_submitted,
            is_submit_successful: self.submission.is_submit_successful,
            submit_count: self.submission.count,
            default_values_error: self.default_values_error.clone(),
        }
    }
}

////////////////////////////////////////////// FormContext /////////////////////////////////////////////

pub(crate) struct FormContext {
    state: Mutex<FormState>,
    snapshots: SnapshotPublisher,
    pub(crate) schema: Arc<dyn Schema>,
    pub(crate) loader: Option<DefaultValuesLoader>,
    pub(crate) on_default_values_error: Option<DefaultValuesErrorHook>,
}

impl FormContext {
    pub(crate) fn new(
        schema: Arc<dyn Schema>,
        options: FormOptions,
        loader: Option<DefaultValuesLoader>,
        on_default_values_error: Option<DefaultValuesErrorHook>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let defaults = options.default_values.clone();
            let values = options.values.clone().unwrap_or_else(|| defaults.clone());
            let external_errors = options.errors.clone();
            let state = FormState {
                options,
                values,
                defaults,
                fields: FieldStateTracker::new(),
                external_errors,
                engine: ValidationEngine::new(weak.clone()),
                registry: FieldRegistry::default(),
                arrays: FieldArrayManager::new(),
                submission: Submission::default(),
                is_loading: loader.is_some(),
                default_values_error: None,
            };
            let snapshots = SnapshotPublisher::new(state.snapshot());
            FormContext {
                state: Mutex::new(state),
                snapshots,
                schema,
                loader,
                on_default_values_error,
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, FormState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `change` and publishes the resulting snapshot.
    pub(crate) fn update<R>(&self, change: impl FnOnce(&mut FormState) -> R) -> R {
        let mut state = self.lock();
        let result = change(&mut state);
        self.snapshots.publish(state.snapshot());
        result
    }

    /// Reads state without publishing.
    pub(crate) fn read<R>(&self, inspect: impl FnOnce(&FormState) -> R) -> R {
        let state = self.lock();
        inspect(&state)
    }

    pub(crate) fn snapshots(&self) -> &SnapshotPublisher {
        &self.snapshots
    }

    /// Validates `scope` in the background.
    pub(crate) fn spawn_validation(self: &Arc<Self>, scope: Option<String>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(?scope, "no async runtime; validation not started");
            return;
        };
        let ctx = Arc::clone(self);
        runtime.spawn(async move {
            validation::validate_scope(&ctx, scope, false).await;
        });
    }
}

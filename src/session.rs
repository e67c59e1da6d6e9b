//! # Form Session
//!
//! [`FormSession`] composes the path store, field state, validation engine, field
//! registry and field arrays into one form.  Handles are cheap to clone and share
//! the same state.
//!
//! ```rust
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! use formwright::{FormOptions, FormSession, JsonSchemaValidator, SetValueOptions};
//! use serde_json::json;
//!
//! let schema = JsonSchemaValidator::new(json!({
//!     "type": "object",
//!     "properties": {
//!         "email": {"type": "string", "format": "email"},
//!         "password": {"type": "string", "minLength": 8}
//!     }
//! }))
//! .unwrap();
//! let session = FormSession::new(
//!     schema,
//!     FormOptions::default().with_default_values(json!({"email": "", "password": ""})),
//! );
//! assert!(!session.validate(None).await);
//! assert!(session.get_errors().contains_key("email"));
//!
//! session.set_value("email", json!("a@b.com"), SetValueOptions::default());
//! session.set_value("password", json!("longenough1"), SetValueOptions::default());
//! assert!(session.validate(None).await);
//! assert!(session.get_errors().is_empty());
//! # });
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::context::{
    DefaultValuesErrorHook, DefaultValuesFuture, DefaultValuesLoader, FormContext,
};
use crate::error::{FieldError, FormError};
use crate::field_array::FieldArray;
use crate::observable::{FieldWatcher, FormSnapshot};
use crate::options::{
    FieldArrayRules, FocusOptions, FormOptions, RegisterOptions, ResetFieldOptions, ResetOptions,
    SetErrorOptions, SetValueOptions, UnregisterOptions,
};
use crate::path;
use crate::registry::{self, FieldRegistration};
use crate::schema::Schema;
use crate::validation;

/// How a call to [`FormSession::handle_submit`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Another submission was in flight; nothing happened.
    Ignored,
    /// The form was valid and the success callback ran.
    Valid,
    /// The form was invalid and the failure callback ran.
    Invalid,
}

/// The state of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldState {
    /// The field is dirty.
    pub is_dirty: bool,
    /// The field is touched.
    pub is_touched: bool,
    /// Validation covering the field is in flight.
    pub is_validating: bool,
    /// An error is displayed for the field.
    pub invalid: bool,
    /// The displayed error.
    pub error: Option<FieldError>,
}

////////////////////////////////////////////// FormSessionBuilder //////////////////////////////////////

/// Configures a [`FormSession`] with collaborators that are not plain data.
pub struct FormSessionBuilder {
    schema: Arc<dyn Schema>,
    options: FormOptions,
    loader: Option<DefaultValuesLoader>,
    on_default_values_error: Option<DefaultValuesErrorHook>,
}

impl FormSessionBuilder {
    /// Sets the options.
    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }

    /// Loads default values asynchronously through
    /// [`FormSession::load_defaults`].  Until then the session reports
    /// `is_loading`.
    pub fn default_values_loader<F, Fut>(mut self, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.loader = Some(Arc::new(move || Box::pin(loader()) as DefaultValuesFuture));
        self
    }

    /// Called when the default-value loader fails.
    pub fn on_default_values_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FormError) + Send + Sync + 'static,
    {
        self.on_default_values_error = Some(Arc::new(hook));
        self
    }

    /// Creates the session.
    pub fn build(self) -> FormSession {
        FormSession {
            ctx: FormContext::new(
                self.schema,
                self.options,
                self.loader,
                self.on_default_values_error,
            ),
        }
    }
}

///////////////////////////////////////////////// FormSession //////////////////////////////////////////

/// One form.
#[derive(Clone)]
pub struct FormSession {
    ctx: Arc<FormContext>,
}

impl Debug for FormSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FormSession")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl FormSession {
    /// Starts configuring a session around `schema`.
    pub fn builder(schema: impl Schema + 'static) -> FormSessionBuilder {
        FormSessionBuilder {
            schema: Arc::new(schema),
            options: FormOptions::default(),
            loader: None,
            on_default_values_error: None,
        }
    }

    /// Creates a session with synchronous default values.
    pub fn new(schema: impl Schema + 'static, options: FormOptions) -> Self {
        Self::builder(schema).options(options).build()
    }

    /// Runs the default-value loader.
    ///
    /// On success the loaded tree becomes both the defaults and the values, unless
    /// external values are in force.  On failure the message is kept in
    /// `default_values_error`, the error hook is called, and the error returned.
    pub async fn load_defaults(&self) -> Result<(), FormError> {
        let Some(loader) = self.ctx.loader.clone() else {
            return Err(FormError::NoLoader);
        };
        self.ctx.update(|state| {
            state.is_loading = true;
            state.default_values_error = None;
        });
        let loaded = match tokio::spawn(loader()).await {
            Ok(Ok(values)) => Ok(values),
            Ok(Err(message)) => Err(FormError::DefaultValues(message)),
            Err(err) => Err(FormError::DefaultValues(err.to_string())),
        };
        match loaded {
            Ok(values) => {
                self.ctx.update(|state| {
                    state.is_loading = false;
                    state.defaults = values.clone();
                    state.options.default_values = values.clone();
                    if state.options.values.is_none() {
                        state.values = values;
                        state.arrays.clear();
                    }
                });
                registry::push_values(&self.ctx, None);
                debug!("default values loaded");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "default values failed to load");
                self.ctx.update(|state| {
                    state.is_loading = false;
                    state.default_values_error = Some(err.to_string());
                });
                if let Some(hook) = &self.ctx.on_default_values_error {
                    hook(&err);
                }
                Err(err)
            }
        }
    }

    /////////////////////////////////////////// registration //////////////////////////////////////////

    /// Registers `path`, or updates the options of an already-registered path.
    ///
    /// A field missing from the values is seeded from the defaults.
    pub fn register(
        &self,
        path: &str,
        options: RegisterOptions,
    ) -> Result<FieldRegistration, FormError> {
        if path::segments(path).is_empty() || path::is_unsafe(path) {
            return Err(FormError::InvalidPath(path.to_string()));
        }
        self.ctx.update(|state| {
            if state.registry.upsert(path, options) {
                debug!(path, "field registered");
            }
            if !path::has(&state.values, path) {
                if let Some(default) = path::get(&state.defaults, path).cloned() {
                    path::set(&mut state.values, path, default);
                }
            }
        });
        Ok(FieldRegistration::new(
            path.to_string(),
            Arc::clone(&self.ctx),
        ))
    }

    /// Unregisters `path`, dropping its value, errors, and flags unless kept.
    pub fn unregister(&self, path: &str, options: UnregisterOptions) {
        self.ctx
            .update(|state| registry::unregister_field(state, path, options));
    }

    ///////////////////////////////////////////////// values ///////////////////////////////////////////

    /// Writes `value` at `path` and pushes it to an uncontrolled adapter.
    pub fn set_value(&self, path: &str, value: Value, options: SetValueOptions) {
        self.ctx.update(|state| {
            let is_default = path::get(&state.defaults, path) == Some(&value);
            path::set(&mut state.values, path, value);
            state.arrays.forget(path);
            if options.should_dirty {
                if is_default {
                    state.fields.clear_dirty(path);
                } else {
                    state.fields.mark_dirty(path);
                }
            }
            if options.should_touch {
                state.fields.mark_touched(path);
            }
        });
        registry::push_values(&self.ctx, Some(path));
        if options.should_validate {
            self.ctx.spawn_validation(Some(path.to_string()));
        }
    }

    /// Every value, after pulling uncontrolled adapters.
    pub fn get_values(&self) -> Value {
        registry::sync_adapters(&self.ctx);
        self.ctx.read(|state| state.values.clone())
    }

    /// The value at `path`, `Null` when absent.
    pub fn get_value(&self, path: &str) -> Value {
        registry::sync_adapters(&self.ctx);
        self.ctx.read(|state| {
            path::get(&state.values, path)
                .cloned()
                .unwrap_or_default()
        })
    }

    /// The values at several paths.
    pub fn get_values_at(&self, paths: &[&str]) -> Vec<Value> {
        registry::sync_adapters(&self.ctx);
        self.ctx.read(|state| {
            paths
                .iter()
                .map(|path| {
                    path::get(&state.values, path)
                        .cloned()
                        .unwrap_or_default()
                })
                .collect()
        })
    }

    /// Replaces the values from outside, as the `values` option does.
    pub fn set_external_values(&self, values: Value) {
        self.ctx.update(|state| {
            state.options.values = Some(values.clone());
            state.values = values;
            state.arrays.clear();
        });
        registry::push_values(&self.ctx, None);
    }

    ////////////////////////////////////////////// observation /////////////////////////////////////////

    /// The state of one field.
    pub fn get_field_state(&self, path: &str) -> FieldState {
        self.ctx.read(|state| {
            let error = state
                .external_errors
                .get(path)
                .or_else(|| state.fields.error(path))
                .cloned();
            FieldState {
                is_dirty: state.fields.is_dirty(path),
                is_touched: state.fields.is_touched(path),
                is_validating: state.engine.is_validating(path),
                invalid: error.is_some(),
                error,
            }
        })
    }

    /// Follows the value at `path`.
    pub fn watch(&self, path: &str) -> FieldWatcher {
        FieldWatcher::new(Some(path.to_string()), self.subscribe())
    }

    /// Follows every value.
    pub fn watch_all(&self) -> FieldWatcher {
        FieldWatcher::new(None, self.subscribe())
    }

    /// Receives every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<FormSnapshot> {
        self.ctx.snapshots().subscribe()
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> FormSnapshot {
        self.ctx.snapshots().current()
    }

    /////////////////////////////////////////////// validation /////////////////////////////////////////

    /// Validates `path`, or the whole form, and returns whether it passed.
    pub async fn validate(&self, path: Option<&str>) -> bool {
        validation::validate_scope(&self.ctx, path.map(str::to_string), false).await
    }

    /// Validates each of `paths`, or the whole form when empty.  True only when all
    /// of them pass.
    pub async fn trigger(&self, paths: &[&str]) -> bool {
        if paths.is_empty() {
            return self.validate(None).await;
        }
        let mut valid = true;
        for path in paths {
            valid &= self.validate(Some(path)).await;
        }
        valid
    }

    ///////////////////////////////////////////////// errors ///////////////////////////////////////////

    /// Clears errors at and beneath each of `paths`, or every internal error.
    pub fn clear_errors(&self, paths: Option<&[&str]>) {
        self.ctx.update(|state| match paths {
            Some(paths) => {
                for path in paths {
                    state.fields.clear_errors(path);
                    state.engine.forget_errors_within(Some(path));
                }
            }
            None => {
                state.fields.clear_all_errors();
                state.engine.forget_errors_within(None);
            }
        });
    }

    /// Sets the error of `path` directly.
    pub fn set_error(&self, path: &str, error: impl Into<FieldError>, options: SetErrorOptions) {
        let error = error.into();
        self.ctx.update(|state| {
            state.engine.forget_errors_within(Some(path));
            state.fields.set_error(path, error);
        });
        if options.should_focus {
            registry::focus_field(&self.ctx, path, FocusOptions::default());
        }
    }

    /// Sets several errors directly.
    pub fn set_errors(&self, errors: BTreeMap<String, FieldError>) {
        self.ctx.update(|state| {
            for (path, error) in errors {
                state.engine.forget_errors_within(Some(&path));
                state.fields.set_error(&path, error);
            }
        });
    }

    /// Installs errors from outside, as the `errors` option does.  They are shown
    /// over internally computed errors.
    pub fn set_external_errors(&self, errors: BTreeMap<String, FieldError>) {
        self.ctx.update(|state| {
            state.options.errors = errors.clone();
            state.external_errors = errors;
        });
    }

    /// Whether any error is displayed at or beneath `path`, or anywhere.
    pub fn has_errors(&self, path: Option<&str>) -> bool {
        self.ctx.read(|state| {
            let errors = state.merged_errors();
            match path {
                Some(scope) => errors.keys().any(|key| path::is_within(key, scope)),
                None => !errors.is_empty(),
            }
        })
    }

    /// Every displayed error.
    pub fn get_errors(&self) -> BTreeMap<String, FieldError> {
        self.ctx.read(|state| state.merged_errors())
    }

    ///////////////////////////////////////////////// reset ////////////////////////////////////////////

    /// Resets the form to `values`, or to the defaults.
    ///
    /// Validation in flight is invalidated, pending errors are cancelled, and field
    /// arrays rebuild with fresh keys.
    pub fn reset(&self, values: Option<Value>, options: ResetOptions) {
        self.ctx.update(|state| {
            state.engine.reset(options.keep_errors);
            let next = match values {
                Some(values) => {
                    if !options.keep_default_values {
                        state.defaults = values.clone();
                    }
                    values
                }
                None => state.defaults.clone(),
            };
            state.values = next;
            if !options.keep_errors {
                state.fields.clear_all_errors();
            }
            if !options.keep_dirty {
                state.fields.clear_all_dirty();
            }
            if !options.keep_touched {
                state.fields.clear_all_touched();
            }
            if !options.keep_submit_count {
                state.submission.count = 0;
            }
            if !options.keep_is_submitted {
                state.submission.is_submitted = false;
                state.submission.is_submit_successful = false;
            }
            if !options.keep_is_submitting {
                state.submission.is_submitting = false;
            }
            state.arrays.clear();
        });
        registry::push_values(&self.ctx, None);
    }

    /// Resets one field to its default.
    pub fn reset_field(&self, path: &str, options: ResetFieldOptions) {
        self.ctx.update(|state| {
            if let Some(default) = options.default_value {
                path::set(&mut state.defaults, path, default);
            }
            match path::get(&state.defaults, path).cloned() {
                Some(default) => path::set(&mut state.values, path, default),
                None => path::unset(&mut state.values, path),
            }
            if !options.keep_error {
                state.fields.clear_errors(path);
                state.engine.forget_errors_within(Some(path));
            }
            if !options.keep_dirty {
                state.fields.clear_dirty(path);
            }
            if !options.keep_touched {
                state.fields.clear_touched(path);
            }
            state.arrays.forget(path);
        });
        registry::push_values(&self.ctx, Some(path));
    }

    ///////////////////////////////////////////////// focus ////////////////////////////////////////////

    /// Focuses the adapter bound at `path`.  Returns false when nothing is bound.
    pub fn set_focus(&self, path: &str, options: FocusOptions) -> bool {
        registry::focus_field(&self.ctx, path, options)
    }

    ///////////////////////////////////////////////// arrays ///////////////////////////////////////////

    /// The field-array manager of `path`.
    pub fn fields(&self, path: &str, rules: FieldArrayRules) -> FieldArray {
        FieldArray::new(path.to_string(), rules, Arc::clone(&self.ctx))
    }

    /////////////////////////////////////////////// submission /////////////////////////////////////////

    /// Submits the form, calling `on_valid` with the data when it passes.
    pub async fn handle_submit<F, Fut>(&self, on_valid: F) -> SubmitOutcome
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = ()>,
    {
        self.handle_submit_with(on_valid, |_: BTreeMap<String, FieldError>| async {})
            .await
    }

    /// Submits the form.
    ///
    /// Uncontrolled adapters are synchronized, the whole form is validated with no
    /// error delay, and every custom validator runs.  `on_valid` receives the data
    /// without disabled fields; `on_invalid` receives every displayed error, after
    /// focus moved to the first errored field.  A submission while another is in
    /// flight is ignored.
    pub async fn handle_submit_with<F, Fut, G, GFut>(
        &self,
        on_valid: F,
        on_invalid: G,
    ) -> SubmitOutcome
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = ()>,
        G: FnOnce(BTreeMap<String, FieldError>) -> GFut,
        GFut: Future<Output = ()>,
    {
        let generation = self.ctx.update(|state| {
            if state.submission.is_submitting {
                return None;
            }
            state.submission.is_submitting = true;
            Some(state.engine.generation())
        });
        let Some(generation) = generation else {
            debug!("submission already in flight");
            return SubmitOutcome::Ignored;
        };
        let mut guard = SubmitGuard {
            ctx: &self.ctx,
            generation,
            successful: false,
        };
        registry::sync_adapters(&self.ctx);
        validation::validate_scope(&self.ctx, None, true).await;
        validation::run_all_custom(&self.ctx).await;
        let (errors, data, focus) = self.ctx.read(|state| {
            let errors = state.merged_errors();
            let mut data = state.values.clone();
            for path in state.registry.disabled_paths() {
                path::unset(&mut data, &path);
            }
            let focus = if state.options.should_focus_error {
                state.registry.first_errored(&errors)
            } else {
                None
            };
            (errors, data, focus)
        });
        if errors.is_empty() {
            debug!("submission valid");
            guard.successful = true;
            on_valid(data).await;
            SubmitOutcome::Valid
        } else {
            debug!(errors = errors.len(), "submission invalid");
            if let Some(path) = focus {
                registry::focus_field(&self.ctx, &path, FocusOptions::default());
            }
            on_invalid(errors).await;
            SubmitOutcome::Invalid
        }
    }
}

struct SubmitGuard<'a> {
    ctx: &'a FormContext,
    generation: u64,
    successful: bool,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.ctx.update(|state| {
            state.submission.is_submitting = false;
            if state.engine.generation() == self.generation {
                state.submission.is_submitted = true;
                state.submission.is_submit_successful = self.successful;
                state.submission.count += 1;
            }
        });
    }
}

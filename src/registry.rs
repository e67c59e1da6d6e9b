//! # Field Registry
//!
//! Registering a path returns a [`FieldRegistration`], the handle an input uses to
//! report events.  Uncontrolled fields bind a [`FieldAdapter`] and the session reads
//! raw values out of it; controlled fields move values through a
//! [`ControlledBinding`] instead.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::adapter::{FieldAdapter, RawValue};
use crate::context::{FormContext, FormState};
use crate::error::FieldError;
use crate::mode::FieldEvent;
use crate::options::{FocusOptions, RegisterOptions, UnregisterOptions};
use crate::path;
use crate::validation;

/////////////////////////////////////////////// FieldRecord ////////////////////////////////////////////

pub(crate) struct FieldRecord {
    pub(crate) options: RegisterOptions,
    pub(crate) adapter: Option<Arc<dyn FieldAdapter>>,
    order: u64,
}

impl FieldRecord {
    fn uncontrolled_adapter(&self) -> Option<Arc<dyn FieldAdapter>> {
        if self.options.controlled {
            None
        } else {
            self.adapter.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attach {
    Unknown,
    Unchanged,
    Ignored,
    Attached,
}

/////////////////////////////////////////////// FieldRegistry //////////////////////////////////////////

/// Registered fields, in registration order.
#[derive(Default)]
pub(crate) struct FieldRegistry {
    records: BTreeMap<String, FieldRecord>,
    next_order: u64,
}

impl FieldRegistry {
    /// Registers `path`, or replaces its options.  Returns true for a new field.
    pub(crate) fn upsert(&mut self, path: &str, options: RegisterOptions) -> bool {
        if let Some(record) = self.records.get_mut(path) {
            record.options = options;
            return false;
        }
        self.next_order += 1;
        self.records.insert(
            path.to_string(),
            FieldRecord {
                options,
                adapter: None,
                order: self.next_order,
            },
        );
        true
    }

    pub(crate) fn get(&self, path: &str) -> Option<&FieldRecord> {
        self.records.get(path)
    }

    pub(crate) fn remove(&mut self, path: &str) -> Option<FieldRecord> {
        self.records.remove(path)
    }

    pub(crate) fn paths(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    pub(crate) fn attach(&mut self, path: &str, adapter: Arc<dyn FieldAdapter>) -> Attach {
        let Some(record) = self.records.get_mut(path) else {
            return Attach::Unknown;
        };
        match &record.adapter {
            Some(bound) if std::ptr::addr_eq(Arc::as_ptr(bound), Arc::as_ptr(&adapter)) => {
                Attach::Unchanged
            }
            Some(_) => Attach::Ignored,
            None => {
                record.adapter = Some(adapter);
                Attach::Attached
            }
        }
    }

    /// Unbinds the adapter of `path`; returns whether the field should now unregister.
    pub(crate) fn detach(&mut self, path: &str, session_default: bool) -> bool {
        let Some(record) = self.records.get_mut(path) else {
            return false;
        };
        if record.adapter.take().is_none() {
            return false;
        }
        record.options.should_unregister.unwrap_or(session_default)
    }

    /// Every bound adapter of an uncontrolled field.
    pub(crate) fn uncontrolled_adapters(&self) -> Vec<(String, Arc<dyn FieldAdapter>)> {
        self.records
            .iter()
            .filter_map(|(path, record)| {
                record
                    .uncontrolled_adapter()
                    .map(|adapter| (path.clone(), adapter))
            })
            .collect()
    }

    pub(crate) fn adapter(&self, path: &str) -> Option<Arc<dyn FieldAdapter>> {
        self.records.get(path)?.adapter.clone()
    }

    /// The earliest-registered field carrying one of `errors`.
    pub(crate) fn first_errored(&self, errors: &BTreeMap<String, FieldError>) -> Option<String> {
        self.records
            .iter()
            .filter(|(path, _)| errors.contains_key(*path))
            .min_by_key(|(_, record)| record.order)
            .map(|(path, _)| path.clone())
    }

    pub(crate) fn disabled_paths(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, record)| record.options.disabled)
            .map(|(path, _)| path.clone())
            .collect()
    }
}

/// Removes `path` from the registry and drops its state per `options`.
pub(crate) fn unregister_field(state: &mut FormState, path: &str, options: UnregisterOptions) {
    state.registry.remove(path);
    state.engine.forget_field(path);
    if !options.keep_value {
        path::unset(&mut state.values, path);
    }
    if !options.keep_error {
        state.fields.clear_errors(path);
    }
    if !options.keep_touched {
        state.fields.clear_touched(path);
    }
    if !options.keep_dirty {
        state.fields.clear_dirty(path);
    }
    debug!(path, ?options, "field unregistered");
}

/// Pulls the raw values of bound uncontrolled adapters into the form data.
pub(crate) fn sync_adapters(ctx: &FormContext) {
    let adapters = ctx.read(|state| state.registry.uncontrolled_adapters());
    if adapters.is_empty() {
        return;
    }
    let values: Vec<(String, Value)> = adapters
        .into_iter()
        .map(|(path, adapter)| (path, adapter.raw_value().into_value()))
        .collect();
    ctx.update(|state| {
        for (path, value) in values {
            path::set(&mut state.values, &path, value);
        }
    });
}

/// Pushes stored values into the uncontrolled adapters at or beneath `scope`, or
/// into all of them.
pub(crate) fn push_values(ctx: &FormContext, scope: Option<&str>) {
    let targets: Vec<(Arc<dyn FieldAdapter>, Value)> = ctx.read(|state| {
        state
            .registry
            .uncontrolled_adapters()
            .into_iter()
            .filter(|(path, _)| scope.is_none_or(|scope| path::is_within(path, scope)))
            .map(|(path, adapter)| {
                let value = path::get(&state.values, &path).cloned().unwrap_or_default();
                (adapter, value)
            })
            .collect()
    });
    for (adapter, value) in targets {
        adapter.set_raw_value(RawValue::from_value(adapter.kind(), &value));
    }
}

/// Moves focus to the adapter bound at `path`.  Returns false when nothing is bound.
pub(crate) fn focus_field(ctx: &FormContext, path: &str, options: FocusOptions) -> bool {
    let Some(adapter) = ctx.read(|state| state.registry.adapter(path)) else {
        trace!(path, "no adapter to focus");
        return false;
    };
    adapter.focus();
    if options.should_select {
        adapter.select();
    }
    true
}

////////////////////////////////////////////// FieldRegistration ///////////////////////////////////////

/// The handle returned by [`FormSession::register`](crate::FormSession::register).
#[derive(Clone)]
pub struct FieldRegistration {
    name: String,
    ctx: Arc<FormContext>,
}

impl Debug for FieldRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FieldRegistration")
            .field("name", &self.name)
            .finish()
    }
}

impl FieldRegistration {
    pub(crate) fn new(name: String, ctx: Arc<FormContext>) -> Self {
        FieldRegistration { name, ctx }
    }

    /// The registered path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds an adapter, or unbinds with `None`.
    ///
    /// Binding the adapter already bound does nothing.  While one adapter is bound,
    /// binding a different one is ignored, which keeps radio groups on their first
    /// element.  The first bind of an uncontrolled field pushes its value, or its
    /// default, into the adapter.
    pub fn bind(&self, adapter: Option<Arc<dyn FieldAdapter>>) {
        let Some(adapter) = adapter else {
            self.unbind();
            return;
        };
        let push = self.ctx.update(|state| {
            match state.registry.attach(&self.name, Arc::clone(&adapter)) {
                Attach::Attached => {}
                outcome => {
                    trace!(path = %self.name, ?outcome, "adapter not attached");
                    return None;
                }
            }
            if state
                .registry
                .get(&self.name)
                .is_some_and(|record| record.options.controlled)
            {
                return None;
            }
            if let Some(value) = path::get(&state.values, &self.name) {
                return Some(value.clone());
            }
            let default = path::get(&state.defaults, &self.name).cloned()?;
            path::set(&mut state.values, &self.name, default.clone());
            Some(default)
        });
        if let Some(value) = push {
            adapter.set_raw_value(RawValue::from_value(adapter.kind(), &value));
        }
    }

    fn unbind(&self) {
        self.ctx.update(|state| {
            let session_default = state.options.should_unregister;
            if state.registry.detach(&self.name, session_default) {
                unregister_field(state, &self.name, UnregisterOptions::default());
            }
        });
    }

    /// Reports an input event.
    ///
    /// An uncontrolled field's value is read from its adapter and marked dirty.
    /// Schema validation of the field and its `deps` follows when the validation
    /// mode asks for it, and then the custom validator is dispatched.
    pub async fn on_input(&self) {
        let adapter = self.ctx.read(|state| {
            state
                .registry
                .get(&self.name)
                .and_then(FieldRecord::uncontrolled_adapter)
        });
        let raw = adapter.map(|adapter| adapter.raw_value().into_value());
        let plan = self.ctx.update(|state| {
            let deps = state.registry.get(&self.name)?.options.deps.clone();
            if let Some(value) = raw {
                path::set(&mut state.values, &self.name, value);
                state.fields.mark_dirty(&self.name);
            }
            Some((state.fires(FieldEvent::Input, &self.name), deps))
        });
        let Some((fires, deps)) = plan else {
            trace!(path = %self.name, "input on unregistered field");
            return;
        };
        if fires {
            self.validate_with_deps(deps).await;
        }
        validation::dispatch_custom(&self.ctx, &self.name);
    }

    /// Reports a blur event.  Marks the field touched and validates it when the
    /// validation mode asks for it.
    pub async fn on_blur(&self) {
        let plan = self.ctx.update(|state| {
            let deps = state.registry.get(&self.name)?.options.deps.clone();
            state.fields.mark_touched(&self.name);
            Some((state.fires(FieldEvent::Blur, &self.name), deps))
        });
        if let Some((true, deps)) = plan {
            self.validate_with_deps(deps).await;
        }
    }

    async fn validate_with_deps(&self, deps: Vec<String>) {
        validation::validate_scope(&self.ctx, Some(self.name.clone()), false).await;
        for dep in deps {
            validation::validate_scope(&self.ctx, Some(dep), false).await;
        }
    }

    /// The value binding of a controlled field.
    pub fn binding(&self) -> Option<ControlledBinding> {
        let controlled = self.ctx.read(|state| {
            state
                .registry
                .get(&self.name)
                .is_some_and(|record| record.options.controlled)
        });
        controlled.then(|| ControlledBinding {
            name: self.name.clone(),
            ctx: Arc::clone(&self.ctx),
        })
    }
}

////////////////////////////////////////////// ControlledBinding ///////////////////////////////////////

/// Two-way value access for a controlled field.
#[derive(Clone)]
pub struct ControlledBinding {
    name: String,
    ctx: Arc<FormContext>,
}

impl Debug for ControlledBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ControlledBinding")
            .field("name", &self.name)
            .finish()
    }
}

impl ControlledBinding {
    /// The field's value, `Null` when absent.
    pub fn get(&self) -> Value {
        self.ctx.read(|state| {
            path::get(&state.values, &self.name)
                .cloned()
                .unwrap_or_default()
        })
    }

    /// Writes the field's value and marks it dirty.
    pub fn set(&self, value: Value) {
        self.ctx.update(|state| {
            path::set(&mut state.values, &self.name, value);
            state.fields.mark_dirty(&self.name);
        });
    }
}

//! # Validation Engine
//!
//! Schema validation always parses the complete data tree.  A scoped validation
//! filters the returned issues down to the requested path and its descendants.
//!
//! Three mechanisms keep asynchronous results honest:
//!
//! - every `reset` advances a generation, and results captured under an older
//!   generation are never applied;
//! - every dispatch mints a request id and only the latest id recorded for a scope
//!   may write that scope's errors;
//! - errors wait out the configured delay in a pending slot and are only promoted if
//!   nothing replaced or cleared them in the meantime.
//!
//! Custom per-field validators follow the same request-id rule and may be debounced.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::context::{FormContext, FormState};
use crate::error::{ErrorMessages, FieldError};
use crate::field_state::FieldStateTracker;
use crate::mode::CriteriaMode;
use crate::options::CustomValidator;
use crate::path;
use crate::schema::{ParseResult, SchemaIssue};

/// The validating-state key of whole-form validation.
pub const FORM_SCOPE: &str = "_form";

/////////////////////////////////////////////// synthesize /////////////////////////////////////////////

/// Builds the error of one path from its issues.
///
/// ```rust
/// use formwright::{CriteriaMode, FieldError, SchemaIssue, synthesize};
///
/// let issues = vec![
///     SchemaIssue::at("password", "too_small", "Too short"),
///     SchemaIssue::at("password", "invalid_string", "Needs a digit"),
/// ];
/// assert_eq!(
///     synthesize(&issues, CriteriaMode::FirstError),
///     Some(FieldError::simple("Too short"))
/// );
/// assert_eq!(
///     synthesize(&issues[..1], CriteriaMode::All),
///     Some(FieldError::simple("Too short"))
/// );
/// let detailed = synthesize(&issues, CriteriaMode::All).unwrap();
/// assert_eq!(detailed.kind(), Some("too_small"));
/// assert_eq!(detailed.types().unwrap().len(), 2);
/// ```
pub fn synthesize(issues: &[SchemaIssue], criteria: CriteriaMode) -> Option<FieldError> {
    let first = issues.first()?;
    if criteria == CriteriaMode::FirstError || issues.len() == 1 {
        return Some(FieldError::Simple(first.message.clone()));
    }
    let mut types: BTreeMap<String, ErrorMessages> = BTreeMap::new();
    for issue in issues {
        match types.get_mut(&issue.code) {
            Some(messages) => messages.push(issue.message.clone()),
            None => {
                types.insert(
                    issue.code.clone(),
                    ErrorMessages::One(issue.message.clone()),
                );
            }
        }
    }
    Some(FieldError::Detailed {
        kind: first.code.clone(),
        message: first.message.clone(),
        types,
    })
}

fn group_issues(issues: Vec<SchemaIssue>) -> BTreeMap<String, Vec<SchemaIssue>> {
    let mut grouped: BTreeMap<String, Vec<SchemaIssue>> = BTreeMap::new();
    for issue in issues {
        grouped.entry(issue.dotted_path()).or_default().push(issue);
    }
    grouped
}

fn in_scope(path: &str, scope: Option<&str>) -> bool {
    scope.is_none_or(|scope| path::is_within(path, scope))
}

/// Returns true when a validation keyed by `scope` also validates `other`.
fn covers(scope: &str, other: &str) -> bool {
    scope == FORM_SCOPE || path::is_within(other, scope)
}

fn scoped_issues(outcome: ParseResult, scope: Option<&str>) -> Vec<SchemaIssue> {
    match outcome {
        Ok(()) => Vec::new(),
        Err(issues) => issues
            .into_iter()
            .filter(|issue| in_scope(&issue.dotted_path(), scope))
            .collect(),
    }
}

//////////////////////////////////////////// ValidationEngine //////////////////////////////////////////

struct PendingError {
    token: u64,
    error: FieldError,
    timer: JoinHandle<()>,
}

/// Generation, request ids, timers, and in-flight bookkeeping of one session.
pub(crate) struct ValidationEngine {
    ctx: Weak<FormContext>,
    generation: u64,
    next_request: u64,
    latest_schema: HashMap<String, u64>,
    latest_custom: HashMap<String, u64>,
    pending: HashMap<String, PendingError>,
    debounces: HashMap<String, JoinHandle<()>>,
    validating: BTreeMap<String, usize>,
    custom_errors: HashSet<String>,
}

impl ValidationEngine {
    pub(crate) fn new(ctx: Weak<FormContext>) -> Self {
        ValidationEngine {
            ctx,
            generation: 0,
            next_request: 0,
            latest_schema: HashMap::new(),
            latest_custom: HashMap::new(),
            pending: HashMap::new(),
            debounces: HashMap::new(),
            validating: BTreeMap::new(),
            custom_errors: HashSet::new(),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    fn mint(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }

    /// Mints a request for `scope`, superseding every request of a scope it covers.
    fn begin_schema(&mut self, scope: &str) -> u64 {
        let request = self.mint();
        self.latest_schema.retain(|key, _| !covers(scope, key));
        self.latest_schema.insert(scope.to_string(), request);
        request
    }

    fn is_latest_schema(&self, scope: &str, request: u64) -> bool {
        self.latest_schema.get(scope) == Some(&request)
    }

    /// Narrower scopes under `scope` dispatched after `request`.
    fn newer_within(&self, scope: &str, request: u64) -> Vec<String> {
        self.latest_schema
            .iter()
            .filter(|(key, latest)| **latest > request && key.as_str() != scope)
            .filter(|(key, _)| covers(scope, key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn begin_custom(&mut self, path: &str) -> u64 {
        let request = self.mint();
        self.latest_custom.insert(path.to_string(), request);
        request
    }

    fn is_current_custom(&self, path: &str, request: u64, generation: u64) -> bool {
        self.generation == generation && self.latest_custom.get(path) == Some(&request)
    }

    fn begin_validating(&mut self, scope: &str) {
        *self.validating.entry(scope.to_string()).or_default() += 1;
    }

    fn end_validating(&mut self, scope: &str, generation: u64) {
        if generation != self.generation {
            return;
        }
        if let Some(count) = self.validating.get_mut(scope) {
            *count -= 1;
            if *count == 0 {
                self.validating.remove(scope);
            }
        }
    }

    /// Scopes with validation in flight.
    pub(crate) fn validating_fields(&self) -> BTreeSet<String> {
        self.validating.keys().cloned().collect()
    }

    pub(crate) fn is_validating(&self, path: &str) -> bool {
        self.validating.contains_key(path) || self.validating.contains_key(FORM_SCOPE)
    }

    /// Shows `error` at `path` now, or after `delay` unless something supersedes it.
    pub(crate) fn schedule_error(
        &mut self,
        fields: &mut FieldStateTracker,
        path: &str,
        error: FieldError,
        delay: Duration,
    ) {
        self.cancel_pending(path);
        self.custom_errors.remove(path);
        if delay.is_zero() {
            fields.set_error(path, error);
            return;
        }
        let token = self.mint();
        let ctx = self.ctx.clone();
        let key = path.to_string();
        trace!(path, ?delay, "arming delayed error");
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(ctx) = ctx.upgrade() {
                ctx.update(|state| {
                    let FormState { engine, fields, .. } = state;
                    engine.promote(fields, &key, token);
                });
            }
        });
        self.pending.insert(
            path.to_string(),
            PendingError {
                token,
                error,
                timer,
            },
        );
    }

    fn promote(&mut self, fields: &mut FieldStateTracker, path: &str, token: u64) {
        if self.pending.get(path).is_some_and(|pending| pending.token == token) {
            if let Some(pending) = self.pending.remove(path) {
                trace!(path, "delayed error shown");
                fields.set_error(path, pending.error);
            }
        }
    }

    fn cancel_pending(&mut self, path: &str) {
        if let Some(pending) = self.pending.remove(path) {
            pending.timer.abort();
        }
    }

    /// Discards pending errors at or beneath `scope`, or all of them.
    pub(crate) fn cancel_pending_within(&mut self, scope: Option<&str>) {
        let doomed: Vec<String> = self
            .pending
            .keys()
            .filter(|path| in_scope(path, scope))
            .cloned()
            .collect();
        for path in doomed {
            self.cancel_pending(&path);
        }
    }

    fn set_debounce(&mut self, path: &str, timer: JoinHandle<()>) {
        if let Some(previous) = self.debounces.insert(path.to_string(), timer) {
            previous.abort();
        }
    }

    fn cancel_debounce(&mut self, path: &str) {
        if let Some(timer) = self.debounces.remove(path) {
            timer.abort();
        }
    }

    fn mark_custom(&mut self, path: &str) {
        self.custom_errors.insert(path.to_string());
    }

    fn take_custom(&mut self, path: &str) -> bool {
        self.custom_errors.remove(path)
    }

    /// Drops everything the engine holds for `path`.
    pub(crate) fn forget_field(&mut self, path: &str) {
        self.cancel_pending(path);
        self.cancel_debounce(path);
        self.latest_schema.remove(path);
        self.latest_custom.remove(path);
        self.custom_errors.remove(path);
    }

    /// Forgets pending and custom-validator errors at or beneath `scope`, or all.
    pub(crate) fn forget_errors_within(&mut self, scope: Option<&str>) {
        self.cancel_pending_within(scope);
        self.custom_errors.retain(|path| !in_scope(path, scope));
    }

    /// Invalidates everything in flight and cancels every timer.
    pub(crate) fn reset(&mut self, keep_errors: bool) {
        self.generation += 1;
        debug!(generation = self.generation, "validation generation advanced");
        self.abort_timers();
        self.validating.clear();
        self.latest_schema.clear();
        self.latest_custom.clear();
        if !keep_errors {
            self.custom_errors.clear();
        }
    }

    fn abort_timers(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.timer.abort();
        }
        for (_, timer) in self.debounces.drain() {
            timer.abort();
        }
    }
}

impl Drop for ValidationEngine {
    fn drop(&mut self) {
        self.abort_timers();
    }
}

/// Writes a schema outcome into `state` and returns whether the scope is valid.
///
/// Paths under a scope in `newer` belong to a later validation and are left alone.
fn apply_outcome(
    state: &mut FormState,
    scope: Option<&str>,
    newer: &[String],
    outcome: ParseResult,
    immediate: bool,
) -> bool {
    let FormState {
        engine,
        fields,
        options,
        ..
    } = state;
    let grouped = group_issues(scoped_issues(outcome, scope));
    let valid = grouped.is_empty();
    let owned = |path: &str| {
        in_scope(path, scope) && !newer.iter().any(|other| path::is_within(path, other))
    };
    let stale: Vec<String> = fields
        .errors()
        .keys()
        .filter(|path| owned(path))
        .filter(|path| !grouped.contains_key(*path))
        .filter(|path| !engine.custom_errors.contains(*path))
        .cloned()
        .collect();
    for path in stale {
        fields.remove_error(&path);
    }
    let stale_pending: Vec<String> = engine
        .pending
        .keys()
        .filter(|path| owned(path) && !grouped.contains_key(*path))
        .cloned()
        .collect();
    for path in stale_pending {
        engine.cancel_pending(&path);
    }
    let delay = if immediate {
        Duration::ZERO
    } else {
        options.delay_error()
    };
    for (path, issues) in grouped.into_iter().filter(|(path, _)| owned(path)) {
        if let Some(error) = synthesize(&issues, options.criteria_mode) {
            engine.schedule_error(fields, &path, error, delay);
        }
    }
    valid
}

struct ValidatingGuard<'a> {
    ctx: &'a FormContext,
    scope: &'a str,
    generation: u64,
    armed: bool,
}

impl ValidatingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ValidatingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.ctx
                .update(|state| state.engine.end_validating(self.scope, self.generation));
        }
    }
}

/// Runs schema validation of `scope` (`None` is the whole form).
///
/// `immediate` bypasses the error delay, as submission does.
pub(crate) async fn validate_scope(
    ctx: &Arc<FormContext>,
    scope: Option<String>,
    immediate: bool,
) -> bool {
    let scope = scope.filter(|scope| !path::segments(scope).is_empty());
    let key = scope.clone().unwrap_or_else(|| FORM_SCOPE.to_string());
    let (generation, request, data) = ctx.update(|state| {
        state.engine.begin_validating(&key);
        let request = state.engine.begin_schema(&key);
        (state.engine.generation(), request, state.values.clone())
    });
    debug!(scope = %key, request, "schema validation dispatched");
    let mut guard = ValidatingGuard {
        ctx,
        scope: &key,
        generation,
        armed: true,
    };
    let outcome = ctx.schema.parse(data).await;
    guard.disarm();
    ctx.update(|state| {
        state.engine.end_validating(&key, generation);
        if state.engine.generation() != generation {
            debug!(scope = %key, request, "discarding validation from before reset");
            return true;
        }
        if !state.engine.is_latest_schema(&key, request) {
            debug!(scope = %key, request, "discarding superseded validation");
            return scoped_issues(outcome, scope.as_deref()).is_empty();
        }
        let newer = state.engine.newer_within(&key, request);
        apply_outcome(state, scope.as_deref(), &newer, outcome, immediate)
    })
}

///////////////////////////////////////////// Custom validators ////////////////////////////////////////

struct CustomJob {
    path: String,
    validator: CustomValidator,
    request: u64,
    generation: u64,
}

fn prepare_custom(state: &mut FormState, path: &str) -> Option<(CustomJob, Duration)> {
    let record = state.registry.get(path)?;
    if record.options.disabled {
        return None;
    }
    let validator = record.options.validator.clone()?;
    let debounce = Duration::from_millis(record.options.validate_debounce_ms);
    state.engine.cancel_debounce(path);
    let request = state.engine.begin_custom(path);
    Some((
        CustomJob {
            path: path.to_string(),
            validator,
            request,
            generation: state.engine.generation(),
        },
        debounce,
    ))
}

/// Fires the custom validator of `path`, after its debounce.
pub(crate) fn dispatch_custom(ctx: &Arc<FormContext>, path: &str) {
    ctx.update(|state| {
        let Some((job, debounce)) = prepare_custom(state, path) else {
            return;
        };
        let weak = Arc::downgrade(ctx);
        if debounce.is_zero() {
            tokio::spawn(async move {
                if let Some(ctx) = weak.upgrade() {
                    run_custom(&ctx, job).await;
                }
            });
            return;
        }
        trace!(path, ?debounce, "debouncing custom validator");
        let key = path.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(ctx) = weak.upgrade() else {
                return;
            };
            ctx.update(|state| {
                if state
                    .engine
                    .is_current_custom(&key, job.request, job.generation)
                {
                    state.engine.debounces.remove(&key);
                }
            });
            run_custom(&ctx, job).await;
        });
        state.engine.set_debounce(path, timer);
    });
}

/// Runs every enabled custom validator now and waits for all of them.
pub(crate) async fn run_all_custom(ctx: &Arc<FormContext>) {
    let jobs: Vec<CustomJob> = ctx.update(|state| {
        let paths: Vec<String> = state.registry.paths().cloned().collect();
        paths
            .iter()
            .filter_map(|path| prepare_custom(state, path).map(|(job, _)| job))
            .collect()
    });
    for job in jobs {
        run_custom(ctx, job).await;
    }
}

async fn run_custom(ctx: &Arc<FormContext>, job: CustomJob) {
    let value = ctx.update(|state| {
        if !state
            .engine
            .is_current_custom(&job.path, job.request, job.generation)
        {
            return None;
        }
        state.engine.begin_validating(&job.path);
        Some(path::get(&state.values, &job.path).cloned().unwrap_or_default())
    });
    let Some(value) = value else {
        debug!(path = %job.path, request = job.request, "custom validation superseded before start");
        return;
    };
    let mut guard = ValidatingGuard {
        ctx,
        scope: &job.path,
        generation: job.generation,
        armed: true,
    };
    let result = tokio::spawn((job.validator)(value)).await;
    guard.disarm();
    ctx.update(|state| {
        state.engine.end_validating(&job.path, job.generation);
        if !state
            .engine
            .is_current_custom(&job.path, job.request, job.generation)
        {
            debug!(path = %job.path, request = job.request, "dropping stale custom validation");
            return;
        }
        match result {
            Ok(Ok(())) => {
                if state.engine.take_custom(&job.path) {
                    state.fields.remove_error(&job.path);
                }
            }
            Ok(Err(message)) => {
                state.engine.cancel_pending(&job.path);
                state.fields.set_error(&job.path, FieldError::Simple(message));
                state.engine.mark_custom(&job.path);
            }
            Err(err) => warn!(path = %job.path, error = %err, "custom validator failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(path: &str, code: &str, message: &str) -> SchemaIssue {
        SchemaIssue::at(path, code, message)
    }

    #[test]
    fn first_error_always_collapses() {
        let issues = vec![
            issue("a", "too_small", "short"),
            issue("a", "invalid_string", "bad"),
        ];
        assert_eq!(
            synthesize(&issues, CriteriaMode::FirstError),
            Some(FieldError::simple("short"))
        );
        assert_eq!(synthesize(&[], CriteriaMode::All), None);
    }

    #[test]
    fn all_collects_recurring_codes() {
        let issues = vec![
            issue("a", "invalid_string", "needs a digit"),
            issue("a", "too_small", "short"),
            issue("a", "invalid_string", "needs a letter"),
        ];
        let error = synthesize(&issues, CriteriaMode::All).unwrap();
        assert_eq!(error.message(), "needs a digit");
        assert_eq!(error.kind(), Some("invalid_string"));
        let types = error.types().unwrap();
        assert_eq!(
            types["invalid_string"],
            ErrorMessages::Many(vec!["needs a digit".into(), "needs a letter".into()])
        );
        assert_eq!(types["too_small"], ErrorMessages::One("short".into()));
    }

    #[test]
    fn scoped_issues_filter_by_prefix() {
        let outcome = Err(vec![
            issue("items.0.name", "too_small", "x"),
            issue("itemsCount", "too_small", "y"),
            issue("email", "invalid_string", "z"),
        ]);
        let kept = scoped_issues(outcome, Some("items"));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].dotted_path(), "items.0.name");
        assert!(scoped_issues(Ok(()), None).is_empty());
    }

    #[test]
    fn grouping_keeps_issue_order() {
        let grouped = group_issues(vec![
            issue("b", "c1", "1"),
            issue("a", "c2", "2"),
            issue("b", "c3", "3"),
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["b"][1].message, "3");
    }

    #[test]
    fn validating_counts_nest() {
        let mut engine = ValidationEngine::new(Weak::new());
        engine.begin_validating("email");
        engine.begin_validating("email");
        engine.end_validating("email", 0);
        assert!(engine.is_validating("email"));
        engine.end_validating("email", 0);
        assert!(!engine.is_validating("email"));
    }

    #[test]
    fn reset_ignores_old_generation_bookkeeping() {
        let mut engine = ValidationEngine::new(Weak::new());
        engine.begin_validating(FORM_SCOPE);
        engine.reset(false);
        assert!(engine.validating_fields().is_empty());
        engine.begin_validating(FORM_SCOPE);
        engine.end_validating(FORM_SCOPE, 0);
        assert!(engine.is_validating("anything"));
    }

    #[test]
    fn request_ids_are_per_scope() {
        let mut engine = ValidationEngine::new(Weak::new());
        let first = engine.begin_schema("email");
        let other = engine.begin_schema("password");
        let second = engine.begin_schema("email");
        assert!(!engine.is_latest_schema("email", first));
        assert!(engine.is_latest_schema("email", second));
        assert!(engine.is_latest_schema("password", other));
    }

    #[test]
    fn wider_requests_supersede_covered_scopes() {
        let mut engine = ValidationEngine::new(Weak::new());
        let email = engine.begin_schema("email");
        let street = engine.begin_schema("address.street");
        let address = engine.begin_schema("address");
        assert!(engine.is_latest_schema("email", email));
        assert!(!engine.is_latest_schema("address.street", street));
        assert!(engine.is_latest_schema("address", address));

        let form = engine.begin_schema(FORM_SCOPE);
        assert!(!engine.is_latest_schema("email", email));
        assert!(!engine.is_latest_schema("address", address));

        let later = engine.begin_schema("email");
        assert!(engine.is_latest_schema(FORM_SCOPE, form));
        assert_eq!(engine.newer_within(FORM_SCOPE, form), vec!["email".to_string()]);
        assert!(engine.newer_within("email", later).is_empty());
    }
}

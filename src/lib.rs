//! # Formwright: Reactive Form State
//!
//! Formwright tracks the state of a data-entry form: its values, which fields are
//! dirty or touched, which are invalid and why, and which validations are still in
//! flight.  Inputs live outside the crate.  They are reached through small adapters
//! and report their events back to the session.
//!
//! This crate provides:
//!
//! - **Path Store**: nested values addressed by dotted paths such as
//!   `"user.addresses.0.city"`, with intermediate maps and sequences created on write
//! - **Field State**: per-path dirty, touched, and error bookkeeping
//! - **Validation**: a schema collaborator parses the whole tree asynchronously;
//!   results are scoped, delayed, and discarded when stale
//! - **Field Registry**: adapters for uncontrolled inputs, bindings for controlled
//!   ones, and custom per-field validators with debounce
//! - **Field Arrays**: sequences with stable per-item keys across reorderings
//! - **Observable Snapshots**: every change publishes a versioned [`FormSnapshot`]
//!
//! ## Core Concepts
//!
//! ### Generations and Request Ids
//! Every `reset` advances the session's generation.  Every validation dispatch mints
//! a request id.  A result is written only if its generation is current and its
//! request id is the latest for its scope, so out-of-order completions never regress
//! what the user sees.
//!
//! ### Errors
//! A [`FieldError`] is either a plain message or a detailed record carrying every
//! issue code.  Which one a path gets depends on the [`CriteriaMode`].  Errors
//! installed from outside through [`FormSession::set_external_errors`] are shown
//! over internally computed ones.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ FormSession (orchestration, submission) │
//! ├──────────────────┬──────────────────────┤
//! │ FieldRegistry    │ FieldArray           │
//! ├──────────────────┴──────────────────────┤
//! │ ValidationEngine (generations, timers)  │
//! ├─────────────────────────────────────────┤
//! │ FieldStateTracker │ Path Store          │
//! ├─────────────────────────────────────────┤
//! │ Snapshot publisher (tokio watch)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Usage Examples
//!
//! ### Registering a Field
//!
//! ```rust
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! use std::sync::Arc;
//!
//! use formwright::{
//!     FormOptions, FormSession, JsonSchemaValidator, MemoryAdapter, RegisterOptions,
//!     ValidationMode,
//! };
//! use serde_json::json;
//!
//! let schema = JsonSchemaValidator::new(json!({
//!     "type": "object",
//!     "properties": {"email": {"type": "string", "format": "email"}}
//! }))
//! .unwrap();
//! let session = FormSession::new(
//!     schema,
//!     FormOptions::default()
//!         .with_mode(ValidationMode::OnChange)
//!         .with_default_values(json!({"email": ""})),
//! );
//!
//! let email = session.register("email", RegisterOptions::default()).unwrap();
//! let input = Arc::new(MemoryAdapter::text(""));
//! email.bind(Some(input.clone()));
//!
//! input.type_text("not an email");
//! email.on_input().await;
//! assert_eq!(session.get_errors()["email"].message(), "Invalid email");
//!
//! input.type_text("ada@example.com");
//! email.on_input().await;
//! assert!(session.get_errors().is_empty());
//! assert!(session.get_field_state("email").is_dirty);
//! # });
//! # }
//! ```
//!
//! ### Field Arrays
//!
//! ```rust
//! use formwright::{FieldArrayRules, FnSchema, FormOptions, FormSession};
//! use serde_json::json;
//!
//! let session = FormSession::new(
//!     FnSchema::new(|_| async { Ok(()) }),
//!     FormOptions::default().with_default_values(json!({"items": []})),
//! );
//! let items = session.fields("items", FieldArrayRules::default());
//! items.append(json!({"name": "a"}));
//! items.append(json!({"name": "b"}));
//! let before: Vec<_> = items.items().iter().map(|item| item.key()).collect();
//!
//! items.swap(0, 1);
//! let after = items.items();
//! assert_eq!(after[0].key(), before[1]);
//! assert_eq!(after[0].value(), &json!({"name": "b"}));
//! ```

#![deny(missing_docs)]

mod adapter;
mod context;
mod error;
mod field_array;
mod field_state;
mod item_key;
mod json_schema;
mod mode;
mod observable;
mod options;
mod registry;
mod schema;
mod session;
mod validation;

/// Dotted-path access to nested values.
pub mod path;

pub use adapter::{AdapterKind, FieldAdapter, MemoryAdapter, RawValue};
pub use context::{DefaultValuesErrorHook, DefaultValuesFuture, DefaultValuesLoader};
pub use error::{ErrorMessages, FieldError, FormError};
pub use field_array::{Batch, FieldArray, FieldArrayItem};
pub use field_state::FieldStateTracker;
pub use item_key::{ItemKey, ItemKeyParseError};
pub use json_schema::{
    CODE_INVALID_ENUM, CODE_INVALID_SCHEMA, CODE_INVALID_STRING, CODE_INVALID_TYPE,
    CODE_INVALID_UNION, CODE_REQUIRED, CODE_TOO_BIG, CODE_TOO_SMALL, JsonSchemaValidator,
};
pub use mode::{CriteriaMode, FieldEvent, ReValidateMode, ValidationMode, should_validate};
pub use observable::{FieldWatcher, FormSnapshot};
pub use options::{
    CustomValidator, FieldArrayFocus, FieldArrayRules, FocusOptions, FormOptions,
    RegisterOptions, ResetFieldOptions, ResetOptions, SetErrorOptions, SetValueOptions,
    UnregisterOptions, ValidatorFuture, custom_validator,
};
pub use registry::{ControlledBinding, FieldRegistration};
pub use schema::{FnSchema, ParseFuture, ParseResult, Schema, SchemaIssue};
pub use session::{FieldState, FormSession, FormSessionBuilder, SubmitOutcome};
pub use validation::{FORM_SCOPE, synthesize};

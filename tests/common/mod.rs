#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use formwright::{FnSchema, JsonSchemaValidator, Schema, SchemaIssue};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

/// Routes crate logs to the test output; set `RUST_LOG=formwright=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A schema whose n-th parse sleeps `steps[n].0` milliseconds and then reports
/// `email` invalid unless `steps[n].1` is true.  The last step repeats.
pub fn scripted(steps: Vec<(u64, bool)>) -> (impl Schema + 'static, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let schema = FnSchema::new(move |_data: Value| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        let (delay, valid) = steps[call.min(steps.len() - 1)];
        async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if valid {
                Ok(())
            } else {
                Err(vec![SchemaIssue::at(
                    "email",
                    "invalid_string",
                    "Invalid email",
                )])
            }
        }
    });
    (schema, calls)
}

/// A schema that accepts everything.
pub fn accept_all() -> impl Schema + 'static {
    FnSchema::new(|_data: Value| async { Ok(()) })
}

/// Email must be an email, password at least eight characters.
pub fn sign_up_schema() -> JsonSchemaValidator {
    JsonSchemaValidator::new(json!({
        "type": "object",
        "properties": {
            "email": {"type": "string", "format": "email"},
            "password": {"type": "string", "minLength": 8}
        },
        "required": ["email", "password"]
    }))
    .unwrap()
}

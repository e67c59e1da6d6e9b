use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use formwright::{
    CriteriaMode, ErrorMessages, FieldError, FormError, FormOptions, FormSession,
    JsonSchemaValidator, MemoryAdapter, RegisterOptions, ResetFieldOptions, ResetOptions,
    SetErrorOptions, SetValueOptions, SubmitOutcome, ValidationMode, custom_validator,
};

mod common;

fn sign_up(options: FormOptions) -> FormSession {
    common::init_tracing();
    FormSession::new(
        common::sign_up_schema(),
        options.with_default_values(json!({"email": "", "password": ""})),
    )
}

#[tokio::test]
async fn sign_up_scenario() {
    let session = sign_up(FormOptions::default());
    assert!(!session.validate(None).await);
    let errors = session.get_errors();
    assert_eq!(errors["email"], FieldError::simple("Invalid email"));
    assert_eq!(
        errors["password"],
        FieldError::simple("String must contain at least 8 character(s)")
    );

    session.set_value("email", json!("a@b.com"), SetValueOptions::default());
    session.set_value("password", json!("longenough1"), SetValueOptions::default());
    assert!(session.validate(None).await);
    assert!(session.get_errors().is_empty());
    assert!(session.snapshot().is_valid);
}

#[tokio::test]
async fn scoped_validation_ignores_other_fields() {
    let session = sign_up(FormOptions::default());
    session.set_value("email", json!("a@b.com"), SetValueOptions::default());
    assert!(session.validate(Some("email")).await);
    assert!(session.get_errors().is_empty());
    assert!(!session.validate(Some("password")).await);
    assert!(session.has_errors(Some("password")));
    assert!(!session.has_errors(Some("email")));
}

#[tokio::test]
async fn trigger_requires_every_path_to_pass() {
    let session = sign_up(FormOptions::default());
    session.set_value("email", json!("a@b.com"), SetValueOptions::default());
    assert!(!session.trigger(&["email", "password"]).await);
    assert!(session.trigger(&["email"]).await);
    assert!(!session.trigger(&[]).await);
}

#[test]
fn unaddressable_indices_leave_values_alone() {
    let session = sign_up(FormOptions::default());
    session.set_value("items.18446744073709551615", json!(1), SetValueOptions::default());
    session.set_value("items.4000000000.name", json!("x"), SetValueOptions::default());
    assert_eq!(session.get_values(), json!({"email": "", "password": ""}));

    session.set_value("items.1", json!("b"), SetValueOptions::default());
    assert_eq!(session.get_value("items"), json!([null, "b"]));
}

#[tokio::test(start_paused = true)]
async fn later_dispatch_wins_when_it_finishes_first() {
    common::init_tracing();
    let (schema, calls) = common::scripted(vec![(100, false), (10, true)]);
    let session = FormSession::new(schema, FormOptions::default());
    let (first, second) = tokio::join!(
        session.validate(Some("email")),
        session.validate(Some("email"))
    );
    assert!(!first);
    assert!(second);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(session.get_errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn later_dispatch_wins_when_it_finishes_last() {
    let (schema, _) = common::scripted(vec![(10, true), (100, false)]);
    let session = FormSession::new(schema, FormOptions::default());
    let (first, second) = tokio::join!(
        session.validate(Some("email")),
        session.validate(Some("email"))
    );
    assert!(first);
    assert!(!second);
    assert_eq!(session.get_errors()["email"], FieldError::simple("Invalid email"));
}

#[tokio::test(start_paused = true)]
async fn whole_form_validation_supersedes_an_earlier_scoped_one() {
    let (schema, calls) = common::scripted(vec![(100, false), (10, true)]);
    let session = FormSession::new(schema, FormOptions::default());
    let (scoped, whole) = tokio::join!(session.validate(Some("email")), session.validate(None));
    assert!(!scoped);
    assert!(whole);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(session.get_errors().is_empty());
    assert!(!session.snapshot().is_validating);
}

#[tokio::test(start_paused = true)]
async fn slow_whole_form_validation_spares_a_newer_scoped_result() {
    let (schema, _) = common::scripted(vec![(100, false), (10, true)]);
    let session = FormSession::new(schema, FormOptions::default());
    let (whole, scoped) = tokio::join!(session.validate(None), session.validate(Some("email")));
    assert!(!whole);
    assert!(scoped);
    assert!(session.get_errors().is_empty());
}

#[tokio::test]
async fn empty_scope_validates_the_whole_form() {
    let session = sign_up(FormOptions::default());
    assert!(!session.validate(Some("")).await);
    let errors = session.get_errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors["email"], FieldError::simple("Invalid email"));

    session.set_value("email", json!("a@b.com"), SetValueOptions::default());
    session.set_value("password", json!("longenough1"), SetValueOptions::default());
    assert!(session.validate(Some(".")).await);
    assert!(session.get_errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reset_discards_validation_in_flight() {
    let (schema, _) = common::scripted(vec![(50, false)]);
    let session = FormSession::new(schema, FormOptions::default());
    let (valid, ()) = tokio::join!(session.validate(None), async {
        session.reset(None, ResetOptions::default());
    });
    assert!(valid);
    assert!(session.get_errors().is_empty());
    let snapshot = session.snapshot();
    assert!(!snapshot.is_validating);
    assert!(snapshot.validating_fields.is_empty());
}

#[tokio::test(start_paused = true)]
async fn validating_flag_follows_the_parse() {
    let (schema, _) = common::scripted(vec![(50, true)]);
    let session = FormSession::new(schema, FormOptions::default());
    let mut snapshots = session.subscribe();
    let observer = async {
        snapshots.changed().await.unwrap();
        let snapshot = snapshots.borrow_and_update().clone();
        assert!(snapshot.is_validating);
        assert!(snapshot.validating_fields.contains("_form"));
        assert!(session.get_field_state("email").is_validating);
    };
    let (valid, ()) = tokio::join!(session.validate(None), observer);
    assert!(valid);
    assert!(!session.snapshot().is_validating);
}

#[tokio::test(start_paused = true)]
async fn delayed_error_waits_for_the_timer() {
    let session = sign_up(FormOptions::default().with_delay_error(Duration::from_millis(500)));
    assert!(!session.validate(Some("email")).await);
    assert!(session.get_errors().is_empty());
    tokio::time::sleep(Duration::from_millis(499)).await;
    assert!(session.get_errors().is_empty());
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(
        session.get_errors()["email"],
        FieldError::simple("Invalid email")
    );
}

#[tokio::test(start_paused = true)]
async fn delayed_error_is_never_shown_when_fixed_in_time() {
    let session = sign_up(
        FormOptions::default()
            .with_mode(ValidationMode::OnChange)
            .with_delay_error(Duration::from_millis(500)),
    );
    let email = session.register("email", RegisterOptions::default()).unwrap();
    let input = Arc::new(MemoryAdapter::text(""));
    email.bind(Some(input.clone()));

    input.type_text("ada@");
    email.on_input().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!session.has_errors(Some("email")));
    input.type_text("ada@example.com");
    email.on_input().await;
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(!session.has_errors(Some("email")));
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_pending_errors() {
    let session = sign_up(FormOptions::default().with_delay_error(Duration::from_millis(100)));
    assert!(!session.validate(None).await);
    session.reset(None, ResetOptions::default());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(session.get_errors().is_empty());
}

#[tokio::test]
async fn criteria_mode_shapes_errors() {
    let schema = json!({
        "type": "object",
        "properties": {
            "password": {"type": "string", "minLength": 8, "pattern": "[0-9]"}
        }
    });
    let first = FormSession::new(
        JsonSchemaValidator::new(schema.clone()).unwrap(),
        FormOptions::default().with_default_values(json!({"password": "abc"})),
    );
    assert!(!first.validate(None).await);
    assert_eq!(
        first.get_errors()["password"],
        FieldError::simple("String must contain at least 8 character(s)")
    );

    let all = FormSession::new(
        JsonSchemaValidator::new(schema).unwrap(),
        FormOptions::default()
            .with_criteria_mode(CriteriaMode::All)
            .with_default_values(json!({"password": "abc"})),
    );
    assert!(!all.validate(None).await);
    let error = all.get_errors()["password"].clone();
    assert_eq!(error.kind(), Some("too_small"));
    assert_eq!(
        error.types().unwrap()["invalid_string"],
        ErrorMessages::One("Invalid".to_string())
    );

    all.set_value("password", json!("abcdefgh"), SetValueOptions::default());
    assert!(!all.validate(None).await);
    assert_eq!(all.get_errors()["password"], FieldError::simple("Invalid"));
}

#[tokio::test]
async fn dirty_and_touched_are_per_field() {
    let session = sign_up(FormOptions::default());
    let email = session.register("email", RegisterOptions::default()).unwrap();
    let password = session.register("password", RegisterOptions::default()).unwrap();
    let input = Arc::new(MemoryAdapter::text(""));
    email.bind(Some(input.clone()));
    password.bind(Some(Arc::new(MemoryAdapter::text(""))));

    input.type_text("a");
    email.on_input().await;
    email.on_blur().await;
    assert!(session.get_field_state("email").is_dirty);
    assert!(session.get_field_state("email").is_touched);
    assert!(!session.get_field_state("password").is_dirty);
    assert!(!session.get_field_state("password").is_touched);

    session.reset(
        None,
        ResetOptions {
            keep_dirty: true,
            ..ResetOptions::default()
        },
    );
    assert!(session.get_field_state("email").is_dirty);
    assert!(!session.get_field_state("email").is_touched);
    assert_eq!(input.text_value().as_deref(), Some(""));

    session.reset(None, ResetOptions::default());
    assert!(session.snapshot().dirty_fields.is_empty());
}

#[tokio::test]
async fn reset_with_values_replaces_defaults() {
    let session = sign_up(FormOptions::default());
    session.reset(
        Some(json!({"email": "x@y.com", "password": ""})),
        ResetOptions::default(),
    );
    session.set_value("email", json!("z@y.com"), SetValueOptions::default());
    session.reset(None, ResetOptions::default());
    assert_eq!(session.get_value("email"), json!("x@y.com"));

    session.reset(
        Some(json!({"email": "kept@y.com"})),
        ResetOptions {
            keep_default_values: true,
            ..ResetOptions::default()
        },
    );
    assert_eq!(session.get_value("email"), json!("kept@y.com"));
    session.reset(None, ResetOptions::default());
    assert_eq!(session.get_value("email"), json!("x@y.com"));
}

#[tokio::test]
async fn set_error_and_clear_errors() {
    let session = sign_up(FormOptions::default());
    let email = session.register("email", RegisterOptions::default()).unwrap();
    let input = Arc::new(MemoryAdapter::text(""));
    email.bind(Some(input.clone()));

    session.set_error(
        "email",
        FieldError::typed("server", "Already registered"),
        SetErrorOptions { should_focus: true },
    );
    assert_eq!(input.focus_count(), 1);
    assert_eq!(session.get_errors()["email"].kind(), Some("server"));

    session.set_errors(BTreeMap::from([
        ("address.city".to_string(), FieldError::simple("Unknown city")),
        ("address.zip".to_string(), FieldError::simple("Bad zip")),
    ]));
    session.clear_errors(Some(&["address"]));
    assert_eq!(session.get_errors().len(), 1);
    session.clear_errors(None);
    assert!(!session.has_errors(None));
}

#[tokio::test]
async fn submit_valid_excludes_disabled_fields() {
    let session = FormSession::new(
        common::accept_all(),
        FormOptions::default().with_default_values(json!({"name": "Ada", "secret": "x"})),
    );
    session
        .register("secret", RegisterOptions::default().disabled(true))
        .unwrap();
    let received = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&received);
    let outcome = session
        .handle_submit(|data| async move {
            *sink.lock().unwrap() = Some(data);
        })
        .await;
    assert_eq!(outcome, SubmitOutcome::Valid);
    assert_eq!(*received.lock().unwrap(), Some(json!({"name": "Ada"})));
    let snapshot = session.snapshot();
    assert!(snapshot.is_submitted);
    assert!(snapshot.is_submit_successful);
    assert!(!snapshot.is_submitting);
    assert_eq!(snapshot.submit_count, 1);
}

#[tokio::test(start_paused = true)]
async fn submit_invalid_focuses_first_registered_error() {
    let session = sign_up(FormOptions::default().with_delay_error(Duration::from_millis(500)));
    let password = session.register("password", RegisterOptions::default()).unwrap();
    let email = session.register("email", RegisterOptions::default()).unwrap();
    let password_input = Arc::new(MemoryAdapter::text(""));
    let email_input = Arc::new(MemoryAdapter::text(""));
    password.bind(Some(password_input.clone()));
    email.bind(Some(email_input.clone()));

    let seen = Arc::new(Mutex::new(BTreeMap::new()));
    let sink = Arc::clone(&seen);
    let valid_called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&valid_called);
    let outcome = session
        .handle_submit_with(
            |_| async move { flag.store(true, Ordering::SeqCst) },
            |errors| async move {
                *sink.lock().unwrap() = errors;
            },
        )
        .await;
    assert_eq!(outcome, SubmitOutcome::Invalid);
    assert!(!valid_called.load(Ordering::SeqCst));
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(password_input.focus_count(), 1);
    assert_eq!(email_input.focus_count(), 0);
    let snapshot = session.snapshot();
    assert!(snapshot.is_submitted);
    assert!(!snapshot.is_submit_successful);
}

#[tokio::test]
async fn submit_reads_uncontrolled_inputs() {
    let session = sign_up(FormOptions::default());
    let email = session.register("email", RegisterOptions::default()).unwrap();
    let password = session.register("password", RegisterOptions::default()).unwrap();
    let email_input = Arc::new(MemoryAdapter::text(""));
    let password_input = Arc::new(MemoryAdapter::text(""));
    email.bind(Some(email_input.clone()));
    password.bind(Some(password_input.clone()));
    email_input.type_text("a@b.com");
    password_input.type_text("longenough1");

    let outcome = session.handle_submit(|_| async {}).await;
    assert_eq!(outcome, SubmitOutcome::Valid);
    assert_eq!(
        session.get_values(),
        json!({"email": "a@b.com", "password": "longenough1"})
    );
}

#[tokio::test(start_paused = true)]
async fn double_submit_is_ignored() {
    let schema = JsonSchemaValidator::new(json!({"type": "object"}))
        .unwrap()
        .with_latency(Duration::from_millis(50));
    let session = FormSession::new(schema, FormOptions::default());
    let (first, second) = tokio::join!(
        session.handle_submit(|_| async {}),
        session.handle_submit(|_| async {})
    );
    assert_eq!(first, SubmitOutcome::Valid);
    assert_eq!(second, SubmitOutcome::Ignored);
    assert_eq!(session.snapshot().submit_count, 1);
}

#[tokio::test]
async fn submit_runs_custom_validators() {
    let session = FormSession::new(
        common::accept_all(),
        FormOptions::default().with_default_values(json!({"username": "admin"})),
    );
    session
        .register(
            "username",
            RegisterOptions::default().validator(custom_validator(|value| async move {
                if value == json!("admin") {
                    Err("That name is taken".to_string())
                } else {
                    Ok(())
                }
            })),
        )
        .unwrap();
    assert_eq!(
        session.handle_submit(|_| async {}).await,
        SubmitOutcome::Invalid
    );
    assert_eq!(
        session.get_errors()["username"],
        FieldError::simple("That name is taken")
    );
    assert!(session.validate(None).await);
    assert!(session.has_errors(Some("username")));

    session.set_value("username", json!("ada"), SetValueOptions::default());
    assert_eq!(
        session.handle_submit(|_| async {}).await,
        SubmitOutcome::Valid
    );
    assert_eq!(session.snapshot().submit_count, 2);
}

#[tokio::test]
async fn loader_supplies_defaults() {
    let session = FormSession::builder(common::accept_all())
        .default_values_loader(|| async { Ok(json!({"name": "Loaded"})) })
        .build();
    assert!(session.snapshot().is_loading);
    let name = session.register("name", RegisterOptions::default()).unwrap();
    let input = Arc::new(MemoryAdapter::text(""));
    name.bind(Some(input.clone()));

    session.load_defaults().await.unwrap();
    let snapshot = session.snapshot();
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.values, json!({"name": "Loaded"}));
    assert_eq!(input.text_value().as_deref(), Some("Loaded"));

    session.set_value("name", json!("Changed"), SetValueOptions::default());
    session.reset(None, ResetOptions::default());
    assert_eq!(session.get_value("name"), json!("Loaded"));
}

#[tokio::test]
async fn loader_failure_is_recorded() {
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let session = FormSession::builder(common::accept_all())
        .default_values_loader(|| async { Err::<Value, _>("backend down".to_string()) })
        .on_default_values_error(move |err| {
            assert!(matches!(err, FormError::DefaultValues(_)));
            flag.store(true, Ordering::SeqCst);
        })
        .build();
    let result = session.load_defaults().await;
    assert!(matches!(result, Err(FormError::DefaultValues(ref message)) if message == "backend down"));
    assert!(called.load(Ordering::SeqCst));
    let snapshot = session.snapshot();
    assert!(!snapshot.is_loading);
    assert!(
        snapshot
            .default_values_error
            .is_some_and(|message| message.contains("backend down"))
    );
}

#[tokio::test]
async fn load_without_loader_is_an_error() {
    let session = FormSession::new(common::accept_all(), FormOptions::default());
    assert!(matches!(
        session.load_defaults().await,
        Err(FormError::NoLoader)
    ));
}

#[tokio::test]
async fn external_values_and_errors() {
    let options = FormOptions::from_json(
        r#"{"values": {"email": "server@x.com"}, "errors": {"email": "Taken"}}"#,
    )
    .unwrap();
    let session = sign_up(options);
    assert_eq!(session.get_value("email"), json!("server@x.com"));
    assert_eq!(session.get_errors()["email"], FieldError::simple("Taken"));

    assert!(session.validate(Some("email")).await);
    assert_eq!(session.get_errors()["email"], FieldError::simple("Taken"));

    session.set_external_values(json!({"email": "other@x.com", "password": ""}));
    assert_eq!(session.get_value("email"), json!("other@x.com"));
    session.set_external_errors(BTreeMap::new());
    assert!(!session.has_errors(Some("email")));
}

#[tokio::test]
async fn watchers_see_value_changes() {
    let session = sign_up(FormOptions::default());
    let mut all = session.watch_all();
    let mut email = session.watch("email");
    session.set_value("password", json!("secret"), SetValueOptions::default());
    assert_eq!(
        all.changed().await,
        Some(json!({"email": "", "password": "secret"}))
    );
    session.set_value("email", json!("a@b.com"), SetValueOptions::default());
    assert_eq!(email.changed().await, Some(json!("a@b.com")));
    assert_eq!(email.path(), Some("email"));
}

#[tokio::test]
async fn dirty_tracks_the_default_and_reset_field_restores_it() {
    let session = sign_up(FormOptions::default());
    let dirty = SetValueOptions {
        should_dirty: true,
        ..SetValueOptions::default()
    };
    session.set_value("email", json!("a@b.com"), dirty);
    assert!(session.get_field_state("email").is_dirty);
    session.set_value("email", json!(""), dirty);
    assert!(!session.get_field_state("email").is_dirty);

    session.set_value("email", json!("a@b.com"), SetValueOptions::all());
    session.set_error("email", "Taken", SetErrorOptions::default());
    session.reset_field("email", ResetFieldOptions::default());
    assert_eq!(session.get_value("email"), json!(""));
    let state = session.get_field_state("email");
    assert!(!state.is_dirty);
    assert!(!state.is_touched);
    assert!(!state.invalid);

    session.set_value("password", json!("changed"), dirty);
    session.reset_field(
        "password",
        ResetFieldOptions {
            keep_dirty: true,
            default_value: Some(json!("fresh-default")),
            ..ResetFieldOptions::default()
        },
    );
    assert_eq!(
        session.get_values_at(&["email", "password", "missing"]),
        vec![json!(""), json!("fresh-default"), Value::Null]
    );
    assert!(session.get_field_state("password").is_dirty);
    session.reset(None, ResetOptions::default());
    assert_eq!(session.get_value("password"), json!("fresh-default"));
}

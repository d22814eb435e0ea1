use super::*;
use crate::form::{
    FieldErrors, FieldKey, FieldRule, FieldRules, FieldValue, ValidationSchema, Values,
};
use crate::settle::BoxError;
use futures::FutureExt;
use futures::channel::oneshot;
use futures::executor::block_on;
use futures::future::{Ready, join};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn two_steps() -> WizardBuilder {
    WizardController::<()>::builder()
        .step(WizardStep::new("warehouse").field("warehouse"))
        .step(WizardStep::new("file").field("file"))
}

fn upload_wizard(policy: DownstreamPolicy) -> WizardController {
    WizardController::<()>::builder()
        .step(WizardStep::new("warehouse").field("warehouse"))
        .step(WizardStep::new("file").fields(["file", "sheet"]))
        .step(WizardStep::new("confirm").field("confirmed"))
        .initial_values(Values::new().with("confirmed", false))
        .options(WizardOptions { downstream: policy })
        .build()
        .expect("wizard has steps")
}

#[test]
fn wizard_without_steps_is_rejected() {
    let result = WizardController::<()>::builder().build();
    assert!(matches!(result, Err(WizardError::NoSteps)));
}

#[test]
fn gate_rejection_keeps_step_and_returns_to_idle() {
    let wizard = WizardController::<()>::builder()
        .step(
            WizardStep::new("warehouse")
                .field("warehouse")
                .on_next(|_collected| async { Ok::<_, BoxError>(false) }),
        )
        .step(WizardStep::new("file"))
        .initial_values(Values::new().with("warehouse", "WH-1"))
        .build()
        .expect("wizard has steps");
    let before = wizard.collected().expect("collected");

    let outcome = block_on(wizard.advance()).expect("advance resolves");

    assert_eq!(outcome, StepOutcome::GateRejected);
    assert_eq!(wizard.step_index().expect("index"), 0);
    assert_eq!(wizard.status().expect("status"), StepStatus::Idle);
    assert_eq!(wizard.collected().expect("collected"), before);
}

#[test]
fn advancing_scopes_errors_to_the_new_step() {
    let gate_calls = Arc::new(AtomicUsize::new(0));
    let wizard = {
        let gate_calls = gate_calls.clone();
        WizardController::<()>::builder()
            .step(WizardStep::new("warehouse").on_next(move |collected: Values| {
                gate_calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, BoxError>(collected.contains_key("warehouse")) }
            }))
            .step(WizardStep::new("file"))
            .schema(ValidationSchema::new().step(
                1,
                FieldRules::new().rule("file", FieldRule::required()),
            ))
            .initial_values(Values::new().with("warehouse", "WH-1"))
            .build()
            .expect("wizard has steps")
    };

    let outcome = block_on(wizard.advance()).expect("advance resolves");

    assert_eq!(outcome, StepOutcome::Advanced { from: 0, to: 1 });
    assert_eq!(gate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(wizard.step_index().expect("index"), 1);
    assert!(wizard.step_errors().expect("errors").is_empty());
    assert_eq!(wizard.status().expect("status"), StepStatus::Idle);
}

#[test]
fn retreat_keeps_values_entered_on_later_steps() {
    let wizard = two_steps().build().expect("wizard has steps");
    wizard.update_field("warehouse", "WH-1").expect("update");
    block_on(wizard.advance()).expect("advance resolves");
    wizard.update_field("file", "stock.csv").expect("update");

    assert!(wizard.retreat().expect("retreat"));

    assert_eq!(wizard.step_index().expect("index"), 0);
    let collected = wizard.collected().expect("collected");
    assert_eq!(collected.value("file"), &FieldValue::from("stock.csv"));
    assert_eq!(collected.value("warehouse"), &FieldValue::from("WH-1"));
}

#[test]
fn step_index_stays_within_bounds() {
    let wizard = two_steps().build().expect("wizard has steps");

    assert!(!wizard.retreat().expect("retreat at first step"));
    assert_eq!(wizard.step_index().expect("index"), 0);

    block_on(wizard.advance()).expect("first advance");
    let outcome = block_on(wizard.advance()).expect("second advance");
    assert_eq!(outcome, StepOutcome::Completed);
    assert_eq!(wizard.step_index().expect("index"), 1);
    assert_eq!(
        block_on(wizard.advance()).expect("advance after completion"),
        StepOutcome::Completed
    );
    assert_eq!(wizard.step_index().expect("index"), 1);
    assert!(!wizard.retreat().expect("retreat after completion"));
}

#[test]
fn validation_blocks_with_exactly_the_failing_fields() {
    let gate_calls = Arc::new(AtomicUsize::new(0));
    let wizard = {
        let gate_calls = gate_calls.clone();
        WizardController::<()>::builder()
            .step(WizardStep::new("details").on_next(move |_collected| {
                gate_calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BoxError>(true) }
            }))
            .step(WizardStep::new("review"))
            .schema(
                ValidationSchema::new().step(
                    0,
                    FieldRules::new()
                        .rule("name", FieldRule::required().message("Name is required"))
                        .rule("email", FieldRule::required())
                        .rule("code", FieldRule::required()),
                ),
            )
            .initial_values(Values::new().with("code", "D-7"))
            .build()
            .expect("wizard has steps")
    };

    let outcome = block_on(wizard.advance()).expect("advance resolves");

    assert_eq!(outcome, StepOutcome::Invalid);
    assert_eq!(gate_calls.load(Ordering::SeqCst), 0);
    let errors = wizard.step_errors().expect("errors");
    assert_eq!(
        errors.keys().copied().collect::<Vec<_>>(),
        vec![FieldKey::new("email"), FieldKey::new("name")]
    );
    assert_eq!(wizard.status().expect("status"), StepStatus::Blocked);

    wizard.update_field("name", "Depot").expect("update name");
    assert_eq!(wizard.step_errors().expect("errors").len(), 1);
    assert_eq!(wizard.status().expect("status"), StepStatus::Blocked);
    wizard
        .update_field("email", "ops@depot.example")
        .expect("update email");
    assert_eq!(wizard.status().expect("status"), StepStatus::Idle);

    let outcome = block_on(wizard.advance()).expect("advance resolves");
    assert_eq!(outcome, StepOutcome::Advanced { from: 0, to: 1 });
}

#[test]
fn step_validator_runs_after_schema_rules_pass() {
    let wizard = WizardController::<()>::builder()
        .step(WizardStep::new("dates").validate(|collected| {
            let mut errors = FieldErrors::new();
            if collected.value("start") == collected.value("end") {
                errors.insert(FieldKey::new("end"), "End must differ from start".to_string());
            }
            errors
        }))
        .step(WizardStep::new("review"))
        .schema(
            ValidationSchema::new()
                .step(0, FieldRules::new().rule("start", FieldRule::required())),
        )
        .build()
        .expect("wizard has steps");

    block_on(wizard.advance()).expect("advance resolves");
    assert_eq!(
        wizard
            .step_errors()
            .expect("errors")
            .keys()
            .copied()
            .collect::<Vec<_>>(),
        vec![FieldKey::new("start")]
    );

    wizard.update_field("start", "2026-01-01").expect("update");
    wizard.update_field("end", "2026-01-01").expect("update");
    assert_eq!(
        block_on(wizard.advance()).expect("advance resolves"),
        StepOutcome::Invalid
    );
    assert_eq!(
        wizard
            .step_errors()
            .expect("errors")
            .get(&FieldKey::new("end"))
            .map(String::as_str),
        Some("End must differ from start")
    );
}

#[test]
fn gate_failure_is_reported_and_blocks_the_step() {
    let wizard = WizardController::<()>::builder()
        .step(
            WizardStep::new("connection")
                .on_next(|_collected| async { Err::<bool, BoxError>("sftp host unreachable".into()) }),
        )
        .step(WizardStep::new("review"))
        .build()
        .expect("wizard has steps");

    let outcome = block_on(wizard.advance()).expect("advance resolves");

    assert_eq!(outcome, StepOutcome::GateFailed);
    assert_eq!(wizard.step_index().expect("index"), 0);
    assert_eq!(wizard.status().expect("status"), StepStatus::Blocked);
    assert_eq!(
        wizard.last_failure().expect("failure"),
        Some(StepFailure {
            step: 0,
            kind: FailureKind::Gate,
            message: "sftp host unreachable".to_string(),
        })
    );
}

#[test]
fn panicking_gate_is_treated_as_failure() {
    let wizard = WizardController::<()>::builder()
        .step(WizardStep::new("upload").on_next(|_collected| async {
            if true {
                panic!("validator crashed");
            }
            Ok::<bool, BoxError>(true)
        }))
        .step(WizardStep::new("review"))
        .build()
        .expect("wizard has steps");

    let outcome = block_on(wizard.advance()).expect("advance resolves");

    assert_eq!(outcome, StepOutcome::GateFailed);
    let failure = wizard
        .last_failure()
        .expect("failure")
        .expect("failure recorded");
    assert_eq!(failure.message, "callback panicked: validator crashed");

    assert!(wizard.update_field("note", "retry").is_ok());
    assert_eq!(wizard.status().expect("status"), StepStatus::Idle);
}

#[test]
fn gate_panicking_before_returning_a_future_is_treated_as_failure() {
    let wizard = WizardController::<()>::builder()
        .step(
            WizardStep::new("upload").on_next(|_collected| -> Ready<Result<bool, BoxError>> {
                panic!("scanner unavailable")
            }),
        )
        .step(WizardStep::new("review"))
        .build()
        .expect("wizard has steps");

    assert_eq!(
        block_on(wizard.advance()).expect("advance resolves"),
        StepOutcome::GateFailed
    );
    assert_eq!(wizard.status().expect("status"), StepStatus::Blocked);
    assert_eq!(
        wizard
            .last_failure()
            .expect("failure")
            .map(|failure| failure.message),
        Some("callback panicked: scanner unavailable".to_string())
    );

    assert_eq!(wizard.retreat(), Ok(false));
    assert!(wizard.update_field("file", "stock.csv").is_ok());
    assert_eq!(
        block_on(wizard.advance()).expect("advance resolves again"),
        StepOutcome::GateFailed
    );
}

#[test]
fn panicking_step_validator_blocks_the_step() {
    let wizard = WizardController::<()>::builder()
        .step(WizardStep::new("warehouse").field("warehouse"))
        .step(
            WizardStep::new("file")
                .field("file")
                .validate(|collected| -> FieldErrors {
                    if collected.contains_key("file") {
                        panic!("sheet parser crashed");
                    }
                    FieldErrors::new()
                }),
        )
        .step(WizardStep::new("confirm"))
        .build()
        .expect("wizard has steps");

    block_on(wizard.advance()).expect("advance");
    wizard.update_field("file", "stock.csv").expect("attach file");

    assert_eq!(
        block_on(wizard.advance()).expect("advance resolves"),
        StepOutcome::ValidationFailed
    );
    let snapshot = wizard.snapshot().expect("snapshot");
    assert_eq!(snapshot.step_index, 1);
    assert_eq!(snapshot.status, StepStatus::Blocked);
    assert_eq!(
        snapshot.last_failure.map(|failure| (failure.kind, failure.message)),
        Some((
            FailureKind::Validation,
            "callback panicked: sheet parser crashed".to_string()
        ))
    );

    assert_eq!(wizard.retreat(), Ok(true));
    assert_eq!(wizard.step_index().expect("index"), 0);
}

#[test]
fn completion_panicking_before_returning_a_future_stays_on_last_step() {
    let wizard = WizardController::<()>::builder()
        .step(WizardStep::new("file"))
        .on_complete(|_collected| -> Ready<Result<(), BoxError>> { panic!("upload client missing") })
        .build()
        .expect("wizard has steps");

    assert_eq!(
        block_on(wizard.advance()).expect("advance resolves"),
        StepOutcome::CompletionFailed
    );
    assert!(!wizard.is_completed().expect("completed flag"));
    assert!(wizard.update_field("file", "stock.csv").is_ok());
}

#[test]
fn dropping_a_pending_advance_releases_the_wizard() {
    let (_release, gate) = oneshot::channel::<bool>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    let wizard = WizardController::<()>::builder()
        .step(WizardStep::new("upload").on_next(move |_collected| {
            let gate = gate.lock().expect("gate lock").take();
            async move {
                match gate {
                    Some(gate) => Ok::<_, BoxError>(gate.await.unwrap_or(false)),
                    None => Ok(true),
                }
            }
        }))
        .step(WizardStep::new("review"))
        .build()
        .expect("wizard has steps");

    let mut pending = wizard.advance().boxed_local();
    assert!((&mut pending).now_or_never().is_none());
    assert_eq!(
        wizard.status().expect("status"),
        StepStatus::AdvancingAsync
    );
    drop(pending);

    assert_eq!(wizard.status().expect("status"), StepStatus::Idle);
    assert_eq!(wizard.step_index().expect("index"), 0);
    assert_eq!(
        block_on(wizard.advance()).expect("advance"),
        StepOutcome::Advanced { from: 0, to: 1 }
    );
}

#[test]
fn completion_hands_collected_values_to_callback() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let wizard = {
        let received = received.clone();
        two_steps()
            .on_complete(move |collected: Values| {
                received.lock().expect("received lock").push(collected);
                async { Ok::<(), BoxError>(()) }
            })
            .build()
            .expect("wizard has steps")
    };

    wizard.update_field("warehouse", "WH-1").expect("update");
    block_on(wizard.advance()).expect("advance");
    wizard.update_field("file", "stock.csv").expect("update");
    let outcome = block_on(wizard.advance()).expect("complete");

    assert_eq!(outcome, StepOutcome::Completed);
    assert!(wizard.is_completed().expect("completed"));
    assert_eq!(wizard.progress().expect("progress"), 1.0);
    assert_eq!(
        wizard.markers().expect("markers"),
        vec![StepMarker::Completed, StepMarker::Completed]
    );
    let received = received.lock().expect("received lock");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].value("file"), &FieldValue::from("stock.csv"));
}

#[test]
fn failed_completion_stays_on_last_step() {
    let wizard = WizardController::<()>::builder()
        .step(WizardStep::new("file"))
        .on_complete(|_collected| async { Err::<(), BoxError>("upload rejected".into()) })
        .build()
        .expect("wizard has steps");

    let outcome = block_on(wizard.advance()).expect("advance resolves");

    assert_eq!(outcome, StepOutcome::CompletionFailed);
    let snapshot = wizard.snapshot().expect("snapshot");
    assert!(!snapshot.completed);
    assert_eq!(snapshot.step_index, 0);
    assert_eq!(snapshot.status, StepStatus::Blocked);
    assert_eq!(snapshot.progress, 0.0);
    assert_eq!(
        snapshot.last_failure.map(|failure| failure.kind),
        Some(FailureKind::Completion)
    );
}

#[test]
fn transitions_are_rejected_while_a_gate_is_pending() {
    let (release, gate) = oneshot::channel::<bool>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    let wizard = WizardController::<()>::builder()
        .step(WizardStep::new("upload").on_next(move |_collected| {
            let gate = gate.lock().expect("gate lock").take();
            async move {
                match gate {
                    Some(gate) => Ok::<_, BoxError>(gate.await.unwrap_or(false)),
                    None => Ok(false),
                }
            }
        }))
        .step(WizardStep::new("review"))
        .build()
        .expect("wizard has steps");

    block_on(async {
        let probe = async {
            assert_eq!(
                wizard.status().expect("status"),
                StepStatus::AdvancingAsync
            );
            assert_eq!(
                wizard.update_field("file", "late.csv"),
                Err(WizardError::TransitionInFlight)
            );
            assert_eq!(wizard.retreat(), Err(WizardError::TransitionInFlight));
            assert_eq!(wizard.advance().await, Err(WizardError::TransitionInFlight));
            release.send(true).expect("release gate");
        };
        let (outcome, ()) = join(wizard.advance(), probe).await;
        assert_eq!(outcome, Ok(StepOutcome::Advanced { from: 0, to: 1 }));
    });
    assert!(!wizard.collected().expect("collected").contains_key("file"));
}

#[test]
fn upstream_change_clears_downstream_values_when_configured() {
    let wizard = upload_wizard(DownstreamPolicy::ClearOnUpstreamChange);
    wizard.update_field("warehouse", "WH-1").expect("update");
    block_on(wizard.advance()).expect("advance");
    wizard.update_field("file", "stock.csv").expect("update");
    wizard.update_field("sheet", "Sheet1").expect("update");
    block_on(wizard.advance()).expect("advance");
    wizard.update_field("confirmed", true).expect("update");
    wizard.retreat().expect("retreat");
    wizard.retreat().expect("retreat");

    wizard.update_field("warehouse", "WH-1").expect("same value");
    assert!(wizard.collected().expect("collected").contains_key("file"));

    wizard.update_field("warehouse", "WH-2").expect("new value");
    let collected = wizard.collected().expect("collected");
    assert_eq!(collected.value("warehouse"), &FieldValue::from("WH-2"));
    assert!(!collected.contains_key("file"));
    assert!(!collected.contains_key("sheet"));
    assert_eq!(collected.value("confirmed"), &FieldValue::Bool(false));
}

#[test]
fn downstream_values_are_retained_by_default() {
    let wizard = upload_wizard(DownstreamPolicy::default());
    wizard.update_field("warehouse", "WH-1").expect("update");
    block_on(wizard.advance()).expect("advance");
    wizard.update_field("file", "stock.csv").expect("update");
    wizard.retreat().expect("retreat");

    wizard.update_field("warehouse", "WH-2").expect("update");
    assert_eq!(
        wizard.collected().expect("collected").value("file"),
        &FieldValue::from("stock.csv")
    );
}

#[test]
fn progress_and_markers_follow_the_current_step() {
    let wizard = upload_wizard(DownstreamPolicy::Retain);
    assert_eq!(wizard.progress().expect("progress"), 0.0);

    block_on(wizard.advance()).expect("advance");
    assert_eq!(wizard.progress().expect("progress"), 0.5);
    assert_eq!(
        wizard.markers().expect("markers"),
        vec![
            StepMarker::Completed,
            StepMarker::Current,
            StepMarker::Upcoming
        ]
    );

    let single = WizardController::<()>::builder()
        .step(WizardStep::new("only"))
        .build()
        .expect("wizard has steps");
    assert_eq!(single.progress().expect("progress"), 0.0);
}

#[test]
fn reset_returns_to_first_step_with_initial_values() {
    let wizard = upload_wizard(DownstreamPolicy::Retain);
    wizard.update_field("warehouse", "WH-1").expect("update");
    block_on(wizard.advance()).expect("advance");

    wizard.reset().expect("reset");

    let snapshot = wizard.snapshot().expect("snapshot");
    assert_eq!(snapshot.step_index, 0);
    assert_eq!(snapshot.step_id, "warehouse");
    assert_eq!(snapshot.collected, Values::new().with("confirmed", false));
    assert_eq!(snapshot.status, StepStatus::Idle);
}

#[test]
fn render_current_uses_the_step_callback() {
    let wizard = WizardController::<String>::builder()
        .step(
            WizardStep::new("warehouse")
                .label("Choose warehouse")
                .render(|view: StepView<'_, String>| {
                    view.updater
                        .update_field("warehouse", "WH-9")
                        .expect("update from view");
                    format!(
                        "{} ({}/{}) first={} last={}",
                        view.label,
                        view.index + 1,
                        view.step_count,
                        view.is_first(),
                        view.is_last()
                    )
                }),
        )
        .step(WizardStep::new("file"))
        .build()
        .expect("wizard has steps");

    assert_eq!(
        wizard.render_current().expect("render"),
        Some("Choose warehouse (1/2) first=true last=false".to_string())
    );
    assert_eq!(
        wizard.collected().expect("collected").value("warehouse"),
        &FieldValue::from("WH-9")
    );

    block_on(wizard.advance()).expect("advance");
    assert_eq!(wizard.render_current().expect("render"), None);
}

#[test]
fn step_lookup_reports_out_of_range_index() {
    let wizard = two_steps().build().expect("wizard has steps");
    assert_eq!(wizard.step(1).map(WizardStep::id), Ok("file"));
    assert!(matches!(
        wizard.step(2),
        Err(WizardError::StepOutOfRange { index: 2, count: 2 })
    ));
}

#[test]
fn options_load_from_json() {
    let options: WizardOptions =
        serde_json::from_str(r#"{ "downstream": "clear_on_upstream_change" }"#)
            .expect("parse options");
    assert_eq!(options.downstream, DownstreamPolicy::ClearOnUpstreamChange);
    let defaults: WizardOptions = serde_json::from_str("{}").expect("parse defaults");
    assert_eq!(defaults.downstream, DownstreamPolicy::Retain);
}

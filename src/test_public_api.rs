use crate::form::FormModel as _;
use rust_decimal::Decimal;

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn controllers_are_shareable_handles() {
    assert_send_sync::<crate::form::FormController<crate::form::Values>>();
    assert_send_sync::<crate::wizard::WizardController<String>>();
    assert_send_sync::<crate::selection::SelectionState<ApiSmokeForm>>();
    assert_send_sync::<crate::BoxError>();
}

#[test]
fn prelude_exports_core_types() {
    use crate::prelude::*;

    let _ = FormOptions::default();
    let _ = WizardOptions::default();
    let _ = GeoOptions::default();
    let _ = ValidationMode::OnSubmit;
    let _ = DownstreamPolicy::Retain;
    let _ = StepStatus::Idle;
    let _ = SubmitState::Idle;
    let _ = FieldKind::Checkbox;
    let _ = SelectionState::<Values>::new();
    let _ = FormContext::with_user(CurrentUser::new("u-1", "root"));
}

#[derive(Clone, Debug, crate::form::FormModel)]
struct ApiSmokeForm {
    title: String,
    enabled: bool,
    amount: Decimal,
    r#type: Option<String>,
}

#[test]
fn form_public_api_smoke_compiles() {
    let controller = crate::form::FormController::builder(ApiSmokeForm {
        title: "draft".into(),
        enabled: false,
        amount: Decimal::from_i128_with_scale(500, 2),
        r#type: None,
    })
    .rule(ApiSmokeForm::fields().title(), crate::form::FieldRule::required())
    .field(crate::form::FieldDescriptor::text(
        ApiSmokeForm::fields().title(),
        "Title",
    ))
    .dependency(ApiSmokeForm::fields().title(), ApiSmokeForm::fields().amount())
    .build(|_request| async { Ok::<(), crate::BoxError>(()) });
    let fields = ApiSmokeForm::fields();

    controller
        .register_field(crate::form::FieldDescriptor::new(
            fields.amount(),
            "Amount",
            crate::form::FieldKind::Number,
        ))
        .expect("register descriptor");
    controller
        .set(fields.title(), String::new())
        .expect("set value");
    controller.touch(fields.title()).expect("touch field");
    controller.validate_form().expect("validate form");
    let _ = controller
        .field_error_for_display(fields.title())
        .expect("display error");
    assert_eq!(fields.r#type().key().as_str(), "type");
    assert_eq!(controller.get(fields.r#type()).expect("typed read"), None);
    controller.reset_to_initial().expect("reset");
    let _ = controller.model().expect("typed model");
}

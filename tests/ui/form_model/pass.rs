use formflow::form::{FieldKey, FormModel, Values};

#[derive(Clone, Debug, PartialEq, formflow::form::FormModel)]
struct DistributorForm {
    name: String,
    contact_email: String,
    active: bool,
}

fn main() {
    let fields = DistributorForm::fields();
    assert_eq!(fields.contact_email().key(), FieldKey::new("contact_email"));

    let model = DistributorForm {
        name: "Nordic Supply".to_string(),
        contact_email: "ops@nordic.example".to_string(),
        active: true,
    };
    let values: Values = model.to_values();
    assert_eq!(values.len(), 3);
    assert_eq!(DistributorForm::from_values(&values), Ok(model));
}

mod binding;
mod context;
mod controller;
mod validation;
mod value;


pub use binding::{
    FieldDescriptor, FieldKind, FieldRenderer, FieldSetter, FormView, RenderField, SelectOption,
};
pub use context::{CurrentUser, FormContext};
pub use controller::{
    FieldMeta, FormBuilder, FormController, FormError, FormId, FormMode, FormOptions, FormResult,
    FormSnapshot, RevalidateMode, SubmitRequest, SubmitState, ValidationMode,
};
pub use formflow_form_derive::FormModel;
pub use validation::{FieldErrors, FieldRule, FieldRules, ValidationSchema};
pub use value::{
    Field, FieldKey, FieldType, FieldValue, FileRef, FormModel, ValueError, ValueShape, Values,
};

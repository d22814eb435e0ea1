pub use crate::form::{
    CurrentUser, Field, FieldDescriptor, FieldErrors, FieldKey, FieldKind, FieldRenderer,
    FieldRule, FieldRules, FieldValue, FileRef, FormContext, FormController, FormError, FormMode,
    FormModel, FormOptions, FormResult, FormView, RenderField, SelectOption, SubmitRequest,
    SubmitState, ValidationMode, ValidationSchema, Values,
};
pub use crate::geo::{AddressResolver, AddressSync, Coords, GeoOptions, GeoOutcome, GeoPhase};
pub use crate::selection::{DrawerState, SelectionError, SelectionState};
pub use crate::wizard::{
    DownstreamPolicy, StepMarker, StepOutcome, StepStatus, StepView, WizardController,
    WizardError, WizardOptions, WizardResult, WizardStep,
};
pub use crate::{BoxError, CallbackPanicked};

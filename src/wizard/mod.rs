mod controller;
mod step;

#[cfg(test)]
mod tests;

pub use controller::{
    DownstreamPolicy, FailureKind, StepFailure, StepMarker, StepOutcome, StepStatus,
    WizardBuilder, WizardController, WizardError, WizardOptions, WizardResult, WizardSnapshot,
};
pub use step::{StepUpdater, StepView, WizardStep};

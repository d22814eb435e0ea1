use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::controller::{StepStatus, WizardController, WizardResult};
use crate::form::{FieldErrors, FieldKey, FieldValue, Values};
use crate::settle::BoxError;

pub(super) type StepValidator = Arc<dyn Fn(&Values) -> FieldErrors + Send + Sync>;
pub(super) type StepGate =
    Arc<dyn Fn(Values) -> BoxFuture<'static, Result<bool, BoxError>> + Send + Sync>;
pub(super) type StepRender<N> = Arc<dyn Fn(StepView<'_, N>) -> N + Send + Sync>;

/// One screen of a wizard.
pub struct WizardStep<N = ()> {
    pub(super) id: &'static str,
    pub(super) label: String,
    pub(super) description: Option<String>,
    pub(super) fields: Vec<FieldKey>,
    pub(super) validate: Option<StepValidator>,
    pub(super) on_next: Option<StepGate>,
    pub(super) render: Option<StepRender<N>>,
}

impl<N> WizardStep<N> {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            label: id.to_string(),
            description: None,
            fields: Vec::new(),
            validate: None,
            on_next: None,
            render: None,
        }
    }

    pub fn label(mut self, value: impl Into<String>) -> Self {
        self.label = value.into();
        self
    }

    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.description = Some(value.into());
        self
    }

    /// Declares a field as owned by this step.
    pub fn field(mut self, key: impl Into<FieldKey>) -> Self {
        let key = key.into();
        if !self.fields.contains(&key) {
            self.fields.push(key);
        }
        self
    }

    pub fn fields<K: Into<FieldKey>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        for key in keys {
            self = self.field(key);
        }
        self
    }

    /// Synchronous whole-step check, run after the schema rules pass.
    pub fn validate(
        mut self,
        validator: impl Fn(&Values) -> FieldErrors + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Arc::new(validator));
        self
    }

    /// Asynchronous gate run before leaving the step. `Ok(false)` keeps the wizard where it is.
    pub fn on_next<F, Fut>(mut self, gate: F) -> Self
    where
        F: Fn(Values) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        self.on_next = Some(Arc::new(move |collected| gate(collected).boxed()));
        self
    }

    pub fn render(mut self, render: impl Fn(StepView<'_, N>) -> N + Send + Sync + 'static) -> Self {
        self.render = Some(Arc::new(render));
        self
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.label
    }

    pub fn summary(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn owned_fields(&self) -> &[FieldKey] {
        &self.fields
    }

    pub fn has_gate(&self) -> bool {
        self.on_next.is_some()
    }
}

/// Write access handed to step render callbacks.
pub struct StepUpdater<N> {
    pub(super) controller: WizardController<N>,
}

impl<N> Clone for StepUpdater<N> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
        }
    }
}

impl<N> StepUpdater<N> {
    pub fn update_field(
        &self,
        key: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
    ) -> WizardResult<()> {
        self.controller.update_field(key, value)
    }
}

/// Read view of the current step handed to its render callback.
pub struct StepView<'a, N> {
    pub index: usize,
    pub step_count: usize,
    pub id: &'static str,
    pub label: &'a str,
    pub collected: &'a Values,
    pub errors: &'a FieldErrors,
    pub status: StepStatus,
    pub updater: StepUpdater<N>,
}

impl<N> StepView<'_, N> {
    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.step_count
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Validating | StepStatus::AdvancingAsync
        )
    }

    pub fn error(&self, key: impl Into<FieldKey>) -> Option<&str> {
        self.errors.get(&key.into()).map(String::as_str)
    }
}

use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::step::{StepUpdater, StepView, WizardStep};
use crate::form::{FieldErrors, FieldKey, FieldValue, ValidationSchema, Values};
use crate::settle::{BoxError, settle, settle_sync};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepStatus {
    Idle,
    Validating,
    AdvancingAsync,
    Blocked,
}

/// What happens to later steps' values when an earlier step's field changes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownstreamPolicy {
    #[default]
    Retain,
    ClearOnUpstreamChange,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardOptions {
    pub downstream: DownstreamPolicy,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    Advanced { from: usize, to: usize },
    Completed,
    Invalid,
    ValidationFailed,
    GateRejected,
    GateFailed,
    CompletionFailed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    Validation,
    Gate,
    Completion,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepFailure {
    pub step: usize,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepMarker {
    Completed,
    Current,
    Upcoming,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WizardSnapshot {
    pub step_index: usize,
    pub step_count: usize,
    pub step_id: &'static str,
    pub collected: Values,
    pub step_errors: FieldErrors,
    pub status: StepStatus,
    pub completed: bool,
    pub progress: f64,
    pub last_failure: Option<StepFailure>,
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum WizardError {
    #[error("wizard state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error("a wizard needs at least one step")]
    NoSteps,
    #[error("a wizard transition is already in flight")]
    TransitionInFlight,
    #[error("step {index} is out of range for a wizard with {count} steps")]
    StepOutOfRange { index: usize, count: usize },
}

pub type WizardResult<T> = Result<T, WizardError>;

pub(super) type CompleteFn =
    Arc<dyn Fn(Values) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

struct WizardState {
    step_index: usize,
    initial: Values,
    collected: Values,
    step_errors: FieldErrors,
    status: StepStatus,
    completed: bool,
    in_flight: bool,
    last_failure: Option<StepFailure>,
}

impl WizardState {
    fn new(initial: Values) -> Self {
        Self {
            step_index: 0,
            collected: initial.clone(),
            initial,
            step_errors: FieldErrors::new(),
            status: StepStatus::Idle,
            completed: false,
            in_flight: false,
            last_failure: None,
        }
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        self.in_flight = false;
    }
}

/// Releases the transition slot however `advance` exits, so an unwinding callback or a
/// dropped future cannot leave the wizard stuck mid-transition.
struct Transition<'a> {
    state: &'a RwLock<WizardState>,
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.write()
            && state.in_flight
        {
            state.finish(StepStatus::Idle);
        }
    }
}

pub struct WizardBuilder<N = ()> {
    steps: Vec<WizardStep<N>>,
    schema: ValidationSchema,
    initial: Values,
    options: WizardOptions,
    on_complete: Option<CompleteFn>,
}

impl<N> WizardBuilder<N> {
    pub fn step(mut self, step: WizardStep<N>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = WizardStep<N>>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn schema(mut self, schema: ValidationSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn initial_values(mut self, values: Values) -> Self {
        self.initial = values;
        self
    }

    pub fn options(mut self, options: WizardOptions) -> Self {
        self.options = options;
        self
    }

    /// Called with the collected values when the last step is left successfully.
    pub fn on_complete<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Values) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_complete = Some(Arc::new(move |collected| handler(collected).boxed()));
        self
    }

    pub fn build(self) -> WizardResult<WizardController<N>> {
        if self.steps.is_empty() {
            return Err(WizardError::NoSteps);
        }
        Ok(WizardController {
            options: self.options,
            steps: self.steps.into(),
            schema: Arc::new(self.schema),
            on_complete: self.on_complete,
            state: Arc::new(RwLock::new(WizardState::new(self.initial))),
        })
    }
}

/// Ordered steps over one shared set of collected values.
pub struct WizardController<N = ()> {
    options: WizardOptions,
    steps: Arc<[WizardStep<N>]>,
    schema: Arc<ValidationSchema>,
    on_complete: Option<CompleteFn>,
    state: Arc<RwLock<WizardState>>,
}

impl<N> Clone for WizardController<N> {
    fn clone(&self) -> Self {
        Self {
            options: self.options,
            steps: self.steps.clone(),
            schema: self.schema.clone(),
            on_complete: self.on_complete.clone(),
            state: self.state.clone(),
        }
    }
}

impl<N> WizardController<N> {
    pub fn builder() -> WizardBuilder<N> {
        WizardBuilder {
            steps: Vec::new(),
            schema: ValidationSchema::new(),
            initial: Values::new(),
            options: WizardOptions::default(),
            on_complete: None,
        }
    }

    pub fn options(&self) -> WizardOptions {
        self.options
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, index: usize) -> WizardResult<&WizardStep<N>> {
        self.steps.get(index).ok_or(WizardError::StepOutOfRange {
            index,
            count: self.steps.len(),
        })
    }

    pub fn step_index(&self) -> WizardResult<usize> {
        Ok(read_lock(&self.state, "reading step index")?.step_index)
    }

    pub fn status(&self) -> WizardResult<StepStatus> {
        Ok(read_lock(&self.state, "reading step status")?.status)
    }

    pub fn collected(&self) -> WizardResult<Values> {
        Ok(read_lock(&self.state, "reading collected values")?
            .collected
            .clone())
    }

    pub fn step_errors(&self) -> WizardResult<FieldErrors> {
        Ok(read_lock(&self.state, "reading step errors")?
            .step_errors
            .clone())
    }

    pub fn is_completed(&self) -> WizardResult<bool> {
        Ok(read_lock(&self.state, "reading completion flag")?.completed)
    }

    pub fn last_failure(&self) -> WizardResult<Option<StepFailure>> {
        Ok(read_lock(&self.state, "reading last failure")?
            .last_failure
            .clone())
    }

    /// Validates the current step, runs its gate, then moves forward or completes the wizard.
    ///
    /// Validation errors, gate rejections and gate failures are reported through the outcome
    /// and the wizard state; `Err` is reserved for misuse.
    pub async fn advance(&self) -> WizardResult<StepOutcome> {
        let (index, collected) = {
            let mut state = write_lock(&self.state, "starting step transition")?;
            if state.in_flight {
                return Err(WizardError::TransitionInFlight);
            }
            if state.completed {
                return Ok(StepOutcome::Completed);
            }
            state.in_flight = true;
            state.status = StepStatus::Validating;
            (state.step_index, state.collected.clone())
        };
        let _transition = Transition { state: &self.state };
        let step = &self.steps[index];

        let checked = settle_sync(|| {
            let mut errors = self.schema.evaluate(index, &collected);
            if errors.is_empty()
                && let Some(validate) = &step.validate
            {
                errors.extend(validate(&collected));
            }
            errors
        });
        let errors = match checked {
            Ok(errors) => errors,
            Err(panicked) => {
                let mut state = write_lock(&self.state, "handling validator failure")?;
                state.last_failure = Some(StepFailure {
                    step: index,
                    kind: FailureKind::Validation,
                    message: panicked.to_string(),
                });
                state.finish(StepStatus::Blocked);
                tracing::warn!(step = step.id, error = %panicked, "step validation failed");
                return Ok(StepOutcome::ValidationFailed);
            }
        };
        if !errors.is_empty() {
            let mut state = write_lock(&self.state, "recording step errors")?;
            tracing::debug!(
                step = step.id,
                invalid_fields = errors.len(),
                "step advance blocked by validation"
            );
            state.step_errors = errors;
            state.finish(StepStatus::Blocked);
            return Ok(StepOutcome::Invalid);
        }

        write_lock(&self.state, "clearing step errors")?
            .step_errors
            .clear();

        if let Some(gate) = &step.on_next {
            write_lock(&self.state, "entering step gate")?.status = StepStatus::AdvancingAsync;
            let gated = collected.clone();
            match settle(async move { gate(gated).await }).await {
                Ok(true) => {}
                Ok(false) => {
                    write_lock(&self.state, "handling gate rejection")?.finish(StepStatus::Idle);
                    tracing::debug!(step = step.id, "step gate rejected advance");
                    return Ok(StepOutcome::GateRejected);
                }
                Err(error) => {
                    let mut state = write_lock(&self.state, "handling gate failure")?;
                    state.last_failure = Some(StepFailure {
                        step: index,
                        kind: FailureKind::Gate,
                        message: error.to_string(),
                    });
                    state.finish(StepStatus::Blocked);
                    tracing::warn!(step = step.id, %error, "step gate failed");
                    return Ok(StepOutcome::GateFailed);
                }
            }
        }

        if index + 1 < self.steps.len() {
            let mut state = write_lock(&self.state, "advancing step")?;
            state.step_index = index + 1;
            state.step_errors.clear();
            state.last_failure = None;
            state.finish(StepStatus::Idle);
            tracing::debug!(from = step.id, to = self.steps[index + 1].id, "wizard advanced");
            return Ok(StepOutcome::Advanced {
                from: index,
                to: index + 1,
            });
        }

        self.complete(index, collected).await
    }

    async fn complete(&self, index: usize, collected: Values) -> WizardResult<StepOutcome> {
        let result = match &self.on_complete {
            Some(on_complete) => {
                write_lock(&self.state, "entering completion")?.status = StepStatus::AdvancingAsync;
                settle(async move { on_complete(collected).await }).await
            }
            None => Ok(()),
        };

        let mut state = write_lock(&self.state, "completing wizard")?;
        match result {
            Ok(()) => {
                state.completed = true;
                state.step_errors.clear();
                state.last_failure = None;
                state.finish(StepStatus::Idle);
                tracing::debug!(steps = self.steps.len(), "wizard completed");
                Ok(StepOutcome::Completed)
            }
            Err(error) => {
                state.last_failure = Some(StepFailure {
                    step: index,
                    kind: FailureKind::Completion,
                    message: error.to_string(),
                });
                state.finish(StepStatus::Blocked);
                tracing::warn!(step = self.steps[index].id, %error, "wizard completion failed");
                Ok(StepOutcome::CompletionFailed)
            }
        }
    }

    /// Steps back without validating. Returns whether the wizard moved.
    pub fn retreat(&self) -> WizardResult<bool> {
        let mut state = write_lock(&self.state, "retreating step")?;
        if state.in_flight {
            return Err(WizardError::TransitionInFlight);
        }
        if state.completed || state.step_index == 0 {
            return Ok(false);
        }
        let from = state.step_index;
        state.step_index -= 1;
        state.step_errors.clear();
        state.last_failure = None;
        state.status = StepStatus::Idle;
        tracing::debug!(
            from = self.steps[from].id,
            to = self.steps[from - 1].id,
            "wizard retreated"
        );
        Ok(true)
    }

    pub fn update_field(
        &self,
        key: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
    ) -> WizardResult<()> {
        let key = key.into();
        let value = value.into();
        let mut state = write_lock(&self.state, "updating collected field")?;
        if state.in_flight {
            return Err(WizardError::TransitionInFlight);
        }

        let changed = state.collected.value(key) != &value;
        state.collected.insert(key, value);
        state.step_errors.remove(&key);
        if state.status == StepStatus::Blocked && state.step_errors.is_empty() {
            state.status = StepStatus::Idle;
        }

        if changed
            && self.options.downstream == DownstreamPolicy::ClearOnUpstreamChange
            && let Some(owner) = self.owner_of(key)
        {
            for later in owner + 1..self.steps.len() {
                for field in self.owned_by(later) {
                    match state.initial.get(field).cloned() {
                        Some(initial) => {
                            state.collected.insert(field, initial);
                        }
                        None => {
                            state.collected.remove(field);
                        }
                    }
                }
            }
            tracing::debug!(field = %key, step = self.steps[owner].id, "cleared downstream values");
        }
        Ok(())
    }

    /// Back to the first step with the initial values.
    pub fn reset(&self) -> WizardResult<()> {
        let mut state = write_lock(&self.state, "resetting wizard")?;
        if state.in_flight {
            return Err(WizardError::TransitionInFlight);
        }
        *state = WizardState::new(state.initial.clone());
        Ok(())
    }

    /// `step_index / (step_count - 1)`, or `1.0` once completed.
    pub fn progress(&self) -> WizardResult<f64> {
        let state = read_lock(&self.state, "reading progress")?;
        Ok(self.progress_of(&state))
    }

    pub fn markers(&self) -> WizardResult<Vec<StepMarker>> {
        let state = read_lock(&self.state, "reading step markers")?;
        Ok((0..self.steps.len())
            .map(|index| {
                if state.completed || index < state.step_index {
                    StepMarker::Completed
                } else if index == state.step_index {
                    StepMarker::Current
                } else {
                    StepMarker::Upcoming
                }
            })
            .collect())
    }

    pub fn snapshot(&self) -> WizardResult<WizardSnapshot> {
        let state = read_lock(&self.state, "creating wizard snapshot")?;
        Ok(WizardSnapshot {
            step_index: state.step_index,
            step_count: self.steps.len(),
            step_id: self.steps[state.step_index].id,
            collected: state.collected.clone(),
            step_errors: state.step_errors.clone(),
            status: state.status,
            completed: state.completed,
            progress: self.progress_of(&state),
            last_failure: state.last_failure.clone(),
        })
    }

    /// Runs the current step's render callback, if it has one.
    pub fn render_current(&self) -> WizardResult<Option<N>> {
        let snapshot = self.snapshot()?;
        let step = &self.steps[snapshot.step_index];
        Ok(step.render.as_ref().map(|render| {
            render(StepView {
                index: snapshot.step_index,
                step_count: snapshot.step_count,
                id: step.id,
                label: &step.label,
                collected: &snapshot.collected,
                errors: &snapshot.step_errors,
                status: snapshot.status,
                updater: StepUpdater {
                    controller: self.clone(),
                },
            })
        }))
    }

    fn progress_of(&self, state: &WizardState) -> f64 {
        if state.completed {
            return 1.0;
        }
        let last = self.steps.len().saturating_sub(1);
        if last == 0 {
            return 0.0;
        }
        state.step_index as f64 / last as f64
    }

    fn owned_by(&self, index: usize) -> Vec<FieldKey> {
        let mut fields = self.steps[index].fields.clone();
        for key in self.schema.fields_for(index) {
            if !fields.contains(&key) {
                fields.push(key);
            }
        }
        fields
    }

    fn owner_of(&self, key: FieldKey) -> Option<usize> {
        (0..self.steps.len()).find(|index| self.owned_by(*index).contains(&key))
    }
}

fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> WizardResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| WizardError::StatePoisoned(context))
}

fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> WizardResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| WizardError::StatePoisoned(context))
}

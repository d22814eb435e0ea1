use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::binding::{FieldDescriptor, upsert_descriptor};
use super::context::FormContext;
use super::validation::{FieldErrors, FieldRule, FieldRules};
use super::value::{
    Field, FieldKey, FieldType, FieldValue, FormModel, ValueError, ValueShape, Values,
};
use crate::settle::{BoxError, settle};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FormMode {
    Create,
    Edit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Pending,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    OnChange,
    OnBlur,
    OnSubmit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevalidateMode {
    OnChange,
    OnBlur,
    OnSubmit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    pub validate_mode: ValidationMode,
    pub revalidate_mode: RevalidateMode,
    pub reset_after_success: bool,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            validate_mode: ValidationMode::OnSubmit,
            revalidate_mode: RevalidateMode::OnChange,
            reset_after_success: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FieldMeta {
    pub dirty: bool,
    pub touched: bool,
}

#[derive(Clone, Debug)]
pub struct FormSnapshot<T> {
    pub form_id: FormId,
    pub mode: FormMode,
    pub item: Option<Arc<T>>,
    pub values: Values,
    pub errors: FieldErrors,
    pub field_meta: BTreeMap<FieldKey, FieldMeta>,
    pub submission: SubmitState,
    pub submit_count: u32,
    pub is_dirty: bool,
    pub is_valid: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FormError {
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error("invalid submit state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    #[error("form submit is already in progress")]
    AlreadySubmitting,
    #[error("field `{key}` is a {kind} field and cannot hold a {found} value")]
    FieldKindMismatch {
        key: FieldKey,
        kind: &'static str,
        found: ValueShape,
    },
    #[error(transparent)]
    Value(#[from] ValueError),
}

pub type FormResult<T> = Result<T, FormError>;

/// Everything the submission function receives for one submit.
#[derive(Clone, Debug)]
pub struct SubmitRequest {
    pub values: Values,
    pub is_editing: bool,
    pub context: Arc<FormContext>,
}

impl SubmitRequest {
    pub fn model<T: FormModel>(&self) -> Result<T, ValueError> {
        T::from_values(&self.values)
    }
}

pub(super) type SubmitFn =
    Arc<dyn Fn(SubmitRequest) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
pub(super) type CloseFn = Arc<dyn Fn() + Send + Sync>;

pub(super) struct FormState<T> {
    pub(super) id: FormId,
    pub(super) defaults: Values,
    pub(super) item: Option<Arc<T>>,
    pub(super) seed: Values,
    pub(super) values: Values,
    pub(super) errors: FieldErrors,
    pub(super) field_meta: BTreeMap<FieldKey, FieldMeta>,
    pub(super) submission: SubmitState,
    pub(super) submit_count: u32,
    pub(super) in_flight: bool,
    pub(super) last_error: Option<String>,
}

impl<T> FormState<T> {
    pub(super) fn ensure_meta(&mut self, key: FieldKey) -> &mut FieldMeta {
        self.field_meta.entry(key).or_default()
    }

    pub(super) fn mode(&self) -> FormMode {
        if self.item.is_some() {
            FormMode::Edit
        } else {
            FormMode::Create
        }
    }

    fn reseed(&mut self, item: Option<Arc<T>>)
    where
        T: FormModel,
    {
        self.seed = seed_values(&self.defaults, item.as_ref());
        self.values = self.seed.clone();
        self.item = item;
        self.errors.clear();
        self.field_meta.clear();
        self.submission = SubmitState::Idle;
        self.submit_count = 0;
        self.last_error = None;
    }
}

pub struct FormBuilder<T: FormModel> {
    defaults: T,
    item: Option<Arc<T>>,
    options: FormOptions,
    context: FormContext,
    rules: FieldRules,
    descriptors: Vec<FieldDescriptor>,
    dependencies: Vec<(FieldKey, FieldKey)>,
    on_close_requested: Option<CloseFn>,
}

impl<T: FormModel> FormBuilder<T> {
    pub fn item(mut self, item: Arc<T>) -> Self {
        self.item = Some(item);
        self
    }

    pub fn maybe_item(mut self, item: Option<Arc<T>>) -> Self {
        self.item = item;
        self
    }

    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }

    pub fn context(mut self, context: FormContext) -> Self {
        self.context = context;
        self
    }

    pub fn rule(mut self, key: impl Into<FieldKey>, rule: FieldRule) -> Self {
        self.rules.insert(key, rule);
        self
    }

    pub fn rules(mut self, rules: FieldRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn field(mut self, descriptor: FieldDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn dependency(
        mut self,
        source: impl Into<FieldKey>,
        dependent: impl Into<FieldKey>,
    ) -> Self {
        self.dependencies.push((source.into(), dependent.into()));
        self
    }

    pub fn on_close_requested(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close_requested = Some(Arc::new(handler));
        self
    }

    pub fn build<F, Fut>(self, on_submit: F) -> FormController<T>
    where
        F: Fn(SubmitRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let defaults = self.defaults.to_values();
        let seed = seed_values(&defaults, self.item.as_ref());
        let mut dependencies = BTreeMap::<FieldKey, BTreeSet<FieldKey>>::new();
        for (source, dependent) in self.dependencies {
            dependencies.entry(source).or_default().insert(dependent);
        }
        let mut descriptors = Vec::new();
        for descriptor in self.descriptors {
            upsert_descriptor(&mut descriptors, descriptor);
        }
        let on_submit: SubmitFn = Arc::new(move |request| on_submit(request).boxed());

        FormController {
            options: self.options,
            context: Arc::new(self.context),
            state: Arc::new(RwLock::new(FormState {
                id: FormId::next(),
                defaults,
                item: self.item,
                values: seed.clone(),
                seed,
                errors: FieldErrors::new(),
                field_meta: BTreeMap::new(),
                submission: SubmitState::Idle,
                submit_count: 0,
                in_flight: false,
                last_error: None,
            })),
            rules: Arc::new(RwLock::new(self.rules)),
            dependencies: Arc::new(RwLock::new(dependencies)),
            descriptors: Arc::new(RwLock::new(descriptors)),
            on_submit,
            on_close_requested: self.on_close_requested,
        }
    }
}

#[derive(Clone)]
pub struct FormController<T: FormModel> {
    pub(super) options: FormOptions,
    pub(super) context: Arc<FormContext>,
    pub(super) state: Arc<RwLock<FormState<T>>>,
    pub(super) rules: Arc<RwLock<FieldRules>>,
    pub(super) dependencies: Arc<RwLock<BTreeMap<FieldKey, BTreeSet<FieldKey>>>>,
    pub(super) descriptors: Arc<RwLock<Vec<FieldDescriptor>>>,
    pub(super) on_submit: SubmitFn,
    pub(super) on_close_requested: Option<CloseFn>,
}

impl<T: FormModel> FormController<T> {
    pub fn builder(defaults: T) -> FormBuilder<T> {
        FormBuilder {
            defaults,
            item: None,
            options: FormOptions::default(),
            context: FormContext::default(),
            rules: FieldRules::new(),
            descriptors: Vec::new(),
            dependencies: Vec::new(),
            on_close_requested: None,
        }
    }

    pub fn new<F, Fut>(defaults: T, on_submit: F) -> Self
    where
        F: Fn(SubmitRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::builder(defaults).build(on_submit)
    }

    pub fn form_id(&self) -> FormResult<FormId> {
        Ok(read_lock(&self.state, "reading form id")?.id)
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    pub fn context(&self) -> &FormContext {
        &self.context
    }

    pub fn mode(&self) -> FormResult<FormMode> {
        Ok(read_lock(&self.state, "reading form mode")?.mode())
    }

    pub fn is_editing(&self) -> FormResult<bool> {
        Ok(self.mode()? == FormMode::Edit)
    }

    pub fn item(&self) -> FormResult<Option<Arc<T>>> {
        Ok(read_lock(&self.state, "reading form item")?.item.clone())
    }

    /// Binds the form to `item`. Values are reseeded whenever the item reference changes,
    /// even if the new item is structurally equal to the old one.
    pub fn set_item(&self, item: Option<Arc<T>>) -> FormResult<bool> {
        let mut state = write_lock(&self.state, "replacing form item")?;
        if same_item(&state.item, &item) {
            return Ok(false);
        }
        if state.in_flight {
            return Err(FormError::AlreadySubmitting);
        }
        state.reseed(item);
        tracing::debug!(form_id = state.id.0, mode = ?state.mode(), "form reseeded for new item");
        Ok(true)
    }

    pub fn register_rule(&self, key: impl Into<FieldKey>, rule: FieldRule) -> FormResult<()> {
        write_lock(&self.rules, "registering field rule")?.insert(key, rule);
        Ok(())
    }

    pub fn register_dependency(
        &self,
        source: impl Into<FieldKey>,
        dependent: impl Into<FieldKey>,
    ) -> FormResult<()> {
        let mut dependencies = write_lock(&self.dependencies, "registering dependency")?;
        dependencies
            .entry(source.into())
            .or_default()
            .insert(dependent.into());
        Ok(())
    }

    pub fn value(&self, key: impl Into<FieldKey>) -> FormResult<FieldValue> {
        Ok(read_lock(&self.state, "reading field value")?
            .values
            .value(key)
            .clone())
    }

    pub fn get<V: FieldType>(&self, field: Field<V>) -> FormResult<V> {
        Ok(read_lock(&self.state, "reading typed field value")?
            .values
            .read(field.key())?)
    }

    pub fn values(&self) -> FormResult<Values> {
        Ok(read_lock(&self.state, "reading form values")?.values.clone())
    }

    pub fn errors(&self) -> FormResult<FieldErrors> {
        Ok(read_lock(&self.state, "reading form errors")?.errors.clone())
    }

    pub fn submission(&self) -> FormResult<SubmitState> {
        Ok(read_lock(&self.state, "reading submit state")?.submission)
    }

    /// Current values read back into the typed model.
    pub fn model(&self) -> FormResult<T> {
        let state = read_lock(&self.state, "reading form model")?;
        Ok(T::from_values(&state.values)?)
    }

    pub fn set<V: FieldType>(&self, field: Field<V>, value: V) -> FormResult<()> {
        self.set_value(field.key(), value.into_value())
    }

    pub fn set_value(
        &self,
        key: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
    ) -> FormResult<()> {
        let key = key.into();
        let value = value.into();
        if let Some(descriptor) = read_lock(&self.descriptors, "checking field kind")?
            .iter()
            .find(|descriptor| descriptor.key == key)
            && !descriptor.kind.accepts(&value)
        {
            return Err(FormError::FieldKindMismatch {
                key,
                kind: descriptor.kind.name(),
                found: value.shape(),
            });
        }

        {
            let mut state = write_lock(&self.state, "writing form value")?;
            let is_dirty = state.seed.value(key) != &value;
            state.values.insert(key, value);
            state.errors.remove(&key);
            state.ensure_meta(key).dirty = is_dirty;
        }

        if self.options.validate_mode == ValidationMode::OnChange {
            let _ = self.validate_field(key)?;
        }
        if self.options.revalidate_mode == RevalidateMode::OnChange {
            self.revalidate_dependents(key)?;
        }
        Ok(())
    }

    pub fn touch(&self, key: impl Into<FieldKey>) -> FormResult<()> {
        let key = key.into();
        write_lock(&self.state, "touching field")?
            .ensure_meta(key)
            .touched = true;

        if self.options.validate_mode == ValidationMode::OnBlur {
            let _ = self.validate_field(key)?;
        }
        if self.options.revalidate_mode == RevalidateMode::OnBlur {
            self.revalidate_dependents(key)?;
        }
        Ok(())
    }

    /// Validates and, if every field passes, runs the submission function.
    ///
    /// Validation and submission failures are recorded in state; the returned value is the
    /// submit state after the attempt. `Err` is reserved for misuse such as overlapping submits.
    pub async fn submit(&self) -> FormResult<SubmitState> {
        let form_id = {
            let mut state = write_lock(&self.state, "preparing submit")?;
            if state.in_flight {
                return Err(FormError::AlreadySubmitting);
            }
            state.in_flight = true;
            state.submit_count = state.submit_count.saturating_add(1);
            state.id
        };
        let _attempt = SubmitAttempt { state: &self.state };

        let request = match self.prepare_submit() {
            Ok(Some(request)) => request,
            Ok(None) => {
                let mut state = write_lock(&self.state, "handling submit validation failure")?;
                state.in_flight = false;
                tracing::debug!(
                    form_id = form_id.0,
                    invalid_fields = state.errors.len(),
                    "submit blocked by validation"
                );
                return Ok(state.submission);
            }
            Err(error) => {
                if let Ok(mut state) = self.state.write() {
                    state.in_flight = false;
                }
                return Err(error);
            }
        };

        tracing::debug!(
            form_id = form_id.0,
            is_editing = request.is_editing,
            "submitting form"
        );
        let on_submit = &self.on_submit;
        let result = settle(async move { on_submit(request).await }).await;

        let submission = {
            let mut state = write_lock(&self.state, "completing submit")?;
            state.in_flight = false;
            match &result {
                Ok(()) => {
                    transition_submit_state(&mut state, SubmitState::Succeeded)?;
                    state.last_error = None;
                    if self.options.reset_after_success {
                        state.values = state.seed.clone();
                        state.field_meta.clear();
                    }
                }
                Err(error) => {
                    transition_submit_state(&mut state, SubmitState::Failed)?;
                    state.last_error = Some(error.to_string());
                }
            }
            state.submission
        };

        match result {
            Ok(()) => {
                tracing::debug!(form_id = form_id.0, "form submission succeeded");
                if let Some(close) = &self.on_close_requested {
                    close();
                }
            }
            Err(error) => {
                tracing::warn!(form_id = form_id.0, %error, "form submission failed");
            }
        }
        Ok(submission)
    }

    fn prepare_submit(&self) -> FormResult<Option<SubmitRequest>> {
        if !self.validate_form()? {
            return Ok(None);
        }
        let mut state = write_lock(&self.state, "moving submit state to pending")?;
        transition_submit_state(&mut state, SubmitState::Pending)?;
        Ok(Some(SubmitRequest {
            values: state.values.clone(),
            is_editing: state.item.is_some(),
            context: self.context.clone(),
        }))
    }

    /// Re-evaluates every field with a rule or descriptor. Errors of fields that were not
    /// evaluated (for instance server-side messages) are left in place.
    pub fn validate_form(&self) -> FormResult<bool> {
        let values = read_lock(&self.state, "reading values for form validation")?
            .values
            .clone();
        let rules = read_lock(&self.rules, "reading rules for form validation")?.clone();
        let descriptors =
            read_lock(&self.descriptors, "reading descriptors for form validation")?.clone();

        let mut keys = rules.keys().collect::<BTreeSet<_>>();
        keys.extend(descriptors.iter().map(|descriptor| descriptor.key));
        let results = keys
            .into_iter()
            .map(|key| (key, evaluate_field(key, &values, &rules, &descriptors)))
            .collect::<Vec<_>>();

        let mut state = write_lock(&self.state, "applying form validation result")?;
        for (key, message) in results {
            match message {
                Some(message) => {
                    state.errors.insert(key, message);
                }
                None => {
                    state.errors.remove(&key);
                }
            }
        }
        Ok(state.errors.is_empty())
    }

    pub fn validate_field(&self, key: impl Into<FieldKey>) -> FormResult<bool> {
        let key = key.into();
        let values = read_lock(&self.state, "reading values for field validation")?
            .values
            .clone();
        let message = {
            let rules = read_lock(&self.rules, "reading rules for field validation")?;
            let descriptors =
                read_lock(&self.descriptors, "reading descriptors for field validation")?;
            evaluate_field(key, &values, &rules, &descriptors)
        };

        let mut state = write_lock(&self.state, "writing field validation result")?;
        match message {
            Some(message) => {
                state.errors.insert(key, message);
                Ok(false)
            }
            None => {
                state.errors.remove(&key);
                Ok(true)
            }
        }
    }

    pub(super) fn revalidate_dependents(&self, source: FieldKey) -> FormResult<()> {
        let dependents = read_lock(&self.dependencies, "reading field dependencies")?
            .get(&source)
            .cloned()
            .unwrap_or_default();
        for dependent in dependents {
            let _ = self.validate_field(dependent)?;
        }
        Ok(())
    }

    /// Records an error that did not come from a local rule, e.g. a server-side message.
    pub fn set_field_error(
        &self,
        key: impl Into<FieldKey>,
        message: impl Into<String>,
    ) -> FormResult<()> {
        write_lock(&self.state, "setting field error")?
            .errors
            .insert(key.into(), message.into());
        Ok(())
    }

    pub fn clear_errors(&self) -> FormResult<()> {
        write_lock(&self.state, "clearing all field errors")?
            .errors
            .clear();
        Ok(())
    }

    pub fn clear_field_error(&self, key: impl Into<FieldKey>) -> FormResult<()> {
        write_lock(&self.state, "clearing field error")?
            .errors
            .remove(&key.into());
        Ok(())
    }

    pub fn reset_to_initial(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "resetting form")?;
        if state.in_flight {
            return Err(FormError::AlreadySubmitting);
        }
        let item = state.item.clone();
        state.reseed(item);
        Ok(())
    }

    pub fn reset_field(&self, key: impl Into<FieldKey>) -> FormResult<()> {
        let key = key.into();
        let mut state = write_lock(&self.state, "resetting field")?;
        match state.seed.get(key).cloned() {
            Some(initial) => {
                state.values.insert(key, initial);
            }
            None => {
                state.values.remove(key);
            }
        }
        state.errors.remove(&key);
        state.field_meta.remove(&key);
        Ok(())
    }

    pub fn snapshot(&self) -> FormResult<FormSnapshot<T>> {
        let state = read_lock(&self.state, "creating form snapshot")?;
        Ok(FormSnapshot {
            form_id: state.id,
            mode: state.mode(),
            item: state.item.clone(),
            values: state.values.clone(),
            errors: state.errors.clone(),
            field_meta: state.field_meta.clone(),
            submission: state.submission,
            submit_count: state.submit_count,
            is_dirty: state.field_meta.values().any(|meta| meta.dirty),
            is_valid: state.errors.is_empty(),
            last_error: state.last_error.clone(),
        })
    }

    pub fn field_meta(&self, key: impl Into<FieldKey>) -> FormResult<Option<FieldMeta>> {
        Ok(read_lock(&self.state, "reading field meta")?
            .field_meta
            .get(&key.into())
            .copied())
    }

    pub fn is_submitting(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading submit progress")?.in_flight)
    }
}

pub(super) fn seed_values<T: FormModel>(defaults: &Values, item: Option<&Arc<T>>) -> Values {
    let mut values = defaults.clone();
    if let Some(item) = item {
        values.overlay(&item.to_values());
    }
    values
}

/// Ends a submit attempt however `submit` exits, so an unwinding callback or a dropped
/// future cannot leave the form locked in `Pending`.
struct SubmitAttempt<'a, T> {
    state: &'a RwLock<FormState<T>>,
}

impl<T> Drop for SubmitAttempt<'_, T> {
    fn drop(&mut self) {
        let Ok(mut state) = self.state.write() else {
            return;
        };
        if !state.in_flight {
            return;
        }
        state.in_flight = false;
        if state.submission == SubmitState::Pending
            && transition_submit_state(&mut state, SubmitState::Failed).is_ok()
        {
            state.last_error = Some("submission was interrupted".to_string());
        }
    }
}

fn same_item<T>(current: &Option<Arc<T>>, next: &Option<Arc<T>>) -> bool {
    match (current, next) {
        (None, None) => true,
        (Some(current), Some(next)) => Arc::ptr_eq(current, next),
        _ => false,
    }
}

fn evaluate_field(
    key: FieldKey,
    values: &Values,
    rules: &FieldRules,
    descriptors: &[FieldDescriptor],
) -> Option<String> {
    rules.check_field(key, values).or_else(|| {
        descriptors
            .iter()
            .find(|descriptor| descriptor.key == key)
            .and_then(|descriptor| descriptor.check(values.value(key)))
    })
}

pub(super) fn transition_submit_state<T>(
    state: &mut FormState<T>,
    next: SubmitState,
) -> FormResult<()> {
    let current = state.submission;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Pending)
            | (SubmitState::Succeeded, SubmitState::Pending)
            | (SubmitState::Failed, SubmitState::Pending)
            | (SubmitState::Pending, SubmitState::Succeeded)
            | (SubmitState::Pending, SubmitState::Failed)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    state.submission = next;
    Ok(())
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}

use super::controller::{
    FormController, FormMode, FormResult, SubmitState, read_lock, write_lock,
};
use super::validation::FieldErrors;
use super::value::{Field, FieldKey, FieldType, FieldValue, FormModel, Values};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            value,
        }
    }

    pub fn label(mut self, value: impl Into<String>) -> Self {
        self.label = value.into();
        self
    }
}

/// What a field is, and therefore which [`FieldValue`] shape it holds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldKind {
    Text,
    Textarea,
    Password,
    Number,
    Checkbox,
    Select(Vec<SelectOption>),
    MultiSelect(Vec<SelectOption>),
    RadioGroup(Vec<SelectOption>),
    FileUpload {
        accept: Vec<String>,
        max_bytes: Option<u64>,
    },
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Password => "password",
            FieldKind::Number => "number",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Select(_) => "select",
            FieldKind::MultiSelect(_) => "multiselect",
            FieldKind::RadioGroup(_) => "radio group",
            FieldKind::FileUpload { .. } => "file upload",
        }
    }

    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (_, FieldValue::Empty)
                | (
                    FieldKind::Text
                        | FieldKind::Textarea
                        | FieldKind::Password
                        | FieldKind::Select(_)
                        | FieldKind::RadioGroup(_),
                    FieldValue::Text(_)
                )
                | (FieldKind::Number, FieldValue::Number(_))
                | (FieldKind::Checkbox, FieldValue::Bool(_))
                | (FieldKind::MultiSelect(_), FieldValue::List(_))
                | (FieldKind::FileUpload { .. }, FieldValue::File(_))
        )
    }

    /// Value a freshly created field of this kind starts with.
    pub fn empty_value(&self) -> FieldValue {
        match self {
            FieldKind::Text | FieldKind::Textarea | FieldKind::Password => {
                FieldValue::Text(String::new())
            }
            FieldKind::Checkbox => FieldValue::Bool(false),
            FieldKind::MultiSelect(_) => FieldValue::List(Vec::new()),
            _ => FieldValue::Empty,
        }
    }

    /// Constraints implied by the kind itself: option membership and accepted file types.
    pub fn check(&self, value: &FieldValue) -> Option<String> {
        match (self, value) {
            (FieldKind::Select(options) | FieldKind::RadioGroup(options), FieldValue::Text(text))
                if !text.is_empty() && !has_option(options, text) =>
            {
                Some("Select one of the available options".to_string())
            }
            (FieldKind::MultiSelect(options), FieldValue::List(items))
                if items.iter().any(|item| !has_option(options, item)) =>
            {
                Some("Select only the available options".to_string())
            }
            (FieldKind::FileUpload { accept, max_bytes }, FieldValue::File(file)) => {
                let accepted = accept.is_empty()
                    || file.extension().is_some_and(|ext| {
                        accept
                            .iter()
                            .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
                    });
                if !accepted {
                    return Some(format!("Accepted file types: {}", accept.join(", ")));
                }
                max_bytes
                    .filter(|max| file.size_bytes > *max)
                    .map(|max| format!("File must not exceed {max} bytes"))
            }
            _ => None,
        }
    }
}

fn has_option(options: &[SelectOption], value: &str) -> bool {
    options.iter().any(|option| option.value == value)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldDescriptor {
    pub key: FieldKey,
    pub label: String,
    pub kind: FieldKind,
    pub description: Option<String>,
    pub placeholder: Option<String>,
    pub required: bool,
}

impl FieldDescriptor {
    pub fn new(key: impl Into<FieldKey>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            kind,
            description: None,
            placeholder: None,
            required: false,
        }
    }

    pub fn text(key: impl Into<FieldKey>, label: impl Into<String>) -> Self {
        Self::new(key, label, FieldKind::Text)
    }

    pub fn select(
        key: impl Into<FieldKey>,
        label: impl Into<String>,
        options: impl IntoIterator<Item = SelectOption>,
    ) -> Self {
        Self::new(key, label, FieldKind::Select(options.into_iter().collect()))
    }

    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.description = Some(value.into());
        self
    }

    pub fn placeholder(mut self, value: impl Into<String>) -> Self {
        self.placeholder = Some(value.into());
        self
    }

    pub fn required(mut self, value: bool) -> Self {
        self.required = value;
        self
    }

    pub fn check(&self, value: &FieldValue) -> Option<String> {
        if self.required && value.is_blank() {
            return Some(format!("{} is required", self.label));
        }
        self.kind.check(value)
    }
}

pub(super) fn upsert_descriptor(
    descriptors: &mut Vec<FieldDescriptor>,
    descriptor: FieldDescriptor,
) {
    match descriptors.iter_mut().find(|existing| existing.key == descriptor.key) {
        Some(existing) => *existing = descriptor,
        None => descriptors.push(descriptor),
    }
}

/// One field as handed to a [`FieldRenderer`].
#[derive(Clone, Copy, Debug)]
pub struct RenderField<'a> {
    pub descriptor: &'a FieldDescriptor,
    pub value: &'a FieldValue,
    pub error: Option<&'a str>,
    pub required: bool,
}

pub trait FieldRenderer {
    type Output;

    fn render_field(&self, field: RenderField<'_>) -> Self::Output;
}

impl<F, O> FieldRenderer for F
where
    F: for<'a> Fn(RenderField<'a>) -> O,
{
    type Output = O;

    fn render_field(&self, field: RenderField<'_>) -> Self::Output {
        (self)(field)
    }
}

/// Write access handed to render callbacks. It is the only way they mutate the form.
pub struct FieldSetter<T: FormModel> {
    controller: FormController<T>,
}

impl<T: FormModel> Clone for FieldSetter<T> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
        }
    }
}

impl<T: FormModel> FieldSetter<T> {
    pub fn set_value(
        &self,
        key: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
    ) -> FormResult<()> {
        self.controller.set_value(key, value)
    }

    pub fn set<V: FieldType>(&self, field: Field<V>, value: V) -> FormResult<()> {
        self.controller.set(field, value)
    }

    pub fn touch(&self, key: impl Into<FieldKey>) -> FormResult<()> {
        self.controller.touch(key)
    }
}

pub struct FormView<'a, T: FormModel> {
    pub mode: FormMode,
    pub values: &'a Values,
    pub errors: &'a FieldErrors,
    pub submission: SubmitState,
    pub setter: FieldSetter<T>,
}

impl<T: FormModel> FormView<'_, T> {
    pub fn is_editing(&self) -> bool {
        self.mode == FormMode::Edit
    }

    pub fn is_busy(&self) -> bool {
        self.submission == SubmitState::Pending
    }
}

impl<T: FormModel> FormController<T> {
    pub fn register_field(&self, descriptor: FieldDescriptor) -> FormResult<()> {
        let mut descriptors = write_lock(&self.descriptors, "registering field descriptor")?;
        upsert_descriptor(&mut descriptors, descriptor);
        Ok(())
    }

    pub fn descriptor(&self, key: impl Into<FieldKey>) -> FormResult<Option<FieldDescriptor>> {
        let key = key.into();
        Ok(read_lock(&self.descriptors, "reading field descriptor")?
            .iter()
            .find(|descriptor| descriptor.key == key)
            .cloned())
    }

    pub fn is_required(&self, key: impl Into<FieldKey>) -> FormResult<bool> {
        let key = key.into();
        let by_rule = read_lock(&self.rules, "reading rules for required flag")?
            .get(key)
            .is_some_and(|rule| rule.is_required());
        Ok(by_rule || self.descriptor(key)?.is_some_and(|descriptor| descriptor.required))
    }

    /// Error to show next to a field: hidden until the field was touched or a submit was tried.
    pub fn field_error_for_display(&self, key: impl Into<FieldKey>) -> FormResult<Option<String>> {
        let key = key.into();
        let state = read_lock(&self.state, "reading display error message")?;
        let touched = state.field_meta.get(&key).is_some_and(|meta| meta.touched);
        if !touched && state.submit_count == 0 {
            return Ok(None);
        }
        Ok(state.errors.get(&key).cloned())
    }

    pub fn render<R>(&self, render: impl FnOnce(FormView<'_, T>) -> R) -> FormResult<R> {
        let snapshot = self.snapshot()?;
        Ok(render(FormView {
            mode: snapshot.mode,
            values: &snapshot.values,
            errors: &snapshot.errors,
            submission: snapshot.submission,
            setter: FieldSetter {
                controller: self.clone(),
            },
        }))
    }

    /// Renders every registered field, in registration order.
    pub fn render_fields<R>(&self, renderer: &R) -> FormResult<Vec<R::Output>>
    where
        R: FieldRenderer,
    {
        let descriptors =
            read_lock(&self.descriptors, "reading descriptors for rendering")?.clone();
        let values = self.values()?;
        let mut rendered = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let error = self.field_error_for_display(descriptor.key)?;
            let required = self.is_required(descriptor.key)?;
            rendered.push(renderer.render_field(RenderField {
                descriptor,
                value: values.value(descriptor.key),
                error: error.as_deref(),
                required,
            }));
        }
        Ok(rendered)
    }
}

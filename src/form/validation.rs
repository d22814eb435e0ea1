use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;

use super::value::{FieldKey, FieldValue, Values};

pub type FieldErrors = BTreeMap<FieldKey, String>;

pub(crate) type RuleFn = Arc<dyn Fn(&FieldValue, &Values) -> Option<String> + Send + Sync>;

const DEFAULT_REQUIRED_MESSAGE: &str = "This field is required";
const DEFAULT_PATTERN_MESSAGE: &str = "Invalid format";

/// Declarative rule for one field.
///
/// Checks run in order `required`, length bounds, `pattern`, `validate`; the first failing
/// check produces the field's message. Length and pattern checks only apply to non-blank text.
#[derive(Clone, Default)]
pub struct FieldRule {
    required: bool,
    message: Option<String>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<(Regex, String)>,
    validate: Option<RuleFn>,
}

impl FieldRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    /// Message reported when the `required` check fails.
    pub fn message(mut self, value: impl Into<String>) -> Self {
        self.message = Some(value.into());
        self
    }

    pub fn min_length(mut self, value: usize) -> Self {
        self.min_length = Some(value);
        self
    }

    pub fn max_length(mut self, value: usize) -> Self {
        self.max_length = Some(value);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some((pattern, DEFAULT_PATTERN_MESSAGE.to_string()));
        self
    }

    pub fn pattern_with_message(mut self, pattern: Regex, message: impl Into<String>) -> Self {
        self.pattern = Some((pattern, message.into()));
        self
    }

    pub fn validate(
        mut self,
        validator: impl Fn(&FieldValue, &Values) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Arc::new(validator));
        self
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn check(&self, value: &FieldValue, all_values: &Values) -> Option<String> {
        if value.is_blank() {
            if self.required {
                return Some(
                    self.message
                        .clone()
                        .unwrap_or_else(|| DEFAULT_REQUIRED_MESSAGE.to_string()),
                );
            }
        } else if let Some(text) = value.as_text() {
            let length = text.chars().count();
            if let Some(min) = self.min_length.filter(|min| length < *min) {
                return Some(format!("Must be at least {min} characters"));
            }
            if let Some(max) = self.max_length.filter(|max| length > *max) {
                return Some(format!("Must be at most {max} characters"));
            }
            if let Some((pattern, message)) = &self.pattern
                && !pattern.is_match(text)
            {
                return Some(message.clone());
            }
        }

        self.validate
            .as_ref()
            .and_then(|validator| validator(value, all_values))
    }
}

impl std::fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRule")
            .field("required", &self.required)
            .field("message", &self.message)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("pattern", &self.pattern.as_ref().map(|(re, _)| re.as_str()))
            .field("validate", &self.validate.is_some())
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct FieldRules(BTreeMap<FieldKey, FieldRule>);

impl FieldRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, key: impl Into<FieldKey>, rule: FieldRule) -> Self {
        self.insert(key, rule);
        self
    }

    pub fn insert(&mut self, key: impl Into<FieldKey>, rule: FieldRule) {
        self.0.insert(key.into(), rule);
    }

    pub fn get(&self, key: impl Into<FieldKey>) -> Option<&FieldRule> {
        self.0.get(&key.into())
    }

    pub fn keys(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.0.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn check_field(&self, key: FieldKey, values: &Values) -> Option<String> {
        self.0
            .get(&key)
            .and_then(|rule| rule.check(values.value(key), values))
    }

    /// Evaluates every rule, returning only the fields that fail.
    pub fn evaluate(&self, values: &Values) -> FieldErrors {
        self.0
            .iter()
            .filter_map(|(key, rule)| {
                rule.check(values.value(*key), values)
                    .map(|message| (*key, message))
            })
            .collect()
    }
}

/// Field rules keyed by wizard step number.
#[derive(Clone, Debug, Default)]
pub struct ValidationSchema {
    steps: BTreeMap<usize, FieldRules>,
}

impl ValidationSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, index: usize, rules: FieldRules) -> Self {
        self.steps.insert(index, rules);
        self
    }

    pub fn rules_for(&self, index: usize) -> Option<&FieldRules> {
        self.steps.get(&index)
    }

    pub fn fields_for(&self, index: usize) -> impl Iterator<Item = FieldKey> + '_ {
        self.steps.get(&index).into_iter().flat_map(FieldRules::keys)
    }

    pub fn evaluate(&self, index: usize, collected: &Values) -> FieldErrors {
        self.steps
            .get(&index)
            .map(|rules| rules.evaluate(collected))
            .unwrap_or_default()
    }
}

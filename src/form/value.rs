use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct FieldKey(&'static str);

impl FieldKey {
    pub const fn new(value: &'static str) -> Self {
        Self(value)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl From<&'static str> for FieldKey {
    fn from(value: &'static str) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FileRef {
    pub name: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl FileRef {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            media_type: None,
        }
    }

    pub fn media_type(mut self, value: impl Into<String>) -> Self {
        self.media_type = Some(value.into());
        self
    }

    /// Lower-cased extension of the file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Empty,
    Text(String),
    Number(Decimal),
    Bool(bool),
    List(Vec<String>),
    File(FileRef),
}

impl FieldValue {
    pub fn shape(&self) -> ValueShape {
        match self {
            FieldValue::Empty => ValueShape::Empty,
            FieldValue::Text(_) => ValueShape::Text,
            FieldValue::Number(_) => ValueShape::Number,
            FieldValue::Bool(_) => ValueShape::Bool,
            FieldValue::List(_) => ValueShape::List,
            FieldValue::File(_) => ValueShape::File,
        }
    }

    /// Whether the value counts as "not filled in" for a `required` rule.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Text(text) => text.trim().is_empty(),
            FieldValue::Bool(checked) => !checked,
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Number(_) | FieldValue::File(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileRef> {
        match self {
            FieldValue::File(file) => Some(file),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        FieldValue::Number(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

impl From<FileRef> for FieldValue {
    fn from(value: FileRef) -> Self {
        FieldValue::File(value)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueShape {
    Empty,
    Text,
    Number,
    Bool,
    List,
    File,
}

impl Display for ValueShape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueShape::Empty => "empty",
            ValueShape::Text => "text",
            ValueShape::Number => "number",
            ValueShape::Bool => "bool",
            ValueShape::List => "list",
            ValueShape::File => "file",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("field `{0}` is missing")]
    Missing(FieldKey),
    #[error("field `{key}` holds a {found} value, expected {expected}")]
    TypeMismatch {
        key: FieldKey,
        expected: &'static str,
        found: ValueShape,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Values(BTreeMap<FieldKey, FieldValue>);

impl Values {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, key: impl Into<FieldKey>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(
        &mut self,
        key: impl Into<FieldKey>,
        value: impl Into<FieldValue>,
    ) -> Option<FieldValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: impl Into<FieldKey>) -> Option<&FieldValue> {
        self.0.get(&key.into())
    }

    /// Value of `key`, treating an absent key as [`FieldValue::Empty`].
    pub fn value(&self, key: impl Into<FieldKey>) -> &FieldValue {
        static EMPTY: FieldValue = FieldValue::Empty;
        self.0.get(&key.into()).unwrap_or(&EMPTY)
    }

    pub fn remove(&mut self, key: impl Into<FieldKey>) -> Option<FieldValue> {
        self.0.remove(&key.into())
    }

    pub fn contains_key(&self, key: impl Into<FieldKey>) -> bool {
        self.0.contains_key(&key.into())
    }

    pub fn keys(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldKey, &FieldValue)> + '_ {
        self.0.iter().map(|(key, value)| (*key, value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copies every entry of `other` over `self`, keeping keys only `self` has.
    pub fn overlay(&mut self, other: &Values) {
        for (key, value) in other.iter() {
            self.0.insert(key, value.clone());
        }
    }

    pub fn read<V: FieldType>(&self, key: impl Into<FieldKey>) -> Result<V, ValueError> {
        let key = key.into();
        let value = self.value(key);
        V::from_value(value).ok_or_else(|| {
            if self.0.contains_key(&key) {
                ValueError::TypeMismatch {
                    key,
                    expected: V::EXPECTED,
                    found: value.shape(),
                }
            } else {
                ValueError::Missing(key)
            }
        })
    }

    pub fn write<V: FieldType>(&mut self, key: impl Into<FieldKey>, value: V) {
        self.0.insert(key.into(), value.into_value());
    }

    /// JSON object payload for submission handlers.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl FromIterator<(FieldKey, FieldValue)> for Values {
    fn from_iter<I: IntoIterator<Item = (FieldKey, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Values {
    type Item = (FieldKey, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<FieldKey, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Conversion between a Rust field type and its [`FieldValue`] representation.
pub trait FieldType: Clone + Send + Sync + 'static {
    const EXPECTED: &'static str;

    fn into_value(self) -> FieldValue;
    fn from_value(value: &FieldValue) -> Option<Self>;
}

impl FieldType for String {
    const EXPECTED: &'static str = "text";

    fn into_value(self) -> FieldValue {
        FieldValue::Text(self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Text(text) => Some(text.clone()),
            FieldValue::Empty => Some(String::new()),
            _ => None,
        }
    }
}

impl FieldType for bool {
    const EXPECTED: &'static str = "bool";

    fn into_value(self) -> FieldValue {
        FieldValue::Bool(self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(checked) => Some(*checked),
            FieldValue::Empty => Some(false),
            _ => None,
        }
    }
}

impl FieldType for Decimal {
    const EXPECTED: &'static str = "number";

    fn into_value(self) -> FieldValue {
        FieldValue::Number(self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        value.as_number()
    }
}

impl FieldType for Vec<String> {
    const EXPECTED: &'static str = "list";

    fn into_value(self) -> FieldValue {
        FieldValue::List(self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::List(items) => Some(items.clone()),
            FieldValue::Empty => Some(Vec::new()),
            _ => None,
        }
    }
}

impl FieldType for FileRef {
    const EXPECTED: &'static str = "file";

    fn into_value(self) -> FieldValue {
        FieldValue::File(self)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        value.as_file().cloned()
    }
}

impl<V: FieldType> FieldType for Option<V> {
    const EXPECTED: &'static str = V::EXPECTED;

    fn into_value(self) -> FieldValue {
        self.map_or(FieldValue::Empty, FieldType::into_value)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Empty => Some(None),
            other => V::from_value(other).map(Some),
        }
    }
}

/// Typed handle to one field of a model.
pub struct Field<V> {
    key: FieldKey,
    _value: PhantomData<fn() -> V>,
}

impl<V> Field<V> {
    pub const fn new(key: &'static str) -> Self {
        Self {
            key: FieldKey::new(key),
            _value: PhantomData,
        }
    }

    pub const fn key(self) -> FieldKey {
        self.key
    }
}

impl<V> Clone for Field<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Field<V> {}

impl<V> std::fmt::Debug for Field<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Field").field(&self.key).finish()
    }
}

impl<V> From<Field<V>> for FieldKey {
    fn from(field: Field<V>) -> Self {
        field.key
    }
}

pub trait FormModel: Clone + Send + Sync + 'static {
    type Fields;

    fn fields() -> Self::Fields;
    fn to_values(&self) -> Values;
    fn from_values(values: &Values) -> Result<Self, ValueError>;
}

impl FormModel for Values {
    type Fields = ();

    fn fields() -> Self::Fields {}

    fn to_values(&self) -> Values {
        self.clone()
    }

    fn from_values(values: &Values) -> Result<Self, ValueError> {
        Ok(values.clone())
    }
}

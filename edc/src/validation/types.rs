//! Submitted records, coerced values and validation results.

use crate::schema::expr::Value;
use crate::schema::types::Bound;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A raw input value as submitted by the data-entry layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    /// Explicit null / cleared input
    Null,
    /// Boolean widget value
    Bool(bool),
    /// Numeric widget value
    Number(f64),
    /// Text input
    Text(String),
    /// Multi-select input
    List(Vec<RawValue>),
}

impl RawValue {
    /// True for null, whitespace-only text and empty lists.
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.iter().all(RawValue::is_missing),
            Self::Bool(_) | Self::Number(_) => false,
        }
    }

    /// Scalar rendered as text; `None` for null and lists.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Null | Self::List(_) => None,
        }
    }

    pub(crate) fn to_expr_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(*n),
            Self::Text(s) => Value::Text(s.clone()),
            Self::List(items) => Value::List(items.iter().map(RawValue::to_expr_value).collect()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<RawValue>> From<Vec<T>> for RawValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Field name → raw value mapping for one submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmittedRecord(BTreeMap<String, RawValue>);

impl SubmittedRecord {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Sets a field's raw value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<RawValue>) {
        self.0.insert(field.into(), value.into());
    }

    /// Raw value of a field.
    pub fn get(&self, field: &str) -> Option<&RawValue> {
        self.0.get(field)
    }

    /// Field names present in the submission.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of submitted fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing was submitted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<RawValue>> FromIterator<(K, V)> for SubmittedRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Typed value produced by coercion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Text kinds
    Text(String),
    /// Numeric kinds
    #[serde(serialize_with = "serialize_number")]
    Number(f64),
    /// Single checkbox
    Bool(bool),
    /// Date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Date and time
    DateTime(NaiveDateTime),
    /// Single choice (select, radio)
    Choice(String),
    /// Multiple choices (checkbox group), in submission order
    Choices(Vec<String>),
}

fn serialize_number<S: Serializer>(n: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        serializer.serialize_i64(*n as i64)
    } else {
        serializer.serialize_f64(*n)
    }
}

impl FieldValue {
    pub(crate) fn to_expr_value(&self) -> Value {
        match self {
            Self::Text(s) | Self::Choice(s) => Value::Text(s.clone()),
            Self::Number(n) => Value::Number(*n),
            Self::Bool(b) => Value::Bool(*b),
            Self::Date(d) => Value::Date(*d),
            Self::Time(t) => Value::Time(*t),
            Self::DateTime(dt) => Value::DateTime(*dt),
            Self::Choices(items) => {
                Value::List(items.iter().map(|s| Value::Text(s.clone())).collect())
            }
        }
    }

    pub(crate) fn as_bound(&self) -> Option<Bound> {
        match self {
            Self::Number(n) => Some(Bound::Number(*n)),
            Self::Date(d) => Some(Bound::Date(*d)),
            Self::Time(t) => Some(Bound::Time(*t)),
            Self::DateTime(dt) => Some(Bound::DateTime(*dt)),
            _ => None,
        }
    }
}

/// Per-field validation error. `Display` yields the user-facing message.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    /// Required field left empty
    Required,
    /// Numeric parse failure
    NotNumeric,
    /// Date / time / datetime parse failure
    InvalidDateTime,
    /// E-mail pattern mismatch
    InvalidEmail,
    /// Value outside `choices` (or not a boolean for a checkbox)
    InvalidSelection,
    /// Value outside the inclusive bounds
    OutOfRange {
        /// Lower bound
        min: Option<Bound>,
        /// Upper bound
        max: Option<Bound>,
    },
    /// `validity_expression` evaluated to false
    ValidityFailed(Option<String>),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("field is required"),
            Self::NotNumeric => f.write_str("must be numeric"),
            Self::InvalidDateTime => f.write_str("must be a valid date/time"),
            Self::InvalidEmail => f.write_str("must be a valid email address"),
            Self::InvalidSelection => f.write_str("invalid selection"),
            Self::OutOfRange { min, max } => {
                let render = |b: &Option<Bound>| b.map(|b| b.to_string()).unwrap_or_default();
                write!(f, "value out of range [{},{}]", render(min), render(max))
            }
            Self::ValidityFailed(Some(message)) => f.write_str(message),
            Self::ValidityFailed(None) => f.write_str("validation failed"),
        }
    }
}

impl Serialize for FieldError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of one `validate` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    /// True iff no field produced an error
    pub valid: bool,
    /// Field name → errors in the order they were detected
    pub errors: BTreeMap<String, Vec<FieldError>>,
    /// Field name → coerced value, for fields that passed
    pub cleaned_data: BTreeMap<String, FieldValue>,
}

impl ValidationResult {
    pub(crate) fn new(
        errors: BTreeMap<String, Vec<FieldError>>,
        cleaned_data: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            cleaned_data,
        }
    }

    /// Error messages for one field (empty when the field passed).
    pub fn messages(&self, field: &str) -> Vec<String> {
        self.errors
            .get(field)
            .map(|errs| errs.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    /// Names of fields with at least one error.
    pub fn failed_fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }
}

//! Schema model: field kinds, field specs and compiled form schemas.

use super::expr::Expression;
use super::temporal::{parse_date, parse_datetime, parse_time};
use crate::common::error::SchemaError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// Input widget kind of a field, which decides how its raw value is coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free single-line text
    Text,
    /// Number (integer or decimal)
    #[serde(alias = "number")]
    Numeric,
    /// Calendar date (`YYYY-MM-DD`)
    Date,
    /// Time of day (`HH:MM[:SS]`)
    Time,
    /// Date and time
    #[serde(alias = "datetime_local")]
    Datetime,
    /// E-mail address
    Email,
    /// Single choice from a drop-down
    Select,
    /// Single choice from radio buttons
    Radio,
    /// Single yes/no checkbox
    Checkbox,
    /// Multiple choices from a checkbox group
    CheckboxGroup,
    /// Free multi-line text
    Textarea,
    /// Numeric slider
    Slider,
    /// Uploaded file reference
    File,
    /// Captured signature reference
    Signature,
}

impl FieldKind {
    /// All kinds, in declaration order.
    pub const ALL: [FieldKind; 14] = [
        Self::Text,
        Self::Numeric,
        Self::Date,
        Self::Time,
        Self::Datetime,
        Self::Email,
        Self::Select,
        Self::Radio,
        Self::Checkbox,
        Self::CheckboxGroup,
        Self::Textarea,
        Self::Slider,
        Self::File,
        Self::Signature,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Numeric => "numeric",
            Self::Date => "date",
            Self::Time => "time",
            Self::Datetime => "datetime",
            Self::Email => "email",
            Self::Select => "select",
            Self::Radio => "radio",
            Self::Checkbox => "checkbox",
            Self::CheckboxGroup => "checkbox_group",
            Self::Textarea => "textarea",
            Self::Slider => "slider",
            Self::File => "file",
            Self::Signature => "signature",
        }
    }

    /// Parses a kind name as written in a field-definition table.
    ///
    /// Case, surrounding whitespace and `-` versus `_` are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "number" => Some(Self::Numeric),
            "datetime_local" | "date_time" => Some(Self::Datetime),
            "checkboxgroup" => Some(Self::CheckboxGroup),
            other => Self::ALL.into_iter().find(|k| k.as_str() == other),
        }
    }

    /// Kinds whose values must come from `choices`.
    pub fn is_enumerated(&self) -> bool {
        matches!(self, Self::Select | Self::Radio | Self::CheckboxGroup)
    }

    /// Kinds that accept several values at once.
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, Self::CheckboxGroup)
    }

    fn bound_domain(&self) -> Option<BoundDomain> {
        match self {
            Self::Numeric | Self::Slider => Some(BoundDomain::Number),
            Self::Date => Some(BoundDomain::Date),
            Self::Time => Some(BoundDomain::Time),
            Self::Datetime => Some(BoundDomain::DateTime),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `min` / `max` literal as written in the schema source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoundValue {
    /// Numeric literal
    Number(f64),
    /// Textual literal (number or date text)
    Text(String),
}

impl fmt::Display for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for BoundValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for BoundValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for BoundValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for BoundValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundDomain {
    Number,
    Date,
    Time,
    DateTime,
}

/// A bound resolved against its field's kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    /// Numeric bound
    Number(f64),
    /// Date bound
    Date(NaiveDate),
    /// Time bound
    Time(NaiveTime),
    /// Datetime bound
    DateTime(NaiveDateTime),
}

impl PartialOrd for Bound {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b),
            (Self::Date(a), Self::Date(b)) => a.partial_cmp(b),
            (Self::Time(a), Self::Time(b)) => a.partial_cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Date(d) => write!(f, "{}", d),
            Self::Time(t) => write!(f, "{}", t),
            Self::DateTime(dt) => write!(f, "{}", dt),
        }
    }
}

impl Bound {
    fn resolve(field: &str, domain: BoundDomain, raw: &BoundValue) -> Result<Self, SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidBound {
            field: field.to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };
        match (domain, raw) {
            (BoundDomain::Number, BoundValue::Number(n)) if n.is_finite() => Ok(Self::Number(*n)),
            (BoundDomain::Number, BoundValue::Number(_)) => Err(invalid("not a finite number")),
            (BoundDomain::Number, BoundValue::Text(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Self::Number)
                .ok_or_else(|| invalid("not a number")),
            (_, BoundValue::Number(_)) => Err(invalid("expected a date/time literal")),
            (BoundDomain::Date, BoundValue::Text(s)) => parse_date(s)
                .map(Self::Date)
                .ok_or_else(|| invalid("expected YYYY-MM-DD")),
            (BoundDomain::Time, BoundValue::Text(s)) => parse_time(s)
                .map(Self::Time)
                .ok_or_else(|| invalid("expected HH:MM[:SS]")),
            (BoundDomain::DateTime, BoundValue::Text(s)) => parse_datetime(s)
                .map(Self::DateTime)
                .ok_or_else(|| invalid("expected YYYY-MM-DDTHH:MM[:SS]")),
        }
    }
}

/// One form field's type and validation rules. Pure data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Unique key within the form
    pub name: String,
    /// Widget kind
    #[serde(alias = "type")]
    pub kind: FieldKind,
    /// Whether a value must be supplied
    #[serde(default)]
    pub required: bool,
    /// Inclusive lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<BoundValue>,
    /// Inclusive upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<BoundValue>,
    /// Allowed values, in display order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    /// Applicability expression; the field is skipped when it is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Cross-field check evaluated once the field itself is valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_expression: Option<String>,
    /// Message reported when `validity_expression` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FieldSpec {
    /// Creates an optional field with no constraints.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            min: None,
            max: None,
            choices: Vec::new(),
            condition: None,
            validity_expression: None,
            error_message: None,
            label: None,
        }
    }

    /// Marks the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the inclusive lower bound.
    pub fn min(mut self, min: impl Into<BoundValue>) -> Self {
        self.min = Some(min.into());
        self
    }

    /// Sets the inclusive upper bound.
    pub fn max(mut self, max: impl Into<BoundValue>) -> Self {
        self.max = Some(max.into());
        self
    }

    /// Sets the allowed values.
    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the applicability condition.
    pub fn condition(mut self, expr: impl Into<String>) -> Self {
        self.condition = Some(expr.into());
        self
    }

    /// Sets the cross-field validity expression and its message.
    pub fn validity(mut self, expr: impl Into<String>, message: Option<&str>) -> Self {
        self.validity_expression = Some(expr.into());
        self.error_message = message.map(str::to_string);
        self
    }

    /// Sets the display label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Serialisable form definition (`{"name": ..., "fields": [...]}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDefinition {
    /// Form name
    pub name: String,
    /// Fields in display order
    pub fields: Vec<FieldSpec>,
}

/// A field whose bounds and expressions have been checked and compiled.
#[derive(Debug, Clone)]
pub(crate) struct CompiledField {
    pub(crate) spec: FieldSpec,
    pub(crate) min: Option<Bound>,
    pub(crate) max: Option<Bound>,
    pub(crate) condition: Option<Expression>,
    pub(crate) validity: Option<Expression>,
}

/// Named, ordered sequence of fields. Structurally valid by construction.
#[derive(Debug, Clone)]
pub struct FormSchema {
    name: String,
    fields: Vec<CompiledField>,
}

impl FormSchema {
    /// Builds a schema, rejecting structural problems.
    ///
    /// Checks: at least one field, non-empty unique names, known bounds for
    /// ordered kinds only, `min <= max`, non-empty `choices` for enumerated
    /// kinds, and parseable expressions that only reference fields of this
    /// form.
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Result<Self, SchemaError> {
        let name = name.into();
        if fields.is_empty() {
            return Err(SchemaError::EmptySchema(name));
        }

        let mut seen = HashSet::new();
        for (position, field) in fields.iter().enumerate() {
            let trimmed = field.name.trim();
            if trimmed.is_empty() {
                return Err(SchemaError::EmptyFieldName(position + 1));
            }
            if !seen.insert(trimmed.to_string()) {
                return Err(SchemaError::DuplicateField(trimmed.to_string()));
            }
        }

        let compiled = fields
            .into_iter()
            .map(|spec| compile_field(spec, &seen))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            fields: compiled,
        })
    }

    /// Builds a schema from a deserialised definition.
    pub fn from_definition(definition: FormDefinition) -> Result<Self, SchemaError> {
        Self::new(definition.name, definition.fields)
    }

    /// Form name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field specs in schema order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().map(|f| &f.spec)
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields().find(|f| f.name == name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always false for a constructed schema.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialisable copy of the definition.
    pub fn definition(&self) -> FormDefinition {
        FormDefinition {
            name: self.name.clone(),
            fields: self.fields().cloned().collect(),
        }
    }

    pub(crate) fn compiled_fields(&self) -> &[CompiledField] {
        &self.fields
    }
}

fn compile_field(mut spec: FieldSpec, names: &HashSet<String>) -> Result<CompiledField, SchemaError> {
    spec.name = spec.name.trim().to_string();
    let field = spec.name.clone();

    spec.choices = spec
        .choices
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if spec.kind.is_enumerated() && spec.choices.is_empty() {
        return Err(SchemaError::MissingChoices {
            field,
            kind: spec.kind.to_string(),
        });
    }

    let (min, max) = match (spec.kind.bound_domain(), &spec.min, &spec.max) {
        (_, None, None) => (None, None),
        (None, _, _) => {
            return Err(SchemaError::BoundsNotSupported {
                field,
                kind: spec.kind.to_string(),
            })
        }
        (Some(domain), min, max) => {
            let min = min
                .as_ref()
                .map(|raw| Bound::resolve(&field, domain, raw))
                .transpose()?;
            let max = max
                .as_ref()
                .map(|raw| Bound::resolve(&field, domain, raw))
                .transpose()?;
            (min, max)
        }
    };
    if let (Some(lo), Some(hi)) = (&min, &max) {
        if lo > hi {
            return Err(SchemaError::InvertedRange {
                field,
                min: lo.to_string(),
                max: hi.to_string(),
            });
        }
    }

    let condition = compile_expression(&field, spec.condition.as_deref(), names)?;
    let validity = compile_expression(&field, spec.validity_expression.as_deref(), names)?;

    Ok(CompiledField {
        spec,
        min,
        max,
        condition,
        validity,
    })
}

fn compile_expression(
    field: &str,
    source: Option<&str>,
    names: &HashSet<String>,
) -> Result<Option<Expression>, SchemaError> {
    let Some(source) = source.filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    let expr = Expression::parse(source).map_err(|source| SchemaError::Expression {
        field: field.to_string(),
        source,
    })?;
    if let Some(unknown) = expr.references().into_iter().find(|r| !names.contains(*r)) {
        return Err(SchemaError::UnknownReference {
            field: field.to_string(),
            reference: unknown.to_string(),
        });
    }
    Ok(Some(expr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_kind_parse_aliases() {
        assert_eq!(FieldKind::parse("Numeric"), Some(FieldKind::Numeric));
        assert_eq!(FieldKind::parse("number"), Some(FieldKind::Numeric));
        assert_eq!(FieldKind::parse("checkbox-group"), Some(FieldKind::CheckboxGroup));
        assert_eq!(FieldKind::parse(" datetime "), Some(FieldKind::Datetime));
        assert_eq!(FieldKind::parse("colour"), None);
        for kind in FieldKind::ALL {
            assert_eq!(FieldKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_schema_keeps_declaration_order() {
        let schema = FormSchema::new(
            "demographics",
            vec![
                FieldSpec::new("subject_id", FieldKind::Text).required(),
                FieldSpec::new("age", FieldKind::Numeric).min(18).max(120),
                FieldSpec::new("sex", FieldKind::Radio).choices(["F", "M"]),
            ],
        )
        .unwrap();
        let names: Vec<&str> = schema.fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["subject_id", "age", "sex"]);
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.field("age").map(|f| f.kind), Some(FieldKind::Numeric));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = FormSchema::new(
            "f",
            vec![
                FieldSpec::new("age", FieldKind::Numeric),
                FieldSpec::new(" age", FieldKind::Text),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField(name) if name == "age"));
    }

    #[test]
    fn test_empty_choices_rejected_for_enumerated_kinds() {
        for kind in [FieldKind::Select, FieldKind::Radio, FieldKind::CheckboxGroup] {
            let err = FormSchema::new("f", vec![FieldSpec::new("x", kind).choices([" "])])
                .unwrap_err();
            assert!(matches!(err, SchemaError::MissingChoices { .. }), "{kind}");
        }
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = FormSchema::new(
            "f",
            vec![FieldSpec::new("age", FieldKind::Numeric).min(120).max(18)],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Field 'age' has min 120 greater than max 18");

        let err = FormSchema::new(
            "f",
            vec![FieldSpec::new("visit", FieldKind::Date)
                .min("2024-12-31")
                .max("2024-01-01")],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvertedRange { .. }));
    }

    #[test]
    fn test_bounds_resolved_per_kind() {
        let err = FormSchema::new("f", vec![FieldSpec::new("visit", FieldKind::Date).min(5)])
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidBound { .. }));

        let err = FormSchema::new("f", vec![FieldSpec::new("age", FieldKind::Numeric).min("ten")])
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidBound { .. }));

        let err = FormSchema::new("f", vec![FieldSpec::new("notes", FieldKind::Textarea).max(3)])
            .unwrap_err();
        assert!(matches!(err, SchemaError::BoundsNotSupported { .. }));

        let schema = FormSchema::new(
            "f",
            vec![FieldSpec::new("dose", FieldKind::Slider).min("0").max(10.5)],
        )
        .unwrap();
        let compiled = &schema.compiled_fields()[0];
        assert_eq!(compiled.min, Some(Bound::Number(0.0)));
        assert_eq!(compiled.max, Some(Bound::Number(10.5)));
    }

    #[test]
    fn test_expression_errors_surface_at_load_time() {
        let err = FormSchema::new(
            "f",
            vec![FieldSpec::new("packs", FieldKind::Numeric).condition("smoker ==")],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Expression { ref field, .. } if field == "packs"));

        let err = FormSchema::new(
            "f",
            vec![FieldSpec::new("packs", FieldKind::Numeric).condition("smoker == 'yes'")],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnknownReference { ref reference, .. } if reference == "smoker"
        ));
    }

    #[test]
    fn test_oversized_expressions_rejected_at_load_time() {
        use crate::schema::expr::ExprError;

        let deep = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let err = FormSchema::new(
            "f",
            vec![FieldSpec::new("packs", FieldKind::Numeric).condition(deep)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Expression {
                source: ExprError::TooLong { .. },
                ..
            }
        ));

        let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        let err = FormSchema::new(
            "f",
            vec![FieldSpec::new("packs", FieldKind::Numeric).validity(nested, None)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Expression {
                source: ExprError::TooDeep { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_definition_round_trips_through_json() {
        let json = r#"{
            "name": "vitals",
            "fields": [
                {"name": "systolic", "type": "number", "required": true, "min": 60, "max": 250},
                {"name": "diastolic", "kind": "numeric", "min": "30", "max": "150",
                 "validity_expression": "diastolic < systolic",
                 "error_message": "diastolic must be below systolic"}
            ]
        }"#;
        let definition: FormDefinition = serde_json::from_str(json).unwrap();
        let schema = FormSchema::from_definition(definition).unwrap();
        assert_eq!(schema.name(), "vitals");
        let diastolic = schema.field("diastolic").unwrap();
        assert_eq!(diastolic.min, Some(BoundValue::Text("30".to_string())));
        assert_eq!(schema.field("systolic").unwrap().kind, FieldKind::Numeric);
    }
}

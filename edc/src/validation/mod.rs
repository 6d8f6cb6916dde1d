//! Validation Engine
//!
//! [`validate`] interprets a [`FormSchema`] against a [`SubmittedRecord`]:
//! it decides which fields apply (`condition`), coerces and range-checks each
//! applicable field, evaluates cross-field `validity_expression`s and builds a
//! [`ValidationResult`]. The engine holds no state and never fails; every
//! problem with the input is reported per field.

pub mod coerce;
pub mod types;

pub use types::{FieldError, FieldValue, RawValue, SubmittedRecord, ValidationResult};

use crate::schema::expr::{Environment, Value};
use crate::schema::types::{CompiledField, FormSchema};
use std::collections::{BTreeMap, HashSet};
use tracing::trace;

/// Validates one submission against a schema.
///
/// Fields are processed in schema order. Expressions see, for each name:
/// the cleaned value if that field already passed, `null` if it was skipped
/// by its own condition, and the raw submitted value otherwise.
pub fn validate(schema: &FormSchema, record: &SubmittedRecord) -> ValidationResult {
    let mut state = EvalState {
        record,
        cleaned: BTreeMap::new(),
        skipped: HashSet::new(),
    };
    let mut errors: BTreeMap<String, Vec<FieldError>> = BTreeMap::new();

    for field in schema.compiled_fields() {
        let name = field.spec.name.as_str();

        if let Some(condition) = &field.condition {
            if !condition.eval_bool(&state) {
                trace!(form = schema.name(), field = name, "Field skipped by condition");
                state.skipped.insert(name);
                continue;
            }
        }

        if let Err(error) = check_field(field, &mut state) {
            errors.entry(name.to_string()).or_default().push(error);
        }
    }

    ValidationResult::new(errors, state.cleaned)
}

/// Runs steps 2-6 for one applicable field, inserting into `cleaned` on success.
fn check_field(field: &CompiledField, state: &mut EvalState<'_>) -> Result<(), FieldError> {
    let name = field.spec.name.as_str();
    let raw = state.record.get(name).filter(|raw| !raw.is_missing());

    let Some(raw) = raw else {
        return if field.spec.required {
            Err(FieldError::Required)
        } else {
            Ok(())
        };
    };

    let value = coerce::coerce(&field.spec, raw)?;

    // separators only, e.g. " , " for a checkbox group
    if matches!(&value, FieldValue::Choices(selected) if selected.is_empty()) {
        return if field.spec.required {
            Err(FieldError::Required)
        } else {
            Ok(())
        };
    }

    if field.min.is_some() || field.max.is_some() {
        let in_range = value.as_bound().is_some_and(|v| {
            field.min.map_or(true, |lo| v >= lo) && field.max.map_or(true, |hi| v <= hi)
        });
        if !in_range {
            return Err(FieldError::OutOfRange {
                min: field.min,
                max: field.max,
            });
        }
    }

    state.cleaned.insert(name.to_string(), value);

    if let Some(validity) = &field.validity {
        if !validity.eval_bool(&*state) {
            state.cleaned.remove(name);
            return Err(FieldError::ValidityFailed(field.spec.error_message.clone()));
        }
    }

    Ok(())
}

struct EvalState<'a> {
    record: &'a SubmittedRecord,
    cleaned: BTreeMap<String, FieldValue>,
    skipped: HashSet<&'a str>,
}

impl Environment for EvalState<'_> {
    fn lookup(&self, name: &str) -> Value {
        if let Some(value) = self.cleaned.get(name) {
            return value.to_expr_value();
        }
        if self.skipped.contains(name) {
            return Value::Null;
        }
        self.record
            .get(name)
            .map(RawValue::to_expr_value)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{FieldKind, FieldSpec};
    use chrono::NaiveDate;

    fn age_schema() -> FormSchema {
        FormSchema::new(
            "screening",
            vec![FieldSpec::new("age", FieldKind::Numeric)
                .required()
                .min(18)
                .max(120)],
        )
        .unwrap()
    }

    #[test]
    fn test_age_in_range() {
        let result = validate(&age_schema(), &SubmittedRecord::new().with("age", "25"));
        assert!(result.valid);
        assert_eq!(result.cleaned_data.get("age"), Some(&FieldValue::Number(25.0)));
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_age_out_of_range() {
        let result = validate(&age_schema(), &SubmittedRecord::new().with("age", "15"));
        assert!(!result.valid);
        assert_eq!(result.messages("age"), vec!["value out of range [18,120]"]);
        assert!(result.cleaned_data.is_empty());
    }

    #[test]
    fn test_bounds_are_inclusive() {
        for age in ["18", "120"] {
            let result = validate(&age_schema(), &SubmittedRecord::new().with("age", age));
            assert!(result.valid, "{age}");
        }
    }

    #[test]
    fn test_required_stops_further_checks() {
        let result = validate(&age_schema(), &SubmittedRecord::new().with("age", "  "));
        assert_eq!(result.messages("age"), vec!["field is required"]);
    }

    #[test]
    fn test_separator_only_selection_counts_as_missing() {
        let field = FieldSpec::new("symptoms", FieldKind::CheckboxGroup).choices(["a", "b"]);
        let required = FormSchema::new("f", vec![field.clone().required()]).unwrap();
        let optional = FormSchema::new("f", vec![field]).unwrap();

        for raw in [RawValue::from(" , "), RawValue::from(vec![" ", ""])] {
            let record = SubmittedRecord::new().with("symptoms", raw);

            let result = validate(&required, &record);
            assert!(!result.valid);
            assert_eq!(result.messages("symptoms"), vec!["field is required"]);
            assert!(result.cleaned_data.is_empty());

            let result = validate(&optional, &record);
            assert!(result.valid);
            assert!(result.cleaned_data.is_empty());
        }

        let result = validate(&required, &SubmittedRecord::new().with("symptoms", "a, ,b"));
        assert_eq!(
            result.cleaned_data.get("symptoms"),
            Some(&FieldValue::Choices(vec!["a".to_string(), "b".to_string()]))
        );
    }

    #[test]
    fn test_missing_optional_field_is_absent() {
        let schema = FormSchema::new(
            "f",
            vec![FieldSpec::new("weight", FieldKind::Numeric)
                .min(1)
                .validity("weight < 500", None)],
        )
        .unwrap();
        let result = validate(&schema, &SubmittedRecord::new());
        assert!(result.valid);
        assert!(result.cleaned_data.is_empty());
    }

    #[test]
    fn test_invalid_email() {
        let schema =
            FormSchema::new("f", vec![FieldSpec::new("email", FieldKind::Email).required()])
                .unwrap();
        let result = validate(&schema, &SubmittedRecord::new().with("email", "not-an-email"));
        assert!(!result.valid);
        assert_eq!(result.messages("email"), vec!["must be a valid email address"]);
    }

    #[test]
    fn test_condition_false_skips_field_entirely() {
        let schema = FormSchema::new(
            "smoking",
            vec![
                FieldSpec::new("smoker", FieldKind::Radio)
                    .required()
                    .choices(["yes", "no"]),
                FieldSpec::new("packs_per_day", FieldKind::Numeric)
                    .required()
                    .min(1)
                    .condition("smoker == 'yes'"),
            ],
        )
        .unwrap();

        let record = SubmittedRecord::new()
            .with("smoker", "no")
            .with("packs_per_day", "not a number");
        let result = validate(&schema, &record);
        assert!(result.valid);
        assert!(!result.cleaned_data.contains_key("packs_per_day"));

        let record = SubmittedRecord::new().with("smoker", "yes");
        let result = validate(&schema, &record);
        assert_eq!(result.messages("packs_per_day"), vec!["field is required"]);
    }

    #[test]
    fn test_condition_on_skipped_field_sees_null() {
        let schema = FormSchema::new(
            "pregnancy",
            vec![
                FieldSpec::new("sex", FieldKind::Radio).choices(["F", "M"]),
                FieldSpec::new("pregnant", FieldKind::Checkbox).condition("sex == 'F'"),
                FieldSpec::new("due_date", FieldKind::Date)
                    .required()
                    .condition("pregnant"),
            ],
        )
        .unwrap();

        // pregnant was submitted but skipped, so due_date sees null and is skipped too
        let record = SubmittedRecord::new()
            .with("sex", "M")
            .with("pregnant", "yes");
        let result = validate(&schema, &record);
        assert!(result.valid);
        assert_eq!(result.cleaned_data.len(), 1);
    }

    #[test]
    fn test_validity_expression_uses_cleaned_values() {
        let schema = FormSchema::new(
            "visit",
            vec![
                FieldSpec::new("consent_date", FieldKind::Date).required(),
                FieldSpec::new("visit_date", FieldKind::Date)
                    .required()
                    .validity("visit_date >= consent_date", Some("Visit must follow consent")),
                FieldSpec::new("systolic", FieldKind::Numeric).required(),
                FieldSpec::new("diastolic", FieldKind::Numeric)
                    .required()
                    .validity("diastolic < systolic", None),
            ],
        )
        .unwrap();

        let record = SubmittedRecord::new()
            .with("consent_date", "2024-02-01")
            .with("visit_date", "2024-01-15")
            .with("systolic", "120")
            .with("diastolic", "130");
        let result = validate(&schema, &record);
        assert!(!result.valid);
        assert_eq!(result.messages("visit_date"), vec!["Visit must follow consent"]);
        assert_eq!(result.messages("diastolic"), vec!["validation failed"]);
        assert!(!result.cleaned_data.contains_key("visit_date"));
        assert_eq!(
            result.cleaned_data.get("consent_date"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()))
        );
        assert_eq!(result.failed_fields().collect::<Vec<_>>(), vec!["diastolic", "visit_date"]);
    }

    #[test]
    fn test_date_bounds() {
        let schema = FormSchema::new(
            "f",
            vec![FieldSpec::new("visit", FieldKind::Date)
                .min("2024-01-01")
                .max("2024-12-31")],
        )
        .unwrap();
        let result = validate(&schema, &SubmittedRecord::new().with("visit", "2025-01-01"));
        assert_eq!(
            result.messages("visit"),
            vec!["value out of range [2024-01-01,2024-12-31]"]
        );
    }

    #[test]
    fn test_validate_is_deterministic() {
        let record = SubmittedRecord::new().with("age", "abc");
        let first = validate(&age_schema(), &record);
        let second = validate(&age_schema(), &record);
        assert_eq!(first, second);
        assert_eq!(first.messages("age"), vec!["must be numeric"]);
    }
}

//! Per-kind coercion of raw input into typed values.
//!
//! One function per [`FieldKind`] variant, selected by a single match.

use super::types::{FieldError, FieldValue, RawValue};
use crate::schema::temporal::{parse_date, parse_datetime, parse_time};
use crate::schema::types::{FieldKind, FieldSpec};
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    )
    .expect("valid regex")
});

/// Coerces a present (non-missing) raw value according to the field's kind.
pub fn coerce(spec: &FieldSpec, raw: &RawValue) -> Result<FieldValue, FieldError> {
    match spec.kind {
        FieldKind::Text | FieldKind::File | FieldKind::Signature => coerce_text(raw, true),
        FieldKind::Textarea => coerce_text(raw, false),
        FieldKind::Numeric | FieldKind::Slider => coerce_number(raw),
        FieldKind::Date => scalar(raw)
            .and_then(|s| parse_date(&s))
            .map(FieldValue::Date)
            .ok_or(FieldError::InvalidDateTime),
        FieldKind::Time => scalar(raw)
            .and_then(|s| parse_time(&s))
            .map(FieldValue::Time)
            .ok_or(FieldError::InvalidDateTime),
        FieldKind::Datetime => scalar(raw)
            .and_then(|s| parse_datetime(&s))
            .map(FieldValue::DateTime)
            .ok_or(FieldError::InvalidDateTime),
        FieldKind::Email => coerce_email(raw),
        FieldKind::Select | FieldKind::Radio => coerce_choice(raw, &spec.choices),
        FieldKind::CheckboxGroup => coerce_choices(raw, &spec.choices),
        FieldKind::Checkbox => coerce_checkbox(raw),
    }
}

/// Single scalar as text. A one-element list counts as a scalar.
fn scalar(raw: &RawValue) -> Option<String> {
    match raw {
        RawValue::List(items) if items.len() == 1 => items[0].as_text(),
        other => other.as_text(),
    }
}

fn coerce_text(raw: &RawValue, trim: bool) -> Result<FieldValue, FieldError> {
    let text = match raw {
        RawValue::List(items) => items
            .iter()
            .filter_map(RawValue::as_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.as_text().unwrap_or_default(),
    };
    Ok(FieldValue::Text(if trim {
        text.trim().to_string()
    } else {
        text
    }))
}

fn coerce_number(raw: &RawValue) -> Result<FieldValue, FieldError> {
    let number = match raw {
        RawValue::Number(n) => Some(*n),
        RawValue::Text(s) => s.trim().parse::<f64>().ok(),
        RawValue::List(items) if items.len() == 1 => return coerce_number(&items[0]),
        _ => None,
    };
    number
        .filter(|n| n.is_finite())
        .map(FieldValue::Number)
        .ok_or(FieldError::NotNumeric)
}

fn coerce_email(raw: &RawValue) -> Result<FieldValue, FieldError> {
    match scalar(raw) {
        Some(s) if EMAIL_RE.is_match(s.trim()) => Ok(FieldValue::Text(s.trim().to_string())),
        _ => Err(FieldError::InvalidEmail),
    }
}

fn coerce_choice(raw: &RawValue, choices: &[String]) -> Result<FieldValue, FieldError> {
    let value = scalar(raw).ok_or(FieldError::InvalidSelection)?;
    let value = value.trim();
    choices
        .iter()
        .find(|c| c.as_str() == value)
        .map(|c| FieldValue::Choice(c.clone()))
        .ok_or(FieldError::InvalidSelection)
}

fn coerce_choices(raw: &RawValue, choices: &[String]) -> Result<FieldValue, FieldError> {
    let submitted: Vec<String> = match raw {
        RawValue::List(items) => items
            .iter()
            .filter(|v| !v.is_missing())
            .map(|v| v.as_text().ok_or(FieldError::InvalidSelection))
            .collect::<Result<_, _>>()?,
        RawValue::Text(s) => s.split(',').map(str::to_string).collect(),
        other => vec![other.as_text().ok_or(FieldError::InvalidSelection)?],
    };

    let mut selected: Vec<String> = Vec::new();
    for value in submitted.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !choices.iter().any(|c| c == value) {
            return Err(FieldError::InvalidSelection);
        }
        if !selected.iter().any(|s| s == value) {
            selected.push(value.to_string());
        }
    }
    Ok(FieldValue::Choices(selected))
}

fn coerce_checkbox(raw: &RawValue) -> Result<FieldValue, FieldError> {
    let checked = match raw {
        RawValue::Bool(b) => Some(*b),
        RawValue::Number(n) if *n == 1.0 => Some(true),
        RawValue::Number(n) if *n == 0.0 => Some(false),
        RawValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "on" | "checked" => Some(true),
            "false" | "no" | "n" | "0" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    };
    checked
        .map(FieldValue::Bool)
        .ok_or(FieldError::InvalidSelection)
}

//! Date / time literal parsing shared by coercion, bounds and expressions.
//!
//! Accepted formats follow what the data-entry widgets submit: ISO dates,
//! 24h times with optional seconds, and datetimes with either a `T` or a
//! space separator (RFC 3339 offsets are normalised to UTC).

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// Accepted `date` formats, tried in order.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d"];

/// Accepted `time` formats, tried in order.
pub const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

/// Accepted `datetime` formats, tried in order (after RFC 3339).
pub const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses a calendar date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Parses a time of day.
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
}

/// Parses a date and time. Offsets are converted to UTC and dropped.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

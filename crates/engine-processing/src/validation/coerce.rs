use chrono::{DateTime, NaiveDate, Utc};
use model::records::{attendance::AttendanceStatus, failure::FailureKind};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static STUDENT_ID_SHAPE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]{1,32}$"));

pub(crate) fn text(value: &Value) -> Result<&str, FailureKind> {
    value.as_str().ok_or(FailureKind::InvalidType)
}

/// Returns the id and whether it had to be converted from a number.
pub(crate) fn student_id(value: &Value) -> Result<(String, bool), FailureKind> {
    let (id, coerced) = match value {
        Value::String(s) => (s.trim().to_string(), false),
        Value::Number(n) if n.is_u64() => (n.to_string(), true),
        _ => return Err(FailureKind::InvalidType),
    };

    let shape_ok = match &*STUDENT_ID_SHAPE {
        Ok(re) => re.is_match(&id),
        Err(_) => false,
    };
    if !shape_ok {
        return Err(FailureKind::OutOfRange);
    }
    Ok((id, coerced))
}

/// `YYYY-MM-DD`, or an RFC 3339 timestamp whose local calendar date is used.
pub(crate) fn date(value: &Value) -> Result<NaiveDate, FailureKind> {
    let raw = text(value)?.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.date_naive())
        .map_err(|_| FailureKind::InvalidDate)
}

pub(crate) fn timestamp(value: &Value) -> Result<Option<DateTime<Utc>>, FailureKind> {
    if value.is_null() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(text(value)?.trim())
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .map_err(|_| FailureKind::InvalidDate)
}

/// Returns the status and whether it came from a short SIS code.
pub(crate) fn status(value: &Value) -> Result<(AttendanceStatus, bool), FailureKind> {
    let raw = text(value)?;
    if let Ok(status) = raw.parse::<AttendanceStatus>() {
        return Ok((status, false));
    }
    AttendanceStatus::from_alias(raw.trim())
        .map(|status| (status, true))
        .ok_or(FailureKind::UnknownStatus)
}

/// Optional whole number in `0..=max`.
pub(crate) fn bounded(value: &Value, max: u64) -> Result<Option<u64>, FailureKind> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(v), _) if v <= max => Ok(Some(v)),
            (Some(_), _) | (None, Some(_)) => Err(FailureKind::OutOfRange),
            (None, None) => Err(FailureKind::InvalidType),
        },
        _ => Err(FailureKind::InvalidType),
    }
}

/// Optional free text; numeric ids are accepted as text.
pub(crate) fn optional_text(value: &Value, allow_number: bool) -> Result<Option<String>, FailureKind> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) if allow_number => Ok(Some(n.to_string())),
        _ => Err(FailureKind::InvalidType),
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Malformed,
    MissingField,
    InvalidType,
    InvalidDate,
    UnknownStatus,
    OutOfRange,
    SchoolMismatch,
    ControlCharacter,
    DisallowedPattern,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Malformed => "malformed",
            FailureKind::MissingField => "missing_field",
            FailureKind::InvalidType => "invalid_type",
            FailureKind::InvalidDate => "invalid_date",
            FailureKind::UnknownStatus => "unknown_status",
            FailureKind::OutOfRange => "out_of_range",
            FailureKind::SchoolMismatch => "school_mismatch",
            FailureKind::ControlCharacter => "control_character",
            FailureKind::DisallowedPattern => "disallowed_pattern",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one raw record was rejected. Carries field names only, never values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub record_index: usize,
    pub field: Option<String>,
    pub kind: FailureKind,
}

impl ValidationFailure {
    pub fn new(record_index: usize, field: Option<&str>, kind: FailureKind) -> Self {
        Self {
            record_index,
            field: field.map(str::to_string),
            kind,
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "record {}: {} ({})", self.record_index, self.kind, field),
            None => write!(f, "record {}: {}", self.record_index, self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_field_and_kind_only() {
        let failure = ValidationFailure::new(4, Some("date"), FailureKind::InvalidDate);
        assert_eq!(failure.to_string(), "record 4: invalid_date (date)");
    }
}

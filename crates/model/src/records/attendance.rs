use crate::core::identifiers::{SchoolId, StudentId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Tardy,
    Excused,
    EarlyDismissal,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Tardy => "TARDY",
            AttendanceStatus::Excused => "EXCUSED",
            AttendanceStatus::EarlyDismissal => "EARLY_DISMISSAL",
        }
    }

    /// Short SIS codes accepted in place of the canonical name.
    pub fn from_alias(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "P" => Some(AttendanceStatus::Present),
            "A" => Some(AttendanceStatus::Absent),
            "T" => Some(AttendanceStatus::Tardy),
            "E" => Some(AttendanceStatus::Excused),
            "ED" => Some(AttendanceStatus::EarlyDismissal),
            _ => None,
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "PRESENT" => Ok(AttendanceStatus::Present),
            "ABSENT" => Ok(AttendanceStatus::Absent),
            "TARDY" => Ok(AttendanceStatus::Tardy),
            "EXCUSED" => Ok(AttendanceStatus::Excused),
            "EARLY_DISMISSAL" => Ok(AttendanceStatus::EarlyDismissal),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityFlag {
    StrippedDisallowedField,
    UnknownFieldIgnored,
    NoteTruncated,
    StatusAliasNormalized,
    StudentIdCoerced,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::StrippedDisallowedField => "STRIPPED_DISALLOWED_FIELD",
            QualityFlag::UnknownFieldIgnored => "UNKNOWN_FIELD_IGNORED",
            QualityFlag::NoteTruncated => "NOTE_TRUNCATED",
            QualityFlag::StatusAliasNormalized => "STATUS_ALIAS_NORMALIZED",
            QualityFlag::StudentIdCoerced => "STUDENT_ID_COERCED",
        }
    }
}

/// Natural key of an attendance row; upserts are idempotent on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttendanceKey {
    pub student_id: StudentId,
    pub date: NaiveDate,
    pub school_id: SchoolId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub student_id: StudentId,
    pub school_id: SchoolId,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub period: Option<u8>,
    pub minutes_absent: Option<u16>,
    pub sis_record_id: Option<String>,
    pub note: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
    pub quality_flags: BTreeSet<QualityFlag>,
}

impl ValidatedRecord {
    pub fn key(&self) -> AttendanceKey {
        AttendanceKey {
            student_id: self.student_id.clone(),
            date: self.date,
            school_id: self.school_id.clone(),
        }
    }

    /// True when the stored row would not change, ignoring quality flags.
    pub fn same_content(&self, other: &ValidatedRecord) -> bool {
        self.status == other.status
            && self.period == other.period
            && self.minutes_absent == other.minutes_absent
            && self.sis_record_id == other.sis_record_id
            && self.note == other.note
            && self.recorded_at == other.recorded_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_names_loosely() {
        assert_eq!(
            "early dismissal".parse::<AttendanceStatus>().unwrap(),
            AttendanceStatus::EarlyDismissal
        );
        assert_eq!(
            "Present".parse::<AttendanceStatus>().unwrap(),
            AttendanceStatus::Present
        );
        assert!("sick".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn resolves_short_codes() {
        assert_eq!(AttendanceStatus::from_alias("t"), Some(AttendanceStatus::Tardy));
        assert_eq!(
            AttendanceStatus::from_alias("ED"),
            Some(AttendanceStatus::EarlyDismissal)
        );
        assert_eq!(AttendanceStatus::from_alias("X"), None);
    }
}

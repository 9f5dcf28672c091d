use model::{
    core::{
        date_range::DateRange,
        identifiers::{SchoolId, StudentId},
    },
    records::{
        attendance::{QualityFlag, ValidatedRecord},
        failure::{FailureKind, ValidationFailure},
        raw::RawRecord,
    },
};
use serde_json::{Map, Value};
use std::{collections::BTreeSet, sync::Arc};
use tracing::debug;

pub mod coerce;
pub mod policy;
pub mod sanitize;

pub use policy::DataHandlingPolicy;

const REQUIRED_FIELDS: [&str; 4] = ["student_id", "school_id", "date", "status"];
const OPTIONAL_FIELDS: [&str; 5] = ["period", "minutes_absent", "sis_record_id", "note", "recorded_at"];

const MAX_PERIOD: u64 = 12;
const MAX_MINUTES_ABSENT: u64 = 1440;

/// What the records of one chunk are expected to belong to.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub school_id: SchoolId,
    pub date_range: DateRange,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub valid: Vec<ValidatedRecord>,
    pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    pub fn total(&self) -> usize {
        self.valid.len() + self.failures.len()
    }
}

fn present<'m>(fields: &'m Map<String, Value>, name: &str) -> Option<&'m Value> {
    fields.get(name).filter(|v| !v.is_null())
}

fn or_null<'m>(fields: &'m Map<String, Value>, name: &str) -> &'m Value {
    fields.get(name).unwrap_or(&Value::Null)
}

fn is_known(field: &str) -> bool {
    REQUIRED_FIELDS.contains(&field) || OPTIONAL_FIELDS.contains(&field)
}

#[derive(Debug, Clone, Default)]
pub struct RecordValidator {
    policy: Arc<DataHandlingPolicy>,
}

impl RecordValidator {
    pub fn new(policy: DataHandlingPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &DataHandlingPolicy {
        &self.policy
    }

    /// Validates every record independently. One bad row never affects another.
    pub fn validate_batch(&self, records: &[RawRecord], ctx: &ValidationContext) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (index, raw) in records.iter().enumerate() {
            match self.validate(index, raw, ctx) {
                Ok(record) => report.valid.push(record),
                Err(failure) => {
                    debug!(
                        school_id = %ctx.school_id,
                        record_index = failure.record_index,
                        field = failure.field.as_deref().unwrap_or("-"),
                        kind = %failure.kind,
                        "Rejected attendance record"
                    );
                    report.failures.push(failure);
                }
            }
        }

        report
    }

    pub fn validate(
        &self,
        index: usize,
        raw: &RawRecord,
        ctx: &ValidationContext,
    ) -> Result<ValidatedRecord, ValidationFailure> {
        let fail = |field: Option<&str>, kind| ValidationFailure::new(index, field, kind);

        let Some(fields) = raw.fields() else {
            return Err(fail(None, FailureKind::Malformed));
        };

        let mut flags = BTreeSet::new();
        let kept = self.partition(fields, &mut flags);

        for name in REQUIRED_FIELDS {
            if present(&kept, name).is_none() {
                return Err(fail(Some(name), FailureKind::MissingField));
            }
        }

        for name in REQUIRED_FIELDS.into_iter().chain(OPTIONAL_FIELDS) {
            if let Some(Value::String(value)) = present(&kept, name) {
                self.screen(name, value).map_err(|kind| fail(Some(name), kind))?;
            }
        }

        let student_field = or_null(&kept, "student_id");
        let (student_id, coerced) =
            coerce::student_id(student_field).map_err(|kind| fail(Some("student_id"), kind))?;
        if coerced {
            flags.insert(QualityFlag::StudentIdCoerced);
        }

        let school_field = or_null(&kept, "school_id");
        let school_id = coerce::text(school_field)
            .map_err(|kind| fail(Some("school_id"), kind))?
            .trim();
        if school_id != ctx.school_id.as_str() {
            return Err(fail(Some("school_id"), FailureKind::SchoolMismatch));
        }

        let date = coerce::date(or_null(&kept, "date"))
            .map_err(|kind| fail(Some("date"), kind))?;
        if !ctx.date_range.contains(date) {
            return Err(fail(Some("date"), FailureKind::OutOfRange));
        }

        let (status, aliased) = coerce::status(or_null(&kept, "status"))
            .map_err(|kind| fail(Some("status"), kind))?;
        if aliased {
            flags.insert(QualityFlag::StatusAliasNormalized);
        }

        let period = coerce::bounded(or_null(&kept, "period"), MAX_PERIOD)
            .map_err(|kind| fail(Some("period"), kind))?
            .and_then(|v| u8::try_from(v).ok());
        let minutes_absent = coerce::bounded(or_null(&kept, "minutes_absent"), MAX_MINUTES_ABSENT)
            .map_err(|kind| fail(Some("minutes_absent"), kind))?
            .and_then(|v| u16::try_from(v).ok());
        let sis_record_id = coerce::optional_text(or_null(&kept, "sis_record_id"), true)
            .map_err(|kind| fail(Some("sis_record_id"), kind))?;
        let recorded_at = coerce::timestamp(or_null(&kept, "recorded_at"))
            .map_err(|kind| fail(Some("recorded_at"), kind))?;

        let note = coerce::optional_text(or_null(&kept, "note"), false)
            .map_err(|kind| fail(Some("note"), kind))?
            .map(|note| {
                let (note, truncated) = sanitize::truncate_chars(&note, self.policy.note_max_len());
                if truncated {
                    flags.insert(QualityFlag::NoteTruncated);
                }
                note
            });

        Ok(ValidatedRecord {
            student_id: StudentId::new(student_id),
            school_id: ctx.school_id.clone(),
            date,
            status,
            period,
            minutes_absent,
            sis_record_id,
            note,
            recorded_at,
            quality_flags: flags,
        })
    }

    /// Drops disallowed and unknown fields, flagging what was dropped.
    fn partition(
        &self,
        fields: &Map<String, Value>,
        flags: &mut BTreeSet<QualityFlag>,
    ) -> Map<String, Value> {
        let mut kept = Map::new();
        for (name, value) in fields {
            if self.policy.is_disallowed_field(name) {
                flags.insert(QualityFlag::StrippedDisallowedField);
            } else if is_known(name) {
                kept.insert(name.clone(), value.clone());
            } else {
                flags.insert(QualityFlag::UnknownFieldIgnored);
            }
        }
        kept
    }

    fn screen(&self, field: &str, value: &str) -> Result<(), FailureKind> {
        if sanitize::has_control_chars(value, field == "note") {
            return Err(FailureKind::ControlCharacter);
        }
        if self.policy.matches_disallowed_pattern(value) {
            return Err(FailureKind::DisallowedPattern);
        }
        Ok(())
    }
}

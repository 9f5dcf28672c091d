use crate::error::DatastoreError;
use async_trait::async_trait;
use model::records::attendance::ValidatedRecord;
use serde::Serialize;

pub mod memory;
pub mod postgres;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSummary {
    /// Rows inserted or changed.
    pub written: u64,
    /// Rows already stored with identical content.
    pub skipped_duplicates: u64,
}

impl UpsertSummary {
    pub fn merge(&mut self, other: UpsertSummary) {
        self.written += other.written;
        self.skipped_duplicates += other.skipped_duplicates;
    }
}

/// Port to the attendance table. Each call is one transaction and is
/// idempotent on `(student_id, date, school_id)`.
#[async_trait]
pub trait AttendanceRepository: Send + Sync {
    async fn upsert_attendance_batch(
        &self,
        records: &[ValidatedRecord],
    ) -> Result<UpsertSummary, DatastoreError>;
}

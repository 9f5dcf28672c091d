use crate::{
    datastore::{AttendanceRepository, UpsertSummary},
    error::DatastoreError,
};
use async_trait::async_trait;
use model::records::attendance::{AttendanceKey, ValidatedRecord};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct InMemoryAttendanceRepository {
    rows: RwLock<HashMap<AttendanceKey, ValidatedRecord>>,
}

impl InMemoryAttendanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn get(&self, key: &AttendanceKey) -> Option<ValidatedRecord> {
        self.rows.read().get(key).cloned()
    }

    pub fn rows(&self) -> Vec<ValidatedRecord> {
        let mut rows: Vec<_> = self.rows.read().values().cloned().collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        rows
    }
}

#[async_trait]
impl AttendanceRepository for InMemoryAttendanceRepository {
    async fn upsert_attendance_batch(
        &self,
        records: &[ValidatedRecord],
    ) -> Result<UpsertSummary, DatastoreError> {
        let mut rows = self.rows.write();
        let mut summary = UpsertSummary::default();

        for record in records {
            match rows.get(&record.key()) {
                Some(existing) if existing.same_content(record) => {
                    summary.skipped_duplicates += 1;
                }
                _ => {
                    rows.insert(record.key(), record.clone());
                    summary.written += 1;
                }
            }
        }

        Ok(summary)
    }
}

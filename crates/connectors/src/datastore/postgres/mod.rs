use crate::{
    datastore::{AttendanceRepository, UpsertSummary},
    error::DatastoreError,
};
use async_trait::async_trait;
use model::records::attendance::ValidatedRecord;
use tokio::sync::Mutex;
use tokio_postgres::{Client, types::ToSql};
use tracing::{debug, info, warn};

mod utils;

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");
const UPSERT_SQL: &str = include_str!("sql/upsert.sql");

/// Attendance table on PostgreSQL. A dropped connection is re-established on
/// the next call, so retries after an outage can succeed.
pub struct PgAttendanceRepository {
    url: String,
    client: Mutex<Option<Client>>,
}

impl PgAttendanceRepository {
    pub async fn connect(url: &str) -> Result<Self, DatastoreError> {
        let client = utils::connect_client(url).await?;
        info!("Connected to attendance datastore");
        Ok(Self {
            url: url.to_string(),
            client: Mutex::new(Some(client)),
        })
    }

    pub async fn ensure_schema(&self) -> Result<(), DatastoreError> {
        let mut guard = self.client.lock().await;
        let client = self.connected(&mut guard).await?;
        client.batch_execute(SCHEMA_SQL).await?;
        Ok(())
    }

    async fn connected<'a>(
        &self,
        guard: &'a mut Option<Client>,
    ) -> Result<&'a mut Client, DatastoreError> {
        if guard.as_ref().is_some_and(|client| client.is_closed()) {
            warn!("Datastore connection closed, reconnecting");
            *guard = None;
        }
        if guard.is_none() {
            *guard = Some(utils::connect_client(&self.url).await?);
        }
        guard
            .as_mut()
            .ok_or_else(|| DatastoreError::Unavailable("no connection".to_string()))
    }

    async fn upsert_in_tx(
        client: &mut Client,
        records: &[ValidatedRecord],
    ) -> Result<UpsertSummary, DatastoreError> {
        let tx = client.transaction().await?;
        let statement = tx.prepare(UPSERT_SQL).await?;
        let mut summary = UpsertSummary::default();

        for record in records {
            let period = record.period.map(i16::from);
            let minutes_absent = record.minutes_absent.map(i32::from);
            let flags: Vec<String> = record
                .quality_flags
                .iter()
                .map(|flag| flag.as_str().to_string())
                .collect();
            let params: [&(dyn ToSql + Sync); 10] = [
                &record.student_id.as_str(),
                &record.date,
                &record.school_id.as_str(),
                &record.status.as_str(),
                &period,
                &minutes_absent,
                &record.sis_record_id,
                &record.note,
                &record.recorded_at,
                &flags,
            ];

            match tx.execute(&statement, &params).await? {
                0 => summary.skipped_duplicates += 1,
                _ => summary.written += 1,
            }
        }

        tx.commit().await?;
        Ok(summary)
    }
}

#[async_trait]
impl AttendanceRepository for PgAttendanceRepository {
    async fn upsert_attendance_batch(
        &self,
        records: &[ValidatedRecord],
    ) -> Result<UpsertSummary, DatastoreError> {
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let mut guard = self.client.lock().await;
        let client = self.connected(&mut guard).await?;
        let result = Self::upsert_in_tx(client, records).await;

        if let Err(DatastoreError::Unavailable(_)) = &result {
            // Force a reconnect on the next attempt.
            *guard = None;
        }

        let summary = result?;
        debug!(
            written = summary.written,
            skipped_duplicates = summary.skipped_duplicates,
            "Upserted attendance batch"
        );
        Ok(summary)
    }
}

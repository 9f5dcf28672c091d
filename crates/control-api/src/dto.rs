use chrono::NaiveDate;
use engine_runtime::request::SyncRequest;
use model::{
    core::{
        date_range::DateRange,
        identifiers::{OperationId, SchoolId},
    },
    execution::operation::{SyncStatus, SyncType},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeBody {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Body of `POST /sync`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncBody {
    pub date_range: DateRangeBody,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub force_refresh: Option<bool>,
    #[serde(default)]
    pub schools: Option<Vec<String>>,
    #[serde(default)]
    pub halt_on_critical_failure: Option<bool>,
    #[serde(default, rename = "type")]
    pub sync_type: Option<SyncType>,
}

impl StartSyncBody {
    pub fn into_request(self) -> Result<SyncRequest, String> {
        let range = DateRange::new(self.date_range.start, self.date_range.end)
            .map_err(|e| e.to_string())?;

        Ok(SyncRequest {
            date_range: range,
            sync_type: self.sync_type.unwrap_or_default(),
            schools: self
                .schools
                .map(|schools| schools.into_iter().map(SchoolId::from).collect()),
            batch_size: self.batch_size,
            force_refresh: self.force_refresh.unwrap_or(false),
            halt_on_critical_failure: self.halt_on_critical_failure,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedResponse {
    pub operation_id: OperationId,
    pub status: SyncStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellingResponse {
    pub operation_id: OperationId,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

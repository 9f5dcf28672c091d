use model::{
    core::{date_range::DateRange, identifiers::SchoolId},
    execution::operation::SyncType,
};

pub const MAX_BATCH_SIZE: usize = 10_000;

/// A request to start one operation. Unset options fall back to settings.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub date_range: DateRange,
    pub sync_type: SyncType,
    pub schools: Option<Vec<SchoolId>>,
    pub batch_size: Option<usize>,
    pub force_refresh: bool,
    pub halt_on_critical_failure: Option<bool>,
}

impl SyncRequest {
    pub fn new(date_range: DateRange) -> Self {
        Self {
            date_range,
            sync_type: SyncType::Manual,
            schools: None,
            batch_size: None,
            force_refresh: false,
            halt_on_critical_failure: None,
        }
    }

    pub fn with_schools(mut self, schools: Vec<SchoolId>) -> Self {
        self.schools = Some(schools);
        self
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn with_halt_on_critical_failure(mut self, halt: bool) -> Self {
        self.halt_on_critical_failure = Some(halt);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

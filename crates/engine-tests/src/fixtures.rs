//! Fault-injecting stand-ins for the SIS, the attendance table and the
//! checkpoint store.

use async_trait::async_trait;
use chrono::NaiveDate;
use connectors::{
    datastore::{AttendanceRepository, UpsertSummary, memory::InMemoryAttendanceRepository},
    error::{DatastoreError, SisError},
    sis::{PageRequest, SisClient, SisPage},
};
use engine_core::{error::StateStoreError, state::CheckpointStore};
use model::{
    core::identifiers::{ChunkId, OperationId, RunKey, SchoolId, StudentId},
    execution::{checkpoint::Checkpoint, operation::SyncOperation},
    records::{attendance::ValidatedRecord, raw::RawRecord},
};
use parking_lot::Mutex;
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};
use tokio::sync::Semaphore;

pub fn student(n: usize) -> String {
    format!("S-{n:04}")
}

/// A well-formed SIS row.
pub fn attendance_row(student_id: &str, school: &str, date: NaiveDate) -> RawRecord {
    RawRecord::from_value(json!({
        "student_id": student_id,
        "school_id": school,
        "date": date.to_string(),
        "status": "PRESENT",
        "period": 1,
    }))
}

/// What a failing school answers with.
#[derive(Debug, Clone, Copy)]
pub enum SisFault {
    /// 503, retried and counted by the breaker.
    Unavailable,
    /// 404, never retried.
    NotFound,
}

impl SisFault {
    fn error(self) -> SisError {
        match self {
            SisFault::Unavailable => SisError::Server { status: 503 },
            SisFault::NotFound => SisError::Client { status: 404 },
        }
    }
}

/// Generates `students_per_day` rows per school and day and serves them in
/// pages of the requested size.
pub struct ScriptedSis {
    students_per_day: usize,
    overrides: Mutex<HashMap<SchoolId, Vec<RawRecord>>>,
    faults: Mutex<HashMap<SchoolId, SisFault>>,
    transient_budget: AtomicU32,
    calls: Mutex<Vec<PageRequest>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedSis {
    pub fn new(students_per_day: usize) -> Self {
        Self {
            students_per_day,
            overrides: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
            transient_budget: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Every page request consumes one permit; requests block once the gate
    /// runs dry.
    pub fn gated(students_per_day: usize, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(students_per_day)
        }
    }

    /// Serves exactly `records` for the school, whatever range is asked for.
    pub fn serve_records(&self, school: &str, records: Vec<RawRecord>) {
        self.overrides.lock().insert(SchoolId::from(school), records);
    }

    pub fn fail_school(&self, school: &str, fault: SisFault) {
        self.faults.lock().insert(SchoolId::from(school), fault);
    }

    pub fn heal(&self) {
        self.faults.lock().clear();
        self.transient_budget.store(0, Ordering::SeqCst);
    }

    /// The next `n` page requests answer 503, whichever school asks.
    pub fn fail_next(&self, n: u32) {
        self.transient_budget.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PageRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn schools_called(&self) -> HashSet<SchoolId> {
        self.calls
            .lock()
            .iter()
            .map(|request| request.school_id.clone())
            .collect()
    }

    fn generated(&self, request: &PageRequest) -> Vec<RawRecord> {
        let mut records = Vec::new();
        let mut day = Some(request.date_range.start);
        while let Some(date) = day.filter(|d| *d <= request.date_range.end) {
            for n in 1..=self.students_per_day {
                records.push(attendance_row(
                    &student(n),
                    request.school_id.as_str(),
                    date,
                ));
            }
            day = date.succ_opt();
        }
        records
    }
}

#[async_trait]
impl SisClient for ScriptedSis {
    async fn fetch_page(&self, request: &PageRequest) -> Result<SisPage, SisError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| SisError::Connect("gate closed".into()))?
                .forget();
        }
        self.calls.lock().push(request.clone());

        let budget = self
            .transient_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if budget.is_ok() {
            return Err(SisError::Server { status: 503 });
        }
        if let Some(fault) = self.faults.lock().get(&request.school_id) {
            return Err(fault.error());
        }

        let all = match self.overrides.lock().get(&request.school_id) {
            Some(records) => records.clone(),
            None => self.generated(request),
        };

        let page = request.page.max(1) as usize;
        let records: Vec<RawRecord> = all
            .iter()
            .skip((page - 1) * request.page_size)
            .take(request.page_size)
            .cloned()
            .collect();
        let next_page = (page * request.page_size < all.len()).then(|| request.page + 1);

        Ok(SisPage { records, next_page })
    }
}

/// In-memory attendance table that can reject batches or go away for a while.
#[derive(Default)]
pub struct FaultyRepository {
    inner: InMemoryAttendanceRepository,
    poisoned: Mutex<HashSet<StudentId>>,
    unavailable_budget: AtomicU32,
    calls: AtomicU32,
}

impl FaultyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any batch carrying this student is rejected as a whole.
    pub fn poison(&self, student_id: &str) {
        self.poisoned.lock().insert(StudentId::from(student_id));
    }

    /// The next `n` transactions fail as if the database were down.
    pub fn unavailable_for(&self, n: u32) {
        self.unavailable_budget.store(n, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.poisoned.lock().clear();
        self.unavailable_budget.store(0, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn rows(&self) -> Vec<ValidatedRecord> {
        self.inner.rows()
    }

    pub fn transactions(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttendanceRepository for FaultyRepository {
    async fn upsert_attendance_batch(
        &self,
        records: &[ValidatedRecord],
    ) -> Result<UpsertSummary, DatastoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let down = self
            .unavailable_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if down.is_ok() {
            return Err(DatastoreError::Unavailable("connection refused".into()));
        }

        let poisoned = self.poisoned.lock().clone();
        if records.iter().any(|r| poisoned.contains(&r.student_id)) {
            return Err(DatastoreError::Rejected("SQLSTATE 23514".into()));
        }

        self.inner.upsert_attendance_batch(records).await
    }
}

/// Delegates to a real store but can refuse checkpoint commits.
pub struct FlakyCheckpointStore<S> {
    inner: S,
    fail_commits: AtomicBool,
}

impl<S: CheckpointStore> FlakyCheckpointStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_commits: AtomicBool::new(false),
        }
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: CheckpointStore> CheckpointStore for FlakyCheckpointStore<S> {
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<bool, StateStoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StateStoreError::Commit {
                chunk_id: checkpoint.chunk_id.to_string(),
                message: "disk full".into(),
            });
        }
        self.inner.commit(checkpoint).await
    }

    async fn is_completed(
        &self,
        run_key: &RunKey,
        chunk_id: &ChunkId,
    ) -> Result<bool, StateStoreError> {
        self.inner.is_completed(run_key, chunk_id).await
    }

    async fn load(&self, run_key: &RunKey) -> Result<HashSet<ChunkId>, StateStoreError> {
        self.inner.load(run_key).await
    }

    async fn checkpoints(&self, run_key: &RunKey) -> Result<Vec<Checkpoint>, StateStoreError> {
        self.inner.checkpoints(run_key).await
    }

    async fn save_operation(&self, operation: &SyncOperation) -> Result<(), StateStoreError> {
        self.inner.save_operation(operation).await
    }

    async fn load_operation(
        &self,
        operation_id: &OperationId,
    ) -> Result<Option<SyncOperation>, StateStoreError> {
        self.inner.load_operation(operation_id).await
    }

    async fn list_operations(&self, limit: usize) -> Result<Vec<SyncOperation>, StateStoreError> {
        self.inner.list_operations(limit).await
    }
}

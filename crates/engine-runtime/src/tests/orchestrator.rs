use crate::{
    error::{CancelError, StartError},
    orchestrator::{SyncOrchestrator, SyncServices},
    request::SyncRequest,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use connectors::{
    datastore::memory::InMemoryAttendanceRepository,
    error::SisError,
    sis::{PageRequest, SisClient, SisPage},
};
use engine_config::settings::{ENV_PREFIX, SyncSettings, keys};
use engine_core::state::{CheckpointStore, memory::InMemoryCheckpointStore};
use model::{
    core::{
        date_range::DateRange,
        identifiers::{OperationId, RunKey, SchoolId},
    },
    execution::operation::{SyncOperation, SyncOptions, SyncStatus, SyncType},
    records::raw::RawRecord,
};
use parking_lot::Mutex;
use serde_json::json;
use std::{collections::HashMap, collections::HashSet, sync::Arc};
use tokio::sync::Semaphore;

const STUDENTS: [&str; 2] = ["S-1", "S-2"];

/// One record per student per day, in a single page. Schools listed in
/// `rejecting` answer 404, which is not retried.
struct FixtureSis {
    rejecting: Mutex<HashSet<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl FixtureSis {
    fn new() -> Self {
        Self {
            rejecting: Mutex::new(HashSet::new()),
            gate: None,
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            rejecting: Mutex::new(HashSet::new()),
            gate: Some(gate),
        }
    }

    fn reject(&self, school: &str) {
        self.rejecting.lock().insert(school.to_string());
    }

    fn accept_all(&self) {
        self.rejecting.lock().clear();
    }
}

#[async_trait]
impl SisClient for FixtureSis {
    async fn fetch_page(&self, request: &PageRequest) -> Result<SisPage, SisError> {
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| SisError::Connect("gate closed".into()))?;
        }
        if self.rejecting.lock().contains(request.school_id.as_str()) {
            return Err(SisError::Client { status: 404 });
        }

        let mut records = Vec::new();
        let mut day = request.date_range.start;
        while day <= request.date_range.end {
            for student in STUDENTS {
                records.push(RawRecord::from_value(json!({
                    "student_id": student,
                    "school_id": request.school_id.as_str(),
                    "date": day.to_string(),
                    "status": "PRESENT",
                })));
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        Ok(SisPage {
            records,
            next_page: None,
        })
    }
}

fn settings(workers: usize) -> SyncSettings {
    settings_with(workers, &[])
}

fn settings_with(workers: usize, extra: &[(&str, &str)]) -> SyncSettings {
    let vars: HashMap<String, String> = [
        (keys::WORKERS, workers.to_string()),
        (keys::CHUNK_MAX_DAYS, "7".to_string()),
        (keys::RETRY_MAX_ATTEMPTS, "2".to_string()),
        (keys::RETRY_BASE_DELAY_MS, "1".to_string()),
        (keys::RETRY_MAX_DELAY_MS, "2".to_string()),
        (keys::SIS_RATE_LIMIT, "10000".to_string()),
        (keys::SCHOOLS, "SCH-A,SCH-B".to_string()),
    ]
    .into_iter()
    .chain(extra.iter().map(|(k, v)| (*k, v.to_string())))
    .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v))
    .collect();
    SyncSettings::from_vars(&vars).unwrap()
}

fn two_weeks() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2024, 9, 2).unwrap(),
        NaiveDate::from_ymd_opt(2024, 9, 15).unwrap(),
    )
    .unwrap()
}

struct Harness {
    orchestrator: SyncOrchestrator,
    sis: Arc<FixtureSis>,
    repository: Arc<InMemoryAttendanceRepository>,
    store: Arc<InMemoryCheckpointStore>,
}

async fn harness(sis: FixtureSis, workers: usize) -> Harness {
    harness_with(sis, settings(workers)).await
}

async fn harness_with(sis: FixtureSis, settings: SyncSettings) -> Harness {
    let sis = Arc::new(sis);
    let repository = Arc::new(InMemoryAttendanceRepository::new());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let orchestrator = SyncOrchestrator::new(
        settings,
        SyncServices {
            sis: sis.clone(),
            repository: repository.clone(),
            store: store.clone(),
            audit_sinks: Vec::new(),
        },
    )
    .await
    .unwrap();

    Harness {
        orchestrator,
        sis,
        repository,
        store,
    }
}

#[tokio::test]
async fn completes_and_checkpoints_every_chunk() {
    let h = harness(FixtureSis::new(), 4).await;

    let started = h.orchestrator.start(SyncRequest::new(two_weeks())).await.unwrap();
    assert_eq!(started.status, SyncStatus::InProgress);
    assert_eq!(started.progress.total_chunks, 4);

    let done = h.orchestrator.wait(&started.operation_id).await.unwrap();
    assert_eq!(done.status, SyncStatus::Completed);
    assert_eq!(done.progress.chunks_completed, 4);
    assert_eq!(done.progress.records_succeeded, 56);
    assert_eq!(h.repository.len(), 56);
    assert_eq!(h.store.load(&done.run_key).await.unwrap().len(), 4);

    let history = h.orchestrator.history(10).await.unwrap();
    assert_eq!(history[0].operation_id, done.operation_id);
    assert!(h.orchestrator.active_operation().is_none());
}

#[tokio::test]
async fn second_start_while_running_is_rejected() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(FixtureSis::gated(gate.clone()), 2).await;

    let first = h.orchestrator.start(SyncRequest::new(two_weeks())).await.unwrap();
    let err = h
        .orchestrator
        .start(SyncRequest::new(two_weeks()))
        .await
        .unwrap_err();
    match err {
        StartError::AlreadyRunning { operation_id } => {
            assert_eq!(operation_id, first.operation_id)
        }
        other => panic!("unexpected {other:?}"),
    }

    gate.add_permits(1_000);
    let done = h.orchestrator.wait(&first.operation_id).await.unwrap();
    assert_eq!(done.status, SyncStatus::Completed);
}

#[tokio::test]
async fn restart_after_failure_skips_checkpointed_chunks() {
    let h = harness(FixtureSis::new(), 2).await;
    h.sis.reject("SCH-B");

    let first = h.orchestrator.start(SyncRequest::new(two_weeks())).await.unwrap();
    let failed = h.orchestrator.wait(&first.operation_id).await.unwrap();
    assert_eq!(failed.status, SyncStatus::Failed);
    assert_eq!(failed.progress.chunks_completed, 2);
    assert_eq!(failed.progress.chunks_failed, 2);
    assert_eq!(failed.progress.records_succeeded, 28);
    assert!(failed.errors.iter().all(|e| e.chunk_id.is_some()));

    h.sis.accept_all();
    let second = h.orchestrator.start(SyncRequest::new(two_weeks())).await.unwrap();
    assert_eq!(second.run_key, first.run_key);
    assert_eq!(second.progress.chunks_resumed, 2);

    let done = h.orchestrator.wait(&second.operation_id).await.unwrap();
    assert_eq!(done.status, SyncStatus::Completed);
    assert_eq!(done.progress.chunks_completed, 4);
    assert_eq!(done.progress.records_succeeded, 28);
    assert_eq!(h.repository.len(), 56);
}

#[tokio::test]
async fn force_refresh_ignores_checkpoints() {
    let h = harness(FixtureSis::new(), 2).await;
    let first = h.orchestrator.start(SyncRequest::new(two_weeks())).await.unwrap();
    h.orchestrator.wait(&first.operation_id).await.unwrap();

    let again = h
        .orchestrator
        .start(SyncRequest::new(two_weeks()).with_force_refresh(true))
        .await
        .unwrap();
    assert_eq!(again.progress.chunks_resumed, 0);
    let done = h.orchestrator.wait(&again.operation_id).await.unwrap();
    assert_eq!(done.status, SyncStatus::Completed);
    assert_eq!(done.progress.skipped_duplicates, 56);
    assert_eq!(done.progress.records_succeeded, 56);
}

#[tokio::test]
async fn cancel_stops_before_the_write() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(FixtureSis::gated(gate.clone()), 1).await;

    let started = h.orchestrator.start(SyncRequest::new(two_weeks())).await.unwrap();
    assert_eq!(h.orchestrator.cancel().unwrap(), started.operation_id);
    assert_eq!(h.orchestrator.cancel().unwrap(), started.operation_id);
    gate.add_permits(1_000);

    let done = h.orchestrator.wait(&started.operation_id).await.unwrap();
    assert_eq!(done.status, SyncStatus::Cancelled);
    assert_eq!(done.progress.chunks_completed, 0);
    assert!(h.repository.is_empty());
    assert_eq!(h.orchestrator.cancel(), Err(CancelError::NotRunning));
}

#[tokio::test]
async fn invalid_request_is_rejected_and_frees_the_slot() {
    let h = harness(FixtureSis::new(), 1).await;
    let mut request = SyncRequest::new(two_weeks()).with_batch_size(0);
    request.schools = Some(vec![SchoolId::from("SCH-A")]);

    let err = h.orchestrator.start(request).await.unwrap_err();
    assert!(matches!(err, StartError::InvalidRequest(_)));
    assert!(h.orchestrator.active_operation().is_none());

    let ok = h
        .orchestrator
        .start(SyncRequest::new(two_weeks()).with_schools(vec![SchoolId::from("SCH-A")]))
        .await
        .unwrap();
    assert_eq!(ok.progress.total_chunks, 2);
}

#[tokio::test]
async fn range_ending_on_the_last_date_runs_and_frees_the_slot() {
    let h = harness(FixtureSis::new(), 2).await;
    let range = DateRange::new(NaiveDate::MAX.pred_opt().unwrap(), NaiveDate::MAX).unwrap();

    let started = h.orchestrator.start(SyncRequest::new(range)).await.unwrap();
    assert_eq!(started.progress.total_chunks, 2);
    let done = h.orchestrator.wait(&started.operation_id).await.unwrap();
    assert!(done.status.is_terminal());
    assert!(h.orchestrator.active_operation().is_none());

    let next = h.orchestrator.start(SyncRequest::new(two_weeks())).await.unwrap();
    let done = h.orchestrator.wait(&next.operation_id).await.unwrap();
    assert_eq!(done.status, SyncStatus::Completed);
}

#[tokio::test]
async fn daily_record_estimate_narrows_the_windows() {
    let settings = settings_with(
        2,
        &[
            (keys::CHUNK_MAX_RECORDS, "6"),
            (keys::CHUNK_DAILY_RECORDS, "2"),
        ],
    );
    let h = harness_with(FixtureSis::new(), settings).await;

    let started = h.orchestrator.start(SyncRequest::new(two_weeks())).await.unwrap();
    // Three-day windows: 14 days make five per school.
    assert_eq!(started.progress.total_chunks, 10);

    let done = h.orchestrator.wait(&started.operation_id).await.unwrap();
    assert_eq!(done.status, SyncStatus::Completed);
    assert_eq!(done.progress.records_succeeded, 56);
    assert_eq!(h.orchestrator.configuration().chunk_daily_records, Some(2));
}

#[tokio::test]
async fn slot_is_released_when_its_holder_panics() {
    let h = harness(FixtureSis::new(), 1).await;
    let orchestrator = h.orchestrator.clone();

    let holder = tokio::spawn(async move {
        let (_tx, rx) = tokio::sync::watch::channel(None);
        let _slot = orchestrator
            .claim(OperationId::generate(), Default::default(), rx)
            .unwrap();
        panic!("worker blew up");
    });
    assert!(holder.await.unwrap_err().is_panic());
    assert!(h.orchestrator.active_operation().is_none());

    let started = h.orchestrator.start(SyncRequest::new(two_weeks())).await.unwrap();
    let done = h.orchestrator.wait(&started.operation_id).await.unwrap();
    assert_eq!(done.status, SyncStatus::Completed);
}

#[tokio::test]
async fn interrupted_operations_are_marked_failed_on_startup() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let mut stale = SyncOperation::new(
        OperationId::from("op-stale"),
        RunKey::from("run-stale"),
        SyncType::Full,
        two_weeks(),
        vec![SchoolId::from("SCH-A")],
        SyncOptions::default(),
    );
    stale.transition(SyncStatus::InProgress).unwrap();
    store.save_operation(&stale).await.unwrap();

    let orchestrator = SyncOrchestrator::new(
        settings(1),
        SyncServices {
            sis: Arc::new(FixtureSis::new()),
            repository: Arc::new(InMemoryAttendanceRepository::new()),
            store: store.clone(),
            audit_sinks: Vec::new(),
        },
    )
    .await
    .unwrap();

    let recovered = store
        .load_operation(&OperationId::from("op-stale"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recovered.status, SyncStatus::Failed);
    assert!(recovered.errors[0].message.starts_with("interrupted"));
    assert_eq!(orchestrator.recover_interrupted().await.unwrap(), 0);
}

#[tokio::test]
async fn dashboard_reports_current_operation_and_resilience_state() {
    let h = harness(FixtureSis::new(), 2).await;
    let started = h.orchestrator.start(SyncRequest::new(two_weeks())).await.unwrap();
    h.orchestrator.wait(&started.operation_id).await.unwrap();

    let dashboard = h.orchestrator.dashboard().await.unwrap();
    let json = serde_json::to_value(&dashboard).unwrap();
    assert_eq!(json["current"]["status"], "COMPLETED");
    assert_eq!(json["progressPercent"], 100.0);
    assert_eq!(json["history"].as_array().unwrap().len(), 1);
    assert_eq!(json["rateLimiter"]["maxRequests"], 10000);
    assert_eq!(json["metrics"]["chunksCompleted"], 4);
    assert!(json["configuration"].get("workers").is_some());
}

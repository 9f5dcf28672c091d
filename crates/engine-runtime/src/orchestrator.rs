use crate::{
    error::{CancelError, LookupError, RuntimeError, StartError},
    execution::{ChunkTask, OperationDriver},
    request::{MAX_BATCH_SIZE, SyncRequest},
};
use chrono::Utc;
use connectors::{datastore::AttendanceRepository, sis::SisClient};
use engine_config::settings::{ConfigurationView, SyncSettings};
use engine_core::{
    audit::{AuditSink, spawn_audit_recorder},
    circuit_breaker::{
        CircuitBreakerRegistry, CircuitSnapshot, DATASTORE_DEPENDENCY, SIS_DEPENDENCY,
    },
    event_bus::bus::{EventBus, Subscription},
    metrics::{Metrics, MetricsSnapshot},
    rate_limiter::{RateLimiter, RateLimiterSnapshot},
    state::CheckpointStore,
};
use engine_processing::{
    chunker::DateRangeChunker,
    fetcher::{ChunkFetcher, SIS_RATE_KEY},
    state_manager::StateManager,
    validation::{DataHandlingPolicy, RecordValidator},
    writer::BatchWriter,
};
use model::{
    core::identifiers::{ChunkId, OperationId, SchoolId},
    events::SyncEvent,
    execution::operation::{SyncErrorEntry, SyncOperation, SyncOptions, SyncStatus},
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const RECENT_ERRORS: usize = 20;
const HISTORY_LEN: usize = 10;
const RECOVERY_SCAN: usize = 1_000;

/// The collaborators an orchestrator drives. All are shared by every worker.
#[derive(Clone)]
pub struct SyncServices {
    pub sis: Arc<dyn SisClient>,
    pub repository: Arc<dyn AttendanceRepository>,
    pub store: Arc<dyn CheckpointStore>,
    pub audit_sinks: Vec<Arc<dyn AuditSink>>,
}

/// Everything `GET /sync` reports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDashboard {
    pub current: Option<SyncOperation>,
    pub progress_percent: f64,
    pub recent_errors: Vec<SyncErrorEntry>,
    pub configuration: ConfigurationView,
    pub history: Vec<SyncOperation>,
    pub circuit_breakers: Vec<CircuitSnapshot>,
    pub rate_limiter: RateLimiterSnapshot,
    pub metrics: MetricsSnapshot,
}

struct ActiveRun {
    operation_id: OperationId,
    cancel: CancellationToken,
    finished: watch::Receiver<Option<SyncOperation>>,
}

struct Inner {
    settings: SyncSettings,
    services: SyncServices,
    events: EventBus,
    breakers: CircuitBreakerRegistry,
    limiter: RateLimiter,
    metrics: Metrics,
    validator: RecordValidator,
    chunker: DateRangeChunker,
    active: Mutex<Option<ActiveRun>>,
    snapshot: Arc<RwLock<Option<SyncOperation>>>,
}

/// Top-level state machine. At most one operation runs at a time; handles
/// are cheap to clone and share the same state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Builds the orchestrator and marks operations left running by a previous
    /// process as failed.
    pub async fn new(settings: SyncSettings, services: SyncServices) -> Result<Self, RuntimeError> {
        let policy = DataHandlingPolicy::new(
            &settings.policy.disallowed_fields,
            &settings.policy.disallowed_patterns,
            settings.policy.note_max_len,
        )?;

        let events = EventBus::new();
        if !services.audit_sinks.is_empty() {
            spawn_audit_recorder(&events, services.audit_sinks.clone());
        }

        let inner = Inner {
            breakers: CircuitBreakerRegistry::new(settings.breaker_config(), events.clone()),
            limiter: RateLimiter::new(settings.rate_limit()),
            metrics: Metrics::new(),
            validator: RecordValidator::new(policy),
            chunker: match settings.chunking.daily_records {
                Some(daily) => DateRangeChunker::from_record_cap(
                    settings.chunking.max_days,
                    settings.chunking.max_records,
                    daily,
                ),
                None => DateRangeChunker::new(settings.chunking.max_days),
            },
            active: Mutex::new(None),
            snapshot: Arc::new(RwLock::new(None)),
            events,
            settings,
            services,
        };

        let orchestrator = Self {
            inner: Arc::new(inner),
        };
        orchestrator.recover_interrupted().await?;
        Ok(orchestrator)
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub fn configuration(&self) -> ConfigurationView {
        self.inner.settings.view()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn subscribe(&self) -> (Subscription, mpsc::Receiver<Arc<SyncEvent>>) {
        self.inner.events.subscribe()
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.inner.events.unsubscribe(subscription);
    }

    pub fn circuit_breakers(&self) -> Vec<CircuitSnapshot> {
        self.inner.breakers.snapshots()
    }

    pub fn rate_limiter(&self) -> RateLimiterSnapshot {
        self.inner.limiter.snapshot(SIS_RATE_KEY)
    }

    /// Id of the running operation, if any.
    pub fn active_operation(&self) -> Option<OperationId> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|run| run.operation_id.clone())
    }

    /// Starts an operation and returns it as soon as workers are launched.
    pub async fn start(&self, request: SyncRequest) -> Result<SyncOperation, StartError> {
        let inner = &self.inner;
        let operation_id = OperationId::generate();
        let cancel = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(None);
        let slot = self.claim(operation_id.clone(), cancel.clone(), finished_rx)?;

        let (schools, options) = self.validate_request(&request)?;
        let batch_size = options.batch_size;

        let run_key = inner.chunker.run_key(&request.date_range, &schools);
        let chunks = inner.chunker.split(&request.date_range, &schools);
        let mut operation = SyncOperation::new(
            operation_id.clone(),
            run_key.clone(),
            request.sync_type,
            request.date_range,
            schools,
            options,
        );
        operation.progress.total_chunks = chunks.len() as u64;

        let state = StateManager::new(
            inner.services.store.clone(),
            operation_id.clone(),
            run_key.clone(),
        );

        let completed = match self.prepare(&operation, &state).await {
            Ok(completed) => completed,
            Err(err) => {
                operation.record_error(None, err.to_string());
                if operation.transition(SyncStatus::Failed).is_ok()
                    && let Err(save_err) = inner.services.store.save_operation(&operation).await
                {
                    warn!(operation_id = %operation_id, error = %save_err, "Failed to persist rejected operation");
                }
                drop(slot);
                let _ = finished_tx.send(Some(operation));
                return Err(err);
            }
        };

        let pending: Vec<_> = chunks
            .into_iter()
            .filter(|chunk| !completed.contains(&chunk.chunk_id))
            .collect();
        let resumed = operation.progress.total_chunks - pending.len() as u64;
        operation.progress.chunks_resumed = resumed;
        operation.progress.chunks_completed = resumed;

        operation
            .transition(SyncStatus::InProgress)
            .map_err(|err| StartError::InvalidRequest(err.to_string()))?;
        inner.services.store.save_operation(&operation).await?;
        *inner.snapshot.write() = Some(operation.clone());

        info!(
            operation_id = %operation_id,
            run_key = %run_key,
            total_chunks = operation.progress.total_chunks,
            resumed,
            force_refresh = options.force_refresh,
            "Sync operation started"
        );
        inner.events.publish(SyncEvent::OperationStarted {
            operation_id: operation_id.clone(),
            run_key,
            total_chunks: operation.progress.total_chunks,
            resumed_chunks: resumed,
            timestamp: Utc::now(),
        });

        let task = ChunkTask {
            operation_id: operation_id.clone(),
            fetcher: ChunkFetcher::new(
                inner.services.sis.clone(),
                inner.limiter.clone(),
                inner.breakers.get(SIS_DEPENDENCY),
                inner.settings.retry_policy(),
                inner.metrics.clone(),
                inner.settings.chunking.max_records,
            ),
            validator: inner.validator.clone(),
            writer: BatchWriter::new(
                inner.services.repository.clone(),
                inner.settings.retry_policy(),
                inner.breakers.get(DATASTORE_DEPENDENCY),
                inner.metrics.clone(),
            ),
            state,
            events: inner.events.clone(),
            metrics: inner.metrics.clone(),
            cancel,
            batch_size,
        };
        let driver = OperationDriver {
            operation: operation.clone(),
            chunks: pending,
            task: Arc::new(task),
            workers: inner.settings.workers,
            store: inner.services.store.clone(),
            snapshot: inner.snapshot.clone(),
        };

        tokio::spawn(async move {
            let finished = driver.run().await;
            drop(slot);
            let _ = finished_tx.send(Some(finished));
        });

        Ok(operation)
    }

    /// Requests cooperative cancellation of the running operation.
    pub fn cancel(&self) -> Result<OperationId, CancelError> {
        let active = self.inner.active.lock();
        let run = active.as_ref().ok_or(CancelError::NotRunning)?;

        if !run.cancel.is_cancelled() {
            info!(operation_id = %run.operation_id, "Cancellation requested");
            run.cancel.cancel();
            self.inner.events.publish(SyncEvent::CancellationRequested {
                operation_id: run.operation_id.clone(),
                timestamp: Utc::now(),
            });
        }
        Ok(run.operation_id.clone())
    }

    /// The running operation, or the most recent one.
    pub async fn status(&self) -> Result<Option<SyncOperation>, LookupError> {
        if let Some(operation) = self.inner.snapshot.read().clone() {
            return Ok(Some(operation));
        }
        Ok(self
            .inner
            .services
            .store
            .list_operations(1)
            .await?
            .into_iter()
            .next())
    }

    pub async fn operation(&self, operation_id: &OperationId) -> Result<SyncOperation, LookupError> {
        if let Some(operation) = self.inner.snapshot.read().clone()
            && &operation.operation_id == operation_id
        {
            return Ok(operation);
        }
        self.inner
            .services
            .store
            .load_operation(operation_id)
            .await?
            .ok_or_else(|| LookupError::NotFound(operation_id.clone()))
    }

    /// Resolves once the operation is terminal.
    pub async fn wait(&self, operation_id: &OperationId) -> Result<SyncOperation, LookupError> {
        let receiver = self
            .inner
            .active
            .lock()
            .as_ref()
            .filter(|run| &run.operation_id == operation_id)
            .map(|run| run.finished.clone());

        if let Some(mut receiver) = receiver {
            if let Ok(finished) = receiver.wait_for(|value| value.is_some()).await
                && let Some(operation) = finished.clone()
            {
                return Ok(operation);
            }
        }

        // Not running (or finished before we subscribed): the store has the
        // final snapshot.
        self.operation(operation_id).await
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<SyncOperation>, LookupError> {
        Ok(self.inner.services.store.list_operations(limit).await?)
    }

    pub async fn dashboard(&self) -> Result<SyncDashboard, LookupError> {
        let current = self.status().await?;
        let progress_percent = current
            .as_ref()
            .map(|op| op.progress.percent())
            .unwrap_or(0.0);
        let recent_errors = current
            .as_ref()
            .map(|op| op.recent_errors(RECENT_ERRORS).to_vec())
            .unwrap_or_default();

        Ok(SyncDashboard {
            current,
            progress_percent,
            recent_errors,
            configuration: self.configuration(),
            history: self.history(HISTORY_LEN).await?,
            circuit_breakers: self.circuit_breakers(),
            rate_limiter: self.rate_limiter(),
            metrics: self.metrics(),
        })
    }

    /// Marks persisted operations that never reached a terminal state as
    /// failed. Their checkpoints stay, so a restart resumes them.
    pub async fn recover_interrupted(&self) -> Result<usize, RuntimeError> {
        let store = &self.inner.services.store;
        let mut recovered = 0;

        for mut operation in store.list_operations(RECOVERY_SCAN).await? {
            if !operation.is_active() || self.active_operation().as_ref() == Some(&operation.operation_id) {
                continue;
            }
            operation.record_error(None, "interrupted: the process stopped before the operation finished");
            if operation.transition(SyncStatus::Failed).is_err() {
                continue;
            }
            store.save_operation(&operation).await?;
            warn!(operation_id = %operation.operation_id, "Marked interrupted operation as failed");
            recovered += 1;
        }

        Ok(recovered)
    }

    fn validate_request(
        &self,
        request: &SyncRequest,
    ) -> Result<(Vec<SchoolId>, SyncOptions), StartError> {
        request
            .date_range
            .validate()
            .map_err(|e| StartError::InvalidRequest(e.to_string()))?;

        let batch_size = request
            .batch_size
            .unwrap_or(self.inner.settings.sis.page_size);
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(StartError::InvalidRequest(format!(
                "batchSize must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }

        let options = SyncOptions {
            batch_size,
            force_refresh: request.force_refresh,
            halt_on_critical_failure: request
                .halt_on_critical_failure
                .unwrap_or(self.inner.settings.halt_on_critical),
        };
        Ok((self.resolve_schools(request)?, options))
    }

    fn resolve_schools(&self, request: &SyncRequest) -> Result<Vec<SchoolId>, StartError> {
        let requested = request
            .schools
            .clone()
            .filter(|schools| !schools.is_empty())
            .unwrap_or_else(|| self.inner.settings.schools.clone());

        let mut seen = HashSet::new();
        let schools: Vec<SchoolId> = requested
            .into_iter()
            .filter(|school| !school.as_str().trim().is_empty())
            .filter(|school| seen.insert(school.clone()))
            .collect();

        if schools.is_empty() {
            return Err(StartError::InvalidRequest(
                "no schools requested and none configured".to_string(),
            ));
        }
        Ok(schools)
    }

    async fn prepare(
        &self,
        operation: &SyncOperation,
        state: &StateManager,
    ) -> Result<HashSet<ChunkId>, StartError> {
        self.inner.services.store.save_operation(operation).await?;
        if operation.options.force_refresh {
            return Ok(HashSet::new());
        }
        Ok(state.completed_chunks().await?)
    }

    /// Takes the single-flight slot for `operation_id`.
    pub(crate) fn claim(
        &self,
        operation_id: OperationId,
        cancel: CancellationToken,
        finished: watch::Receiver<Option<SyncOperation>>,
    ) -> Result<ActiveSlot, StartError> {
        let mut active = self.inner.active.lock();
        if let Some(run) = active.as_ref() {
            return Err(StartError::AlreadyRunning {
                operation_id: run.operation_id.clone(),
            });
        }
        *active = Some(ActiveRun {
            operation_id: operation_id.clone(),
            cancel,
            finished,
        });
        Ok(ActiveSlot {
            orchestrator: self.clone(),
            operation_id,
        })
    }

    fn release(&self, operation_id: &OperationId) {
        let mut active = self.inner.active.lock();
        if active
            .as_ref()
            .is_some_and(|run| &run.operation_id == operation_id)
        {
            *active = None;
        }
    }
}

/// Holds the single-flight slot. Dropping it frees the slot, including on
/// early return, unwind, or when the `start` future itself is dropped.
pub(crate) struct ActiveSlot {
    orchestrator: SyncOrchestrator,
    operation_id: OperationId,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.orchestrator.release(&self.operation_id);
    }
}

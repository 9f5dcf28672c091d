use crate::{
    core::{
        date_range::DateRange,
        identifiers::{ChunkId, OperationId, RunKey, SchoolId},
    },
    execution::errors::TransitionError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncType {
    Full,
    Incremental,
    #[default]
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::InProgress => "IN_PROGRESS",
            SyncStatus::Completed => "COMPLETED",
            SyncStatus::Failed => "FAILED",
            SyncStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    /// SIS page size requested per fetch.
    pub batch_size: usize,
    /// Ignore existing checkpoints and re-sync every chunk.
    pub force_refresh: bool,
    pub halt_on_critical_failure: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            force_refresh: false,
            halt_on_critical_failure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub total_chunks: u64,
    pub chunks_completed: u64,
    pub chunks_failed: u64,
    /// Chunks skipped because an earlier run already checkpointed them.
    pub chunks_resumed: u64,
    pub records_processed: u64,
    pub records_succeeded: u64,
    pub records_failed: u64,
    pub skipped_duplicates: u64,
}

impl SyncProgress {
    /// Share of chunks that reached a terminal outcome, resumed ones included.
    pub fn percent(&self) -> f64 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        let settled = self.chunks_completed + self.chunks_failed;
        (settled as f64 / self.total_chunks as f64 * 100.0).min(100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorEntry {
    pub chunk_id: Option<ChunkId>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub const MAX_OPERATION_ERRORS: usize = 200;

/// One run of the pipeline. Owned and mutated by exactly one orchestrator driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub operation_id: OperationId,
    pub run_key: RunKey,
    #[serde(rename = "type")]
    pub sync_type: SyncType,
    pub status: SyncStatus,
    pub date_range: DateRange,
    pub schools: Vec<SchoolId>,
    pub options: SyncOptions,
    pub progress: SyncProgress,
    /// Newest entries last, at most [`MAX_OPERATION_ERRORS`].
    pub errors: Vec<SyncErrorEntry>,
    /// Entries evicted from `errors` to stay under the cap.
    #[serde(default)]
    pub errors_dropped: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    pub fn new(
        operation_id: OperationId,
        run_key: RunKey,
        sync_type: SyncType,
        date_range: DateRange,
        schools: Vec<SchoolId>,
        options: SyncOptions,
    ) -> Self {
        Self {
            operation_id,
            run_key,
            sync_type,
            status: SyncStatus::Pending,
            date_range,
            schools,
            options,
            progress: SyncProgress::default(),
            errors: Vec::new(),
            errors_dropped: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn transition(&mut self, next: SyncStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Operation {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == SyncStatus::InProgress {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Appends an error, evicting the oldest once the list is full. The
    /// operation is persisted after every chunk, so the list must stay bounded.
    pub fn record_error(&mut self, chunk_id: Option<ChunkId>, message: impl Into<String>) {
        if self.errors.len() >= MAX_OPERATION_ERRORS {
            let excess = self.errors.len() + 1 - MAX_OPERATION_ERRORS;
            self.errors.drain(..excess);
            self.errors_dropped += excess;
        }
        self.errors.push(SyncErrorEntry {
            chunk_id,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Errors recorded over the whole run, evicted ones included.
    pub fn total_errors(&self) -> usize {
        self.errors.len() + self.errors_dropped
    }

    pub fn recent_errors(&self, limit: usize) -> &[SyncErrorEntry] {
        let skip = self.errors.len().saturating_sub(limit);
        &self.errors[skip..]
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn operation() -> SyncOperation {
        SyncOperation::new(
            OperationId::from("op-1"),
            RunKey::from("run-1"),
            SyncType::Full,
            DateRange::new(
                NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 9, 30).unwrap(),
            )
            .unwrap(),
            vec![SchoolId::from("SCH1")],
            SyncOptions {
                batch_size: 500,
                force_refresh: false,
                halt_on_critical_failure: false,
            },
        )
    }

    #[test]
    fn lifecycle_moves_forward_and_stamps_times() {
        let mut op = operation();
        op.transition(SyncStatus::InProgress).unwrap();
        assert!(op.started_at.is_some());
        assert!(op.ended_at.is_none());

        op.transition(SyncStatus::Completed).unwrap();
        assert!(op.ended_at.is_some());
        assert!(!op.is_active());
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut op = operation();
        op.transition(SyncStatus::InProgress).unwrap();
        op.transition(SyncStatus::Cancelled).unwrap();

        for next in [
            SyncStatus::Pending,
            SyncStatus::InProgress,
            SyncStatus::Completed,
            SyncStatus::Failed,
        ] {
            assert!(op.transition(next).is_err());
        }
        assert_eq!(op.status, SyncStatus::Cancelled);
    }

    #[test]
    fn cannot_move_backwards() {
        let mut op = operation();
        op.transition(SyncStatus::InProgress).unwrap();
        let err = op.transition(SyncStatus::Pending).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Operation {
                from: SyncStatus::InProgress,
                to: SyncStatus::Pending
            }
        );
    }

    #[test]
    fn percent_counts_failed_and_completed_chunks() {
        let progress = SyncProgress {
            total_chunks: 4,
            chunks_completed: 2,
            chunks_failed: 1,
            ..Default::default()
        };
        assert_eq!(progress.percent(), 75.0);
        assert_eq!(SyncProgress::default().percent(), 100.0);
    }

    #[test]
    fn recent_errors_returns_the_tail() {
        let mut op = operation();
        for i in 0..5 {
            op.record_error(None, format!("e{i}"));
        }
        let tail = op.recent_errors(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].message, "e3");
        assert_eq!(tail[1].message, "e4");
    }

    #[test]
    fn error_list_stays_bounded_and_keeps_the_newest() {
        let mut op = operation();
        for i in 0..MAX_OPERATION_ERRORS + 25 {
            op.record_error(None, format!("e{i}"));
        }
        assert_eq!(op.errors.len(), MAX_OPERATION_ERRORS);
        assert_eq!(op.errors_dropped, 25);
        assert_eq!(op.total_errors(), MAX_OPERATION_ERRORS + 25);
        assert_eq!(op.errors[0].message, "e25");
        assert_eq!(
            op.recent_errors(1)[0].message,
            format!("e{}", MAX_OPERATION_ERRORS + 24)
        );
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let json = serde_json::to_value(operation()).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["type"], "FULL");
        assert!(json.get("operationId").is_some());
        assert!(json["progress"].get("recordsSucceeded").is_some());
    }
}

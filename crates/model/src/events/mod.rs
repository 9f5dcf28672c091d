use crate::{
    core::identifiers::{ChunkId, OperationId, RunKey},
    execution::{
        circuit::CircuitState,
        operation::{SyncProgress, SyncStatus},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A trait for events that can be published on the EventBus.
pub trait Event: Send + Sync + Debug + 'static {
    /// Returns a unique identifier for this event type.
    fn event_type(&self) -> &'static str;
}

/// Everything the pipeline reports while running. Identifiers and counts only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    OperationStarted {
        operation_id: OperationId,
        run_key: RunKey,
        total_chunks: u64,
        resumed_chunks: u64,
        timestamp: DateTime<Utc>,
    },

    ChunkStarted {
        operation_id: OperationId,
        chunk_id: ChunkId,
        timestamp: DateTime<Utc>,
    },

    ChunkCompleted {
        operation_id: OperationId,
        chunk_id: ChunkId,
        records_written: u64,
        skipped_duplicates: u64,
        records_failed: u64,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    ChunkFailed {
        operation_id: OperationId,
        chunk_id: ChunkId,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Chunk stopped before writing because cancellation was requested.
    ChunkAborted {
        operation_id: OperationId,
        chunk_id: ChunkId,
        timestamp: DateTime<Utc>,
    },

    Progress {
        operation_id: OperationId,
        progress: SyncProgress,
        percentage: f64,
        timestamp: DateTime<Utc>,
    },

    CancellationRequested {
        operation_id: OperationId,
        timestamp: DateTime<Utc>,
    },

    CircuitStateChanged {
        dependency: String,
        from: CircuitState,
        to: CircuitState,
        consecutive_failures: u32,
        timestamp: DateTime<Utc>,
    },

    OperationFinished {
        operation_id: OperationId,
        status: SyncStatus,
        progress: SyncProgress,
        error_count: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    pub fn operation_id(&self) -> Option<&OperationId> {
        match self {
            SyncEvent::OperationStarted { operation_id, .. }
            | SyncEvent::ChunkStarted { operation_id, .. }
            | SyncEvent::ChunkCompleted { operation_id, .. }
            | SyncEvent::ChunkFailed { operation_id, .. }
            | SyncEvent::ChunkAborted { operation_id, .. }
            | SyncEvent::Progress { operation_id, .. }
            | SyncEvent::CancellationRequested { operation_id, .. }
            | SyncEvent::OperationFinished { operation_id, .. } => Some(operation_id),
            SyncEvent::CircuitStateChanged { .. } => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SyncEvent::OperationStarted { timestamp, .. }
            | SyncEvent::ChunkStarted { timestamp, .. }
            | SyncEvent::ChunkCompleted { timestamp, .. }
            | SyncEvent::ChunkFailed { timestamp, .. }
            | SyncEvent::ChunkAborted { timestamp, .. }
            | SyncEvent::Progress { timestamp, .. }
            | SyncEvent::CancellationRequested { timestamp, .. }
            | SyncEvent::CircuitStateChanged { timestamp, .. }
            | SyncEvent::OperationFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Whether the event belongs in the audit log (progress ticks do not).
    pub fn is_auditable(&self) -> bool {
        !matches!(
            self,
            SyncEvent::Progress { .. } | SyncEvent::ChunkStarted { .. }
        )
    }
}

impl Event for SyncEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::OperationStarted { .. } => "sync.operation.started",
            SyncEvent::ChunkStarted { .. } => "sync.chunk.started",
            SyncEvent::ChunkCompleted { .. } => "sync.chunk.completed",
            SyncEvent::ChunkFailed { .. } => "sync.chunk.failed",
            SyncEvent::ChunkAborted { .. } => "sync.chunk.aborted",
            SyncEvent::Progress { .. } => "sync.progress",
            SyncEvent::CancellationRequested { .. } => "sync.cancellation_requested",
            SyncEvent::CircuitStateChanged { .. } => "resilience.circuit.state_changed",
            SyncEvent::OperationFinished { .. } => "sync.operation.finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = SyncEvent::ChunkFailed {
            operation_id: OperationId::from("op-1"),
            chunk_id: ChunkId::from("chk-1"),
            error: "circuit open".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chunk_failed");
        assert_eq!(json["chunk_id"], "chk-1");
        assert_eq!(event.event_type(), "sync.chunk.failed");
    }

    #[test]
    fn breaker_events_have_no_operation() {
        let event = SyncEvent::CircuitStateChanged {
            dependency: "sis".into(),
            from: CircuitState::Closed,
            to: CircuitState::Open,
            consecutive_failures: 5,
            timestamp: Utc::now(),
        };
        assert!(event.operation_id().is_none());
        assert!(event.is_auditable());
    }
}

use crate::core::identifiers::{ChunkId, OperationId, RunKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable marker that every record of a chunk has been written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub operation_id: OperationId,
    pub run_key: RunKey,
    pub chunk_id: ChunkId,
    pub records_written: u64,
    pub completed_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        operation_id: OperationId,
        run_key: RunKey,
        chunk_id: ChunkId,
        records_written: u64,
    ) -> Self {
        Self {
            operation_id,
            run_key,
            chunk_id,
            records_written,
            completed_at: Utc::now(),
        }
    }
}

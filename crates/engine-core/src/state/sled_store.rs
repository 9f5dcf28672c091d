use crate::{
    audit::{AuditEntry, AuditSink},
    error::{AuditError, StateStoreError},
    state::{CheckpointStore, newest_first},
};
use async_trait::async_trait;
use model::{
    core::identifiers::{ChunkId, OperationId, RunKey},
    execution::{checkpoint::Checkpoint, operation::SyncOperation},
};
use std::{collections::HashSet, path::Path};
use tracing::debug;

pub struct SledCheckpointStore {
    db: sled::Db,
}

impl SledCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|source| StateStoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { db })
    }

    /// Throwaway store for tests and dry runs.
    pub fn temporary() -> Result<Self, StateStoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    #[inline]
    fn chk_prefix(run_key: &RunKey) -> String {
        format!("chk:{}:", run_key)
    }

    #[inline]
    fn chk_key(run_key: &RunKey, chunk_id: &ChunkId) -> String {
        format!("chk:{}:{}", run_key, chunk_id)
    }

    #[inline]
    fn op_key(operation_id: &OperationId) -> String {
        format!("op:{}", operation_id)
    }

    fn audit_prefix(operation_id: Option<&OperationId>) -> String {
        match operation_id {
            Some(id) => format!("audit:{}:", id),
            None => "audit:-:".to_string(),
        }
    }

    /// Audit entries recorded for one operation, in append order.
    pub fn audit_entries(
        &self,
        operation_id: Option<&OperationId>,
    ) -> Result<Vec<AuditEntry>, StateStoreError> {
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(Self::audit_prefix(operation_id)) {
            let (_key, value) = item?;
            let entry: AuditEntry = serde_json::from_slice(&value)
                .map_err(|e| StateStoreError::Corrupt(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[async_trait]
impl CheckpointStore for SledCheckpointStore {
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<bool, StateStoreError> {
        let key = Self::chk_key(&checkpoint.run_key, &checkpoint.chunk_id);
        let bytes = bincode::serialize(checkpoint).map_err(|e| StateStoreError::Commit {
            chunk_id: checkpoint.chunk_id.to_string(),
            message: e.to_string(),
        })?;

        // Append-only: only the first commit for a chunk lands.
        let inserted = self
            .db
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(bytes))?
            .is_ok();

        self.db.flush_async().await?;

        if !inserted {
            debug!(
                chunk_id = %checkpoint.chunk_id,
                run_key = %checkpoint.run_key,
                "Checkpoint already present, keeping original"
            );
        }
        Ok(inserted)
    }

    async fn is_completed(
        &self,
        run_key: &RunKey,
        chunk_id: &ChunkId,
    ) -> Result<bool, StateStoreError> {
        Ok(self.db.contains_key(Self::chk_key(run_key, chunk_id))?)
    }

    async fn load(&self, run_key: &RunKey) -> Result<HashSet<ChunkId>, StateStoreError> {
        Ok(self
            .checkpoints(run_key)
            .await?
            .into_iter()
            .map(|cp| cp.chunk_id)
            .collect())
    }

    async fn checkpoints(&self, run_key: &RunKey) -> Result<Vec<Checkpoint>, StateStoreError> {
        let mut checkpoints = Vec::new();
        for item in self.db.scan_prefix(Self::chk_prefix(run_key)) {
            let (_key, value) =
                item.map_err(|e| StateStoreError::LoadCheckpoints(e.to_string()))?;
            let checkpoint: Checkpoint = bincode::deserialize(&value)
                .map_err(|e| StateStoreError::Corrupt(e.to_string()))?;
            checkpoints.push(checkpoint);
        }
        Ok(checkpoints)
    }

    async fn save_operation(&self, operation: &SyncOperation) -> Result<(), StateStoreError> {
        let bytes = bincode::serialize(operation).map_err(|e| StateStoreError::SaveOperation {
            operation_id: operation.operation_id.to_string(),
            message: e.to_string(),
        })?;
        self.db.insert(Self::op_key(&operation.operation_id), bytes)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn load_operation(
        &self,
        operation_id: &OperationId,
    ) -> Result<Option<SyncOperation>, StateStoreError> {
        match self.db.get(Self::op_key(operation_id))? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| StateStoreError::LoadOperation(e.to_string())),
            None => Ok(None),
        }
    }

    async fn list_operations(&self, limit: usize) -> Result<Vec<SyncOperation>, StateStoreError> {
        let mut operations = Vec::new();
        for item in self.db.scan_prefix("op:") {
            let (_key, value) = item?;
            let operation: SyncOperation = bincode::deserialize(&value)
                .map_err(|e| StateStoreError::LoadOperation(e.to_string()))?;
            operations.push(operation);
        }
        Ok(newest_first(operations, limit))
    }
}

#[async_trait]
impl AuditSink for SledCheckpointStore {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let seq = self
            .db
            .generate_id()
            .map_err(|e| AuditError::Append(e.to_string()))?;
        let key = format!(
            "{}{:020}",
            Self::audit_prefix(entry.operation_id.as_ref()),
            seq
        );
        let value = serde_json::to_vec(entry)?;
        self.db
            .insert(key, value)
            .map_err(|e| AuditError::Append(e.to_string()))?;
        Ok(())
    }
}

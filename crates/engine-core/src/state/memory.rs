use crate::{
    error::StateStoreError,
    state::{CheckpointStore, newest_first},
};
use async_trait::async_trait;
use model::{
    core::identifiers::{ChunkId, OperationId, RunKey},
    execution::{checkpoint::Checkpoint, operation::SyncOperation},
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct Inner {
    checkpoints: HashMap<RunKey, HashMap<ChunkId, Checkpoint>>,
    operations: HashMap<OperationId, SyncOperation>,
}

/// Non-durable store with the same append-only semantics as the sled store.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    inner: Mutex<Inner>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<bool, StateStoreError> {
        let mut inner = self.inner.lock();
        let chunks = inner
            .checkpoints
            .entry(checkpoint.run_key.clone())
            .or_default();
        if chunks.contains_key(&checkpoint.chunk_id) {
            return Ok(false);
        }
        chunks.insert(checkpoint.chunk_id.clone(), checkpoint.clone());
        Ok(true)
    }

    async fn is_completed(
        &self,
        run_key: &RunKey,
        chunk_id: &ChunkId,
    ) -> Result<bool, StateStoreError> {
        Ok(self
            .inner
            .lock()
            .checkpoints
            .get(run_key)
            .is_some_and(|chunks| chunks.contains_key(chunk_id)))
    }

    async fn load(&self, run_key: &RunKey) -> Result<HashSet<ChunkId>, StateStoreError> {
        Ok(self
            .inner
            .lock()
            .checkpoints
            .get(run_key)
            .map(|chunks| chunks.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn checkpoints(&self, run_key: &RunKey) -> Result<Vec<Checkpoint>, StateStoreError> {
        Ok(self
            .inner
            .lock()
            .checkpoints
            .get(run_key)
            .map(|chunks| chunks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_operation(&self, operation: &SyncOperation) -> Result<(), StateStoreError> {
        self.inner
            .lock()
            .operations
            .insert(operation.operation_id.clone(), operation.clone());
        Ok(())
    }

    async fn load_operation(
        &self,
        operation_id: &OperationId,
    ) -> Result<Option<SyncOperation>, StateStoreError> {
        Ok(self.inner.lock().operations.get(operation_id).cloned())
    }

    async fn list_operations(&self, limit: usize) -> Result<Vec<SyncOperation>, StateStoreError> {
        let operations = self.inner.lock().operations.values().cloned().collect();
        Ok(newest_first(operations, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_is_append_only() {
        let store = InMemoryCheckpointStore::new();
        let run_key = RunKey::from("run-1");
        let first = Checkpoint::new(
            OperationId::from("op-1"),
            run_key.clone(),
            ChunkId::from("chk-a"),
            3,
        );
        let mut second = first.clone();
        second.records_written = 7;

        assert!(store.commit(&first).await.unwrap());
        assert!(!store.commit(&second).await.unwrap());
        assert_eq!(store.checkpoints(&run_key).await.unwrap()[0].records_written, 3);
    }
}

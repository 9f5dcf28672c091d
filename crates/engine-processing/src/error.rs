use connectors::error::{DatastoreError, SisError};
use engine_core::{circuit_breaker::CircuitOpen, error::StateStoreError};
use model::core::identifiers::ChunkId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),

    #[error("SIS fetch failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: SisError },

    #[error("SIS fetch failed: {0}")]
    Fatal(SisError),

    #[error("Chunk '{chunk_id}' exceeds the {limit} record limit")]
    ChunkTooLarge { chunk_id: ChunkId, limit: usize },
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),

    #[error("Datastore write failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: DatastoreError },

    #[error("Datastore write failed: {0}")]
    Fatal(DatastoreError),
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Failed to checkpoint chunk '{chunk_id}': {source}")]
    Commit {
        chunk_id: ChunkId,
        #[source]
        source: StateStoreError,
    },

    #[error("Failed to load checkpoints: {0}")]
    Load(#[source] StateStoreError),
}

/// Everything that can end a chunk unsuccessfully.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Disallowed pattern #{index} does not compile: {message}")]
    InvalidPattern { index: usize, message: String },
}

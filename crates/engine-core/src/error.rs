use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Failed to open state store at '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: sled::Error,
    },

    #[error("Failed to commit checkpoint for chunk '{chunk_id}': {message}")]
    Commit { chunk_id: String, message: String },

    #[error("Failed to load checkpoints: {0}")]
    LoadCheckpoints(String),

    #[error("Failed to save operation '{operation_id}': {message}")]
    SaveOperation {
        operation_id: String,
        message: String,
    },

    #[error("Failed to load operation: {0}")]
    LoadOperation(String),

    #[error("Stored entry could not be decoded: {0}")]
    Corrupt(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Failed to encode audit entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to append audit entry: {0}")]
    Append(String),
}

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Operation '{0}' not found")]
    NotFound(String),

    #[error("Failed to read state: {0}")]
    State(#[from] StateStoreError),
}

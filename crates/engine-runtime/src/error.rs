use engine_core::error::StateStoreError;
use engine_processing::error::{CheckpointError, PolicyError};
use model::core::identifiers::OperationId;
use thiserror::Error;

/// Why an operation could not be started.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Operation '{operation_id}' is already running")]
    AlreadyRunning { operation_id: OperationId },

    #[error("Invalid sync request: {0}")]
    InvalidRequest(String),

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CancelError {
    #[error("No sync operation is running")]
    NotRunning,
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Operation '{0}' not found")]
    NotFound(OperationId),

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),
}

/// Failures while assembling the orchestrator.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),
}

use connectors::error::{DatastoreError, SisError};
use engine_config::error::SettingsError;
use engine_core::error::{ProgressError, StateStoreError};
use engine_runtime::error::{LookupError, RuntimeError, StartError};
use model::core::date_range::DateRangeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid date range: {0}")]
    DateRange(#[from] DateRangeError),

    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    #[error("Failed to start the sync: {0}")]
    Start(#[from] StartError),

    #[error("Failed to look up operation: {0}")]
    Lookup(#[from] LookupError),

    #[error("Failed to initialize the sync engine: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Failed to load progress: {0}")]
    Progress(#[from] ProgressError),

    #[error("SIS client error: {0}")]
    Sis(#[from] SisError),

    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),
}

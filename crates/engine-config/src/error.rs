use thiserror::Error;

/// Errors raised while building the pipeline configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// One or more settings were missing or malformed. Every problem found is listed.
    #[error("Invalid configuration: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    /// A setting that only some commands need was not provided.
    #[error("Missing required setting: {0}")]
    Missing(String),
}

pub mod validated;
pub mod validator;

pub use validated::{
    ChunkSettings, ConfigurationView, PolicySettings, ResilienceSettings, SisSettings,
    SyncSettings,
};
pub use validator::SettingsValidator;

/// Prefix shared by every environment variable the pipeline reads.
pub const ENV_PREFIX: &str = "ATTENDANCE_SYNC_";

pub mod keys {
    pub const SIS_BASE_URL: &str = "SIS_BASE_URL";
    pub const SIS_TIMEOUT_MS: &str = "SIS_TIMEOUT_MS";
    pub const SIS_PAGE_SIZE: &str = "SIS_PAGE_SIZE";
    pub const SIS_IDENTITY_PEM: &str = "SIS_IDENTITY_PEM";
    pub const SIS_IDENTITY_KEY_PEM: &str = "SIS_IDENTITY_KEY_PEM";
    pub const SIS_RATE_LIMIT: &str = "SIS_RATE_LIMIT";
    pub const SIS_RATE_WINDOW_SECS: &str = "SIS_RATE_WINDOW_SECS";
    pub const RETRY_MAX_ATTEMPTS: &str = "RETRY_MAX_ATTEMPTS";
    pub const RETRY_BASE_DELAY_MS: &str = "RETRY_BASE_DELAY_MS";
    pub const RETRY_MAX_DELAY_MS: &str = "RETRY_MAX_DELAY_MS";
    pub const RETRY_JITTER: &str = "RETRY_JITTER";
    pub const BREAKER_FAILURE_THRESHOLD: &str = "BREAKER_FAILURE_THRESHOLD";
    pub const BREAKER_COOLDOWN_SECS: &str = "BREAKER_COOLDOWN_SECS";
    pub const CHUNK_MAX_DAYS: &str = "CHUNK_MAX_DAYS";
    pub const CHUNK_MAX_RECORDS: &str = "CHUNK_MAX_RECORDS";
    pub const CHUNK_DAILY_RECORDS: &str = "CHUNK_DAILY_RECORDS";
    pub const WORKERS: &str = "WORKERS";
    pub const STATE_PATH: &str = "STATE_PATH";
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const SCHOOLS: &str = "SCHOOLS";
    pub const HALT_ON_CRITICAL: &str = "HALT_ON_CRITICAL";
    pub const DISALLOWED_FIELDS: &str = "DISALLOWED_FIELDS";
    pub const DISALLOWED_PATTERNS: &str = "DISALLOWED_PATTERNS";
    pub const NOTE_MAX_LEN: &str = "NOTE_MAX_LEN";
    pub const API_BIND: &str = "API_BIND";
}

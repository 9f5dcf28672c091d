use engine_core::{
    circuit_breaker::CircuitBreakerConfig, rate_limiter::RateLimit, retry::RetryPolicy,
};
use model::core::identifiers::SchoolId;
use serde::Serialize;
use std::{net::SocketAddr, path::PathBuf, time::Duration};

#[derive(Debug, Clone)]
pub struct SisSettings {
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub page_size: usize,
    pub identity_pem: Option<PathBuf>,
    /// Private key for the client certificate; the identity file is reused when absent.
    pub identity_key_pem: Option<PathBuf>,
    pub rate_limit: u32,
    pub rate_window: Duration,
}

#[derive(Debug, Clone)]
pub struct ResilienceSettings {
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_jitter: bool,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct ChunkSettings {
    pub max_days: u32,
    pub max_records: usize,
    /// Expected records per school per day. When set, windows shrink so a
    /// chunk is expected to stay under `max_records`.
    pub daily_records: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct PolicySettings {
    pub disallowed_fields: Vec<String>,
    pub disallowed_patterns: Vec<String>,
    pub note_max_len: usize,
}

/// Immutable, validated configuration for one process.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub sis: SisSettings,
    pub resilience: ResilienceSettings,
    pub chunking: ChunkSettings,
    pub policy: PolicySettings,
    pub workers: usize,
    pub state_path: PathBuf,
    pub database_url: Option<String>,
    pub schools: Vec<SchoolId>,
    pub halt_on_critical: bool,
    pub api_bind: SocketAddr,
}

impl SyncSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        let r = &self.resilience;
        RetryPolicy::new(r.retry_max_attempts, r.retry_base_delay, r.retry_max_delay)
            .with_jitter(r.retry_jitter)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(
            self.resilience.breaker_failure_threshold,
            self.resilience.breaker_cooldown,
        )
    }

    pub fn rate_limit(&self) -> RateLimit {
        RateLimit::new(self.sis.rate_limit, self.sis.rate_window)
    }

    /// The effective configuration with secrets left out.
    pub fn view(&self) -> ConfigurationView {
        ConfigurationView {
            sis_base_url: self.sis.base_url.clone(),
            sis_timeout_ms: self.sis.timeout.as_millis() as u64,
            sis_page_size: self.sis.page_size,
            sis_client_certificate: self.sis.identity_pem.is_some(),
            rate_limit_per_window: self.sis.rate_limit,
            rate_window_secs: self.sis.rate_window.as_secs(),
            retry_max_attempts: self.resilience.retry_max_attempts,
            retry_base_delay_ms: self.resilience.retry_base_delay.as_millis() as u64,
            retry_max_delay_ms: self.resilience.retry_max_delay.as_millis() as u64,
            retry_jitter: self.resilience.retry_jitter,
            breaker_failure_threshold: self.resilience.breaker_failure_threshold,
            breaker_cooldown_secs: self.resilience.breaker_cooldown.as_secs(),
            chunk_max_days: self.chunking.max_days,
            chunk_max_records: self.chunking.max_records,
            chunk_daily_records: self.chunking.daily_records,
            workers: self.workers,
            datastore: if self.database_url.is_some() {
                "postgres"
            } else {
                "memory"
            },
            schools: self.schools.iter().map(|s| s.to_string()).collect(),
            halt_on_critical: self.halt_on_critical,
            disallowed_fields: self.policy.disallowed_fields.len(),
            disallowed_patterns: self.policy.disallowed_patterns.len(),
            note_max_len: self.policy.note_max_len,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationView {
    pub sis_base_url: Option<String>,
    pub sis_timeout_ms: u64,
    pub sis_page_size: usize,
    pub sis_client_certificate: bool,
    pub rate_limit_per_window: u32,
    pub rate_window_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter: bool,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub chunk_max_days: u32,
    pub chunk_max_records: usize,
    pub chunk_daily_records: Option<usize>,
    pub workers: usize,
    pub datastore: &'static str,
    pub schools: Vec<String>,
    pub halt_on_critical: bool,
    pub disallowed_fields: usize,
    pub disallowed_patterns: usize,
    pub note_max_len: usize,
}

use crate::{
    error::SettingsError,
    settings::{
        ENV_PREFIX, keys,
        validated::{ChunkSettings, PolicySettings, ResilienceSettings, SisSettings, SyncSettings},
    },
};
use model::core::identifiers::SchoolId;
use regex::Regex;
use std::{
    collections::HashMap, fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr,
    time::Duration,
};
use tracing::{info, warn};

const MAX_WORKERS: usize = 64;
const PATTERN_SEPARATOR: &str = ";;";

/// Builds [`SyncSettings`] from a variable map, reporting every problem at once.
pub struct SettingsValidator<'a> {
    vars: &'a HashMap<String, String>,
    errors: Vec<String>,
}

impl<'a> SettingsValidator<'a> {
    pub fn new(vars: &'a HashMap<String, String>) -> Self {
        Self {
            vars,
            errors: Vec::new(),
        }
    }

    pub fn validate(mut self) -> Result<SyncSettings, SettingsError> {
        let sis = self.sis();
        let resilience = self.resilience();
        let chunking = ChunkSettings {
            max_days: self.number(keys::CHUNK_MAX_DAYS, 7u32, 1..=366),
            max_records: self.number(keys::CHUNK_MAX_RECORDS, 10_000usize, 1..=10_000_000),
            daily_records: match self.get(keys::CHUNK_DAILY_RECORDS) {
                Some(_) => Some(self.number(keys::CHUNK_DAILY_RECORDS, 1usize, 1..=10_000_000)),
                None => None,
            },
        };
        let policy = self.policy();
        let workers = self.number(keys::WORKERS, 4usize, 1..=MAX_WORKERS);
        let state_path = self
            .get(keys::STATE_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(default_state_path);
        let database_url = self.get(keys::DATABASE_URL).map(str::to_string);
        let schools = self.list(keys::SCHOOLS, ",");
        let halt_on_critical = self.flag(keys::HALT_ON_CRITICAL, false);
        let api_bind = self.parsed(keys::API_BIND, SocketAddr::from(([127, 0, 0, 1], 8080)));

        let mut unique = Vec::<SchoolId>::new();
        for school in schools {
            let school = SchoolId::from(school);
            if !unique.contains(&school) {
                unique.push(school);
            }
        }

        if !self.errors.is_empty() {
            return Err(SettingsError::ValidationFailed(self.errors));
        }

        if database_url.is_none() {
            warn!("No datastore URL configured, attendance will be kept in memory only");
        }

        let settings = SyncSettings {
            sis,
            resilience,
            chunking,
            policy,
            workers,
            state_path,
            database_url,
            schools: unique,
            halt_on_critical,
            api_bind,
        };

        info!(
            workers = settings.workers,
            chunk_max_days = settings.chunking.max_days,
            rate_limit = settings.sis.rate_limit,
            rate_window_secs = settings.sis.rate_window.as_secs(),
            schools = settings.schools.len(),
            "Settings validation completed successfully"
        );
        Ok(settings)
    }

    fn sis(&mut self) -> SisSettings {
        let base_url = self.get(keys::SIS_BASE_URL).map(|url| url.trim_end_matches('/').to_string());
        if let Some(url) = &base_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            self.error(keys::SIS_BASE_URL, "must start with http:// or https://");
        }

        let identity_pem = self.get(keys::SIS_IDENTITY_PEM).map(PathBuf::from);
        let identity_key_pem = self.get(keys::SIS_IDENTITY_KEY_PEM).map(PathBuf::from);
        if identity_key_pem.is_some() && identity_pem.is_none() {
            self.error(
                keys::SIS_IDENTITY_KEY_PEM,
                "requires SIS_IDENTITY_PEM to be set",
            );
        }

        SisSettings {
            base_url,
            timeout: Duration::from_millis(self.number(keys::SIS_TIMEOUT_MS, 30_000u64, 1..=600_000)),
            page_size: self.number(keys::SIS_PAGE_SIZE, 500usize, 1..=10_000),
            identity_pem,
            identity_key_pem,
            rate_limit: self.number(keys::SIS_RATE_LIMIT, 60u32, 1..=100_000),
            rate_window: Duration::from_secs(self.number(keys::SIS_RATE_WINDOW_SECS, 60u64, 1..=86_400)),
        }
    }

    fn resilience(&mut self) -> ResilienceSettings {
        let base = self.number(keys::RETRY_BASE_DELAY_MS, 500u64, 0..=600_000);
        let max = self.number(keys::RETRY_MAX_DELAY_MS, 30_000u64, 0..=3_600_000);
        if max < base {
            self.error(
                keys::RETRY_MAX_DELAY_MS,
                "must not be smaller than RETRY_BASE_DELAY_MS",
            );
        }

        ResilienceSettings {
            retry_max_attempts: self.number(keys::RETRY_MAX_ATTEMPTS, 5u32, 1..=100),
            retry_base_delay: Duration::from_millis(base),
            retry_max_delay: Duration::from_millis(max),
            retry_jitter: self.flag(keys::RETRY_JITTER, true),
            breaker_failure_threshold: self.number(keys::BREAKER_FAILURE_THRESHOLD, 5u32, 1..=1_000),
            breaker_cooldown: Duration::from_secs(self.number(keys::BREAKER_COOLDOWN_SECS, 60u64, 0..=86_400)),
        }
    }

    fn policy(&mut self) -> PolicySettings {
        let disallowed_fields = self.list(keys::DISALLOWED_FIELDS, ",");
        let disallowed_patterns = self.list(keys::DISALLOWED_PATTERNS, PATTERN_SEPARATOR);

        for (index, pattern) in disallowed_patterns.iter().enumerate() {
            if let Err(err) = Regex::new(pattern) {
                self.errors.push(format!(
                    "{ENV_PREFIX}{}: pattern #{} does not compile: {err}",
                    keys::DISALLOWED_PATTERNS,
                    index + 1
                ));
            }
        }

        PolicySettings {
            disallowed_fields,
            disallowed_patterns,
            note_max_len: self.number(keys::NOTE_MAX_LEN, 500usize, 0..=100_000),
        }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.vars
            .get(&format!("{ENV_PREFIX}{key}"))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn error(&mut self, key: &str, message: &str) {
        self.errors.push(format!("{ENV_PREFIX}{key}: {message}"));
    }

    fn parsed<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => default,
            Some(raw) => match raw.parse::<T>() {
                Ok(value) => value,
                Err(err) => {
                    self.error(key, &format!("'{raw}' is invalid: {err}"));
                    default
                }
            },
        }
    }

    fn number<T>(&mut self, key: &str, default: T, range: std::ops::RangeInclusive<T>) -> T
    where
        T: FromStr + PartialOrd + Copy + Display,
        T::Err: Display,
    {
        let value = self.parsed(key, default);
        if !range.contains(&value) {
            self.error(
                key,
                &format!(
                    "{value} is outside the allowed range {}..={}",
                    range.start(),
                    range.end()
                ),
            );
            return default;
        }
        value
    }

    fn flag(&mut self, key: &str, default: bool) -> bool {
        match self.get(key).map(|raw| raw.to_ascii_lowercase()) {
            None => default,
            Some(raw) => match raw.as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    self.error(key, &format!("'{raw}' is not a boolean"));
                    default
                }
            },
        }
    }

    fn list(&self, key: &str, separator: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(separator)
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn default_state_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".attendance-sync")
        .join("state")
}

impl SyncSettings {
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, SettingsError> {
        SettingsValidator::new(vars).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = SyncSettings::from_vars(&HashMap::new()).unwrap();
        assert_eq!(settings.sis.rate_limit, 60);
        assert_eq!(settings.sis.rate_window, Duration::from_secs(60));
        assert_eq!(settings.sis.timeout, Duration::from_secs(30));
        assert_eq!(settings.resilience.retry_max_attempts, 5);
        assert!(settings.resilience.retry_jitter);
        assert_eq!(settings.chunking.max_days, 7);
        assert_eq!(settings.chunking.max_records, 10_000);
        assert_eq!(settings.chunking.daily_records, None);
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.policy.note_max_len, 500);
        assert_eq!(settings.api_bind.to_string(), "127.0.0.1:8080");
        assert!(settings.database_url.is_none());
        assert!(settings.state_path.ends_with(".attendance-sync/state"));
        assert_eq!(settings.view().datastore, "memory");
    }

    #[test]
    fn parses_lists_and_overrides() {
        let settings = SyncSettings::from_vars(&vars(&[
            ("SIS_BASE_URL", "https://sis.example.org/api/"),
            ("SCHOOLS", "SCH-1, SCH-2,SCH-1"),
            ("DISALLOWED_FIELDS", "ssn,home_address"),
            ("DISALLOWED_PATTERNS", r"\d{3}-\d{2}-\d{4};;(?i)diagnosis"),
            ("WORKERS", "8"),
            ("RETRY_JITTER", "off"),
            ("DATABASE_URL", "postgres://app@localhost/attendance"),
            ("CHUNK_DAILY_RECORDS", "1200"),
        ]))
        .unwrap();

        assert_eq!(settings.sis.base_url.as_deref(), Some("https://sis.example.org/api"));
        assert_eq!(
            settings.schools,
            vec![SchoolId::from("SCH-1"), SchoolId::from("SCH-2")]
        );
        assert_eq!(settings.policy.disallowed_fields, vec!["ssn", "home_address"]);
        assert_eq!(settings.policy.disallowed_patterns.len(), 2);
        assert_eq!(settings.workers, 8);
        assert!(!settings.retry_policy().jitter);
        assert_eq!(settings.chunking.daily_records, Some(1200));

        let view = settings.view();
        assert_eq!(view.datastore, "postgres");
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("postgres://"));
    }

    #[test]
    fn collects_every_problem() {
        let err = SyncSettings::from_vars(&vars(&[
            ("WORKERS", "0"),
            ("SIS_RATE_LIMIT", "lots"),
            ("DISALLOWED_PATTERNS", "(unclosed"),
            ("SIS_BASE_URL", "ftp://sis"),
            ("RETRY_BASE_DELAY_MS", "5000"),
            ("RETRY_MAX_DELAY_MS", "100"),
        ]))
        .unwrap_err();

        match err {
            SettingsError::ValidationFailed(errors) => {
                assert_eq!(errors.len(), 5, "{errors:?}");
                assert!(errors.iter().any(|e| e.contains("WORKERS")));
                assert!(errors.iter().any(|e| e.contains("SIS_RATE_LIMIT")));
                assert!(errors.iter().any(|e| e.contains("pattern #1")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

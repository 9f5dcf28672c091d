use crate::fixtures::{FaultyRepository, ScriptedSis};
use chrono::NaiveDate;
use engine_config::settings::{ENV_PREFIX, SyncSettings, keys};
use engine_core::state::CheckpointStore;
use engine_runtime::orchestrator::{SyncOrchestrator, SyncServices};
use model::core::date_range::DateRange;
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

/// Fast retries, a permissive breaker and an effectively unlimited SIS quota.
/// `overrides` use unprefixed keys.
pub fn test_settings(overrides: &[(&str, &str)]) -> SyncSettings {
    let mut vars: HashMap<&str, String> = [
        (keys::WORKERS, "2"),
        (keys::CHUNK_MAX_DAYS, "7"),
        (keys::RETRY_MAX_ATTEMPTS, "3"),
        (keys::RETRY_BASE_DELAY_MS, "1"),
        (keys::RETRY_MAX_DELAY_MS, "2"),
        (keys::BREAKER_FAILURE_THRESHOLD, "50"),
        (keys::SIS_RATE_LIMIT, "10000"),
        (keys::SCHOOLS, "SCH-A,SCH-B"),
        (keys::DISALLOWED_FIELDS, "ssn"),
    ]
    .into_iter()
    .map(|(k, v)| (k, v.to_string()))
    .collect();

    for (key, value) in overrides {
        vars.insert(*key, value.to_string());
    }

    let prefixed: HashMap<String, String> = vars
        .into_iter()
        .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v))
        .collect();
    SyncSettings::from_vars(&prefixed).expect("test settings are valid")
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// 2024-09-02 through 2024-09-15: two 7-day chunks per school.
pub fn two_weeks() -> DateRange {
    DateRange::new(day(2024, 9, 2), day(2024, 9, 15)).expect("ordered range")
}

pub fn single_day(date: NaiveDate) -> DateRange {
    DateRange::new(date, date).expect("ordered range")
}

pub struct Harness {
    pub orchestrator: SyncOrchestrator,
    pub sis: Arc<ScriptedSis>,
    pub repository: Arc<FaultyRepository>,
}

pub async fn harness(
    settings: SyncSettings,
    sis: ScriptedSis,
    store: Arc<dyn CheckpointStore>,
) -> Harness {
    let sis = Arc::new(sis);
    let repository = Arc::new(FaultyRepository::new());
    let orchestrator = SyncOrchestrator::new(
        settings,
        SyncServices {
            sis: sis.clone(),
            repository: repository.clone(),
            store,
            audit_sinks: Vec::new(),
        },
    )
    .await
    .expect("orchestrator starts");

    Harness {
        orchestrator,
        sis,
        repository,
    }
}

/// Polls `check` every 10ms for up to five seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

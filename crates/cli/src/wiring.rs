use crate::{env::EnvManager, error::CliError};
use connectors::{
    datastore::{
        AttendanceRepository, memory::InMemoryAttendanceRepository,
        postgres::PgAttendanceRepository,
    },
    sis::http::{ClientIdentity, HttpSisClient, HttpSisConfig},
};
use engine_config::settings::{ENV_PREFIX, SyncSettings, keys};
use engine_core::{
    audit::{AuditSink, TracingAuditSink},
    state::sled_store::SledCheckpointStore,
};
use engine_runtime::orchestrator::{SyncOrchestrator, SyncServices};
use std::{path::Path, sync::Arc};
use tracing::{info, warn};

const DEFAULT_ENV_FILE: &str = ".env";

/// Reads the process environment plus the env file and validates it.
pub fn load_settings(env_file: Option<&Path>) -> Result<(SyncSettings, EnvManager), CliError> {
    let mut env = EnvManager::new();
    match env_file {
        Some(path) => env.load_from_file(path)?,
        None if Path::new(DEFAULT_ENV_FILE).exists() => env.load_from_file(DEFAULT_ENV_FILE)?,
        None => {}
    }

    let settings = SyncSettings::from_vars(env.all())?;
    Ok((settings, env))
}

pub fn open_state_store(settings: &SyncSettings) -> Result<Arc<SledCheckpointStore>, CliError> {
    if let Some(parent) = settings.state_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SledCheckpointStore::open(&settings.state_path)?;
    info!(path = %settings.state_path.display(), "Opened state store");
    Ok(Arc::new(store))
}

pub async fn build_orchestrator(settings: SyncSettings) -> Result<SyncOrchestrator, CliError> {
    let store = open_state_store(&settings)?;
    let sis = Arc::new(sis_client(&settings)?);
    let repository = repository(&settings).await?;

    let audit_sinks: Vec<Arc<dyn AuditSink>> =
        vec![Arc::new(TracingAuditSink), store.clone() as Arc<dyn AuditSink>];
    let services = SyncServices {
        sis,
        repository,
        store,
        audit_sinks,
    };

    Ok(SyncOrchestrator::new(settings, services).await?)
}

fn sis_client(settings: &SyncSettings) -> Result<HttpSisClient, CliError> {
    let base_url = settings.sis.base_url.clone().ok_or_else(|| {
        CliError::Config(format!("{ENV_PREFIX}{} is required", keys::SIS_BASE_URL))
    })?;

    let identity = match &settings.sis.identity_pem {
        Some(cert_path) => {
            let certificate_pem = std::fs::read(cert_path)?;
            let key_pem = match &settings.sis.identity_key_pem {
                Some(key_path) => std::fs::read(key_path)?,
                None => certificate_pem.clone(),
            };
            Some(ClientIdentity {
                certificate_pem,
                key_pem,
            })
        }
        None => None,
    };

    Ok(HttpSisClient::new(HttpSisConfig {
        base_url,
        timeout: settings.sis.timeout,
        identity,
    })?)
}

async fn repository(settings: &SyncSettings) -> Result<Arc<dyn AttendanceRepository>, CliError> {
    match &settings.database_url {
        Some(url) => {
            let repository = PgAttendanceRepository::connect(url).await?;
            repository.ensure_schema().await?;
            info!("Connected to the attendance datastore");
            Ok(Arc::new(repository))
        }
        None => {
            warn!("Writing attendance to an in-memory datastore; nothing will persist");
            Ok(Arc::new(InMemoryAttendanceRepository::new()))
        }
    }
}

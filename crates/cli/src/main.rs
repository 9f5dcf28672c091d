use crate::{
    commands::{Commands, LogFormat, SyncKind},
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use control_api::AppState;
use engine_core::{progress::ProgressService, state::CheckpointStore};
use engine_runtime::{orchestrator::SyncOrchestrator, request::SyncRequest};
use model::{
    core::{
        date_range::DateRange,
        identifiers::{OperationId, SchoolId},
    },
    execution::operation::{SyncStatus, SyncType},
};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod commands;
mod env;
mod error;
mod logging;
mod output;
mod shutdown;
mod wiring;

#[derive(Parser)]
#[command(
    name = "attendance-sync",
    version,
    about = "Resilient SIS attendance sync pipeline"
)]
struct Cli {
    #[arg(long, global = true, help = "Env file to load; defaults to ./.env when present")]
    env_file: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();

    let code = match execute(cli, &shutdown).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "Command failed");
            ExitCode::GeneralError
        }
    };

    if code != ExitCode::Success {
        info!(exit_code = code.as_i32(), "Exiting");
    }
    code.into()
}

async fn execute(cli: Cli, shutdown: &ShutdownCoordinator) -> Result<ExitCode, CliError> {
    let (settings, env) = wiring::load_settings(cli.env_file.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            let addr = bind.unwrap_or(settings.api_bind);
            let orchestrator = wiring::build_orchestrator(settings).await?;
            serve(orchestrator, addr, shutdown).await
        }
        Commands::Run {
            start,
            end,
            schools,
            force_refresh,
            halt_on_critical,
            batch_size,
            sync_type,
        } => {
            let mut request = SyncRequest::new(DateRange::new(start, end)?)
                .with_force_refresh(force_refresh);
            request.sync_type = sync_type.into();
            if !schools.is_empty() {
                request = request.with_schools(schools.into_iter().map(SchoolId::new).collect());
            }
            if halt_on_critical {
                request = request.with_halt_on_critical_failure(true);
            }
            if let Some(size) = batch_size {
                request = request.with_batch_size(size);
            }

            let orchestrator = wiring::build_orchestrator(settings).await?;
            run(orchestrator, request, shutdown).await
        }
        Commands::Progress { operation, json } => {
            let store = wiring::open_state_store(&settings)?;
            let service = ProgressService::new(store);
            let status = service
                .operation_status(&OperationId::new(operation))
                .await?;

            if json {
                output::print_json(&status)?;
            } else {
                output::print_progress_table(&status);
            }
            Ok(ExitCode::Success)
        }
        Commands::History { limit, json } => {
            let store = wiring::open_state_store(&settings)?;
            let operations = store.list_operations(limit).await?;

            if json {
                output::print_json(&operations)?;
            } else {
                output::print_history(&operations);
            }
            Ok(ExitCode::Success)
        }
        Commands::Config => {
            output::print_json(&serde_json::json!({
                "configuration": settings.view(),
                "environment": env.redacted(),
            }))?;
            Ok(ExitCode::Success)
        }
    }
}

async fn run(
    orchestrator: SyncOrchestrator,
    request: SyncRequest,
    shutdown: &ShutdownCoordinator,
) -> Result<ExitCode, CliError> {
    let operation = orchestrator.start(request).await?;
    let operation_id = operation.operation_id.clone();
    info!(
        operation_id = %operation_id,
        total_chunks = operation.progress.total_chunks,
        "Sync started"
    );

    let token = shutdown.cancel_token();
    let finished = tokio::select! {
        finished = orchestrator.wait(&operation_id) => finished?,
        _ = token.cancelled() => {
            if let Err(err) = orchestrator.cancel() {
                warn!(error = %err, "Operation was no longer running");
            }
            orchestrator.wait(&operation_id).await?
        }
    };

    output::print_operation(&finished);

    Ok(match finished.status {
        SyncStatus::Completed => ExitCode::Success,
        SyncStatus::Cancelled => ExitCode::ShutdownRequested,
        _ => ExitCode::GeneralError,
    })
}

async fn serve(
    orchestrator: SyncOrchestrator,
    addr: std::net::SocketAddr,
    shutdown: &ShutdownCoordinator,
) -> Result<ExitCode, CliError> {
    let listener = TcpListener::bind(addr).await?;
    let server_token = CancellationToken::new();
    let mut server = tokio::spawn(control_api::serve(
        AppState::new(orchestrator.clone()),
        listener,
        server_token.clone(),
    ));

    let token = shutdown.cancel_token();
    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(ExitCode::Success);
        }
        _ = token.cancelled() => {}
    }

    // Let the active operation reach a terminal state before the API goes away.
    if let Ok(operation_id) = orchestrator.cancel() {
        info!(operation_id = %operation_id, "Waiting for the active sync to stop");
        let stopped = orchestrator.wait(&operation_id).await?;
        info!(operation_id = %operation_id, status = %stopped.status, "Active sync stopped");
    }

    server_token.cancel();
    server.await??;

    Ok(if shutdown.is_shutdown_requested() {
        ExitCode::ShutdownRequested
    } else {
        ExitCode::Success
    })
}

impl From<SyncKind> for SyncType {
    fn from(kind: SyncKind) -> Self {
        match kind {
            SyncKind::Full => SyncType::Full,
            SyncKind::Incremental => SyncType::Incremental,
            SyncKind::Manual => SyncType::Manual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_repeated_schools() {
        let cli = Cli::try_parse_from([
            "attendance-sync",
            "run",
            "--start",
            "2024-09-02",
            "--end",
            "2024-09-06",
            "--school",
            "SCH-A",
            "--school",
            "SCH-B",
            "--type",
            "full",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                schools, sync_type, ..
            } => {
                assert_eq!(schools, vec!["SCH-A", "SCH-B"]);
                assert_eq!(SyncType::from(sync_type), SyncType::Full);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "attendance-sync",
            "history",
            "--limit",
            "3",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::History { limit: 3, .. }));
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(
            Cli::try_parse_from([
                "attendance-sync",
                "run",
                "--start",
                "09/02/2024",
                "--end",
                "2024-09-06",
            ])
            .is_err()
        );
    }
}

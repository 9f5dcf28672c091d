use chrono::NaiveDate;
use clap::{Subcommand, ValueEnum};
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyncKind {
    Full,
    Incremental,
    Manual,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the control API (POST/GET/DELETE /sync)
    Serve {
        #[arg(long, help = "Address to bind, overrides ATTENDANCE_SYNC_API_BIND")]
        bind: Option<SocketAddr>,
    },
    /// Run one sync operation and wait for it to finish
    Run {
        #[arg(long, help = "First day to sync (YYYY-MM-DD)")]
        start: NaiveDate,

        #[arg(long, help = "Last day to sync, inclusive (YYYY-MM-DD)")]
        end: NaiveDate,

        #[arg(
            long = "school",
            help = "School to sync; repeat for several. Defaults to ATTENDANCE_SYNC_SCHOOLS"
        )]
        schools: Vec<String>,

        #[arg(long, help = "Ignore checkpoints and re-sync every chunk")]
        force_refresh: bool,

        #[arg(long, help = "Stop dispatching chunks after the first chunk failure")]
        halt_on_critical: bool,

        #[arg(long, help = "Page and write batch size")]
        batch_size: Option<usize>,

        #[arg(long = "type", value_enum, default_value_t = SyncKind::Manual)]
        sync_type: SyncKind,
    },
    /// Show progress for one operation
    Progress {
        #[arg(long, help = "Operation ID to inspect")]
        operation: String,

        #[arg(
            long,
            help = "If set, prints the progress information as JSON instead of a table"
        )]
        json: bool,
    },
    /// List recent operations, newest first
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration with secrets redacted
    Config,
}

//! HTTP control surface for the sync orchestrator: start, status and cancel.

use axum::{
    Router,
    routing::get,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod dto;
pub mod error;
pub mod handlers;
pub mod state;

pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/sync",
            get(handlers::sync_status)
                .post(handlers::start_sync)
                .delete(handlers::cancel_sync),
        )
        .route("/healthz", get(handlers::health))
        .with_state(state)
}

/// Serves the control API until `shutdown` is cancelled.
pub async fn serve(
    state: AppState,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?addr, "Control API listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

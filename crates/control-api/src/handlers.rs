use crate::{
    dto::{CancellingResponse, HealthResponse, StartSyncBody, StartedResponse},
    error::ApiError,
    state::AppState,
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use engine_runtime::orchestrator::SyncDashboard;
use tracing::info;

/// `POST /sync`
pub async fn start_sync(
    State(state): State<AppState>,
    body: Result<Json<StartSyncBody>, JsonRejection>,
) -> Result<(StatusCode, Json<StartedResponse>), ApiError> {
    let Json(body) = body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let request = body.into_request().map_err(ApiError::bad_request)?;

    let operation = state.orchestrator.start(request).await?;
    info!(operation_id = %operation.operation_id, "Sync started over the control API");

    Ok((
        StatusCode::ACCEPTED,
        Json(StartedResponse {
            operation_id: operation.operation_id,
            status: operation.status,
        }),
    ))
}

/// `GET /sync`
pub async fn sync_status(State(state): State<AppState>) -> Result<Json<SyncDashboard>, ApiError> {
    Ok(Json(state.orchestrator.dashboard().await?))
}

/// `DELETE /sync`
pub async fn cancel_sync(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CancellingResponse>), ApiError> {
    let operation_id = state.orchestrator.cancel()?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancellingResponse {
            operation_id,
            status: "cancelling",
        }),
    ))
}

/// `GET /healthz`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[cfg(test)]
mod tests {
    use crate::{AppState, serve};
    use async_trait::async_trait;
    use connectors::{
        datastore::memory::InMemoryAttendanceRepository,
        error::SisError,
        sis::{PageRequest, SisClient, SisPage},
    };
    use engine_config::settings::{ENV_PREFIX, SyncSettings, keys};
    use engine_core::state::memory::InMemoryCheckpointStore;
    use engine_runtime::orchestrator::{SyncOrchestrator, SyncServices};
    use serde_json::{Value, json};
    use std::{collections::HashMap, sync::Arc};
    use tokio::{net::TcpListener, sync::Semaphore};
    use tokio_util::sync::CancellationToken;

    /// Empty pages, held until the gate opens.
    struct GatedSis(Arc<Semaphore>);

    #[async_trait]
    impl SisClient for GatedSis {
        async fn fetch_page(&self, _request: &PageRequest) -> Result<SisPage, SisError> {
            let _permit = self
                .0
                .acquire()
                .await
                .map_err(|_| SisError::Connect("gate closed".into()))?;
            Ok(SisPage::default())
        }
    }

    struct Server {
        base: String,
        gate: Arc<Semaphore>,
        client: reqwest::Client,
        shutdown: CancellationToken,
    }

    async fn server() -> Server {
        let vars: HashMap<String, String> = [(keys::SCHOOLS, "SCH-A"), (keys::WORKERS, "1")]
            .into_iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect();
        let gate = Arc::new(Semaphore::new(0));
        let orchestrator = SyncOrchestrator::new(
            SyncSettings::from_vars(&vars).unwrap(),
            SyncServices {
                sis: Arc::new(GatedSis(gate.clone())),
                repository: Arc::new(InMemoryAttendanceRepository::new()),
                store: Arc::new(InMemoryCheckpointStore::new()),
                audit_sinks: Vec::new(),
            },
        )
        .await
        .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(AppState::new(orchestrator), listener, shutdown.clone()));

        Server {
            base,
            gate,
            client: reqwest::Client::new(),
            shutdown,
        }
    }

    fn body() -> Value {
        json!({ "dateRange": { "start": "2024-09-02", "end": "2024-09-20" } })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let s = server().await;
        let resp = s.client.get(format!("{}/healthz", s.base)).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.json::<Value>().await.unwrap(), json!({ "status": "ok" }));
        s.shutdown.cancel();
    }

    #[tokio::test]
    async fn start_conflict_status_and_cancel() {
        let s = server().await;
        let url = format!("{}/sync", s.base);

        let resp = s.client.post(&url).json(&body()).send().await.unwrap();
        assert_eq!(resp.status(), 202);
        let started: Value = resp.json().await.unwrap();
        assert_eq!(started["status"], "IN_PROGRESS");
        let operation_id = started["operationId"].as_str().unwrap().to_string();

        let resp = s.client.post(&url).json(&body()).send().await.unwrap();
        assert_eq!(resp.status(), 409);
        let conflict: Value = resp.json().await.unwrap();
        assert_eq!(conflict["operationId"], operation_id.as_str());
        assert!(conflict["error"].is_string());

        let status: Value = s.client.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(status["current"]["operationId"], operation_id.as_str());
        assert_eq!(status["current"]["progress"]["totalChunks"], 3);
        assert!(status["circuitBreakers"].is_array());
        assert!(status["recentErrors"].is_array());
        assert_eq!(status["rateLimiter"]["key"], "sis");

        let resp = s.client.delete(&url).send().await.unwrap();
        assert_eq!(resp.status(), 202);
        let cancelling: Value = resp.json().await.unwrap();
        assert_eq!(cancelling["status"], "cancelling");
        assert_eq!(cancelling["operationId"], operation_id.as_str());

        s.gate.add_permits(100);
        s.shutdown.cancel();
    }

    #[tokio::test]
    async fn invalid_bodies_are_rejected() {
        let s = server().await;
        let url = format!("{}/sync", s.base);

        let inverted = json!({ "dateRange": { "start": "2024-09-20", "end": "2024-09-02" } });
        let resp = s.client.post(&url).json(&inverted).send().await.unwrap();
        assert_eq!(resp.status(), 400);

        let resp = s
            .client
            .post(&url)
            .json(&json!({ "dateRange": { "start": "yesterday" } }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = s
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        s.shutdown.cancel();
    }

    #[tokio::test]
    async fn cancel_when_idle_is_not_found() {
        let s = server().await;
        let resp = s
            .client
            .delete(format!("{}/sync", s.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        s.shutdown.cancel();
    }
}

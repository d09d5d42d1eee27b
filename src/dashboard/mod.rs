use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::{PanelError, Result};
use crate::session::DEFAULT_LOG_CAPACITY;
use crate::worker::{RunInfo, RunRequest, SharedRegistry, WorkerLauncher};

pub const RUN_ID_HEADER: &str = "x-run-id";

const INDEX_HTML: &str = include_str!("index.html");

#[derive(Clone)]
pub struct DashboardState {
    pub launcher: WorkerLauncher,
    pub registry: SharedRegistry,
}

impl DashboardState {
    pub fn new(launcher: WorkerLauncher) -> Self {
        let registry = launcher.registry().clone();
        Self { launcher, registry }
    }
}

/// Outcome of a control action (`/api/stop`, rejected launches).
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    fn failed(error: &PanelError) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StopParams {
    run_id: Option<Uuid>,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::HeaderName::from_static(RUN_ID_HEADER)]);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/run", post(run_handler))
        .route("/api/stop", post(stop_handler))
        .route("/api/runs", get(list_runs_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(
    addr: SocketAddr,
    state: DashboardState,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind control panel");
        e
    })?;
    tracing::info!(addr = %addr, "Control panel listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Control panel stopped");
    Ok(())
}

async fn index_handler() -> Html<String> {
    Html(INDEX_HTML.replace("__LOG_CAPACITY__", &DEFAULT_LOG_CAPACITY.to_string()))
}

/// Launch a worker and stream its events as NDJSON until it exits.
async fn run_handler(
    State(state): State<DashboardState>,
    Json(request): Json<RunRequest>,
) -> Response {
    match state.launcher.launch(request).await {
        Ok(run) => {
            let lines = ReceiverStream::new(run.events)
                .map(|event| Ok::<_, Infallible>(event.to_line()));
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                [(RUN_ID_HEADER, run.run_id.to_string())],
                Body::from_stream(lines),
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Launch rejected");
            let status = match e {
                PanelError::AtCapacity(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(ActionResponse::failed(&e))).into_response()
        }
    }
}

async fn stop_handler(
    State(state): State<DashboardState>,
    Query(params): Query<StopParams>,
) -> Json<ActionResponse> {
    let mut registry = state.registry.write().await;
    let result = match params.run_id {
        Some(run_id) => registry.stop(&run_id).map(|_| 1),
        None => registry.stop_all(),
    };

    match result {
        Ok(count) => Json(ActionResponse::ok(format!(
            "stop requested for {} run(s)",
            count
        ))),
        Err(e) => {
            tracing::info!(error = %e, "Stop request had nothing to stop");
            Json(ActionResponse::failed(&e))
        }
    }
}

async fn list_runs_handler(State(state): State<DashboardState>) -> Json<Vec<RunInfo>> {
    let registry = state.registry.read().await;
    Json(registry.active_runs().into_iter().cloned().collect())
}

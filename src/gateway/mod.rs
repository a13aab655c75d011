//! Gateway module - HTTP surface for code execution
//!
//! ```text
//!   POST /api/execute {"code": "..."}
//!         │
//!         ▼
//!   Launcher::launch ──► ExecutionSession ──► relay ──► chunked text/plain body
//!         │                                              (one frame per line)
//!         └── Busy / Launch error ──► JSON {"error": ...}, no stream
//! ```

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use std::convert::Infallible;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{Config, RunnerConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::sandbox::{relay, ExecutionRequest, Launcher};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    launcher: Launcher,
}

impl AppState {
    pub fn new(runner: RunnerConfig) -> Self {
        AppState {
            launcher: Launcher::new(runner),
        }
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }
}

/// Error response wrapper rendering `{"error": "..."}`
pub struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

// ---- Handlers ----

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "AI Python Course Backend" }))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "service": crate::NAME,
            "version": crate::VERSION,
            "available_slots": state.launcher.available_slots(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

/// Run the submitted code and stream its output back line by line.
///
/// Once the child is running the status is always 200; a failing program is
/// only distinguishable by what it printed.
async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecutionRequest>,
) -> std::result::Result<Response, AppError> {
    let session = state.launcher.launch(request).map_err(|e| {
        match &e {
            Error::Busy(_) => warn!("Rejecting execution: {}", e),
            _ => error!("Launch failed: {}", e),
        }
        e
    })?;

    let chunks = relay(session)
        .filter_map(|chunk| futures::future::ready(chunk.into_body_text()))
        .map(Ok::<_, Infallible>);

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(chunks),
    )
        .into_response())
}

// ---- Router ----

/// Build the application router
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let api = Router::new().route("/execute", post(execute));

    let router = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/api", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if server.cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Bind and serve until Ctrl-C
pub async fn serve(config: Config) -> Result<()> {
    let addr = config.server.socket_addr()?;
    let app = build_router(AppState::new(config.runner.clone()), &config.server);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Course runner listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Course runner stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

//! HTTP control surface
//!
//! Session start/stop/status plus the two probes. The liveness probe never
//! touches NFS; readiness flips on only after startup (storage validated,
//! recovery finished, background tasks running).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::ApiError;
use crate::session::{start_session, SessionState};


/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionState>,
    pub config: Arc<Config>,
    pub ready: Arc<AtomicBool>,
}

/// Build the application router with all routes and middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/v1/watch/start", post(watch_start))
        .route("/v1/watch/stop", post(watch_stop))
        .route("/v1/status", get(status))
        .layer(crate::middleware::tracing_layer())
        .with_state(state)
}

// --- Request/response payloads ---

#[derive(Debug, Deserialize)]
pub struct WatchStartRequest {
    #[serde(default)]
    pub session_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WatchStartResponse {
    pub date_prefix: String,
    pub session_name: String,
}

#[derive(Debug, Serialize)]
pub struct WatchStopResponse {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub enabled: bool,
    pub active_session: Option<String>,
    pub processed_ok: u64,
    pub processed_err: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

// --- Handlers ---

/// Liveness probe. Pure in-process check; must stay responsive even when
/// NFS is gone.
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

/// Readiness probe. 503 until startup has completed.
async fn readyz(State(state): State<AppState>) -> Result<Json<ReadyResponse>, ApiError> {
    if !state.ready.load(Ordering::Relaxed) {
        return Err(ApiError::NotReady);
    }
    Ok(Json(ReadyResponse { ready: true }))
}

/// Start a new watch session
async fn watch_start(
    State(state): State<AppState>,
    Json(body): Json<WatchStartRequest>,
) -> Result<Json<WatchStartResponse>, ApiError> {
    let (date_prefix, session_name) =
        start_session(&state.session, &state.config, body.session_name).await?;
    Ok(Json(WatchStartResponse {
        date_prefix,
        session_name,
    }))
}

/// Stop the active watch session. Queued items and in-flight workers
/// continue draining; only discovery stops.
async fn watch_stop(State(state): State<AppState>) -> Json<WatchStopResponse> {
    state.session.deactivate();
    tracing::info!("Session stopped");
    Json(WatchStopResponse { enabled: false })
}

/// Current session state and processing counters
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.session.snapshot();
    Json(StatusResponse {
        enabled: snapshot.active,
        active_session: snapshot.session_name,
        processed_ok: snapshot.processed_ok,
        processed_err: snapshot.processed_err,
        last_error: snapshot.last_error,
    })
}

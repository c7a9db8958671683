// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Three groups: analysis (/analyze, /health), config management (/config/*),
// and replay (/replay/*). Handlers are thin — every decision lives in the
// subsystems; this layer only maps between HTTP and the typed core.
//
// CORS is configured permissively for development.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app_state::AppState;
use crate::config::ConfigParams;
use crate::errors::EngineError;
use crate::replay::{scoreboard, BatchRequest};
use crate::types::Timeframe;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Analysis ────────────────────────────────────────────────
        .route("/health", get(health))
        .route("/analyze", get(analyze))
        // ── Config ──────────────────────────────────────────────────
        .route("/config", get(get_config))
        .route("/config", put(put_config))
        .route("/config/validate", post(validate_config))
        .route("/config/history", get(config_history))
        .route("/config/rollback", post(rollback_config))
        .route("/config/export", get(export_config))
        .route("/config/import", post(import_config))
        // ── Replay ──────────────────────────────────────────────────
        .route("/replay/single", post(replay_single))
        .route("/replay/batch", post(replay_batch))
        .route("/replay/status/:id", get(replay_status))
        .route("/replay/results/:id", get(replay_results))
        .route("/replay/pause/:id", post(replay_pause))
        .route("/replay/resume/:id", post(replay_resume))
        .route("/replay/batch/:id", delete(replay_delete))
        .route("/replay/label", post(replay_label))
        .route("/replay/scoreboard", get(replay_scoreboard))
        // ── Middleware & state ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Error mapping
// =============================================================================

/// Wrapper turning [`EngineError`] into an HTTP response.
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::VersionConflict { .. } => StatusCode::CONFLICT,
            EngineError::ValidationFailure(_) | EngineError::UnknownInterval(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::InsufficientData(_) | EngineError::Unreliable(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::RateLimited(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EngineError::Lookahead(_) | EngineError::Fatal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut body = serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        if let EngineError::VersionConflict { current, .. } = &self.0 {
            body["current_version"] = serde_json::json!(current);
            body["refresh_required"] = serde_json::json!(true);
        }
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Analysis
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

#[derive(Deserialize)]
struct AnalyzeQuery {
    symbol: Option<String>,
    #[serde(default)]
    demo: bool,
    #[serde(default)]
    refresh: bool,
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalyzeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = query
        .symbol
        .map(|s| s.to_uppercase())
        .unwrap_or_else(|| state.settings.read().default_symbol.clone());
    let market_state = state.analyze(&symbol, query.demo, query.refresh).await?;
    Ok(Json(market_state))
}

// =============================================================================
// Config
// =============================================================================

async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active = state.config_store.active();
    Json(active.as_ref().clone())
}

#[derive(Deserialize)]
struct ConfigUpdateRequest {
    based_on_version: String,
    params: ConfigParams,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfigUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.config_store.update(
        req.params,
        &req.based_on_version,
        req.created_by.as_deref().unwrap_or("api"),
        req.notes.as_deref().unwrap_or(""),
    )?;
    state.increment_version();
    info!(version = %result.version, applied = result.applied, "config update via API");
    Ok(Json(result))
}

#[derive(Deserialize)]
struct ValidateRequest {
    params: ConfigParams,
}

async fn validate_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.config_store.validate(&req.params)?;
    Ok(Json(serde_json::json!({ "valid": true })))
}

async fn config_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config_store.history())
}

#[derive(Deserialize)]
struct RollbackRequest {
    version: String,
    #[serde(default)]
    created_by: Option<String>,
}

async fn rollback_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RollbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .config_store
        .rollback(&req.version, req.created_by.as_deref().unwrap_or("api"))?;
    state.increment_version();
    Ok(Json(result))
}

async fn export_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // The canonical JSON string, verbatim.
    (
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        state.config_store.export(),
    )
}

async fn import_config(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let raw = serde_json::to_string(&payload)
        .map_err(|e| EngineError::ValidationFailure(format!("unreadable payload: {e}")))?;
    let result = state.config_store.import(&raw, "api")?;
    state.increment_version();
    Ok(Json(result))
}

// =============================================================================
// Replay
// =============================================================================

#[derive(Deserialize)]
struct ReplaySingleRequest {
    symbol: String,
    as_of_ms: i64,
    #[serde(default)]
    primary_timeframe: Option<Timeframe>,
    #[serde(default)]
    skip_duplicate_check: bool,
}

async fn replay_single(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplaySingleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tf = req.primary_timeframe.unwrap_or(Timeframe::H1);
    let row = state
        .replay
        .run_single(
            &req.symbol.to_uppercase(),
            tf,
            req.as_of_ms,
            req.skip_duplicate_check,
        )
        .await?;
    Ok(Json(row))
}

async fn replay_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let batch_id = state.replay.start_batch(req)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "batch_id": batch_id })),
    ))
}

async fn replay_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.replay.status(&id) {
        Some(record) => Ok(Json(record)),
        None => Err(EngineError::ValidationFailure(format!("unknown batch: {id}")).into()),
    }
}

async fn replay_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.replay.status(&id).is_none() {
        return Err(EngineError::ValidationFailure(format!("unknown batch: {id}")).into());
    }
    Ok(Json(state.replay.store().rows_for_batch(&id)))
}

async fn replay_pause(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.replay.pause(&id) {
        return Err(
            EngineError::ValidationFailure(format!("batch not running: {id}")).into(),
        );
    }
    Ok(Json(serde_json::json!({ "batch_id": id, "paused": true })))
}

async fn replay_resume(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.replay.resume(&id) {
        return Err(
            EngineError::ValidationFailure(format!("batch not running: {id}")).into(),
        );
    }
    Ok(Json(serde_json::json!({ "batch_id": id, "resumed": true })))
}

async fn replay_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.replay.delete_batch(&id) {
        return Err(EngineError::ValidationFailure(format!("unknown batch: {id}")).into());
    }
    Ok(Json(serde_json::json!({ "batch_id": id, "deleted": true })))
}

#[derive(Deserialize)]
struct LabelRequest {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    horizon_ms: Option<i64>,
}

async fn replay_label(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LabelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = req.symbol.map(|s| s.to_uppercase());
    let updated = state
        .replay
        .label_rows(symbol.as_deref(), req.horizon_ms)
        .await?;
    Ok(Json(serde_json::json!({ "labeled": updated })))
}

async fn replay_scoreboard(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rows = state.replay.store().labeled_rows();
    Json(scoreboard::build(&rows))
}

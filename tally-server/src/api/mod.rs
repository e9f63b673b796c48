//! HTTP API endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tally_core::counting::CounterService;
use tally_core::locking::LockService;
use tally_core::session::{MemorySession, SessionStats};
use tally_core::TallyError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state
pub struct AppContext {
    pub counters: CounterService,
    pub session: Arc<MemorySession>,
    pub locks: LockService,
}

/// Application state
pub type AppState = Arc<AppContext>;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health))
        .route("/ping", get(ping))

        // Counters
        .route("/counters/:name", post(update_counter).delete(delete_counter))

        // Stats
        .route("/stats", get(stats))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    /// Event time, now if absent
    pub timestamp: Option<DateTime<Utc>>,
    /// Value added to the sums, count only if absent
    pub value: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub version: String,
    pub session: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (status, Json(ErrorResponse { error: error.to_string() }))
}

fn status_for(error: &TallyError) -> StatusCode {
    match error {
        TallyError::Config(_) | TallyError::NullValue { .. } | TallyError::InvalidArgument(_) => {
            StatusCode::BAD_REQUEST
        }
        TallyError::Unavailable(_) | TallyError::ConsistencyUnsatisfiable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: tally_core::VERSION.to_string(),
    })
}

async fn ping() -> &'static str {
    "pong"
}

async fn update_counter(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<StatusCode, ApiError> {
    let timestamp = req.timestamp.unwrap_or_else(Utc::now);
    with_counter_lock(state, name, move |state, name| {
        state.counters.counter(name)?.update(timestamp, req.value)
    })
    .await
}

async fn delete_counter(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    with_counter_lock(state, name, |state, name| state.counters.counter(name)?.delete()).await
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        version: tally_core::VERSION.to_string(),
        session: state.session.stats(),
    })
}

/// Run a blocking counter write while holding the counter's lock
async fn with_counter_lock<F>(state: AppState, name: String, write: F) -> Result<StatusCode, ApiError>
where
    F: FnOnce(&AppContext, &str) -> tally_core::Result<()> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let mut lock = state.locks.scoped(&[name.as_str()]);
        lock.lock();
        let result = write(&state, &name);
        lock.unlock();
        result
    })
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;

    result
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| api_error(status_for(&e), e))
}

use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use shuttle_axum::axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::history::RunHistory;
use crate::ingest::error::ConfigError;
use crate::ingest::pipeline::{PipelineBuilder, RunGuard};
use crate::ingest::report::RunReport;

#[derive(Clone)]
pub struct AppState {
    /// Expected bearer token; `None` makes every trigger a configuration error.
    pub trigger_secret: Option<Arc<str>>,
    pub pipeline: Arc<dyn PipelineBuilder>,
    pub history: Arc<RunHistory>,
    pub run_guard: RunGuard,
}

impl AppState {
    pub fn new(trigger_secret: Option<String>, pipeline: Arc<dyn PipelineBuilder>) -> Self {
        Self {
            trigger_secret: trigger_secret.map(Arc::from),
            pipeline,
            history: Arc::new(RunHistory::default()),
            run_guard: RunGuard::default(),
        }
    }

    pub fn with_history(mut self, history: Arc<RunHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn with_run_guard(mut self, guard: RunGuard) -> Self {
        self.run_guard = guard;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/cron/update-news", get(update_news))
        .route("/debug/last-run", get(debug_last_run))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

pub enum ApiError {
    Unauthorized,
    RunInProgress,
    Config(ConfigError),
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Config(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
            }
            ApiError::RunInProgress => (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "Conflict",
                    "message": "an ingestion run is already in progress",
                })),
            )
                .into_response(),
            ApiError::Config(err) => {
                tracing::error!(target: "ingest", error = %err, "trigger failed: pipeline not constructed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "Internal Server Error",
                        "message": err.to_string(),
                    })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(serde::Serialize)]
struct TriggerResp {
    success: bool,
    degraded: bool,
    report: RunReport,
}

async fn update_news(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TriggerResp>, ApiError> {
    let secret = state
        .trigger_secret
        .as_deref()
        .ok_or(ConfigError::MissingSecret(crate::config::ingest::ENV_CRON_SECRET))?;
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if secrets_match(token, secret) => {}
        _ => {
            tracing::warn!(target: "ingest", "trigger rejected: bad or missing bearer token");
            return Err(ApiError::Unauthorized);
        }
    }

    let Ok(_running) = state.run_guard.try_lock() else {
        return Err(ApiError::RunInProgress);
    };
    let pipeline = state.pipeline.build()?;
    tracing::info!(target: "ingest", providers = ?pipeline.provider_names(), "ingest run triggered");

    let report = pipeline.run().await;
    state.history.push(report.clone());
    Ok(Json(TriggerResp {
        success: true,
        degraded: report.is_degraded(),
        report,
    }))
}

async fn debug_last_run(State(state): State<AppState>) -> Json<Option<RunReport>> {
    Json(state.history.last())
}

/// Length-independent comparison: both sides are hashed first, then the
/// digests are compared without early exit.
fn secrets_match(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

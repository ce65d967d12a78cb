//! Service status and prediction telemetry.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use mriscan::TelemetrySnapshot;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub name: String,
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model_version: Option<String>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub model_version: Option<String>,
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub telemetry: TelemetrySnapshot,
}

fn active_version_label(state: &AppState) -> Option<String> {
    state.inference().active_version().map(|v| format!("v{}", v))
}

pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        name: state.config().model.name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
    })
}

/// Always answers; `degraded` means no model is active.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_version = active_version_label(&state);
    Json(HealthResponse {
        status: if model_version.is_some() {
            "healthy"
        } else {
            "degraded"
        },
        model_loaded: model_version.is_some(),
        model_version,
        uptime_seconds: state.uptime_secs(),
    })
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        model_version: active_version_label(&state),
        uptime_seconds: state.uptime_secs(),
        telemetry: state.inference().telemetry_snapshot(),
    })
}

//! Stored model versions and promotion.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use mriscan::ModelMetadata;

use super::blocking;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    pub active_version: Option<String>,
    pub models: Vec<ModelMetadata>,
}

#[derive(Debug, Serialize)]
pub struct PromoteResponse {
    pub active_version: String,
    pub metadata: ModelMetadata,
}

/// Accepts `3` or `v3`.
fn parse_version(raw: &str) -> Result<u32, ApiError> {
    raw.strip_prefix('v')
        .unwrap_or(raw)
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid model version '{}'", raw)))
}

pub async fn list_models(
    State(state): State<AppState>,
) -> Result<Json<ModelListResponse>, ApiError> {
    let retrainer = state.retrainer.clone();
    let models = blocking(move || retrainer.models().list_metadata()).await??;
    Ok(Json(ModelListResponse {
        active_version: state.inference().active_version().map(|v| format!("v{}", v)),
        models,
    }))
}

pub async fn promote_model(
    State(state): State<AppState>,
    Path(version): Path<String>,
) -> Result<Json<PromoteResponse>, ApiError> {
    let version = parse_version(&version)?;
    let retrainer = state.retrainer.clone();
    let metadata = blocking(move || retrainer.promote(version)).await??;
    Ok(Json(PromoteResponse {
        active_version: metadata.version_label(),
        metadata,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::routes::test_support::TestApp;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("3").unwrap(), 3);
        assert_eq!(parse_version("v12").unwrap(), 12);
        assert!(parse_version("latest").is_err());
        assert!(parse_version("v").is_err());
    }

    #[tokio::test]
    async fn test_list_models_empty() {
        let app = TestApp::new();
        let (status, body) = app.get("/models").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["active_version"].is_null());
        assert_eq!(body["models"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_promote_unknown_version_is_404() {
        let app = TestApp::new();
        let (status, body) = app.post("/models/v9/promote", "").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].as_str().unwrap().contains("v9"));
    }
}

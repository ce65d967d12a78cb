//! Labelled training data uploads.

use std::collections::BTreeMap;

use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use mriscan::uploads::IncomingFile;

use super::blocking;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub label: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uploaded_count: usize,
    pub saved_path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadStatsResponse {
    pub pending: BTreeMap<String, usize>,
    pub total: usize,
}

/// Stores every `files`/`file` part under the label given either as a
/// query parameter or as a `label` text field.
pub async fn upload_training_data(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut label = query.label;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" | "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content = field.bytes().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read {}: {}", filename, e))
                })?;
                files.push(IncomingFile {
                    filename,
                    content: content.to_vec(),
                });
            }
            "label" if label.is_none() => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read label: {}", e)))?;
                label = Some(value.trim().to_string());
            }
            _ => log::debug!("Ignoring multipart field {:?}", name),
        }
    }

    let label = label.ok_or_else(|| ApiError::bad_request("Missing label"))?;
    // Reject the label before complaining about files so nothing is created.
    state.retrainer.uploads().validate_label(&label)?;
    if files.is_empty() {
        return Err(ApiError::bad_request("No files provided"));
    }

    let uploads = state.retrainer.uploads().clone();
    let report = blocking(move || uploads.store_batch(&label, files)).await??;

    let message = if report.uploaded_count > 0 {
        format!("Successfully uploaded {} files", report.uploaded_count)
    } else {
        "No files saved".to_string()
    };
    Ok(Json(UploadResponse {
        uploaded_count: report.uploaded_count,
        saved_path: report.saved_path.to_string_lossy().to_string(),
        message,
        errors: report.errors,
    }))
}

pub async fn upload_stats(
    State(state): State<AppState>,
) -> Result<Json<UploadStatsResponse>, ApiError> {
    let uploads = state.retrainer.uploads().clone();
    let pending = blocking(move || uploads.counts()).await??;
    let total = pending.values().sum();
    Ok(Json(UploadStatsResponse { pending, total }))
}

use axum::extract::{Multipart, State};
use axum::Json;

use mriscan::Prediction;

use super::blocking;
use crate::error::ApiError;
use crate::state::AppState;

/// Classifies the image sent in the multipart field `file`.
pub async fn predict(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Prediction>, ApiError> {
    // A fresh start answers 503 whatever the payload.
    if !state.inference().is_loaded() {
        return Err(mriscan::InferenceError::ModelUnavailable.into());
    }

    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?;
            image = Some(bytes);
            break;
        }
    }
    let image = image.ok_or_else(|| ApiError::bad_request("Missing multipart field 'file'"))?;

    let inference = state.inference().clone();
    let prediction = blocking(move || inference.predict_bytes(&image)).await??;
    Ok(Json(prediction))
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use mriscan::{
    InferenceError, JobError, ModelStoreError, MriscanError, PreprocessError, RetrainError,
    StorageError,
};

/// Error returned by handlers, rendered as `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!("Request failed: {}", self.detail);
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

fn job_status(err: &JobError) -> StatusCode {
    match err {
        JobError::NotFound(_) => StatusCode::NOT_FOUND,
        JobError::InvalidTransition { .. } => StatusCode::CONFLICT,
    }
}

fn storage_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::InvalidLabel { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn model_store_status(err: &ModelStoreError) -> StatusCode {
    match err {
        ModelStoreError::ModelNotFound(_) | ModelStoreError::NoVersions => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn status_for(err: &MriscanError) -> StatusCode {
    match err {
        MriscanError::Preprocess(PreprocessError::InvalidImage(_)) => StatusCode::BAD_REQUEST,
        MriscanError::Inference(InferenceError::ModelUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
        MriscanError::Inference(InferenceError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
        MriscanError::Storage(e) => storage_status(e),
        MriscanError::ModelStore(e) => model_store_status(e),
        MriscanError::Job(e) => job_status(e),
        MriscanError::Retrain(e) => match e {
            RetrainError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RetrainError::Job(e) => job_status(e),
            RetrainError::Storage(e) => storage_status(e),
            RetrainError::ModelStore(e) => model_store_status(e),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The wrapped error's own message, without the category prefix.
fn detail_for(err: &MriscanError) -> String {
    match err {
        MriscanError::Config(e) => e.to_string(),
        MriscanError::Preprocess(e) => e.to_string(),
        MriscanError::Inference(e) => e.to_string(),
        MriscanError::Storage(e) => e.to_string(),
        MriscanError::ModelStore(e) => e.to_string(),
        MriscanError::Job(e) => e.to_string(),
        MriscanError::Retrain(e) => e.to_string(),
        MriscanError::Logging(_) => err.to_string(),
    }
}

impl From<MriscanError> for ApiError {
    fn from(err: MriscanError) -> Self {
        Self::new(status_for(&err), detail_for(&err))
    }
}

macro_rules! via_mriscan_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ApiError {
                fn from(err: $ty) -> Self {
                    let detail = err.to_string();
                    Self::new(status_for(&MriscanError::from(err)), detail)
                }
            }
        )*
    };
}

via_mriscan_error!(
    InferenceError,
    JobError,
    ModelStoreError,
    PreprocessError,
    RetrainError,
    StorageError,
);

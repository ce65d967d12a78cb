//! Background fine-tuning jobs.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use mriscan::jobs::{Hyperparameters, JobStatus, RetrainJob};
use mriscan::ModelMetrics;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RetrainResponse {
    pub job_id: String,
    pub status: &'static str,
    pub message: String,
}

/// A job as reported to clients, with the headline metrics lifted out.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
    pub accuracy: Option<f64>,
    pub loss: Option<f64>,
    pub model_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metrics: Option<ModelMetrics>,
    pub hyperparameters: Hyperparameters,
    pub samples_used: Option<usize>,
    pub archive_path: Option<String>,
}

impl From<RetrainJob> for JobView {
    fn from(job: RetrainJob) -> Self {
        Self {
            accuracy: job.metrics.as_ref().map(|m| m.accuracy),
            loss: job.metrics.as_ref().map(|m| m.loss),
            job_id: job.job_id,
            status: job.status,
            message: job.message,
            model_version: job.model_version,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error,
            metrics: job.metrics,
            hyperparameters: job.hyperparameters,
            samples_used: job.samples_used,
            archive_path: job.archive_path,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub total_jobs: usize,
    pub jobs: Vec<JobView>,
}

fn parse_hyperparameters(body: &[u8]) -> Result<Hyperparameters, ApiError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Hyperparameters::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid retrain request: {}", e)))
}

/// Records a job and returns without waiting for it. An empty body uses
/// the default hyperparameters.
pub async fn trigger_retrain(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RetrainResponse>, ApiError> {
    let hyperparameters = parse_hyperparameters(&body)?;
    let job_id = state.retrainer.submit(hyperparameters)?;

    Ok(Json(RetrainResponse {
        job_id,
        status: "started",
        message: "Retraining job enqueued".to_string(),
    }))
}

pub async fn retrain_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.retrainer.registry().get(&job_id)?;
    Ok(Json(job.into()))
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs: Vec<JobView> = state
        .retrainer
        .registry()
        .list()
        .into_iter()
        .map(JobView::from)
        .collect();
    Json(JobListResponse {
        total_jobs: jobs.len(),
        jobs,
    })
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.retrainer.cancel(&job_id)?;
    Ok(Json(job.into()))
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::error::RetrainError;
use crate::model::ModelMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Forward-only lifecycle: `queued -> running -> completed | failed`,
    /// plus `queued -> failed` for jobs stopped before they start.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_epochs() -> usize {
    10
}

fn default_batch_size() -> usize {
    32
}

fn default_learning_rate() -> f64 {
    1e-5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self, limits: &TrainingConfig) -> Result<(), RetrainError> {
        if self.epochs == 0 || self.epochs > limits.max_epochs {
            return Err(RetrainError::InvalidRequest(format!(
                "epochs must be between 1 and {}, got {}",
                limits.max_epochs, self.epochs
            )));
        }
        if self.batch_size == 0 || self.batch_size > limits.max_batch_size {
            return Err(RetrainError::InvalidRequest(format!(
                "batch_size must be between 1 and {}, got {}",
                limits.max_batch_size, self.batch_size
            )));
        }
        if !self.learning_rate.is_finite()
            || self.learning_rate <= 0.0
            || self.learning_rate > limits.max_learning_rate
        {
            return Err(RetrainError::InvalidRequest(format!(
                "learning_rate must be in (0, {}], got {}",
                limits.max_learning_rate, self.learning_rate
            )));
        }
        Ok(())
    }
}

/// One fine-tuning run and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainJob {
    pub job_id: String,
    pub status: JobStatus,
    pub hyperparameters: Hyperparameters,
    /// Set only once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ModelMetrics>,
    /// Set only once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<String>,
    pub message: String,
}

pub fn new_job_id() -> String {
    format!("retrain_{}", uuid::Uuid::new_v4().simple())
}

impl RetrainJob {
    pub fn new(hyperparameters: Hyperparameters) -> Self {
        Self {
            job_id: new_job_id(),
            status: JobStatus::Queued,
            hyperparameters,
            metrics: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            model_version: None,
            samples_used: None,
            archive_path: None,
            message: "Waiting for a training slot".to_string(),
        }
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.message = "Loading training data".to_string();
    }

    pub fn mark_completed(&mut self, metrics: ModelMetrics, model_version: String) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.message = format!("Produced model {}", model_version);
        self.metrics = Some(metrics);
        self.model_version = Some(model_version);
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.message = format!("Failed: {}", error);
        self.error = Some(error);
        self.metrics = None;
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

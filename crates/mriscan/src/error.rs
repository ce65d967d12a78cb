use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MriscanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Preprocessing error: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Model store error: {0}")]
    ModelStore(#[from] ModelStoreError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Retrain error: {0}")]
    Retrain(#[from] RetrainError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model not loaded")]
    ModelUnavailable,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Inference backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid label '{label}', expected one of: {allowed}")]
    InvalidLabel { label: String, allowed: String },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

#[derive(Error, Debug)]
pub enum ModelStoreError {
    #[error("Model version v{0} already exists")]
    VersionConflict(u32),

    #[error("Model version v{0} not found")]
    ModelNotFound(u32),

    #[error("No model versions available")]
    NoVersions,

    #[error("Model store I/O failed at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize model metadata: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to record model weights: {0}")]
    Record(String),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },
}

#[derive(Error, Debug)]
pub enum RetrainError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No training data found in uploads")]
    NoTrainingData,

    #[error("No base model available: {0}")]
    NoBaseModel(String),

    #[error("Training failed: {0}")]
    TrainingFailure(String),

    #[error("Training cancelled")]
    Cancelled,

    #[error("Training timed out after {0}s")]
    TimedOut(u64),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Model store error: {0}")]
    ModelStore(#[from] ModelStoreError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

pub type Result<T> = std::result::Result<T, MriscanError>;

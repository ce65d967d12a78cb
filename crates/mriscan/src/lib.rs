pub mod classes;
pub mod config;
pub mod error;
pub mod inference;
pub mod jobs;
pub mod logging;
pub mod model;
pub mod preprocess;
pub mod retrain;
pub mod sanitize;
pub mod training;
pub mod uploads;

pub use classes::{ClassSet, ClassSpec};
pub use config::{load_config, load_or_default, Config};
pub use error::{
    ConfigError, InferenceError, JobError, ModelStoreError, MriscanError, PreprocessError, Result,
    RetrainError, StorageError,
};
pub use inference::{ActiveModel, InferenceService, Prediction, TelemetrySnapshot};
pub use jobs::{Hyperparameters, JobRegistry, JobStatus, RetrainJob};
pub use model::{ModelMetadata, ModelMetrics, ModelStore};
pub use preprocess::{decode_image, ImageTensor, Normalization, Preprocessor};
pub use retrain::Retrainer;
pub use uploads::{UploadStore, UploadedSample};

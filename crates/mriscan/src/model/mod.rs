pub mod metadata;
pub mod network;
pub mod store;

pub use metadata::{ModelMetadata, ModelMetrics};
pub use network::{images_to_tensor, ClassifierNet, NetworkConfig};
pub use store::ModelStore;

/// CPU backend used for serving predictions.
pub type InferenceBackend = burn::backend::NdArray;

/// Autodiff wrapper used while fine-tuning.
pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classes::ClassSet;
use crate::model::network::NetworkConfig;
use crate::preprocess::{Normalization, Preprocessor};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    #[serde(default)]
    pub f1: Option<f64>,
    #[serde(default)]
    pub roc_auc: Option<f64>,
    /// `confusion_matrix[true][predicted]` in class order.
    #[serde(default)]
    pub confusion_matrix: Vec<Vec<u64>>,
}

/// Everything stored next to a version's weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: u32,
    pub name: String,
    pub architecture: String,
    /// `[height, width, channels]`
    pub input_shape: [usize; 3],
    pub class_labels: Vec<String>,
    pub metrics: ModelMetrics,
    pub created_at: DateTime<Utc>,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs_requested: usize,
    pub epochs_trained: usize,
    pub samples_used: usize,
    pub parent_version: Option<u32>,
    pub hidden_units: usize,
    pub pool_size: usize,
    pub dropout: f64,
    pub normalization: Normalization,
}

impl ModelMetadata {
    pub fn version_label(&self) -> String {
        format!("v{}", self.version)
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            num_classes: self.class_labels.len(),
            hidden_units: self.hidden_units,
            pool_size: self.pool_size,
            dropout: self.dropout,
        }
    }

    pub fn class_set(&self) -> ClassSet {
        ClassSet::from_labels(self.class_labels.iter().cloned())
    }

    /// Preprocessor matching the resolution and scaling this model was
    /// trained with.
    pub fn preprocessor(&self) -> Preprocessor {
        Preprocessor::new(
            [self.input_shape[0] as u32, self.input_shape[1] as u32],
            self.normalization.clone(),
        )
    }
}

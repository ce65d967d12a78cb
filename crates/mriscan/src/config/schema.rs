use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::classes::{ClassSet, ClassSpec};
use crate::preprocess::Normalization;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            server: ServerConfig::default(),
            paths: PathsConfig::default(),
            model: ModelConfig::default(),
            training: TrainingConfig::default(),
            jobs: JobsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Returns a copy with every relative path anchored at `root`.
    pub fn with_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.paths.root = root.as_ref().to_path_buf();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    /// Labelled hold-out set used to evaluate retrained models.
    #[serde(default)]
    pub test_dir: Option<PathBuf>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("data/uploads")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("data/uploads_archive")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            models_dir: default_models_dir(),
            uploads_dir: default_uploads_dir(),
            archive_dir: default_archive_dir(),
            test_dir: None,
        }
    }
}

impl PathsConfig {
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.resolve(&self.models_dir)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.resolve(&self.uploads_dir)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.resolve(&self.archive_dir)
    }

    pub fn test_dir(&self) -> Option<PathBuf> {
        self.test_dir.as_deref().map(|p| self.resolve(p))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_architecture")]
    pub architecture: String,
    /// Input resolution as `[height, width]`.
    #[serde(default = "default_image_size")]
    pub image_size: [u32; 2],
    #[serde(default = "Normalization::imagenet")]
    pub normalization: Normalization,
    #[serde(default = "default_classes")]
    pub classes: Vec<ClassSpec>,
    #[serde(default = "default_hidden_units")]
    pub hidden_units: usize,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
}

fn default_model_name() -> String {
    "brain_tumor_classifier".to_string()
}

fn default_architecture() -> String {
    "PooledFeatures-MLP Transfer Head".to_string()
}

fn default_image_size() -> [u32; 2] {
    [224, 224]
}

fn default_classes() -> Vec<ClassSpec> {
    ClassSet::brain_tumor().specs().to_vec()
}

fn default_hidden_units() -> usize {
    128
}

fn default_pool_size() -> usize {
    8
}

fn default_dropout() -> f64 {
    0.3
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            architecture: default_architecture(),
            image_size: default_image_size(),
            normalization: Normalization::imagenet(),
            classes: default_classes(),
            hidden_units: default_hidden_units(),
            pool_size: default_pool_size(),
            dropout: default_dropout(),
        }
    }
}

impl ModelConfig {
    pub fn class_set(&self) -> ClassSet {
        ClassSet::new(self.classes.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
    #[serde(default = "default_patience")]
    pub early_stopping_patience: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_learning_rate")]
    pub max_learning_rate: f64,
    /// Fine-tune a freshly initialised network when no model is active.
    #[serde(default = "default_true")]
    pub bootstrap_when_unloaded: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_validation_split() -> f64 {
    0.2
}

fn default_patience() -> usize {
    3
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_max_epochs() -> usize {
    500
}

fn default_max_batch_size() -> usize {
    1024
}

fn default_max_learning_rate() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_seed() -> u64 {
    42
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            validation_split: default_validation_split(),
            early_stopping_patience: default_patience(),
            timeout_secs: default_timeout_secs(),
            max_epochs: default_max_epochs(),
            max_batch_size: default_max_batch_size(),
            max_learning_rate: default_max_learning_rate(),
            bootstrap_when_unloaded: true,
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_max_retained")]
    pub max_retained: usize,
}

fn default_max_retained() -> usize {
    500
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_retained: default_max_retained(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

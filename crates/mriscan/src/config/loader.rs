use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::preprocess::Normalization;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MRISCAN_CONFIG";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Platform config location, e.g. `~/.config/mriscan/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mriscan").join("config.json"))
}

/// Finds the config file to use: explicit argument, then the
/// `MRISCAN_CONFIG` variable, then the platform default if it exists.
pub fn discover_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    default_config_path().filter(|path| path.exists())
}

/// Loads the discovered config, falling back to built-in defaults when no
/// file is found.
pub fn load_or_default(explicit: Option<PathBuf>) -> Result<Config, ConfigError> {
    match discover_config_path(explicit) {
        Some(path) => {
            log::info!("Loading configuration from {:?}", path);
            load_config(path)
        }
        None => {
            log::info!("No configuration file found, using defaults");
            let config = Config::default();
            validate_config(&config)?;
            Ok(config)
        }
    }
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.model.classes.len() < 2 {
        return Err(ConfigError::Validation {
            message: "At least two classes are required".to_string(),
        });
    }

    let mut labels = std::collections::HashSet::new();
    for class in &config.model.classes {
        if class.label.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "Class labels must not be empty".to_string(),
            });
        }
        if class.label.contains(['/', '\\']) || class.label == "." || class.label == ".." {
            return Err(ConfigError::Validation {
                message: format!("Class label '{}' is not a valid directory name", class.label),
            });
        }
        if !labels.insert(class.label.as_str()) {
            return Err(ConfigError::Validation {
                message: format!("Duplicate class label '{}'", class.label),
            });
        }
    }

    if config.model.image_size.iter().any(|&d| d == 0) {
        return Err(ConfigError::Validation {
            message: "Image size dimensions must be positive".to_string(),
        });
    }

    if let Normalization::Standardize { std, .. } = &config.model.normalization {
        if std.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
            return Err(ConfigError::Validation {
                message: "Normalization std values must be positive".to_string(),
            });
        }
    }

    if !(0.0..1.0).contains(&config.model.dropout) {
        return Err(ConfigError::Validation {
            message: format!("Dropout must be in [0, 1), got {}", config.model.dropout),
        });
    }

    if !(0.0..1.0).contains(&config.training.validation_split) {
        return Err(ConfigError::Validation {
            message: format!(
                "Validation split must be in [0, 1), got {}",
                config.training.validation_split
            ),
        });
    }

    if config.jobs.max_retained == 0 {
        return Err(ConfigError::Validation {
            message: "jobs.max_retained must be at least 1".to_string(),
        });
    }

    Ok(())
}

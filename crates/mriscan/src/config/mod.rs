pub mod loader;
pub mod schema;

pub use loader::{
    default_config_path, discover_config_path, load_config, load_config_from_str,
    load_or_default, CONFIG_ENV_VAR,
};
pub use schema::{
    Config, JobsConfig, LoggingConfig, ModelConfig, PathsConfig, ServerConfig, TrainingConfig,
};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{MriscanError, Result};

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(format!("{},tower_http=debug", config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Installs the global subscriber and routes `log` records into it.
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let json_layer = config.json.then(|| fmt::layer().json().with_target(true));
    let text_layer = (!config.json).then(fmt::layer);

    let subscriber = Registry::default()
        .with(env_filter(config))
        .with(json_layer)
        .with(text_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| MriscanError::Logging(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| MriscanError::Logging(e.to_string()))?;

    Ok(())
}

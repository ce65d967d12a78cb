mod error;
mod routes;
mod state;

use std::path::PathBuf;

use log::{error, info, warn};

use mriscan::logging::init_logging;
use state::AppState;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = mriscan::load_or_default(std::env::args().nth(1).map(PathBuf::from))?;
    init_logging(&config.logging)?;

    info!("Starting mriscan server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Serving {} classes: {}",
        config.model.classes.len(),
        config.model.class_set().labels().join(", ")
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config);

    let retrainer = state.retrainer.clone();
    match tokio::task::spawn_blocking(move || retrainer.load_initial_model()).await? {
        Ok(Some(version)) => info!("Serving model v{}", version),
        Ok(None) => warn!("No model available, predictions are disabled until one is promoted"),
        Err(e) => warn!("Failed to load initial model, starting degraded: {}", e),
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

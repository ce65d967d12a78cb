//! Shared state handed to every request handler.

use std::sync::Arc;
use std::time::Instant;

use mriscan::config::Config;
use mriscan::{InferenceService, JobRegistry, Retrainer, UploadStore};

#[derive(Clone)]
pub struct AppState {
    /// Owns the job registry, the inference service and both stores.
    pub retrainer: Arc<Retrainer>,
    started_at: Instant,
}

impl AppState {
    /// Wires the services together. No model is loaded yet.
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(JobRegistry::new(config.jobs.max_retained));
        let inference = Arc::new(InferenceService::new());
        let uploads = Arc::new(UploadStore::new(
            config.paths.uploads_dir(),
            config.paths.archive_dir(),
            config.model.class_set(),
        ));
        let retrainer = Arc::new(Retrainer::new(config, registry, inference, uploads));

        Self {
            retrainer,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &Config {
        self.retrainer.config()
    }

    pub fn inference(&self) -> &Arc<InferenceService> {
        self.retrainer.inference()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

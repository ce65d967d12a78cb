//! Isolated environment for retraining tests: a temp root holding the
//! models, uploads and archive directories, plus the wired-up services.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use mriscan::config::Config;
use mriscan::jobs::{JobRegistry, RetrainJob};
use mriscan::uploads::IncomingFile;
use mriscan::{InferenceService, Retrainer, UploadStore};

use super::builders::{png_fixture, ConfigBuilder};

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: Config,
    pub retrainer: Arc<Retrainer>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_builder(ConfigBuilder::new())
    }

    pub fn with_builder(builder: ConfigBuilder) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = builder.build(temp_dir.path());
        let retrainer = wire(&config);

        Self {
            temp_dir,
            config,
            retrainer,
        }
    }

    /// Fresh services over the same directories, as after a process restart.
    pub fn restarted(&self) -> Arc<Retrainer> {
        wire(&self.config)
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.config.paths.uploads_dir()
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.config.paths.archive_dir()
    }

    /// Uploads `count` PNG fixtures under `label`.
    pub fn upload(&self, label: &str, seed: u8, count: usize) {
        let files = (0..count)
            .map(|i| IncomingFile {
                filename: format!("{}_{}.png", label.to_lowercase(), i),
                content: png_fixture(seed.wrapping_add(i as u8), 20, 20),
            })
            .collect();
        self.retrainer
            .uploads()
            .store_batch(label, files)
            .expect("Failed to store uploads");
    }

    /// Writes PNG fixtures to `<root>/<dir>/<label>/`.
    pub fn write_labelled_set(&self, dir: &str, label: &str, seed: u8, count: usize) {
        let label_dir = self.root().join(dir).join(label);
        std::fs::create_dir_all(&label_dir).expect("Failed to create labelled dir");
        for i in 0..count {
            std::fs::write(
                label_dir.join(format!("{}.png", i)),
                png_fixture(seed.wrapping_add(i as u8), 20, 20),
            )
            .expect("Failed to write fixture");
        }
    }

    /// Polls until the job is completed or failed.
    pub async fn wait_for_terminal(&self, job_id: &str) -> RetrainJob {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(180);
        loop {
            let job = self
                .retrainer
                .registry()
                .get(job_id)
                .expect("Job disappeared");
            if job.is_finished() {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("Job {} did not finish: {:?}", job_id, job);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn wire(config: &Config) -> Arc<Retrainer> {
    let registry = Arc::new(JobRegistry::new(config.jobs.max_retained));
    let inference = Arc::new(InferenceService::new());
    let uploads = Arc::new(UploadStore::new(
        config.paths.uploads_dir(),
        config.paths.archive_dir(),
        config.model.class_set(),
    ));
    Arc::new(Retrainer::new(config.clone(), registry, inference, uploads))
}

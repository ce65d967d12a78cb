use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use burn::module::AutodiffModule;
use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::classes::ClassSet;
use crate::config::Config;
use crate::error::{MriscanError, RetrainError};
use crate::inference::{ActiveModel, InferenceService};
use crate::jobs::{Hyperparameters, JobRegistry, JobStatus, RetrainJob};
use crate::model::{
    ClassifierNet, InferenceBackend, ModelMetadata, ModelMetrics, ModelStore, NetworkConfig,
    TrainingBackend,
};
use crate::preprocess::{ImageTensor, Preprocessor};
use crate::training::metrics;
use crate::training::{
    fine_tune, labelled_files, load_samples, predict_probabilities, split_samples, FineTuneConfig,
    Sample, StopSignal,
};
use crate::uploads::{UploadStore, UploadedSample};

/// Where the evaluation metrics of a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationSource {
    TestSet,
    Validation,
    Training,
}

impl EvaluationSource {
    fn as_str(&self) -> &'static str {
        match self {
            EvaluationSource::TestSet => "test set",
            EvaluationSource::Validation => "validation split",
            EvaluationSource::Training => "training samples",
        }
    }
}

struct BaseModel {
    net: ClassifierNet<TrainingBackend>,
    classes: ClassSet,
    preprocessor: Preprocessor,
    network: NetworkConfig,
    parent_version: Option<u32>,
}

struct TrainedVersion {
    metadata: ModelMetadata,
    consumed: Vec<UploadedSample>,
    evaluated_on: EvaluationSource,
}

/// Runs fine-tuning jobs in the background and owns model promotion.
pub struct Retrainer {
    config: Config,
    registry: Arc<JobRegistry>,
    inference: Arc<InferenceService>,
    models: ModelStore,
    uploads: Arc<UploadStore>,
    training_slot: Arc<Semaphore>,
    stop_signals: Mutex<HashMap<String, StopSignal>>,
}

impl Retrainer {
    pub fn new(
        config: Config,
        registry: Arc<JobRegistry>,
        inference: Arc<InferenceService>,
        uploads: Arc<UploadStore>,
    ) -> Self {
        let models = ModelStore::new(config.paths.models_dir());
        Self {
            config,
            registry,
            inference,
            models,
            uploads,
            training_slot: Arc::new(Semaphore::new(1)),
            stop_signals: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn inference(&self) -> &Arc<InferenceService> {
        &self.inference
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    pub fn uploads(&self) -> &Arc<UploadStore> {
        &self.uploads
    }

    fn signals(&self) -> MutexGuard<'_, HashMap<String, StopSignal>> {
        match self.stop_signals.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Stop signal lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Validates the request, records a queued job and starts it in the
    /// background. Returns as soon as the job is recorded.
    pub fn submit(self: &Arc<Self>, hyperparameters: Hyperparameters) -> Result<String, RetrainError> {
        hyperparameters.validate(&self.config.training)?;

        let job = RetrainJob::new(hyperparameters);
        let job_id = job.job_id.clone();
        self.registry.record(job);

        let stop = StopSignal::new();
        self.signals().insert(job_id.clone(), stop.clone());

        log::info!("Queued retrain job {}", job_id);
        let this = Arc::clone(self);
        let task_job_id = job_id.clone();
        let span = tracing::info_span!("retrain", job_id = %job_id);
        tokio::spawn(
            async move {
                this.run(task_job_id, stop).await;
            }
            .instrument(span),
        );

        Ok(job_id)
    }

    /// Stops a job. A queued job fails at once; a running job fails at its
    /// next batch boundary.
    pub fn cancel(&self, job_id: &str) -> Result<RetrainJob, RetrainError> {
        let job = self.registry.get(job_id)?;
        if job.is_finished() {
            return Err(RetrainError::InvalidRequest(format!(
                "job {} is already {}",
                job_id, job.status
            )));
        }

        if let Some(stop) = self.signals().get(job_id) {
            stop.cancel();
        }

        let updated = self.registry.update(job_id, |j| {
            if j.status == JobStatus::Queued {
                j.mark_failed(RetrainError::Cancelled.to_string());
            } else if !j.is_finished() {
                j.message = "Cancellation requested".to_string();
            }
        })?;

        log::info!("Cancellation requested for job {}", job_id);
        Ok(updated)
    }

    async fn run(self: Arc<Self>, job_id: String, stop: StopSignal) {
        let permit = match Arc::clone(&self.training_slot).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                self.fail(&job_id, &RetrainError::TrainingFailure(e.to_string()));
                self.signals().remove(&job_id);
                return;
            }
        };

        if stop.is_stopped() {
            log::info!("Job {} was stopped before it started", job_id);
            self.signals().remove(&job_id);
            return;
        }

        if let Err(e) = self.registry.update(&job_id, |j| j.mark_running()) {
            log::warn!("Job {} could not start: {}", job_id, e);
            self.signals().remove(&job_id);
            return;
        }

        let hyperparameters = match self.registry.get(&job_id) {
            Ok(job) => job.hyperparameters,
            Err(e) => {
                log::warn!("Job {} vanished before training: {}", job_id, e);
                self.signals().remove(&job_id);
                return;
            }
        };

        let timeout_secs = self.config.training.timeout_secs;
        let this = Arc::clone(&self);
        let body_job_id = job_id.clone();
        let body_stop = stop.clone();
        let body_span = tracing::Span::current();
        let mut handle = tokio::task::spawn_blocking(move || {
            let _entered = body_span.enter();
            this.train_version(&body_job_id, &hyperparameters, &body_stop)
        });

        // The body is always joined before the outcome is recorded, and the
        // slot is held until archiving is done.
        let limit = Duration::from_secs(timeout_secs);
        let result = match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(RetrainError::TrainingFailure(format!(
                "training task aborted: {}",
                join_error
            ))),
            Err(_) => {
                stop.time_out(timeout_secs);
                // The body may already be past its last stop check, so wait
                // for it and drop anything it wrote.
                if let Ok(Ok(late)) = handle.await {
                    self.discard_version(late.metadata.version);
                }
                Err(RetrainError::TimedOut(timeout_secs))
            }
        };

        match result {
            Ok(trained) => self.finish(&job_id, trained).await,
            Err(e) => self.fail(&job_id, &e),
        }

        drop(permit);
        self.signals().remove(&job_id);
    }

    async fn finish(&self, job_id: &str, trained: TrainedVersion) {
        let version_label = trained.metadata.version_label();
        let samples_used = trained.metadata.samples_used;
        let metrics = trained.metadata.metrics.clone();

        match self.registry.update(job_id, |j| {
            j.samples_used = Some(samples_used);
            j.mark_completed(metrics, version_label.clone());
            j.message = format!(
                "Produced model {} (evaluated on {})",
                version_label,
                trained.evaluated_on.as_str()
            );
        }) {
            Ok(_) => log::info!("Job {} completed with model {}", job_id, version_label),
            Err(e) => {
                log::warn!(
                    "Job {} produced {} but could not be marked completed: {}",
                    job_id,
                    version_label,
                    e
                );
                return;
            }
        }

        let uploads = Arc::clone(&self.uploads);
        let tag = job_id.to_string();
        let consumed = trained.consumed;
        let archived =
            tokio::task::spawn_blocking(move || uploads.archive(&consumed, &tag)).await;

        match archived {
            Ok(Ok(path)) => {
                let path = path.to_string_lossy().to_string();
                if let Err(e) = self
                    .registry
                    .update(job_id, |j| j.archive_path = Some(path.clone()))
                {
                    log::warn!("Could not record archive path for {}: {}", job_id, e);
                }
            }
            Ok(Err(e)) => log::warn!("Archiving uploads for {} failed: {}", job_id, e),
            Err(e) => log::warn!("Archive task for {} aborted: {}", job_id, e),
        }
    }

    fn discard_version(&self, version: u32) {
        match self.models.remove_version(version) {
            Ok(()) => log::warn!("Discarded model v{} written after the job timed out", version),
            Err(e) => log::error!("Failed to discard model v{}: {}", version, e),
        }
    }

    fn fail(&self, job_id: &str, error: &RetrainError) {
        log::error!("Retrain job {} failed: {}", job_id, error);
        let message = error.to_string();
        if let Err(e) = self.registry.update(job_id, |j| {
            if !j.is_finished() {
                j.mark_failed(message.clone());
            }
        }) {
            log::warn!("Could not record failure for {}: {}", job_id, e);
        }
    }

    fn base_model(&self) -> Result<BaseModel, RetrainError> {
        if let Some(active) = self.inference.current() {
            let metadata = active.metadata();
            let (net, _) = self
                .models
                .load::<TrainingBackend>(metadata.version, &Default::default())?;
            return Ok(BaseModel {
                net,
                classes: active.classes().clone(),
                preprocessor: active.preprocessor().clone(),
                network: metadata.network_config(),
                parent_version: Some(metadata.version),
            });
        }

        if !self.config.training.bootstrap_when_unloaded {
            return Err(RetrainError::NoBaseModel(
                "no model is active and bootstrapping is disabled".to_string(),
            ));
        }

        let model = &self.config.model;
        let classes = model.class_set();
        let network = NetworkConfig {
            num_classes: classes.len(),
            hidden_units: model.hidden_units,
            pool_size: model.pool_size,
            dropout: model.dropout,
        };
        log::info!("No active model, fine-tuning a freshly initialised network");
        Ok(BaseModel {
            net: ClassifierNet::new(&network, &Default::default()),
            classes,
            preprocessor: Preprocessor::new(model.image_size, model.normalization.clone()),
            network,
            parent_version: None,
        })
    }

    fn set_message(&self, job_id: &str, message: String) {
        if let Err(e) = self.registry.update(job_id, |j| {
            if !j.is_finished() {
                j.message = message.clone();
            }
        }) {
            log::debug!("Progress update for {} dropped: {}", job_id, e);
        }
    }

    /// The blocking body of a job: load uploads, fine-tune a private copy
    /// of the base model, evaluate it and write it as a new version.
    fn train_version(
        &self,
        job_id: &str,
        hyperparameters: &Hyperparameters,
        stop: &StopSignal,
    ) -> Result<TrainedVersion, RetrainError> {
        let BaseModel {
            net,
            classes,
            preprocessor,
            network,
            parent_version,
        } = self.base_model()?;

        let files = self.uploads.scan()?;
        let loaded = load_samples(&files, &classes, &preprocessor);
        if loaded.samples.is_empty() {
            return Err(RetrainError::NoTrainingData);
        }
        let samples_used = loaded.samples.len();
        self.set_message(job_id, format!("Loaded {} training samples", samples_used));

        let training = &self.config.training;
        let (train, validation) =
            split_samples(loaded.samples, training.validation_split, training.seed);

        let fine_tune_config = FineTuneConfig {
            epochs: hyperparameters.epochs,
            batch_size: hyperparameters.batch_size,
            learning_rate: hyperparameters.learning_rate,
            early_stopping_patience: training.early_stopping_patience,
            seed: training.seed,
        };
        let outcome = fine_tune(
            net,
            &train,
            &validation,
            &fine_tune_config,
            stop,
            |report| {
                let message = match report.validation_accuracy {
                    Some(accuracy) => format!(
                        "epoch {}/{} loss {:.4} val_accuracy {:.4}",
                        report.epoch, report.epochs, report.train_loss, accuracy
                    ),
                    None => format!(
                        "epoch {}/{} loss {:.4}",
                        report.epoch, report.epochs, report.train_loss
                    ),
                };
                log::info!("Job {}: {}", job_id, message);
                self.set_message(job_id, message);
            },
        )?;

        self.set_message(job_id, "Evaluating".to_string());
        let serving = outcome.net.valid();
        let (evaluation, evaluated_on) =
            self.evaluation_set(&classes, &preprocessor, &validation, &train);
        let model_metrics = {
            let _span = tracing::info_span!("evaluate", samples = evaluation.len()).entered();
            let images: Vec<&ImageTensor> = evaluation.iter().map(|s| &s.image).collect();
            let labels: Vec<usize> = evaluation.iter().map(|s| s.label).collect();
            let probabilities = predict_probabilities(&serving, &images)?;
            metrics::evaluate(&probabilities, &labels, classes.len())
        };
        log_metrics(&model_metrics, evaluated_on);

        stop.check()?;

        let version = self.models.next_version()?;
        let [height, width] = preprocessor.image_size();
        let metadata = ModelMetadata {
            version,
            name: self.config.model.name.clone(),
            architecture: self.config.model.architecture.clone(),
            input_shape: [height as usize, width as usize, ImageTensor::CHANNELS],
            class_labels: classes.labels(),
            metrics: model_metrics,
            created_at: Utc::now(),
            learning_rate: hyperparameters.learning_rate,
            batch_size: hyperparameters.batch_size,
            epochs_requested: hyperparameters.epochs,
            epochs_trained: outcome.epochs_trained,
            samples_used,
            parent_version,
            hidden_units: network.hidden_units,
            pool_size: network.pool_size,
            dropout: network.dropout,
            normalization: preprocessor.normalization().clone(),
        };
        self.models.write_version(&outcome.net, &metadata)?;

        Ok(TrainedVersion {
            metadata,
            consumed: loaded.consumed,
            evaluated_on,
        })
    }

    /// Held-out test set if configured and non-empty, else the validation
    /// split, else the training samples.
    fn evaluation_set<'a>(
        &self,
        classes: &ClassSet,
        preprocessor: &Preprocessor,
        validation: &'a [Sample],
        train: &'a [Sample],
    ) -> (std::borrow::Cow<'a, [Sample]>, EvaluationSource) {
        use std::borrow::Cow;

        if let Some(test_dir) = self.config.paths.test_dir() {
            let files = labelled_files(&test_dir, classes);
            let loaded = load_samples(&files, classes, preprocessor);
            if !loaded.samples.is_empty() {
                return (Cow::Owned(loaded.samples), EvaluationSource::TestSet);
            }
            log::warn!("Test directory {:?} holds no usable samples", test_dir);
        }
        if !validation.is_empty() {
            return (Cow::Borrowed(validation), EvaluationSource::Validation);
        }
        (Cow::Borrowed(train), EvaluationSource::Training)
    }

    /// Loads a stored version and makes it the active model.
    pub fn promote(&self, version: u32) -> Result<ModelMetadata, MriscanError> {
        let _span = tracing::info_span!("promote", version).entered();

        let (net, metadata) = self
            .models
            .load::<InferenceBackend>(version, &Default::default())?;
        let active = ActiveModel::new(net, metadata.clone(), &self.config.model.class_set());
        self.inference.activate(active);
        self.models.set_active(version)?;

        log::info!("Promoted model {}", metadata.version_label());
        Ok(metadata)
    }

    /// Activates the version named by the persisted active pointer.
    /// Unpromoted versions are never activated here.
    pub fn load_initial_model(&self) -> Result<Option<u32>, MriscanError> {
        let Some(version) = self.models.active_version()? else {
            log::warn!("No promoted model in {:?}", self.models.root());
            return Ok(None);
        };
        self.promote(version)?;
        Ok(Some(version))
    }
}

fn log_metrics(metrics: &ModelMetrics, source: EvaluationSource) {
    log::info!(
        "Evaluation on {}: loss {:.4} accuracy {:.4} precision {:.4} recall {:.4} f1 {} roc_auc {}",
        source.as_str(),
        metrics.loss,
        metrics.accuracy,
        metrics.precision,
        metrics.recall,
        metrics
            .f1
            .map(|v| format!("{:.4}", v))
            .unwrap_or_else(|| "n/a".to_string()),
        metrics
            .roc_auc
            .map(|v| format!("{:.4}", v))
            .unwrap_or_else(|| "n/a".to_string()),
    );
}

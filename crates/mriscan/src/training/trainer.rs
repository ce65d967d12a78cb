use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::activation::log_softmax;

use crate::error::RetrainError;
use crate::model::{images_to_tensor, ClassifierNet, InferenceBackend, TrainingBackend};
use crate::preprocess::ImageTensor;
use crate::training::dataset::{shuffle_indices, ClassificationBatcher, Sample};
use crate::training::metrics;

const EVAL_BATCH_SIZE: usize = 64;

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Shared flag telling a training loop to stop at the next batch.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    state: Arc<AtomicU8>,
    timeout_secs: Arc<AtomicU64>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let _ = self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn time_out(&self, after_secs: u64) {
        self.timeout_secs.store(after_secs, Ordering::SeqCst);
        let _ = self
            .state
            .compare_exchange(RUNNING, TIMED_OUT, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::SeqCst) != RUNNING
    }

    /// The error a stopped run should fail with.
    pub fn check(&self) -> Result<(), RetrainError> {
        match self.state.load(Ordering::SeqCst) {
            CANCELLED => Err(RetrainError::Cancelled),
            TIMED_OUT => Err(RetrainError::TimedOut(
                self.timeout_secs.load(Ordering::SeqCst),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FineTuneConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub early_stopping_patience: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub epochs: usize,
    pub train_loss: f64,
    pub validation_loss: Option<f64>,
    pub validation_accuracy: Option<f64>,
}

pub struct FineTuneOutcome {
    pub net: ClassifierNet<TrainingBackend>,
    pub epochs_trained: usize,
    pub final_train_loss: f64,
    pub best_validation_accuracy: Option<f64>,
    pub stopped_early: bool,
}

/// Cross-entropy of logits against one-hot targets, averaged over the batch.
pub fn cross_entropy_loss<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    (log_softmax(logits, 1) * targets).sum_dim(1).mean().neg()
}

/// Fine-tunes `net` on `train`, validating after each epoch when a
/// validation set is given. The returned weights are those with the best
/// validation accuracy seen, or the final weights without validation.
pub fn fine_tune<F>(
    net: ClassifierNet<TrainingBackend>,
    train: &[Sample],
    validation: &[Sample],
    config: &FineTuneConfig,
    stop: &StopSignal,
    mut on_epoch: F,
) -> Result<FineTuneOutcome, RetrainError>
where
    F: FnMut(&EpochReport),
{
    let _span = tracing::info_span!(
        "fine_tune",
        train = train.len(),
        validation = validation.len(),
        epochs = config.epochs
    )
    .entered();

    if train.is_empty() {
        return Err(RetrainError::NoTrainingData);
    }

    let num_classes = net.num_classes();
    let batcher = ClassificationBatcher::<TrainingBackend>::new(Default::default(), num_classes);
    let batch_size = config.batch_size.max(1);

    let mut net = net;
    let mut optimizer = AdamConfig::new().init();

    let mut best_net: Option<ClassifierNet<TrainingBackend>> = None;
    let mut best_accuracy: Option<f64> = None;
    let mut best_validation_loss = f64::MAX;
    let mut epochs_without_improvement = 0;
    let mut final_train_loss = 0.0;
    let mut epochs_trained = 0;
    let mut stopped_early = false;

    for epoch in 0..config.epochs {
        let mut indices: Vec<usize> = (0..train.len()).collect();
        shuffle_indices(&mut indices, config.seed.wrapping_add(epoch as u64));

        let mut epoch_loss = 0.0;
        let mut batch_count = 0;

        for chunk in indices.chunks(batch_size) {
            stop.check()?;

            let items: Vec<&Sample> = chunk.iter().filter_map(|&i| train.get(i)).collect();
            let Some(batch) = batcher.batch(&items) else {
                continue;
            };

            let logits = net.forward(batch.images);
            let loss = cross_entropy_loss(logits, batch.targets);

            let loss_value = scalar(loss.clone())?;
            if !loss_value.is_finite() {
                return Err(RetrainError::TrainingFailure(format!(
                    "loss diverged at epoch {}",
                    epoch + 1
                )));
            }
            epoch_loss += loss_value;
            batch_count += 1;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &net);
            net = optimizer.step(config.learning_rate, net, grads);
        }

        epochs_trained = epoch + 1;
        final_train_loss = if batch_count > 0 {
            epoch_loss / batch_count as f64
        } else {
            0.0
        };

        let mut report = EpochReport {
            epoch: epoch + 1,
            epochs: config.epochs,
            train_loss: final_train_loss,
            validation_loss: None,
            validation_accuracy: None,
        };

        if validation.is_empty() {
            on_epoch(&report);
            continue;
        }

        let serving = net.valid();
        let images: Vec<&ImageTensor> = validation.iter().map(|s| &s.image).collect();
        let labels: Vec<usize> = validation.iter().map(|s| s.label).collect();
        let probabilities = predict_probabilities(&serving, &images)?;
        let validation_metrics = metrics::evaluate(&probabilities, &labels, num_classes);
        report.validation_loss = Some(validation_metrics.loss);
        report.validation_accuracy = Some(validation_metrics.accuracy);
        on_epoch(&report);

        if best_accuracy.map_or(true, |best| validation_metrics.accuracy > best) {
            best_accuracy = Some(validation_metrics.accuracy);
            best_net = Some(net.clone());
        }

        if validation_metrics.loss < best_validation_loss {
            best_validation_loss = validation_metrics.loss;
            epochs_without_improvement = 0;
        } else {
            epochs_without_improvement += 1;
            if epochs_without_improvement >= config.early_stopping_patience.max(1) {
                log::info!(
                    "Early stopping after epoch {}: no validation loss improvement for {} epochs",
                    epoch + 1,
                    epochs_without_improvement
                );
                stopped_early = true;
                break;
            }
        }
    }

    Ok(FineTuneOutcome {
        net: best_net.unwrap_or(net),
        epochs_trained,
        final_train_loss,
        best_validation_accuracy: best_accuracy,
        stopped_early,
    })
}

/// Class probabilities per image, in input order.
pub fn predict_probabilities(
    net: &ClassifierNet<InferenceBackend>,
    images: &[&ImageTensor],
) -> Result<Vec<Vec<f32>>, RetrainError> {
    let device = Default::default();
    let num_classes = net.num_classes();
    let mut rows = Vec::with_capacity(images.len());

    for chunk in images.chunks(EVAL_BATCH_SIZE) {
        let input = images_to_tensor::<InferenceBackend>(chunk, &device).ok_or_else(|| {
            RetrainError::TrainingFailure("images in a batch differ in size".to_string())
        })?;
        let values: Vec<f32> = net
            .forward_probabilities(input)
            .into_data()
            .to_vec()
            .map_err(|e| RetrainError::TrainingFailure(format!("{:?}", e)))?;
        rows.extend(values.chunks(num_classes).map(|row| row.to_vec()));
    }

    Ok(rows)
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> Result<f64, RetrainError> {
    let values: Vec<f32> = tensor
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| RetrainError::TrainingFailure(format!("{:?}", e)))?;
    values
        .first()
        .map(|v| *v as f64)
        .ok_or_else(|| RetrainError::TrainingFailure("empty loss tensor".to_string()))
}

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::Serialize;

use crate::classes::{ClassSet, ClassSpec};
use crate::error::{InferenceError, MriscanError};
use crate::inference::telemetry::{Telemetry, TelemetrySnapshot};
use crate::model::{images_to_tensor, ClassifierNet, InferenceBackend, ModelMetadata};
use crate::preprocess::{ImageTensor, Preprocessor};

/// A loaded model version, ready to serve.
///
/// Fine-tuning reloads its own trainable copy from the model store, so only
/// the plain-backend network is held here.
pub struct ActiveModel {
    metadata: ModelMetadata,
    classes: ClassSet,
    preprocessor: Preprocessor,
    serving: Mutex<ClassifierNet<InferenceBackend>>,
}

impl ActiveModel {
    /// `configured` supplies display names for the model's labels.
    pub fn new(
        net: ClassifierNet<InferenceBackend>,
        metadata: ModelMetadata,
        configured: &ClassSet,
    ) -> Self {
        let classes = ClassSet::new(
            metadata
                .class_labels
                .iter()
                .map(|label| ClassSpec::new(label.clone(), configured.display_name(label)))
                .collect(),
        );
        let preprocessor = metadata.preprocessor();

        Self {
            metadata,
            classes,
            preprocessor,
            serving: Mutex::new(net),
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn classes(&self) -> &ClassSet {
        &self.classes
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Clones share parameter tensors; the lock is held only for the clone.
    fn network(&self) -> ClassifierNet<InferenceBackend> {
        let guard = match self.serving.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Model lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }

    fn probabilities(&self, image: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
        let [height, width, _] = self.metadata.input_shape;
        if image.height != height || image.width != width || image.len() != height * width * 3 {
            return Err(InferenceError::InvalidInput(format!(
                "expected input shape [1, {}, {}, 3], got {:?}",
                height,
                width,
                image.shape()
            )));
        }

        let device = Default::default();
        let input = images_to_tensor::<InferenceBackend>(&[image], &device)
            .ok_or_else(|| InferenceError::InvalidInput("empty input".to_string()))?;

        let output = self.network().forward_probabilities(input);

        let values: Vec<f32> = output
            .into_data()
            .to_vec()
            .map_err(|e| InferenceError::Backend(format!("{:?}", e)))?;

        if values.len() != self.classes.len() {
            return Err(InferenceError::Backend(format!(
                "model produced {} outputs for {} classes",
                values.len(),
                self.classes.len()
            )));
        }

        Ok(values)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub predicted_class: String,
    pub predicted_class_short: String,
    pub class_index: usize,
    pub confidence: f32,
    pub probabilities: BTreeMap<String, f32>,
    pub inference_time_ms: f64,
    pub model_version: String,
}

fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
}

/// Serves predictions from the currently active model.
#[derive(Default)]
pub struct InferenceService {
    active: RwLock<Option<Arc<ActiveModel>>>,
    telemetry: Telemetry,
}

impl InferenceService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a new active model, returning the previous version.
    pub fn activate(&self, model: ActiveModel) -> Option<u32> {
        let version = model.metadata.version;
        let mut guard = match self.active.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Active model lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let previous = guard.replace(Arc::new(model));
        let previous_version = previous.map(|m| m.metadata.version);
        log::info!(
            "Activated model v{} (previous: {:?})",
            version,
            previous_version
        );
        previous_version
    }

    pub fn current(&self) -> Option<Arc<ActiveModel>> {
        let guard = match self.active.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Active model lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_some()
    }

    pub fn active_version(&self) -> Option<u32> {
        self.current().map(|m| m.metadata.version)
    }

    pub fn active_metadata(&self) -> Option<ModelMetadata> {
        self.current().map(|m| m.metadata.clone())
    }

    pub fn predict(&self, image: &ImageTensor) -> Result<Prediction, InferenceError> {
        let model = self.current().ok_or(InferenceError::ModelUnavailable)?;
        self.predict_with(&model, image)
    }

    /// Decodes and preprocesses `bytes` with the active model's settings,
    /// then predicts.
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction, MriscanError> {
        let model = self.current().ok_or(InferenceError::ModelUnavailable)?;
        let image = model.preprocessor.preprocess_bytes(bytes)?;
        Ok(self.predict_with(&model, &image)?)
    }

    fn predict_with(
        &self,
        model: &ActiveModel,
        image: &ImageTensor,
    ) -> Result<Prediction, InferenceError> {
        let started = Instant::now();
        let probabilities = model.probabilities(image)?;
        let (class_index, confidence) = argmax(&probabilities)
            .ok_or_else(|| InferenceError::Backend("empty model output".to_string()))?;
        let inference_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let spec = model
            .classes
            .get(class_index)
            .ok_or_else(|| InferenceError::Backend(format!("no class at index {}", class_index)))?;

        self.telemetry.record(&spec.label, inference_time_ms);
        log::debug!(
            "Predicted {} ({:.3}) in {:.1}ms",
            spec.label,
            confidence,
            inference_time_ms
        );

        Ok(Prediction {
            predicted_class: spec.display_name().to_string(),
            predicted_class_short: spec.label.clone(),
            class_index,
            confidence,
            probabilities: model
                .classes
                .specs()
                .iter()
                .zip(probabilities.iter())
                .map(|(spec, p)| (spec.label.clone(), *p))
                .collect(),
            inference_time_ms,
            model_version: model.metadata.version_label(),
        })
    }

    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelMetrics;
    use crate::preprocess::Normalization;

    fn metadata(version: u32) -> ModelMetadata {
        ModelMetadata {
            version,
            name: "test".to_string(),
            architecture: "test-arch".to_string(),
            input_shape: [6, 6, 3],
            class_labels: ClassSet::brain_tumor().labels(),
            metrics: ModelMetrics::default(),
            created_at: chrono::Utc::now(),
            learning_rate: 1e-3,
            batch_size: 1,
            epochs_requested: 1,
            epochs_trained: 1,
            samples_used: 1,
            parent_version: None,
            hidden_units: 8,
            pool_size: 2,
            dropout: 0.2,
            normalization: Normalization::UnitScale,
        }
    }

    fn active(version: u32) -> ActiveModel {
        let meta = metadata(version);
        let net = ClassifierNet::new(&meta.network_config(), &Default::default());
        ActiveModel::new(net, meta, &ClassSet::brain_tumor())
    }

    fn image(height: usize, width: usize) -> ImageTensor {
        ImageTensor {
            data: (0..height * width * 3).map(|i| (i % 7) as f32 / 7.0).collect(),
            height,
            width,
        }
    }

    #[test]
    fn test_predict_without_model_is_unavailable() {
        let service = InferenceService::new();
        assert!(!service.is_loaded());
        assert!(matches!(
            service.predict(&image(6, 6)),
            Err(InferenceError::ModelUnavailable)
        ));
    }

    #[test]
    fn test_prediction_is_a_distribution() {
        let service = InferenceService::new();
        service.activate(active(1));

        let prediction = service.predict(&image(6, 6)).unwrap();
        let sum: f32 = prediction.probabilities.values().sum();
        assert!((sum - 1.0).abs() < 1e-4);

        let max = prediction
            .probabilities
            .values()
            .copied()
            .fold(f32::MIN, f32::max);
        assert_eq!(prediction.confidence, max);
        assert_eq!(
            prediction.probabilities[&prediction.predicted_class_short],
            prediction.confidence
        );
        assert_eq!(prediction.model_version, "v1");
    }

    #[test]
    fn test_display_names_come_from_configuration() {
        let service = InferenceService::new();
        service.activate(active(1));
        let prediction = service.predict(&image(6, 6)).unwrap();
        let classes = ClassSet::brain_tumor();
        assert_eq!(
            prediction.predicted_class,
            classes.display_name(&prediction.predicted_class_short)
        );
    }

    #[test]
    fn test_shape_mismatch_is_invalid_input() {
        let service = InferenceService::new();
        service.activate(active(1));
        assert!(matches!(
            service.predict(&image(5, 6)),
            Err(InferenceError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_activate_swaps_version() {
        let service = InferenceService::new();
        assert_eq!(service.activate(active(1)), None);
        assert_eq!(service.activate(active(2)), Some(1));
        assert_eq!(service.active_version(), Some(2));
    }

    #[test]
    fn test_telemetry_counts_predictions() {
        let service = InferenceService::new();
        service.activate(active(1));
        service.predict(&image(6, 6)).unwrap();
        service.predict(&image(6, 6)).unwrap();
        let snapshot = service.telemetry_snapshot();
        assert_eq!(snapshot.total_predictions, 2);
        assert_eq!(snapshot.recent_inference_ms.len(), 2);
    }

    #[test]
    fn test_probabilities_are_softmax_of_logits() {
        let model = active(1);
        let img = image(6, 6);
        let input =
            images_to_tensor::<InferenceBackend>(&[&img], &Default::default()).unwrap();
        let logits: Vec<f32> = model.network().forward(input).into_data().to_vec().unwrap();

        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
        let total: f32 = exps.iter().sum();

        let probabilities = model.probabilities(&img).unwrap();
        let sum: f32 = probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        for (p, e) in probabilities.iter().zip(exps.iter()) {
            assert!((p - e / total).abs() < 1e-5);
        }
    }

    #[test]
    fn test_concurrent_predictions() {
        let service = Arc::new(InferenceService::new());
        service.activate(active(1));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || service.predict(&image(6, 6)).unwrap())
            })
            .collect();
        for handle in handles {
            let prediction = handle.join().unwrap();
            let sum: f32 = prediction.probabilities.values().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
        assert_eq!(service.telemetry_snapshot().total_predictions, 4);
    }

    #[test]
    fn test_argmax_prefers_first_on_tie() {
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), Some((0, 0.4)));
        assert_eq!(argmax(&[]), None);
    }
}

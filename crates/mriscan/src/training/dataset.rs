use std::path::Path;

use burn::prelude::*;
use burn::tensor::TensorData;
use walkdir::WalkDir;

use crate::classes::ClassSet;
use crate::model::images_to_tensor;
use crate::preprocess::{ImageTensor, Preprocessor};
use crate::uploads::UploadedSample;

/// A preprocessed image and its class index.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: ImageTensor,
    pub label: usize,
}

#[derive(Debug, Default)]
pub struct LoadedSamples {
    pub samples: Vec<Sample>,
    /// Files that produced a sample, in the same order.
    pub consumed: Vec<UploadedSample>,
    pub skipped: usize,
}

/// Reads and preprocesses labelled files. Files that cannot be decoded, or
/// whose label the model does not know, are skipped with a warning.
pub fn load_samples(
    files: &[UploadedSample],
    classes: &ClassSet,
    preprocessor: &Preprocessor,
) -> LoadedSamples {
    let _span = tracing::info_span!("load_samples", files = files.len()).entered();

    let mut loaded = LoadedSamples::default();
    for file in files {
        let Some(label) = classes.index_of(&file.label) else {
            log::warn!(
                "Skipping {:?}: label '{}' is not one of the model's classes",
                file.path,
                file.label
            );
            loaded.skipped += 1;
            continue;
        };

        let bytes = match std::fs::read(&file.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Skipping {:?}: {}", file.path, e);
                loaded.skipped += 1;
                continue;
            }
        };

        match preprocessor.preprocess_bytes(&bytes) {
            Ok(image) => {
                loaded.samples.push(Sample { image, label });
                loaded.consumed.push(file.clone());
            }
            Err(e) => {
                log::warn!("Skipping {:?}: {}", file.path, e);
                loaded.skipped += 1;
            }
        }
    }

    log::info!(
        "Loaded {} samples ({} skipped)",
        loaded.samples.len(),
        loaded.skipped
    );
    loaded
}

/// Fisher-Yates shuffle driven by a 64-bit LCG, so a seed always yields the
/// same order.
pub fn shuffle_indices(indices: &mut [usize], seed: u64) {
    let mut rng_state = seed.wrapping_add(12345);
    for i in (1..indices.len()).rev() {
        rng_state = rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let j = ((rng_state >> 33) as usize) % (i + 1);
        indices.swap(i, j);
    }
}

/// Deterministically splits off `fraction` of the samples for validation.
/// At least one sample always stays in the training part.
pub fn split_samples(samples: Vec<Sample>, fraction: f64, seed: u64) -> (Vec<Sample>, Vec<Sample>) {
    let n = samples.len();
    if n < 2 || fraction <= 0.0 {
        return (samples, Vec::new());
    }

    let validation_len = ((n as f64 * fraction).round() as usize).clamp(0, n - 1);
    let mut indices: Vec<usize> = (0..n).collect();
    shuffle_indices(&mut indices, seed);

    let mut slots: Vec<Option<Sample>> = samples.into_iter().map(Some).collect();
    let mut validation = Vec::with_capacity(validation_len);
    let mut train = Vec::with_capacity(n - validation_len);
    for (position, index) in indices.into_iter().enumerate() {
        if let Some(sample) = slots[index].take() {
            if position < validation_len {
                validation.push(sample);
            } else {
                train.push(sample);
            }
        }
    }
    (train, validation)
}

pub fn one_hot(labels: &[usize], num_classes: usize) -> Vec<f32> {
    let mut encoded = vec![0.0; labels.len() * num_classes];
    for (row, &label) in labels.iter().enumerate() {
        if label < num_classes {
            encoded[row * num_classes + label] = 1.0;
        }
    }
    encoded
}

#[derive(Debug, Clone)]
pub struct ClassificationBatch<B: Backend> {
    /// `[batch, height, width, 3]`
    pub images: Tensor<B, 4>,
    /// One-hot `[batch, num_classes]`
    pub targets: Tensor<B, 2>,
    pub labels: Vec<usize>,
}

pub struct ClassificationBatcher<B: Backend> {
    device: B::Device,
    num_classes: usize,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(device: B::Device, num_classes: usize) -> Self {
        Self {
            device,
            num_classes,
        }
    }

    /// `None` for an empty batch or images of differing sizes.
    pub fn batch(&self, items: &[&Sample]) -> Option<ClassificationBatch<B>> {
        let images: Vec<&ImageTensor> = items.iter().map(|s| &s.image).collect();
        let images = images_to_tensor::<B>(&images, &self.device)?;

        let labels: Vec<usize> = items.iter().map(|s| s.label).collect();
        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(
                one_hot(&labels, self.num_classes),
                [labels.len(), self.num_classes],
            ),
            &self.device,
        );

        Some(ClassificationBatch {
            images,
            targets,
            labels,
        })
    }
}

/// Files under `root/<label>/` for every label, used for hold-out sets.
pub fn labelled_files(root: &Path, classes: &ClassSet) -> Vec<UploadedSample> {
    let mut files: Vec<UploadedSample> = Vec::new();
    for label in classes.labels() {
        let dir = root.join(&label);
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry in {:?}: {}", dir, e);
                    continue;
                }
            };
            if entry.file_type().is_file() && crate::uploads::is_image_path(entry.path()) {
                files.push(UploadedSample {
                    label: label.clone(),
                    path: entry.into_path(),
                });
            }
        }
    }
    files
}

//! Turns decoded images into model-ready tensors.
//!
//! The same [`Preprocessor`] is used for inference and for loading training
//! samples, so a model always sees pixels prepared the same way.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::PreprocessError;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Pixel scaling applied after resizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalization {
    /// Raw 0-255 values.
    None,
    /// Values divided by 255.
    UnitScale,
    /// `((x / 255) - mean) / std` per channel.
    Standardize { mean: [f32; 3], std: [f32; 3] },
    /// `Standardize` with the ImageNet channel statistics.
    Imagenet,
}

impl Normalization {
    pub fn imagenet() -> Self {
        Normalization::Imagenet
    }

    fn apply(&self, value: u8, channel: usize) -> f32 {
        let raw = value as f32;
        match self {
            Normalization::None => raw,
            Normalization::UnitScale => raw / 255.0,
            Normalization::Standardize { mean, std } => (raw / 255.0 - mean[channel]) / std[channel],
            Normalization::Imagenet => {
                (raw / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
            }
        }
    }
}

/// A batch of one image in NHWC layout, shape `[1, height, width, 3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub data: Vec<f32>,
    pub height: usize,
    pub width: usize,
}

impl ImageTensor {
    pub const CHANNELS: usize = 3;

    pub fn shape(&self) -> [usize; 4] {
        [1, self.height, self.width, Self::CHANNELS]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Decodes an encoded image (PNG, JPEG, ...) into memory.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
    if bytes.is_empty() {
        return Err(PreprocessError::InvalidImage("empty payload".to_string()));
    }
    image::load_from_memory(bytes)
        .map_err(|e| PreprocessError::InvalidImage(format!("Failed to decode image: {}", e)))
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    height: u32,
    width: u32,
    normalization: Normalization,
}

impl Preprocessor {
    pub fn new(image_size: [u32; 2], normalization: Normalization) -> Self {
        Self {
            height: image_size[0],
            width: image_size[1],
            normalization,
        }
    }

    pub fn image_size(&self) -> [u32; 2] {
        [self.height, self.width]
    }

    pub fn normalization(&self) -> &Normalization {
        &self.normalization
    }

    /// Resizes to the configured resolution and normalises. Always yields a
    /// three-channel tensor regardless of the source colour type.
    pub fn preprocess(&self, image: &DynamicImage) -> ImageTensor {
        let rgb = image.to_rgb8();
        let resized = if rgb.width() == self.width && rgb.height() == self.height {
            rgb
        } else {
            image::imageops::resize(&rgb, self.width, self.height, FilterType::Lanczos3)
        };

        let mut data = Vec::with_capacity((self.height * self.width) as usize * 3);
        for pixel in resized.pixels() {
            for (channel, value) in pixel.0.iter().enumerate() {
                data.push(self.normalization.apply(*value, channel));
            }
        }

        ImageTensor {
            data,
            height: self.height as usize,
            width: self.width as usize,
        }
    }

    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<ImageTensor, PreprocessError> {
        let _span = tracing::debug_span!("preprocess", bytes = bytes.len()).entered();
        let image = decode_image(bytes)?;
        Ok(self.preprocess(&image))
    }
}

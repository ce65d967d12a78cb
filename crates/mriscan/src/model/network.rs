use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu};
use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::tensor::TensorData;

use crate::preprocess::ImageTensor;

/// Shape parameters needed to rebuild a [`ClassifierNet`] before loading
/// stored weights into it.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub num_classes: usize,
    pub hidden_units: usize,
    pub pool_size: usize,
    pub dropout: f64,
}

impl NetworkConfig {
    fn feature_width(&self) -> usize {
        ImageTensor::CHANNELS * self.pool_size * self.pool_size
    }
}

/// Transfer-style classifier: a fixed average-pooling feature stage
/// followed by a trainable dense head.
#[derive(Module, Debug)]
pub struct ClassifierNet<B: Backend> {
    features: AdaptiveAvgPool2d,
    hidden: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ClassifierNet<B> {
    pub fn new(config: &NetworkConfig, device: &B::Device) -> Self {
        let pool = config.pool_size;
        Self {
            features: AdaptiveAvgPool2dConfig::new([pool, pool]).init(),
            hidden: LinearConfig::new(config.feature_width(), config.hidden_units).init(device),
            dropout: DropoutConfig::new(config.dropout).init(),
            output: LinearConfig::new(config.hidden_units, config.num_classes).init(device),
            activation: Relu::new(),
        }
    }

    /// Forward pass.
    ///
    /// * `images` - NHWC tensor of shape `[batch, height, width, 3]`
    ///
    /// Returns unnormalised logits of shape `[batch, num_classes]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = images.permute([0, 3, 1, 2]);
        let x = self.features.forward(x);
        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = self.hidden.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);
        self.output.forward(x)
    }

    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.output.weight.val().dims()[1]
    }
}

/// Stacks equally sized images into one `[n, h, w, 3]` tensor.
pub fn images_to_tensor<B: Backend>(
    images: &[&ImageTensor],
    device: &B::Device,
) -> Option<Tensor<B, 4>> {
    let first = images.first()?;
    let (height, width) = (first.height, first.width);
    let mut data = Vec::with_capacity(images.len() * first.len());
    for image in images {
        if image.height != height || image.width != width {
            return None;
        }
        data.extend_from_slice(&image.data);
    }
    let shape = [images.len(), height, width, ImageTensor::CHANNELS];
    Some(Tensor::<B, 4>::from_data(TensorData::new(data, shape), device))
}

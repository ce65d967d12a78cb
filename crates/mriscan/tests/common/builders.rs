//! Builders for test configurations and image fixtures.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb, RgbImage};

use mriscan::config::Config;
use mriscan::Normalization;

/// Builder for small, fast `Config` instances rooted in a temp directory.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.model.image_size = [16, 16];
        config.model.normalization = Normalization::UnitScale;
        config.model.hidden_units = 8;
        config.model.pool_size = 2;
        config.model.dropout = 0.0;
        config.training.timeout_secs = 120;
        config.training.early_stopping_patience = 3;
        config.jobs.max_retained = 50;
        Self { config }
    }

    pub fn validation_split(mut self, split: f64) -> Self {
        self.config.training.validation_split = split;
        self
    }

    pub fn bootstrap(mut self, enabled: bool) -> Self {
        self.config.training.bootstrap_when_unloaded = enabled;
        self
    }

    pub fn test_dir(mut self, dir: &str) -> Self {
        self.config.paths.test_dir = Some(PathBuf::from(dir));
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.training.timeout_secs = secs;
        self
    }

    pub fn max_retained(mut self, max: usize) -> Self {
        self.config.jobs.max_retained = max;
        self
    }

    pub fn build(self, root: &Path) -> Config {
        self.config.with_root(root)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A PNG whose colour depends on `seed`, so different labels can be told
/// apart by a small network.
pub fn png_fixture(seed: u8, width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            seed.wrapping_mul(60),
            (x as u8).wrapping_add(seed),
            (y as u8).wrapping_mul(3),
        ])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("Failed to encode PNG fixture");
    buf.into_inner()
}

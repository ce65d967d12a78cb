pub mod service;
pub mod telemetry;

pub use service::{ActiveModel, InferenceService, Prediction};
pub use telemetry::{Telemetry, TelemetrySnapshot};

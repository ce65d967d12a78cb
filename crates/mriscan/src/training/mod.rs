pub mod dataset;
pub mod metrics;
pub mod trainer;

pub use dataset::{
    labelled_files, load_samples, split_samples, ClassificationBatcher, LoadedSamples, Sample,
};
pub use trainer::{
    fine_tune, predict_probabilities, EpochReport, FineTuneConfig, FineTuneOutcome, StopSignal,
};

pub mod orchestrator;

pub use orchestrator::{EvaluationSource, Retrainer};

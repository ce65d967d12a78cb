pub mod job;
pub mod registry;

pub use job::{new_job_id, Hyperparameters, JobStatus, RetrainJob};
pub use registry::JobRegistry;

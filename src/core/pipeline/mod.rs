pub mod config;
pub mod controller;
pub mod error;
pub mod job;

pub use config::PipelineConfig;
pub use controller::{JobHandle, JobOutcome, PipelineController};
pub use error::PipelineError;
pub use job::{EncodeJob, JobStatus};

pub mod event;
pub mod reporter;

pub use event::{FailureReason, JobEvent, ProgressEvent, Stage};
pub use reporter::{ProgressConfig, ProgressReporter};

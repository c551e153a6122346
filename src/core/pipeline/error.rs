use crate::core::capture::CaptureError;
use crate::core::encode::EncodeError;
use crate::core::progress::FailureReason;
use crate::core::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Video source {0} already has an active job")]
    SourceBusy(String),
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
    #[error("Only {captured} of {scheduled} frames captured ({skipped} skipped)")]
    InsufficientFrames {
        scheduled: usize,
        captured: usize,
        skipped: usize,
    },
    #[error("Video source error: {0}")]
    Source(String),
    #[error("Encode failure: {0}")]
    Encode(#[source] EncodeError),
    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error("Job failed ({reason}): {message}")]
    JobFailed {
        reason: FailureReason,
        message: String,
    },
    #[error("Job cancelled")]
    Cancelled,
    #[error("Unknown job: {0}")]
    UnknownJob(String),
    #[error("Job {0} has no artifact waiting to be stored")]
    NothingToRetry(String),
}

impl PipelineError {
    /// 终止事件里携带的原因码；取消不是失败
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            PipelineError::SourceBusy(_) => Some(FailureReason::SourceBusy),
            PipelineError::InvalidSelection(_) => Some(FailureReason::InvalidSelection),
            PipelineError::InsufficientFrames { .. } => Some(FailureReason::InsufficientFrames),
            PipelineError::Source(_) => Some(FailureReason::SourceError),
            PipelineError::Encode(_) => Some(FailureReason::EncodeFailure),
            PipelineError::Storage(_) => Some(FailureReason::StorageUnavailable),
            PipelineError::JobFailed { reason, .. } => Some(*reason),
            PipelineError::Cancelled
            | PipelineError::UnknownJob(_)
            | PipelineError::NothingToRetry(_) => None,
        }
    }
}

impl From<CaptureError> for PipelineError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::InvalidSelection(message) => PipelineError::InvalidSelection(message),
            other => PipelineError::Source(other.to_string()),
        }
    }
}

impl From<EncodeError> for PipelineError {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::Cancelled => PipelineError::Cancelled,
            EncodeError::Capture(capture) => capture.into(),
            other => PipelineError::Encode(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let e: PipelineError = EncodeError::NoFrames.into();
        assert_eq!(e.reason(), Some(FailureReason::EncodeFailure));

        let e: PipelineError = EncodeError::Cancelled.into();
        assert!(matches!(e, PipelineError::Cancelled));
        assert_eq!(e.reason(), None);

        let e: PipelineError = EncodeError::Capture(CaptureError::Source("gone".into())).into();
        assert_eq!(e.reason(), Some(FailureReason::SourceError));

        let e: PipelineError = StorageError::Unavailable("timeout".into()).into();
        assert_eq!(e.reason(), Some(FailureReason::StorageUnavailable));
    }
}

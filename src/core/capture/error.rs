use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
    #[error("Seek to {requested_sec:.3}s did not settle within {timeout_ms}ms")]
    SeekTimeout { requested_sec: f64, timeout_ms: u64 },
    #[error("Video source error: {0}")]
    Source(String),
}

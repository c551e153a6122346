use crate::core::capture::CaptureError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("No frames to encode")]
    NoFrames,
    #[error(
        "Frame {index} is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        index: usize,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("LZW compression failed: {0}")]
    Compression(String),
    #[error("GIF format error: {0}")]
    Format(String),
    #[error("Encode worker failed: {0}")]
    Worker(String),
    #[error("Encoding cancelled")]
    Cancelled,
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl From<gif::EncodingError> for EncodeError {
    fn from(e: gif::EncodingError) -> Self {
        EncodeError::Format(e.to_string())
    }
}

impl From<tokio::task::JoinError> for EncodeError {
    fn from(e: tokio::task::JoinError) -> Self {
        EncodeError::Worker(e.to_string())
    }
}

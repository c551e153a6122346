use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// 存储端不可达或超时，产物仍在内存中，可重试
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Artifact not found: {0}")]
    NotFound(String),
    #[error("Invalid artifact id: {0:?}")]
    InvalidId(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

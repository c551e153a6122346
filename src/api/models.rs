use crate::core::pipeline::PipelineError;
use crate::core::storage::{ArtifactSummary, StorageError};
use serde::{Deserialize, Serialize};

/// FRB 友好的错误类型，error_type 与终止事件里的原因码一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GifApiError {
    pub error_type: String,
    pub message: String,
}

impl GifApiError {
    pub(crate) fn new(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn unknown_source(source_id: &str) -> Self {
        Self::new("unknown_source", format!("未注册的视频源: {}", source_id))
    }

    pub(crate) fn unknown_job(job_id: &str) -> Self {
        Self::new("unknown_job", format!("未知任务: {}", job_id))
    }
}

impl std::fmt::Display for GifApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.error_type, self.message)
    }
}

impl std::error::Error for GifApiError {}

impl From<PipelineError> for GifApiError {
    fn from(e: PipelineError) -> Self {
        let error_type = match &e {
            PipelineError::Cancelled => "cancelled",
            PipelineError::UnknownJob(_) => "unknown_job",
            PipelineError::NothingToRetry(_) => "nothing_to_retry",
            other => other.reason().map_or("encode_failure", |r| r.as_str()),
        };
        Self::new(error_type, e.to_string())
    }
}

impl From<StorageError> for GifApiError {
    fn from(e: StorageError) -> Self {
        let error_type = match &e {
            StorageError::NotFound(_) => "not_found",
            StorageError::InvalidId(_) => "invalid_id",
            _ => "storage_unavailable",
        };
        Self::new(error_type, e.to_string())
    }
}

impl From<serde_json::Error> for GifApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::new("invalid_config", format!("配置解析失败: {}", e))
    }
}

/// 已保存 GIF 的概要信息（不含二进制）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub frame_count: u32,
    pub duration_sec: f64,
    pub size_bytes: u64,
    /// RFC 3339
    pub created_at: String,
}

impl From<ArtifactSummary> for ArtifactInfo {
    fn from(summary: ArtifactSummary) -> Self {
        let meta = summary.metadata;
        Self {
            id: summary.id,
            width: meta.width,
            height: meta.height,
            frame_count: meta.frame_count as u32,
            duration_sec: meta.duration_sec,
            size_bytes: meta.size_bytes,
            created_at: meta.created_at.to_rfc3339(),
        }
    }
}

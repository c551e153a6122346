use crate::core::storage::ArtifactMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 编码的四个阶段，顺序固定
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extracting,
    Encoding,
    Optimizing,
    Compressing,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Extracting,
        Stage::Encoding,
        Stage::Optimizing,
        Stage::Compressing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extracting => "extracting",
            Stage::Encoding => "encoding",
            Stage::Optimizing => "optimizing",
            Stage::Compressing => "compressing",
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Extracting => Some(Stage::Encoding),
            Stage::Encoding => Some(Stage::Optimizing),
            Stage::Optimizing => Some(Stage::Compressing),
            Stage::Compressing => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// 整数百分比 0-100
    pub percent: u8,
    pub message: String,
}

/// Stable, classifiable failure codes carried on terminal events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidSelection,
    SourceBusy,
    InsufficientFrames,
    EncodeFailure,
    StorageUnavailable,
    SourceError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InvalidSelection => "invalid_selection",
            FailureReason::SourceBusy => "source_busy",
            FailureReason::InsufficientFrames => "insufficient_frames",
            FailureReason::EncodeFailure => "encode_failure",
            FailureReason::StorageUnavailable => "storage_unavailable",
            FailureReason::SourceError => "source_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 推送给订阅者的任务事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    Progress(ProgressEvent),
    #[serde(rename_all = "camelCase")]
    Completed {
        artifact_id: String,
        metadata: ArtifactMetadata,
    },
    Failed {
        reason: FailureReason,
        message: String,
    },
    Cancelled,
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress(_))
    }
}

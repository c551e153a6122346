use crate::core::capture::{Frame, Selection};
use crate::core::progress::Stage;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 任务状态机
///
/// `pending → sampling → encoding → optimizing → compressing → done`;
/// `failed` and `cancelled` are reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Sampling,
    Encoding,
    Optimizing,
    Compressing,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Sampling => "sampling",
            JobStatus::Encoding => "encoding",
            JobStatus::Optimizing => "optimizing",
            JobStatus::Compressing => "compressing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }

    fn ordinal(&self) -> Option<u8> {
        match self {
            JobStatus::Pending => Some(0),
            JobStatus::Sampling => Some(1),
            JobStatus::Encoding => Some(2),
            JobStatus::Optimizing => Some(3),
            JobStatus::Compressing => Some(4),
            JobStatus::Done => Some(5),
            JobStatus::Failed | JobStatus::Cancelled => None,
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.ordinal(), next.ordinal()) {
            (_, None) => true,
            (Some(from), Some(to)) => to == from + 1,
            (None, Some(_)) => false,
        }
    }

    /// Status that runs while the encoder is in `stage`.
    pub fn for_stage(stage: Stage) -> JobStatus {
        match stage {
            Stage::Extracting => JobStatus::Sampling,
            Stage::Encoding => JobStatus::Encoding,
            Stage::Optimizing => JobStatus::Optimizing,
            Stage::Compressing => JobStatus::Compressing,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 管线跟踪的工作单元，只由 PipelineController 修改
#[derive(Debug)]
pub struct EncodeJob {
    pub id: String,
    pub selection: Selection,
    pub status: JobStatus,
    /// 采样完成到量化之间暂存
    pub frames: Vec<Frame>,
}

impl EncodeJob {
    pub fn new(id: impl Into<String>, selection: Selection) -> Self {
        Self {
            id: id.into(),
            selection,
            status: JobStatus::Pending,
            frames: Vec::new(),
        }
    }

    /// Illegal transitions are ignored and reported as `false`.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            debug!("Job {}: ignored transition {} -> {}", self.id, self.status, next);
            return false;
        }
        debug!("Job {}: {} -> {}", self.id, self.status, next);
        self.status = next;
        true
    }

    pub fn take_frames(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames)
    }
}

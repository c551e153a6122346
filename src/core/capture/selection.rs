use super::error::CaptureError;
use serde::{Deserialize, Serialize};

/// GIF 的逻辑屏幕尺寸是 u16
pub const MAX_OUTPUT_DIMENSION: u32 = u16::MAX as u32;

// 浮点误差容忍，避免 3.0s * 10fps 算出 31 帧
const SCHEDULE_EPSILON: f64 = 1e-9;

/// 用户选中的视频片段 + 输出参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub start_time_sec: f64,
    pub end_time_sec: f64,
    pub frame_rate: f64,
    pub output_width: u32,
    pub output_height: u32,
}

impl Selection {
    pub fn new(
        start_time_sec: f64,
        end_time_sec: f64,
        frame_rate: f64,
        output_width: u32,
        output_height: u32,
    ) -> Self {
        Self {
            start_time_sec,
            end_time_sec,
            frame_rate,
            output_width,
            output_height,
        }
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if !self.start_time_sec.is_finite()
            || !self.end_time_sec.is_finite()
            || !self.frame_rate.is_finite()
        {
            return Err(CaptureError::InvalidSelection(
                "times and frame rate must be finite".to_string(),
            ));
        }
        if self.start_time_sec < 0.0 {
            return Err(CaptureError::InvalidSelection(format!(
                "start time {:.3}s is negative",
                self.start_time_sec
            )));
        }
        if self.end_time_sec <= self.start_time_sec {
            return Err(CaptureError::InvalidSelection(format!(
                "end time {:.3}s must be after start time {:.3}s",
                self.end_time_sec, self.start_time_sec
            )));
        }
        if self.frame_rate <= 0.0 {
            return Err(CaptureError::InvalidSelection(format!(
                "frame rate {} must be positive",
                self.frame_rate
            )));
        }
        if self.output_width == 0 || self.output_height == 0 {
            return Err(CaptureError::InvalidSelection(
                "output dimensions must be non-zero".to_string(),
            ));
        }
        if self.output_width > MAX_OUTPUT_DIMENSION || self.output_height > MAX_OUTPUT_DIMENSION {
            return Err(CaptureError::InvalidSelection(format!(
                "output {}x{} exceeds {}",
                self.output_width, self.output_height, MAX_OUTPUT_DIMENSION
            )));
        }
        Ok(())
    }

    pub fn duration_sec(&self) -> f64 {
        (self.end_time_sec - self.start_time_sec).max(0.0)
    }

    pub fn frame_interval_sec(&self) -> f64 {
        1.0 / self.frame_rate
    }

    /// duration × frameRate，向上取整
    pub fn expected_frame_count(&self) -> usize {
        let raw = self.duration_sec() * self.frame_rate - SCHEDULE_EPSILON;
        raw.ceil().max(0.0) as usize
    }

    /// Shrinks the window to what the source can actually provide.
    pub fn clamp_to(&self, available_sec: f64) -> Result<Selection, CaptureError> {
        if !available_sec.is_finite() || available_sec <= self.start_time_sec {
            return Err(CaptureError::InvalidSelection(format!(
                "start time {:.3}s is beyond the source duration {:.3}s",
                self.start_time_sec, available_sec
            )));
        }
        Ok(Selection {
            end_time_sec: self.end_time_sec.min(available_sec),
            ..*self
        })
    }

    /// Lowers the frame rate so the whole window fits in `max_frames` samples.
    pub fn fit_frame_budget(&self, max_frames: usize) -> Selection {
        let budget = max_frames.max(1);
        if self.expected_frame_count() <= budget {
            return *self;
        }
        Selection {
            frame_rate: budget as f64 / self.duration_sec(),
            ..*self
        }
    }

    /// 计划采样时间点；超出预算时均匀铺满整个窗口
    pub fn sample_times(&self, max_frames: usize) -> Vec<f64> {
        let fitted = self.fit_frame_budget(max_frames);
        let count = fitted.expected_frame_count().min(max_frames.max(1));
        let interval = fitted.frame_interval_sec();
        (0..count)
            .map(|i| self.start_time_sec + i as f64 * interval)
            .filter(|t| *t < self.end_time_sec)
            .collect()
    }
}

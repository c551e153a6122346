use super::error::CaptureError;
use super::frame::Picture;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 视频元素的播放状态（采样前快照，结束后恢复）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub position_sec: f64,
    pub paused: bool,
}

/// A live, externally owned video element.
///
/// Seeking is asynchronous and may settle at a slightly different time than
/// requested; `seek` resolves with the settled position. Decoding itself is
/// the element's job, `capture` only reads back what is currently shown.
#[async_trait]
pub trait VideoSource: Send + Sync {
    fn id(&self) -> &str;

    fn duration_sec(&self) -> f64;

    fn playback_state(&self) -> PlaybackState;

    async fn pause(&self) -> Result<(), CaptureError>;

    /// Resolves once the frame at (about) `time_sec` is decode-ready.
    async fn seek(&self, time_sec: f64) -> Result<f64, CaptureError>;

    async fn capture(&self) -> Result<Picture, CaptureError>;

    async fn restore(&self, state: PlaybackState) -> Result<(), CaptureError>;
}

use super::error::CaptureError;
use super::frame::Frame;
use super::selection::Selection;
use super::source::{PlaybackState, VideoSource};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureConfig {
    /// 单次 seek 的最长等待
    pub seek_timeout_ms: u64,
    /// 跳帧比例超过该值则任务失败
    pub max_skip_ratio: f64,
    /// 单次任务最多采样帧数（限制内存）
    pub max_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            seek_timeout_ms: 300,
            max_skip_ratio: 0.10,
            max_frames: 600,
        }
    }
}

impl CaptureConfig {
    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }
}

/// 帧采样器 - 按帧率逐个 seek 并读回像素
///
/// Pull-based and non-restartable: every `next_frame` call performs at most
/// one seek + capture. While alive it owns the source's playback position;
/// `release` puts the position and play state back and must be awaited on
/// every exit path.
pub struct FrameSampler {
    source: Arc<dyn VideoSource>,
    selection: Selection,
    schedule: Vec<f64>,
    cursor: usize,
    captured: usize,
    skipped: usize,
    seek_timeout: Duration,
    cancel: CancellationToken,
    lease: Option<PlaybackState>,
}

impl FrameSampler {
    pub async fn begin(
        source: Arc<dyn VideoSource>,
        selection: &Selection,
        config: &CaptureConfig,
        cancel: CancellationToken,
    ) -> Result<Self, CaptureError> {
        selection.validate()?;
        let effective = selection.clamp_to(source.duration_sec())?;
        if effective.end_time_sec < selection.end_time_sec {
            info!(
                "✂️ Selection clamped to source duration: {:.2}s -> {:.2}s",
                selection.end_time_sec, effective.end_time_sec
            );
        }

        let requested_count = effective.expected_frame_count();
        let effective = effective.fit_frame_budget(config.max_frames);
        if effective.frame_rate < selection.frame_rate {
            warn!(
                "Frame budget reached: {} frames requested, sampling {:.2}s at {:.2}fps instead",
                requested_count,
                effective.duration_sec(),
                effective.frame_rate
            );
        }
        let schedule = effective.sample_times(config.max_frames);

        let original = source.playback_state();
        let paused = match timeout(config.seek_timeout(), source.pause()).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Source(format!("{} did not pause in time", source.id()))),
        };
        if let Err(e) = paused {
            let _ = timeout(config.seek_timeout(), source.restore(original)).await;
            return Err(e);
        }

        debug!(
            "🎞️ Sampler on {}: {} samples, {:.2}s-{:.2}s @ {}fps",
            source.id(),
            schedule.len(),
            effective.start_time_sec,
            effective.end_time_sec,
            effective.frame_rate
        );

        Ok(Self {
            source,
            selection: effective,
            schedule,
            cursor: 0,
            captured: 0,
            skipped: 0,
            seek_timeout: config.seek_timeout(),
            cancel,
            lease: Some(original),
        })
    }

    /// The clamped selection actually being sampled.
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn scheduled(&self) -> usize {
        self.schedule.len()
    }

    pub fn processed(&self) -> usize {
        self.cursor
    }

    pub fn captured(&self) -> usize {
        self.captured
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn skip_ratio(&self) -> f64 {
        if self.schedule.is_empty() {
            return 0.0;
        }
        self.skipped as f64 / self.schedule.len() as f64
    }

    /// `None` once the schedule is exhausted or the job was cancelled.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, CaptureError>> {
        while self.cursor < self.schedule.len() {
            if self.cancel.is_cancelled() {
                debug!("Sampler cancelled at sample {}", self.cursor);
                return None;
            }

            let requested = self.schedule[self.cursor];
            self.cursor += 1;

            let seek = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                result = timeout(self.seek_timeout, self.source.seek(requested)) => result,
            };

            let settled = match seek {
                Ok(Ok(settled)) => settled,
                Ok(Err(e)) => {
                    self.skipped += 1;
                    warn!("⏭️ Seek to {:.3}s failed, skipping sample: {}", requested, e);
                    continue;
                }
                Err(_) => {
                    self.skipped += 1;
                    let e = CaptureError::SeekTimeout {
                        requested_sec: requested,
                        timeout_ms: self.seek_timeout.as_millis() as u64,
                    };
                    warn!("⏭️ {}, skipping sample", e);
                    continue;
                }
            };

            let picture = match timeout(self.seek_timeout, self.source.capture()).await {
                Ok(Ok(picture)) => picture,
                Ok(Err(e)) => return Some(Err(e)),
                Err(_) => {
                    self.skipped += 1;
                    warn!("⏭️ Capture at {:.3}s timed out, skipping sample", settled);
                    continue;
                }
            };

            let (w, h) = (self.selection.output_width, self.selection.output_height);
            let raster = match picture.into_raster(w, h) {
                Ok(raster) => raster,
                Err(e) => return Some(Err(e)),
            };

            let frame = Frame::new(self.captured, settled, w, h, raster.into_raw());
            self.captured += 1;
            return Some(Ok(frame));
        }

        None
    }

    /// 恢复视频原来的位置和播放状态
    pub async fn release(mut self) -> Result<(), CaptureError> {
        match self.lease.take() {
            Some(original) => {
                debug!(
                    "↩️ Restoring {} to {:.3}s (paused: {})",
                    self.source.id(),
                    original.position_sec,
                    original.paused
                );
                match timeout(self.seek_timeout, self.source.restore(original)).await {
                    Ok(result) => result,
                    Err(_) => Err(CaptureError::Source(format!(
                        "{} did not restore in time",
                        self.source.id()
                    ))),
                }
            }
            None => Ok(()),
        }
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        if self.lease.is_some() {
            warn!(
                "🗑️ FrameSampler on {} dropped without restoring playback",
                self.source.id()
            );
        }
    }
}

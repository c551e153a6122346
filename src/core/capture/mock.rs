use super::error::CaptureError;
use super::frame::{Picture, RawFrame};
use super::source::{PlaybackState, VideoSource};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// 可确定复现的视频源，用于测试和宿主联调
///
/// Every frame is a colour gradient whose blue channel and a white square
/// move with time, so consecutive samples always differ.
pub struct MockVideoSource {
    id: String,
    duration_sec: f64,
    width: u32,
    height: u32,
    seek_latency: Duration,
    settle_jitter_sec: f64,
    stalled_times: Vec<f64>,
    yuv_output: bool,
    state: Mutex<MockState>,
}

#[derive(Debug, Clone, Copy)]
struct MockState {
    position_sec: f64,
    paused: bool,
    seeks: usize,
    restores: usize,
}

impl MockVideoSource {
    pub fn new(id: impl Into<String>, duration_sec: f64) -> Self {
        Self {
            id: id.into(),
            duration_sec,
            width: 64,
            height: 48,
            seek_latency: Duration::ZERO,
            settle_jitter_sec: 0.0,
            stalled_times: Vec::new(),
            yuv_output: false,
            state: Mutex::new(MockState {
                position_sec: 0.0,
                paused: false,
                seeks: 0,
                restores: 0,
            }),
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_seek_latency(mut self, latency: Duration) -> Self {
        self.seek_latency = latency;
        self
    }

    /// Seeks alternate between landing slightly after and slightly before
    /// the requested time.
    pub fn with_settle_jitter(mut self, jitter_sec: f64) -> Self {
        self.settle_jitter_sec = jitter_sec;
        self
    }

    /// Seeks to these times never settle.
    pub fn with_stalled_times(mut self, times: Vec<f64>) -> Self {
        self.stalled_times = times;
        self
    }

    pub fn with_yuv_output(mut self, yuv: bool) -> Self {
        self.yuv_output = yuv;
        self
    }

    pub fn with_playback(self, position_sec: f64, paused: bool) -> Self {
        {
            let mut state = self.lock_state();
            state.position_sec = position_sec;
            state.paused = paused;
        }
        self
    }

    pub fn seek_count(&self) -> usize {
        self.lock_state().seeks
    }

    pub fn restore_count(&self) -> usize {
        self.lock_state().restores
    }

    fn lock_state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn render(&self, t: f64) -> Picture {
        let w = self.width as usize;
        let h = self.height as usize;
        let blue = ((t * 60.0) as u32 % 256) as u8;
        let square_x = ((t * 24.0) as usize) % w.max(1);
        let square_y = h / 3;

        let mut rgba = vec![0u8; w * h * 4];
        for y in 0..h {
            for x in 0..w {
                let idx = (y * w + x) * 4;
                let in_square = x >= square_x && x < square_x + 8 && y >= square_y && y < square_y + 8;
                if in_square {
                    rgba[idx..idx + 4].copy_from_slice(&[255, 255, 255, 255]);
                } else {
                    rgba[idx] = (x * 255 / w.max(1)) as u8;
                    rgba[idx + 1] = (y * 255 / h.max(1)) as u8;
                    rgba[idx + 2] = blue;
                    rgba[idx + 3] = 255;
                }
            }
        }

        if !self.yuv_output {
            return Picture::Rgba {
                width: self.width,
                height: self.height,
                data: rgba,
            };
        }

        let y_plane = rgba
            .chunks_exact(4)
            .map(|px| ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8)
            .collect();
        let chroma = ((w + 1) / 2) * ((h + 1) / 2);
        Picture::Yuv420(RawFrame {
            width: self.width,
            height: self.height,
            y_plane,
            u_plane: vec![128u8; chroma],
            v_plane: vec![128u8; chroma],
        })
    }
}

#[async_trait]
impl VideoSource for MockVideoSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn duration_sec(&self) -> f64 {
        self.duration_sec
    }

    fn playback_state(&self) -> PlaybackState {
        let state = self.lock_state();
        PlaybackState {
            position_sec: state.position_sec,
            paused: state.paused,
        }
    }

    async fn pause(&self) -> Result<(), CaptureError> {
        self.lock_state().paused = true;
        Ok(())
    }

    async fn seek(&self, time_sec: f64) -> Result<f64, CaptureError> {
        let seek_number = {
            let mut state = self.lock_state();
            state.seeks += 1;
            state.seeks
        };

        if self.stalled_times.iter().any(|s| (s - time_sec).abs() < 1e-6) {
            return Ok(std::future::pending::<f64>().await);
        }

        if !self.seek_latency.is_zero() {
            tokio::time::sleep(self.seek_latency).await;
        }

        let jitter = if seek_number % 2 == 0 {
            -self.settle_jitter_sec
        } else {
            self.settle_jitter_sec
        };
        let settled = (time_sec + jitter).clamp(0.0, self.duration_sec);
        self.lock_state().position_sec = settled;
        Ok(settled)
    }

    async fn capture(&self) -> Result<Picture, CaptureError> {
        let position = self.lock_state().position_sec;
        Ok(self.render(position))
    }

    async fn restore(&self, state: PlaybackState) -> Result<(), CaptureError> {
        let mut current = self.lock_state();
        current.position_sec = state.position_sec;
        current.paused = state.paused;
        current.restores += 1;
        Ok(())
    }
}

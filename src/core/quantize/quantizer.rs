use super::median_cut::{median_cut, ColorHistogram};
use super::palette::{Palette, PaletteFrame, MAX_TABLE_SIZE};
use crate::core::capture::Frame;
use log::{debug, warn};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaletteMode {
    /// 所有帧共用一个调色板（更快，体积更小）
    Global,
    /// 每帧单独调色板（保真度更高）
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaletteConfig {
    pub mode: PaletteMode,
    /// 颜色表大小，含透明色
    pub max_colors: usize,
    /// 全局调色板抽样的帧数
    pub sample_frames: usize,
    pub pixel_stride: usize,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            mode: PaletteMode::Global,
            max_colors: 256,
            sample_frames: 8,
            pixel_stride: 4,
        }
    }
}

impl PaletteConfig {
    fn opaque_limit(&self) -> usize {
        self.max_colors.clamp(2, MAX_TABLE_SIZE) - 1
    }
}

/// 量化结果
#[derive(Debug, Clone)]
pub struct QuantizedFrames {
    pub global_palette: Option<Palette>,
    pub frames: Vec<PaletteFrame>,
}

pub struct Quantizer {
    config: PaletteConfig,
    pool: Option<ThreadPool>,
}

impl Quantizer {
    pub fn new(config: PaletteConfig) -> Self {
        let num_threads = num_cpus::get().min(4);
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("gif-quantize-{}", i))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!("Quantizer pool unavailable, using global rayon pool: {}", e);
                None
            }
        };

        debug!("🎨 Quantizer created: {:?}, {} threads", config.mode, num_threads);
        Self { config, pool }
    }

    pub fn config(&self) -> &PaletteConfig {
        &self.config
    }

    /// Builds one palette over an evenly spaced sample of the frames.
    pub fn build_global_palette(&self, frames: &[Frame]) -> Palette {
        let mut histogram = ColorHistogram::new();
        let sample = self.config.sample_frames.max(1);
        let step = (frames.len() / sample).max(1);

        for frame in frames.iter().step_by(step).take(sample) {
            histogram.add_rgba(&frame.pixels, self.config.pixel_stride);
        }

        Palette::new(median_cut(&histogram, self.config.opaque_limit()))
    }

    /// 单帧调色板，使用全部像素
    pub fn build_local_palette(&self, frame: &Frame) -> Palette {
        let mut histogram = ColorHistogram::new();
        histogram.add_rgba(&frame.pixels, 1);
        Palette::new(median_cut(&histogram, self.config.opaque_limit()))
    }

    /// Never fails: degenerate and fully transparent frames still get a
    /// one-entry palette.
    pub fn quantize(&self, frames: &[Frame]) -> QuantizedFrames {
        let run = || match self.config.mode {
            PaletteMode::Global => {
                let palette = self.build_global_palette(frames);
                let indexed = frames
                    .par_iter()
                    .map(|frame| Self::to_palette_frame(frame, palette.index_pixels(&frame.pixels), None))
                    .collect();
                QuantizedFrames {
                    global_palette: Some(palette),
                    frames: indexed,
                }
            }
            PaletteMode::Local => {
                let indexed = frames
                    .par_iter()
                    .map(|frame| {
                        let palette = self.build_local_palette(frame);
                        let pixels = palette.index_pixels(&frame.pixels);
                        Self::to_palette_frame(frame, pixels, Some(palette))
                    })
                    .collect();
                QuantizedFrames {
                    global_palette: None,
                    frames: indexed,
                }
            }
        };

        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    fn to_palette_frame(frame: &Frame, indexed_pixels: Vec<u8>, local_palette: Option<Palette>) -> PaletteFrame {
        PaletteFrame {
            index: frame.index,
            timestamp_sec: frame.timestamp_sec,
            width: frame.width,
            height: frame.height,
            indexed_pixels,
            local_palette,
        }
    }
}

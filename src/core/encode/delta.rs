use super::block::EncodedFrame;
use crate::core::quantize::Palette;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizeConfig {
    pub enabled: bool,
    /// 帧数少于该值时跳过优化
    pub min_frames: usize,
    /// 完全相同的帧并入上一帧的延时（会减少帧数）
    pub merge_identical: bool,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_frames: 3,
            merge_identical: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeltaStats {
    pub cropped: usize,
    pub patched: usize,
    pub merged: usize,
    pub pixels_before: usize,
    pub pixels_after: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
}

/// 帧间差分：只保留相对上一帧变化的区域
///
/// Every input frame must cover the full canvas with `DisposalMethod::Keep`.
/// Inside the changed rectangle, pixels that already match the canvas are
/// written as the transparent index, which compresses better and leaves the
/// visible result untouched.
pub struct DeltaOptimizer {
    config: OptimizeConfig,
}

impl DeltaOptimizer {
    pub fn new(config: OptimizeConfig) -> Self {
        Self { config }
    }

    /// Returns why the pass would be a no-op, if it would.
    pub fn skip_reason(&self, frames: &[EncodedFrame]) -> Option<&'static str> {
        if !self.config.enabled {
            return Some("optimizer disabled");
        }
        if frames.len() < self.config.min_frames.max(2) {
            return Some("too few frames");
        }
        if frames.iter().any(|f| f.transparent.is_some()) {
            return Some("source has transparency");
        }
        None
    }

    pub fn optimize(
        &self,
        frames: Vec<EncodedFrame>,
        global: Option<&Palette>,
        mut on_frame: impl FnMut(usize, usize),
    ) -> (Vec<EncodedFrame>, DeltaStats) {
        let total = frames.len();
        let mut stats = DeltaStats::default();
        stats.pixels_before = frames.iter().map(|f| f.pixels.len()).sum();

        if let Some(reason) = self.skip_reason(&frames) {
            debug!("Delta pass skipped: {}", reason);
            stats.pixels_after = stats.pixels_before;
            return (frames, stats);
        }

        let mut out: Vec<EncodedFrame> = Vec::with_capacity(total);
        out.push(frames[0].clone());
        on_frame(1, total);

        for i in 1..total {
            let prev = &frames[i - 1];
            let cur = &frames[i];

            match changed_bounds(prev, cur, global) {
                None if self.config.merge_identical => {
                    if let Some(last) = out.last_mut() {
                        last.delay_cs = last.delay_cs.saturating_add(cur.delay_cs);
                    }
                    stats.merged += 1;
                }
                None => {
                    out.push(transparent_patch(cur, global));
                    stats.patched += 1;
                }
                Some(bounds) => {
                    out.push(crop_changed(prev, cur, global, bounds));
                    stats.cropped += 1;
                }
            }
            on_frame(i + 1, total);
        }

        stats.pixels_after = out.iter().map(|f| f.pixels.len()).sum();
        debug!(
            "Delta pass: {} cropped, {} patched, {} merged, pixels {} -> {}",
            stats.cropped, stats.patched, stats.merged, stats.pixels_before, stats.pixels_after
        );
        (out, stats)
    }
}

fn color_at(frame: &EncodedFrame, palette: Option<&Palette>, offset: usize) -> Option<[u8; 3]> {
    let palette = palette?;
    let idx = *frame.pixels.get(offset)?;
    palette.colors().get(idx as usize).copied()
}

/// 变化像素的包围盒，完全相同返回 None
fn changed_bounds(prev: &EncodedFrame, cur: &EncodedFrame, global: Option<&Palette>) -> Option<Bounds> {
    let w = cur.width as usize;
    let h = cur.height as usize;
    let prev_palette = prev.palette(global);
    let cur_palette = cur.palette(global);
    let same_palette = prev_palette == cur_palette;

    let mut bounds: Option<Bounds> = None;
    for y in 0..h {
        for x in 0..w {
            let offset = y * w + x;
            let unchanged = if same_palette {
                prev.pixels.get(offset) == cur.pixels.get(offset)
            } else {
                color_at(prev, prev_palette, offset) == color_at(cur, cur_palette, offset)
            };
            if unchanged {
                continue;
            }
            bounds = Some(match bounds {
                None => Bounds { x0: x, y0: y, x1: x, y1: y },
                Some(b) => Bounds {
                    x0: b.x0.min(x),
                    y0: b.y0.min(y),
                    x1: b.x1.max(x),
                    y1: b.y1.max(y),
                },
            });
        }
    }
    bounds
}

fn crop_changed(
    prev: &EncodedFrame,
    cur: &EncodedFrame,
    global: Option<&Palette>,
    bounds: Bounds,
) -> EncodedFrame {
    let w = cur.width as usize;
    let prev_palette = prev.palette(global);
    let cur_palette = cur.palette(global);
    let transparent = cur_palette.map_or(0, Palette::transparent_index);

    let mut pixels = Vec::with_capacity((bounds.x1 - bounds.x0 + 1) * (bounds.y1 - bounds.y0 + 1));
    for y in bounds.y0..=bounds.y1 {
        for x in bounds.x0..=bounds.x1 {
            let offset = y * w + x;
            let idx = cur.pixels[offset];
            if color_at(prev, prev_palette, offset) == color_at(cur, cur_palette, offset) {
                pixels.push(transparent);
            } else {
                pixels.push(idx);
            }
        }
    }

    EncodedFrame {
        left: bounds.x0 as u16,
        top: bounds.y0 as u16,
        width: (bounds.x1 - bounds.x0 + 1) as u16,
        height: (bounds.y1 - bounds.y0 + 1) as u16,
        transparent: Some(transparent),
        pixels,
        ..cur.clone_header()
    }
}

fn transparent_patch(cur: &EncodedFrame, global: Option<&Palette>) -> EncodedFrame {
    let transparent = cur.palette(global).map_or(0, Palette::transparent_index);
    EncodedFrame {
        left: 0,
        top: 0,
        width: 1,
        height: 1,
        transparent: Some(transparent),
        pixels: vec![transparent],
        ..cur.clone_header()
    }
}

impl EncodedFrame {
    fn clone_header(&self) -> EncodedFrame {
        EncodedFrame {
            source_index: self.source_index,
            left: self.left,
            top: self.top,
            width: self.width,
            height: self.height,
            delay_cs: self.delay_cs,
            dispose: self.dispose,
            transparent: self.transparent,
            palette: self.palette.clone(),
            pixels: Vec::new(),
        }
    }
}

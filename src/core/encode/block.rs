use crate::core::quantize::{Palette, PaletteFrame};
use gif::DisposalMethod;

/// 一帧的图形控制块 + 图像描述符 + 索引像素
///
/// Starts out covering the whole canvas; the optimizer may shrink it to a
/// sub-rectangle.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub source_index: usize,
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
    /// 百分之一秒
    pub delay_cs: u16,
    pub dispose: DisposalMethod,
    pub transparent: Option<u8>,
    /// 局部调色板；`None` 表示用全局调色板
    pub palette: Option<Palette>,
    pub pixels: Vec<u8>,
}

impl EncodedFrame {
    pub fn from_palette_frame(frame: PaletteFrame, delay_cs: u16, global: Option<&Palette>) -> Self {
        let transparent_index = frame
            .local_palette
            .as_ref()
            .or(global)
            .map(Palette::transparent_index);
        let has_transparency =
            transparent_index.map_or(false, |t| frame.indexed_pixels.contains(&t));

        Self {
            source_index: frame.index,
            left: 0,
            top: 0,
            width: frame.width as u16,
            height: frame.height as u16,
            delay_cs,
            // 透明帧不能叠在上一帧上
            dispose: if has_transparency {
                DisposalMethod::Background
            } else {
                DisposalMethod::Keep
            },
            transparent: if has_transparency {
                transparent_index
            } else {
                None
            },
            palette: frame.local_palette,
            pixels: frame.indexed_pixels,
        }
    }

    pub fn palette<'a>(&'a self, global: Option<&'a Palette>) -> Option<&'a Palette> {
        self.palette.as_ref().or(global)
    }

    pub fn covers_canvas(&self, width: u16, height: u16) -> bool {
        self.left == 0 && self.top == 0 && self.width == width && self.height == height
    }
}

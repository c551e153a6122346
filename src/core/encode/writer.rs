//! GIF89a 字节流组装
//!
//! Layout: signature, logical screen descriptor, optional global colour
//! table, NETSCAPE2.0 loop extension, then per frame a graphic control
//! extension, image descriptor, optional local colour table and LZW data
//! sub-blocks, and finally the trailer byte.

use super::block::EncodedFrame;
use super::error::EncodeError;
use crate::core::quantize::Palette;
use gif::{Encoder, Frame as GifFrame, Repeat};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub const GIF_SIGNATURE: &[u8; 6] = b"GIF89a";
pub const GIF_TRAILER: u8 = 0x3B;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    Infinite,
    /// 额外播放的次数
    Finite(u16),
}

impl From<LoopMode> for Repeat {
    fn from(mode: LoopMode) -> Self {
        match mode {
            LoopMode::Infinite => Repeat::Infinite,
            LoopMode::Finite(n) => Repeat::Finite(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EncodeConfig {
    pub repeat: LoopMode,
    /// 浏览器会把过小的延时当成 10cs，这里统一下限
    pub min_delay_cs: u16,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            repeat: LoopMode::Infinite,
            min_delay_cs: 2,
        }
    }
}

/// LZW-compresses one frame's indices, prefixed with the min code size.
pub fn compress_frame(frame: &EncodedFrame, global: Option<&Palette>) -> Result<Vec<u8>, EncodeError> {
    let palette = frame.palette(global).ok_or_else(|| {
        EncodeError::Format(format!("frame {} has no colour table", frame.source_index))
    })?;
    let min_code_size = palette.min_code_size();

    let expected = frame.width as usize * frame.height as usize;
    if frame.pixels.len() != expected {
        return Err(EncodeError::Format(format!(
            "frame {} has {} indices for a {}x{} block",
            frame.source_index,
            frame.pixels.len(),
            frame.width,
            frame.height
        )));
    }

    let data = weezl::encode::Encoder::new(weezl::BitOrder::Lsb, min_code_size)
        .encode(&frame.pixels)
        .map_err(|e| EncodeError::Compression(format!("{:?}", e)))?;

    let mut buffer = Vec::with_capacity(data.len() + 1);
    buffer.push(min_code_size);
    buffer.extend_from_slice(&data);
    Ok(buffer)
}

/// 把已压缩的帧写成完整的 GIF
pub fn assemble(
    width: u16,
    height: u16,
    global: Option<&Palette>,
    repeat: LoopMode,
    frames: &[EncodedFrame],
    compressed: Vec<Vec<u8>>,
) -> Result<Vec<u8>, EncodeError> {
    if frames.is_empty() {
        return Err(EncodeError::NoFrames);
    }
    if frames.len() != compressed.len() {
        return Err(EncodeError::Format(format!(
            "{} frames but {} compressed blocks",
            frames.len(),
            compressed.len()
        )));
    }

    let global_table = global.map(Palette::to_table_bytes).unwrap_or_default();
    let mut encoder = Encoder::new(Vec::new(), width, height, &global_table)?;
    encoder.set_repeat(repeat.into())?;

    for (frame, data) in frames.iter().zip(compressed) {
        let block = GifFrame {
            delay: frame.delay_cs,
            dispose: frame.dispose,
            transparent: frame.transparent,
            left: frame.left,
            top: frame.top,
            width: frame.width,
            height: frame.height,
            palette: frame.palette.as_ref().map(Palette::to_table_bytes),
            buffer: Cow::Owned(data),
            ..GifFrame::default()
        };
        encoder.write_lzw_pre_encoded_frame(&block)?;
    }

    encoder
        .into_inner()
        .map_err(|e| EncodeError::Format(e.to_string()))
}

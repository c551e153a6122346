use super::error::CaptureError;
use image::imageops::{self, FilterType};
use image::RgbaImage;

/// 采样得到的一帧，RGBA 像素
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    /// 实际 seek 落定的时间，不是请求时间
    pub timestamp_sec: f64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>, // RGBA 格式
}

impl Frame {
    pub fn new(index: usize, timestamp_sec: f64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            index,
            timestamp_sec,
            width,
            height,
            pixels,
        }
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    pub fn is_well_formed(&self) -> bool {
        self.pixels.len() == self.pixel_count() * 4
    }

    pub fn has_transparency(&self) -> bool {
        self.pixels.chunks_exact(4).any(|px| px[3] < 128)
    }
}

/// 从原生解码层传来的 YUV 4:2:0 平面数据
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub y_plane: Vec<u8>,
    pub u_plane: Vec<u8>,
    pub v_plane: Vec<u8>,
}

impl RawFrame {
    fn chroma_dims(&self) -> (usize, usize) {
        (
            (self.width as usize + 1) / 2,
            (self.height as usize + 1) / 2,
        )
    }

    pub fn to_rgba(&self) -> Result<RgbaImage, CaptureError> {
        let w = self.width as usize;
        let h = self.height as usize;
        let (cw, ch) = self.chroma_dims();

        if self.y_plane.len() < w * h || self.u_plane.len() < cw * ch || self.v_plane.len() < cw * ch
        {
            return Err(CaptureError::Source(format!(
                "YUV planes too small for {}x{}",
                self.width, self.height
            )));
        }

        let mut rgba_data = vec![0u8; w * h * 4];

        for y in 0..h {
            for x in 0..w {
                let y_idx = y * w + x;
                let uv_idx = (y / 2) * cw + x / 2;

                let y_val = self.y_plane[y_idx] as f32;
                let u_val = self.u_plane[uv_idx] as f32 - 128.0;
                let v_val = self.v_plane[uv_idx] as f32 - 128.0;

                let r = (y_val + 1.402 * v_val).clamp(0.0, 255.0) as u8;
                let g = (y_val - 0.344136 * u_val - 0.714136 * v_val).clamp(0.0, 255.0) as u8;
                let b = (y_val + 1.772 * u_val).clamp(0.0, 255.0) as u8;

                let rgba_idx = y_idx * 4;
                rgba_data[rgba_idx] = r;
                rgba_data[rgba_idx + 1] = g;
                rgba_data[rgba_idx + 2] = b;
                rgba_data[rgba_idx + 3] = 255;
            }
        }

        RgbaImage::from_raw(self.width, self.height, rgba_data)
            .ok_or_else(|| CaptureError::Source("failed to build RGBA raster".to_string()))
    }
}

/// 视频源一次绘制的结果
#[derive(Debug, Clone)]
pub enum Picture {
    Rgba {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    Yuv420(RawFrame),
}

impl Picture {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Picture::Rgba { width, height, .. } => (*width, *height),
            Picture::Yuv420(raw) => (raw.width, raw.height),
        }
    }

    /// Draws the picture into an off-screen raster of the output size.
    pub fn into_raster(self, target_width: u32, target_height: u32) -> Result<RgbaImage, CaptureError> {
        let img = match self {
            Picture::Rgba {
                width,
                height,
                data,
            } => RgbaImage::from_raw(width, height, data).ok_or_else(|| {
                CaptureError::Source(format!("RGBA buffer too small for {}x{}", width, height))
            })?,
            Picture::Yuv420(raw) => raw.to_rgba()?,
        };

        if img.width() == 0 || img.height() == 0 {
            return Err(CaptureError::Source("empty picture".to_string()));
        }

        if img.width() == target_width && img.height() == target_height {
            return Ok(img);
        }

        Ok(imageops::resize(
            &img,
            target_width,
            target_height,
            FilterType::Triangle,
        ))
    }
}

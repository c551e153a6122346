use std::collections::HashMap;

/// GIF 颜色表上限
pub const MAX_TABLE_SIZE: usize = 256;

/// 索引调色板
///
/// The slot right after the opaque colours is always reserved as the
/// transparent index, so a palette holds at most 255 opaque entries and
/// never fewer than one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
}

impl Palette {
    pub fn new(mut colors: Vec<[u8; 3]>) -> Self {
        colors.truncate(MAX_TABLE_SIZE - 1);
        if colors.is_empty() {
            colors.push([0, 0, 0]);
        }
        Self { colors }
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    /// Number of opaque entries.
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn transparent_index(&self) -> u8 {
        self.colors.len() as u8
    }

    /// Opaque entries plus the transparent slot.
    pub fn table_len(&self) -> usize {
        self.colors.len() + 1
    }

    /// RGB triples as written into a GIF colour table.
    pub fn to_table_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.table_len() * 3);
        for color in &self.colors {
            bytes.extend_from_slice(color);
        }
        bytes.extend_from_slice(&[0, 0, 0]);
        bytes
    }

    /// LZW 最小码长，GIF 要求至少为 2
    pub fn min_code_size(&self) -> u8 {
        let mut bits = 1u8;
        while (1usize << bits) < self.table_len() {
            bits += 1;
        }
        bits.max(2)
    }

    /// 最近颜色，距离相同取下标更小的
    pub fn nearest(&self, rgb: [u8; 3]) -> u8 {
        let mut best = 0usize;
        let mut best_dist = u32::MAX;
        for (i, c) in self.colors.iter().enumerate() {
            let dr = c[0] as i32 - rgb[0] as i32;
            let dg = c[1] as i32 - rgb[1] as i32;
            let db = c[2] as i32 - rgb[2] as i32;
            let dist = (dr * dr + dg * dg + db * db) as u32;
            if dist < best_dist {
                best_dist = dist;
                best = i;
                if dist == 0 {
                    break;
                }
            }
        }
        best as u8
    }

    /// Maps an RGBA buffer to palette indices; alpha < 128 becomes the
    /// transparent index.
    pub fn index_pixels(&self, rgba: &[u8]) -> Vec<u8> {
        let transparent = self.transparent_index();
        let mut cache: HashMap<[u8; 3], u8> = HashMap::new();
        rgba.chunks_exact(4)
            .map(|px| {
                if px[3] < 128 {
                    return transparent;
                }
                let rgb = [px[0], px[1], px[2]];
                *cache.entry(rgb).or_insert_with(|| self.nearest(rgb))
            })
            .collect()
    }
}

/// 量化后的一帧
#[derive(Debug, Clone)]
pub struct PaletteFrame {
    pub index: usize,
    pub timestamp_sec: f64,
    pub width: u32,
    pub height: u32,
    pub indexed_pixels: Vec<u8>,
    /// `None` 表示使用全局调色板
    pub local_palette: Option<Palette>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_palette_gets_one_entry() {
        let palette = Palette::new(vec![]);
        assert_eq!(palette.len(), 1);
        assert_eq!(palette.transparent_index(), 1);
        assert_eq!(palette.min_code_size(), 2);
    }

    #[test]
    fn test_table_reserves_transparent_slot() {
        let colors: Vec<[u8; 3]> = (0..300).map(|i| [(i % 256) as u8, 0, 0]).collect();
        let palette = Palette::new(colors);

        assert_eq!(palette.len(), 255);
        assert_eq!(palette.transparent_index(), 255);
        assert_eq!(palette.to_table_bytes().len(), 256 * 3);
        assert_eq!(palette.min_code_size(), 8);
    }

    #[test]
    fn test_min_code_size() {
        assert_eq!(Palette::new(vec![[0, 0, 0]; 3]).min_code_size(), 2);
        assert_eq!(Palette::new(vec![[0, 0, 0]; 4]).min_code_size(), 3);
        assert_eq!(Palette::new(vec![[0, 0, 0]; 16]).min_code_size(), 5);
    }

    #[test]
    fn test_nearest_tie_prefers_lower_index() {
        let palette = Palette::new(vec![[10, 0, 0], [30, 0, 0]]);
        assert_eq!(palette.nearest([20, 0, 0]), 0);
        assert_eq!(palette.nearest([29, 0, 0]), 1);
    }

    #[test]
    fn test_index_pixels_maps_transparency() {
        let palette = Palette::new(vec![[0, 0, 0], [255, 255, 255]]);
        let rgba = [250, 250, 250, 255, 5, 5, 5, 255, 0, 0, 0, 0];
        assert_eq!(palette.index_pixels(&rgba), vec![1, 0, 2]);
    }
}

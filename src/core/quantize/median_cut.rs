//! Median-cut 颜色缩减
//!
//! Fully deterministic: the histogram keeps first-seen order, every sort is
//! stable, and ties always go to the earlier box or channel. The same input
//! pixels therefore always produce the same palette.

use std::collections::HashMap;

/// 按首次出现顺序记录的颜色直方图
#[derive(Debug, Default, Clone)]
pub struct ColorHistogram {
    entries: Vec<([u8; 3], u32)>,
    lookup: HashMap<[u8; 3], usize>,
}

impl ColorHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rgb: [u8; 3]) {
        match self.lookup.get(&rgb) {
            Some(&i) => self.entries[i].1 += 1,
            None => {
                self.lookup.insert(rgb, self.entries.len());
                self.entries.push((rgb, 1));
            }
        }
    }

    /// Adds every `stride`-th opaque pixel of an RGBA buffer.
    pub fn add_rgba(&mut self, rgba: &[u8], stride: usize) {
        for px in rgba.chunks_exact(4).step_by(stride.max(1)) {
            if px[3] >= 128 {
                self.add([px[0], px[1], px[2]]);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[([u8; 3], u32)] {
        &self.entries
    }
}

struct ColorBox {
    entries: Vec<([u8; 3], u32)>,
    channel: usize,
    range: u8,
}

impl ColorBox {
    fn new(entries: Vec<([u8; 3], u32)>) -> Self {
        let mut min = [u8::MAX; 3];
        let mut max = [u8::MIN; 3];
        for (rgb, _) in &entries {
            for c in 0..3 {
                min[c] = min[c].min(rgb[c]);
                max[c] = max[c].max(rgb[c]);
            }
        }

        // 最宽的通道，相同时按 R、G、B 顺序
        let mut channel = 0;
        let mut range = 0u8;
        for c in 0..3 {
            let r = max[c].saturating_sub(min[c]);
            if r > range {
                range = r;
                channel = c;
            }
        }

        Self {
            entries,
            channel,
            range,
        }
    }

    fn can_split(&self) -> bool {
        self.entries.len() > 1 && self.range > 0
    }

    fn split(mut self) -> (ColorBox, ColorBox) {
        let channel = self.channel;
        self.entries.sort_by_key(|(rgb, _)| rgb[channel]);

        let total: u64 = self.entries.iter().map(|(_, n)| *n as u64).sum();
        let half = total.div_ceil(2);
        let mut acc = 0u64;
        let mut cut = 1;
        for (i, (_, n)) in self.entries.iter().enumerate() {
            acc += *n as u64;
            if acc >= half {
                cut = i + 1;
                break;
            }
        }
        let cut = cut.clamp(1, self.entries.len() - 1);

        let upper = self.entries.split_off(cut);
        (ColorBox::new(self.entries), ColorBox::new(upper))
    }

    fn mean(&self) -> [u8; 3] {
        let mut sum = [0u64; 3];
        let mut weight = 0u64;
        for (rgb, n) in &self.entries {
            for c in 0..3 {
                sum[c] += rgb[c] as u64 * *n as u64;
            }
            weight += *n as u64;
        }
        if weight == 0 {
            return [0, 0, 0];
        }
        [
            ((sum[0] + weight / 2) / weight) as u8,
            ((sum[1] + weight / 2) / weight) as u8,
            ((sum[2] + weight / 2) / weight) as u8,
        ]
    }
}

/// 把直方图缩减到最多 `max_colors` 个颜色
pub fn median_cut(histogram: &ColorHistogram, max_colors: usize) -> Vec<[u8; 3]> {
    let max_colors = max_colors.max(1);

    if histogram.len() <= max_colors {
        return histogram.entries().iter().map(|(rgb, _)| *rgb).collect();
    }

    let mut boxes = vec![ColorBox::new(histogram.entries().to_vec())];

    while boxes.len() < max_colors {
        let mut target: Option<usize> = None;
        for (i, b) in boxes.iter().enumerate() {
            if !b.can_split() {
                continue;
            }
            match target {
                Some(t) if boxes[t].range >= b.range => {}
                _ => target = Some(i),
            }
        }

        let Some(i) = target else {
            break;
        };

        let (lower, upper) = boxes.remove(i).split();
        boxes.insert(i, lower);
        boxes.push(upper);
    }

    boxes.iter().map(ColorBox::mean).collect()
}

//! 帧延时计算（单位：百分之一秒）

/// Delays derived from settled timestamps.
///
/// Timestamps are rounded to centiseconds cumulatively so rounding error
/// does not drift over long clips. Every delay is at least `min_delay_cs`;
/// the last frame gets the nominal `1 / frame_rate`.
pub fn frame_delays(timestamps: &[f64], frame_rate: f64, min_delay_cs: u16) -> Vec<u16> {
    if timestamps.is_empty() {
        return Vec::new();
    }

    let base = timestamps[0];
    let to_cs = |t: f64| ((t - base) * 100.0).round() as i64;
    let clamp = |d: i64| d.clamp(min_delay_cs as i64, u16::MAX as i64) as u16;

    let mut delays: Vec<u16> = timestamps
        .windows(2)
        .map(|pair| clamp(to_cs(pair[1]) - to_cs(pair[0])))
        .collect();

    let nominal = if frame_rate > 0.0 {
        (100.0 / frame_rate).round() as i64
    } else {
        min_delay_cs as i64
    };
    delays.push(clamp(nominal));
    delays
}

pub fn total_duration_sec(delays: &[u16]) -> f64 {
    delays.iter().map(|&d| d as u64).sum::<u64>() as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_timestamps() {
        let ts: Vec<f64> = (0..30).map(|i| i as f64 * 0.1).collect();
        let delays = frame_delays(&ts, 10.0, 2);

        assert_eq!(delays.len(), 30);
        assert!(delays.iter().all(|&d| d == 10));
        assert!((total_duration_sec(&delays) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_cumulative_rounding_does_not_drift() {
        // 15fps: 6.67cs per frame
        let ts: Vec<f64> = (0..16).map(|i| i as f64 / 15.0).collect();
        let delays = frame_delays(&ts, 15.0, 2);

        let sum: u32 = delays[..15].iter().map(|&d| d as u32).sum();
        assert_eq!(sum, 100);
        assert!(delays.iter().all(|&d| d == 6 || d == 7));
    }

    #[test]
    fn test_jitter_clamped_to_minimum() {
        let delays = frame_delays(&[1.0, 1.004, 0.99, 1.2], 10.0, 2);
        assert_eq!(delays, vec![2, 2, 21, 10]);
    }

    #[test]
    fn test_single_frame() {
        assert_eq!(frame_delays(&[5.0], 4.0, 2), vec![25]);
        assert!(frame_delays(&[], 4.0, 2).is_empty());
    }
}

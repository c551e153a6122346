use crate::core::capture::CaptureConfig;
use crate::core::encode::{EncodeConfig, OptimizeConfig};
use crate::core::progress::ProgressConfig;
use crate::core::quantize::{PaletteConfig, PaletteMode};
use crate::core::storage::StorageConfig;
use serde::{Deserialize, Serialize};

/// 整条管线的配置，宿主可用 JSON 覆盖任意字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub palette: PaletteConfig,
    pub optimize: OptimizeConfig,
    pub encode: EncodeConfig,
    pub progress: ProgressConfig,
    pub storage: StorageConfig,
}

impl PipelineConfig {
    /// 每帧独立调色板，不做帧间差分
    pub fn for_high_fidelity() -> Self {
        Self {
            palette: PaletteConfig {
                mode: PaletteMode::Local,
                ..PaletteConfig::default()
            },
            optimize: OptimizeConfig {
                enabled: false,
                ..OptimizeConfig::default()
            },
            ..Self::default()
        }
    }

    /// 全局调色板 + 差分 + 合并相同帧
    pub fn for_small_size() -> Self {
        Self {
            palette: PaletteConfig {
                mode: PaletteMode::Global,
                max_colors: 128,
                ..PaletteConfig::default()
            },
            optimize: OptimizeConfig {
                enabled: true,
                merge_identical: true,
                ..OptimizeConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encode::LoopMode;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.capture.seek_timeout_ms, 300);
        assert_eq!(config.capture.max_skip_ratio, 0.10);
        assert_eq!(config.palette.mode, PaletteMode::Global);
        assert_eq!(config.palette.max_colors, 256);
        assert!(config.optimize.enabled);
        assert!(!config.optimize.merge_identical);
        assert_eq!(config.encode.repeat, LoopMode::Infinite);
        assert_eq!(config.progress.throttle_ms, 40);
        assert_eq!(config.storage.request_timeout_ms, 5_000);
    }

    #[test]
    fn test_partial_json_override() {
        let json = r#"{"palette":{"mode":"local"},"encode":{"repeat":{"finite":2}},"capture":{"seekTimeoutMs":10}}"#;
        let config = PipelineConfig::from_json_str(json).unwrap();

        assert_eq!(config.palette.mode, PaletteMode::Local);
        assert_eq!(config.palette.max_colors, 256);
        assert_eq!(config.encode.repeat, LoopMode::Finite(2));
        assert_eq!(config.capture.seek_timeout_ms, 10);
        assert_eq!(config.capture.max_frames, 600);
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(PipelineConfig::from_json_str("  ").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_presets() {
        let fidelity = PipelineConfig::for_high_fidelity();
        assert_eq!(fidelity.palette.mode, PaletteMode::Local);
        assert!(!fidelity.optimize.enabled);

        let small = PipelineConfig::for_small_size();
        assert!(small.optimize.merge_identical);
        assert_eq!(small.palette.max_colors, 128);
    }
}

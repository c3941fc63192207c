//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ImageConfig`，保证运行时行为可观测、可调整、可测试。
//! 其中性能档位（quality / balanced / speed）作为高层语义，映射到图标降采样参数组合；
//! 动图驱动模式（full / simple）决定逐帧调度器的工作方式。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的配置；网络默认不设超时，卡住的请求只拖慢它自己的条目。
//! - `serde` 反序列化时所有字段均可缺省，缺省值来自 `Default`。
//! - `validate` 集中做范围校验，设置文件与运行时更新共用。

use std::path::PathBuf;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use super::ImageError;

/// 图片链路配置。
///
/// 字段覆盖了拉取、解码、降采样与动图调度四个阶段。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageConfig {
    /// 下载/读取原始字节时允许的最大文件体积（字节）。
    pub max_file_size: u64,
    /// 网络下载总超时（秒），`None` 表示不限制。
    pub download_timeout: Option<u64>,
    /// 建立连接超时（秒），`None` 表示不限制。
    pub connect_timeout: Option<u64>,
    /// 最大重定向次数。
    pub max_redirects: usize,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（按 RGBA 估算，字节）。动图按全部帧累计。
    pub max_decoded_bytes: u64,
    /// 是否对超大图标做自适应降采样。
    pub adaptive_resize: bool,
    /// 降采样后宽/高单边最大值。
    pub max_icon_dimension: u32,
    /// 降采样后目标像素上限。
    pub max_icon_pixels: u64,
    /// 降采样滤镜策略（由性能档位决定，不参与序列化）。
    #[serde(skip)]
    pub resize_filter: FilterType,
    /// 内置资源目录（裸资源名在此查找）。
    pub resource_dir: Option<PathBuf>,
    /// 内置资产目录（`asset://` 在此查找）。
    pub asset_dir: Option<PathBuf>,
    /// 动图驱动模式。
    pub animation_mode: AnimationMode,
    /// simple 模式下的固定重绘间隔（毫秒）。
    pub frame_interval_ms: u64,
    /// 低于该值的帧延迟视为“未指定”。
    pub min_frame_delay_ms: u64,
    /// 未指定帧延迟时使用的默认值（毫秒）。
    pub default_frame_delay_ms: u64,
    /// 自愈看门狗的巡检周期（毫秒）。
    pub watchdog_interval_ms: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_file_size: 20 * 1024 * 1024,
            download_timeout: None,
            connect_timeout: None,
            max_redirects: 5,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
            adaptive_resize: true,
            max_icon_dimension: 2048,
            max_icon_pixels: 4_000_000,
            resize_filter: FilterType::Triangle,
            resource_dir: None,
            asset_dir: None,
            animation_mode: AnimationMode::Full,
            frame_interval_ms: 50,
            min_frame_delay_ms: 20,
            default_frame_delay_ms: 100,
            watchdog_interval_ms: 1_000,
        }
    }
}

/// 动图驱动模式。
///
/// - `Full`：由解码器声明下一帧到期时间，调度器按时投递定时任务
/// - `Simple`：按固定间隔重绘，帧推进按墙钟时间计算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationMode {
    Full,
    Simple,
}

impl AnimationMode {
    /// 从外部字符串解析模式。
    pub fn from_str(mode: &str) -> Result<Self, ImageError> {
        match mode.trim().to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "simple" => Ok(Self::Simple),
            other => Err(ImageError::InvalidFormat(format!(
                "未知动图模式：{}（可选：full / simple）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Simple => "simple",
        }
    }
}

/// 图片性能档位（面向产品/用户语义）。
///
/// - `Quality`：不降采样，尽量保真
/// - `Balanced`：质量与内存平衡
/// - `Speed`：优先安装速度与内存
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePerformanceProfile {
    Quality,
    Balanced,
    Speed,
}

impl ImagePerformanceProfile {
    /// 从外部字符串解析档位。
    ///
    /// # 示例
    /// ```rust
    /// use map_image_loader::style_images::ImagePerformanceProfile;
    ///
    /// let p = ImagePerformanceProfile::from_str("balanced")?;
    /// assert_eq!(p.as_str(), "balanced");
    /// # Ok::<(), map_image_loader::style_images::ImageError>(())
    /// ```
    pub fn from_str(profile: &str) -> Result<Self, ImageError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(ImageError::InvalidFormat(format!(
                "未知性能档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    /// 将档位输出为稳定字符串。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}

impl ImageConfig {
    /// 基于当前参数反推性能档位。
    pub(crate) fn infer_performance_profile(&self) -> ImagePerformanceProfile {
        if !self.adaptive_resize {
            return ImagePerformanceProfile::Quality;
        }

        if self.max_icon_pixels <= 1_000_000 || self.max_icon_dimension <= 1024 {
            return ImagePerformanceProfile::Speed;
        }

        ImagePerformanceProfile::Balanced
    }

    /// 应用指定性能档位到实际参数。
    pub(crate) fn apply_performance_profile(&mut self, profile: ImagePerformanceProfile) {
        match profile {
            ImagePerformanceProfile::Quality => {
                self.adaptive_resize = false;
                self.max_icon_pixels = self.max_decoded_pixels;
                self.max_icon_dimension = 8192;
                self.resize_filter = FilterType::CatmullRom;
            }
            ImagePerformanceProfile::Balanced => {
                self.adaptive_resize = true;
                self.max_icon_pixels = 4_000_000;
                self.max_icon_dimension = 2048;
                self.resize_filter = FilterType::Triangle;
            }
            ImagePerformanceProfile::Speed => {
                self.adaptive_resize = true;
                self.max_icon_pixels = 1_000_000;
                self.max_icon_dimension = 1024;
                self.resize_filter = FilterType::Nearest;
            }
        }
    }

    /// 校验各项参数是否在可接受范围内。
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.max_file_size == 0 {
            return Err(ImageError::InvalidFormat("max_file_size 不能为 0".to_string()));
        }
        if self.max_decoded_bytes < 1024 * 1024 {
            return Err(ImageError::InvalidFormat("max_decoded_bytes 不能小于 1MB".to_string()));
        }
        if let Some(timeout) = self.connect_timeout {
            if !(1..=120).contains(&timeout) {
                return Err(ImageError::InvalidFormat("connect_timeout 必须在 1~120 秒之间".to_string()));
            }
        }
        if let Some(timeout) = self.download_timeout {
            if timeout == 0 {
                return Err(ImageError::InvalidFormat("download_timeout 不能为 0".to_string()));
            }
        }
        if self.max_icon_dimension == 0 {
            return Err(ImageError::InvalidFormat("max_icon_dimension 不能为 0".to_string()));
        }
        if !(10..=10_000).contains(&self.frame_interval_ms) {
            return Err(ImageError::InvalidFormat("frame_interval_ms 必须在 10~10000 毫秒之间".to_string()));
        }
        if !(10..=10_000).contains(&self.default_frame_delay_ms) {
            return Err(ImageError::InvalidFormat("default_frame_delay_ms 必须在 10~10000 毫秒之间".to_string()));
        }
        if self.min_frame_delay_ms > self.default_frame_delay_ms {
            return Err(ImageError::InvalidFormat(
                "min_frame_delay_ms 不能大于 default_frame_delay_ms".to_string(),
            ));
        }
        if !(10..=60_000).contains(&self.watchdog_interval_ms) {
            return Err(ImageError::InvalidFormat("watchdog_interval_ms 必须在 10~60000 毫秒之间".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ImageConfig::default().validate().expect("default config should be valid");
    }

    #[test]
    fn profile_round_trips_through_inference() {
        for profile in [
            ImagePerformanceProfile::Quality,
            ImagePerformanceProfile::Balanced,
            ImagePerformanceProfile::Speed,
        ] {
            let mut config = ImageConfig::default();
            config.apply_performance_profile(profile);
            assert_eq!(config.infer_performance_profile(), profile);
        }
    }

    #[test]
    fn unknown_profile_and_mode_are_rejected() {
        assert!(matches!(
            ImagePerformanceProfile::from_str("turbo"),
            Err(ImageError::InvalidFormat(_))
        ));
        assert!(matches!(AnimationMode::from_str("fast"), Err(ImageError::InvalidFormat(_))));
        assert_eq!(AnimationMode::from_str(" Simple ").unwrap(), AnimationMode::Simple);
    }

    #[test]
    fn validate_rejects_out_of_range_timing() {
        let mut config = ImageConfig::default();
        config.watchdog_interval_ms = 1;
        assert!(matches!(config.validate(), Err(ImageError::InvalidFormat(_))));

        let mut config = ImageConfig::default();
        config.min_frame_delay_ms = 500;
        assert!(matches!(config.validate(), Err(ImageError::InvalidFormat(_))));

        let mut config = ImageConfig::default();
        config.connect_timeout = Some(0);
        assert!(matches!(config.validate(), Err(ImageError::InvalidFormat(_))));
    }

    #[test]
    fn deserializes_partial_camel_case_json() {
        let config: ImageConfig = serde_json::from_str(
            r#"{ "animationMode": "simple", "watchdogIntervalMs": 250, "assetDir": "/opt/assets" }"#,
        )
        .expect("partial config should parse");

        assert_eq!(config.animation_mode, AnimationMode::Simple);
        assert_eq!(config.watchdog_interval_ms, 250);
        assert_eq!(config.asset_dir, Some(PathBuf::from("/opt/assets")));
        assert_eq!(config.max_redirects, ImageConfig::default().max_redirects);
    }
}

//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入类型”和“流水线中间结果”解耦：
//! - `ImageDescriptor` 表示一次提交中的单个命名图片
//! - `RawImageData` 表示已拉取但未解码的字节
//! - `AcquiredImage` 表示工作线程产出、尚未跨回 UI 上下文的解码结果
//! - `ResolvedImage` 表示可安装到样式的最终结果

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 可安装到样式中的栅格缓冲（RGBA8，非预乘 alpha）。
pub type RasterBuffer = image::RgbaImage;

/// 图片附带的样式元数据，原样转交给样式宿主。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageMetadata {
    /// 像素密度比例。
    pub scale: f32,
    /// 是否作为 SDF 图标安装（可着色）。
    pub sdf: bool,
    /// 水平可拉伸区间。
    pub stretch_x: Vec<[f32; 2]>,
    /// 垂直可拉伸区间。
    pub stretch_y: Vec<[f32; 2]>,
    /// 文本内容区域 `[left, top, right, bottom]`。
    pub content: Option<[f32; 4]>,
}

impl Default for ImageMetadata {
    fn default() -> Self {
        Self {
            scale: 1.0,
            sdf: false,
            stretch_x: Vec::new(),
            stretch_y: Vec::new(),
            content: None,
        }
    }
}

/// 一次批量提交中的单个图片描述。提交后不可变。
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub name: String,
    /// 绝对路径、裸资源名、`http(s)` 地址，或 `file://` / `asset://` / `data:` URI。
    pub source_uri: String,
    pub info: ImageMetadata,
}

impl ImageDescriptor {
    pub fn new(name: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_uri: source_uri.into(),
            info: ImageMetadata::default(),
        }
    }

    pub fn with_info(mut self, info: ImageMetadata) -> Self {
        self.info = info;
        self
    }
}

/// 批量 JSON 中单个条目的形态：`{ "sourceUri": "...", "info": { ... } }`。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub source_uri: String,
    #[serde(default)]
    pub info: ImageMetadata,
}

impl BatchEntry {
    pub fn into_descriptor(self, name: &str) -> ImageDescriptor {
        ImageDescriptor {
            name: name.to_string(),
            source_uri: self.source_uri,
            info: self.info,
        }
    }
}

/// 成功解码的结果。每个成功的描述只产出一次；缓冲在各方之间共享且不再被修改。
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub name: String,
    pub bitmap: Arc<RasterBuffer>,
    pub info: ImageMetadata,
    /// 是否走了动图路径（并已登记到逐帧调度器）。
    pub animated: bool,
}

/// 加载阶段输出：原始字节与来源标识。
pub(crate) struct RawImageData {
    /// 原始图片字节。
    pub(crate) bytes: Vec<u8>,
    /// 来源提示（用于日志与诊断）。
    pub(crate) source_hint: &'static str,
}

/// GIF 的单帧：合成后的整幅画布与显示时长。
pub(crate) struct GifFrame {
    pub(crate) image: RasterBuffer,
    pub(crate) delay: Duration,
}

/// 工作线程解码出的完整动图。只包含 `Send` 数据，可安全跨回 UI 上下文。
pub(crate) struct DecodedGif {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) frames: Vec<GifFrame>,
    /// 按固有尺寸新分配的缓冲中绘制好的首帧。
    pub(crate) first_frame: RasterBuffer,
}

/// 单个条目在工作线程上的产出。
pub(crate) enum AcquiredImage {
    Static(RasterBuffer),
    Animated(DecodedGif),
}

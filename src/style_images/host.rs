//! 样式宿主契约
//!
//! 地图视图 / 原生样式对象只通过这个窄接口被使用。流水线与调度器只持有
//! `Weak<dyn StyleHost>`：每次副作用前先 `upgrade`，拿不到就说明宿主已被回收，
//! 这是正常结果，静默跳过即可。

use super::ImageError;
use super::source::{ImageMetadata, RasterBuffer};

/// 样式宿主（地图视图上的原生样式）。只在 UI 上下文中调用。
pub trait StyleHost {
    /// 样式当前是否已加载完成。未加载时本次安装直接跳过，不排队。
    fn is_style_loaded(&self) -> bool;

    /// 安装或替换名为 `name` 的图片。对同名重复调用应是幂等替换。
    ///
    /// 缓冲只在调用期间借出；宿主需要保留时自行拷贝。
    fn add_bitmap_image(
        &self,
        name: &str,
        bitmap: &RasterBuffer,
        info: &ImageMetadata,
    ) -> Result<(), ImageError>;
}

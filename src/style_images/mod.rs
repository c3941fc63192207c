//! # 样式图片模块（style_images）
//!
//! ## 设计思路
//!
//! 该模块把“命名图片描述 → 解码栅格 → 安装到地图样式 → 动图逐帧重绘”
//! 按职责拆分为多个子模块，并明确区分两个执行上下文：
//!
//! - 工作线程（`Send`）：`handler / loader / pipeline / resolver`，负责拉取与解码
//! - UI 上下文（`!Send`，跑在 `LocalSet` 中）：`registry / scheduler / acquisition / service`，
//!   负责订阅通知、样式安装与逐帧调度
//!
//! 两个上下文之间只通过“条目解码结果”交接，注册表与调度器因此无需任何锁。
//!
//! ## 新同事快速上手
//!
//! ```text
//! 地图视图创建
//!    ↓
//! service.rs（ImageService::init，持有注册表与流水线）
//!    ↓
//! acquisition.rs（批量扇出 + UI 侧副作用 + 批次完成回调）
//!    ├─ handler.rs（单条目编排：解析 → 判定 → 拉取 → 解码，GIF 失败回退静态）
//!    │    ├─ resolver.rs（来源解析 + 动图启发式）
//!    │    ├─ loader.rs（HTTP / 文件 / asset / data 拉取 + 安全校验）
//!    │    └─ pipeline.rs（静态解码 + GIF 解码 + 降采样）
//!    ├─ registry.rs（订阅通知 + 权威动图句柄表）
//!    └─ scheduler.rs（逐帧重绘循环 + 看门狗）
//!         └─ frames.rs（帧解码器状态机 + 调度能力接口）
//!    ↓
//! host.rs（StyleHost::add_bitmap_image）
//! ```
//!
//! ## 分层职责建议
//!
//! - 新的来源形式优先改 `resolver.rs` 与 `loader.rs`
//! - 配置与限额优先改 `config.rs`
//! - 动图生命周期问题优先看 `scheduler.rs`

mod acquisition;
mod config;
mod error;
mod frames;
mod handler;
mod host;
mod loader;
mod pipeline;
mod registry;
mod resolver;
mod scheduler;
mod service;
mod source;

#[cfg(test)]
pub(crate) mod test_support;

pub use acquisition::{CompletionCallback, ImagePipeline};
pub use config::{AnimationMode, ImageConfig, ImagePerformanceProfile};
pub use error::ImageError;
pub use frames::{AnimatedFrames, AnimatedHandle, FrameCallback, FrameTask, LoopState, StopReason};
pub use handler::ImageLoader;
pub use host::StyleHost;
pub use registry::{ResolutionRegistry, ResolveCallback, SubscriptionHandle};
pub use resolver::{DirectoryBundle, ResourceBundle};
pub use scheduler::FrameScheduler;
pub use service::ImageService;
pub use source::{BatchEntry, ImageDescriptor, ImageMetadata, RasterBuffer, ResolvedImage};

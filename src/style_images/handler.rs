//! # 工作线程侧编排模块
//!
//! ## 设计思路
//!
//! `ImageLoader` 只负责“单个条目从描述到解码结果”的流程编排与配置管理，
//! 不接触注册表与样式宿主，因此整体是 `Send + Sync`，可以放进工作线程任务。
//! 单个条目的处理链路固定为：
//! 1. 解析来源地址
//! 2. 启发式判定是否为动图
//! 3. 动图走 GIF 解码，失败回退静态解码；其余直接静态解码
//!
//! ## 实现思路
//!
//! - 配置通过 `RwLock<ImageConfig>` 支持运行时动态切档。
//! - 每个批次取一次配置快照并构建一个共享 HTTP 客户端（`BatchContext`），
//!   避免处理中途配置漂移。
//! - 解码放进 `spawn_blocking`，不占用异步工作线程。
//! - 记录 `load/decode/total` 阶段耗时，便于性能诊断。

use std::sync::{Arc, RwLock};
use std::time::Instant;

use super::resolver::{is_animated_candidate, resolve_source_uri};
use super::source::{AcquiredImage, DecodedGif, RasterBuffer, RawImageData};
use super::{
    AnimationMode, DirectoryBundle, ImageConfig, ImageDescriptor, ImageError, ImagePerformanceProfile,
    ResourceBundle,
};

/// 单个批次内共享的只读上下文。
pub(crate) struct BatchContext {
    pub(crate) config: ImageConfig,
    pub(crate) client: reqwest::Client,
}

/// 动图路径失败时的现场：若字节已拉取成功，回退时直接复用。
struct AnimatedFailure {
    bytes: Option<RawImageData>,
    error: ImageError,
}

/// 图片加载器。
///
/// 封装了配置状态与资源表，并编排各子模块完成单个条目的拉取与解码。
pub struct ImageLoader {
    pub(super) config: RwLock<ImageConfig>,
    pub(super) bundle: Arc<dyn ResourceBundle>,
}

impl ImageLoader {
    /// 根据初始配置创建加载器，资源表取自配置中的目录。
    ///
    /// # 示例
    /// ```rust
    /// use map_image_loader::style_images::{ImageConfig, ImageLoader};
    ///
    /// let loader = ImageLoader::new(ImageConfig::default())?;
    /// # Ok::<(), map_image_loader::style_images::ImageError>(())
    /// ```
    pub fn new(config: ImageConfig) -> Result<Self, ImageError> {
        let bundle = Arc::new(DirectoryBundle::from_config(&config));
        Self::with_bundle(config, bundle)
    }

    /// 使用自定义资源表创建加载器。
    pub fn with_bundle(config: ImageConfig, bundle: Arc<dyn ResourceBundle>) -> Result<Self, ImageError> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            bundle,
        })
    }

    /// 获取配置快照。
    pub fn config_snapshot(&self) -> Result<ImageConfig, ImageError> {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| ImageError::ResourceLimit("配置读取锁已中毒".to_string()))
    }

    /// 整体替换配置（先校验）。
    pub fn update_config(&self, config: ImageConfig) -> Result<(), ImageError> {
        config.validate()?;
        let mut current = self
            .config
            .write()
            .map_err(|_| ImageError::ResourceLimit("配置写入锁已中毒".to_string()))?;
        *current = config;
        Ok(())
    }

    /// 设置性能档位。
    pub fn set_performance_profile(&self, profile: ImagePerformanceProfile) -> Result<(), ImageError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| ImageError::ResourceLimit("配置写入锁已中毒".to_string()))?;
        config.apply_performance_profile(profile);

        log::info!(
            "⚙️ 已切换图片性能档位：{:?}（adaptive_resize={}, max_pixels={}, max_dim={}, filter={:?}）",
            profile,
            config.adaptive_resize,
            config.max_icon_pixels,
            config.max_icon_dimension,
            config.resize_filter
        );

        Ok(())
    }

    /// 获取当前生效档位。
    pub fn get_performance_profile(&self) -> Result<ImagePerformanceProfile, ImageError> {
        Ok(self.config_snapshot()?.infer_performance_profile())
    }

    /// 切换动图驱动模式，只影响之后登记的动图。
    pub fn set_animation_mode(&self, mode: AnimationMode) -> Result<(), ImageError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| ImageError::ResourceLimit("配置写入锁已中毒".to_string()))?;
        config.animation_mode = mode;
        log::info!("⚙️ 已切换动图驱动模式：{}", mode.as_str());
        Ok(())
    }

    /// 为一个批次构建共享上下文。
    pub(crate) fn batch_context(&self) -> Result<Arc<BatchContext>, ImageError> {
        let config = self.config_snapshot()?;
        let client = Self::build_http_client(&config)?;
        Ok(Arc::new(BatchContext { config, client }))
    }

    /// 处理单个条目：解析 → 判定 → 拉取 → 解码。不产生任何 UI 侧副作用。
    pub(crate) async fn acquire(
        &self,
        ctx: &BatchContext,
        key: &str,
        descriptor: &ImageDescriptor,
    ) -> Result<AcquiredImage, ImageError> {
        let total_start = Instant::now();
        let resolved = resolve_source_uri(&descriptor.source_uri, self.bundle.as_ref());

        if is_animated_candidate(key, &descriptor.source_uri, &resolved) {
            match self.acquire_animated(ctx, &resolved).await {
                Ok(gif) => {
                    log::info!(
                        "✅ 动图处理完成 - key={} frames={} total={}ms",
                        key,
                        gif.frames.len(),
                        total_start.elapsed().as_millis()
                    );
                    return Ok(AcquiredImage::Animated(gif));
                }
                Err(AnimatedFailure { bytes, error }) => {
                    log::warn!("⚠️ GIF 解码失败，回退静态解码 - key={}：{}", key, error);
                    if let Some(raw) = bytes {
                        let image = Self::decode_static_blocking(raw, ctx.config.clone()).await?;
                        return Ok(AcquiredImage::Static(image));
                    }
                }
            }
        }

        let image = self.acquire_static(ctx, &resolved).await?;
        log::info!(
            "✅ 图片处理完成 - key={} size={}x{} total={}ms",
            key,
            image.width(),
            image.height(),
            total_start.elapsed().as_millis()
        );
        Ok(AcquiredImage::Static(image))
    }

    async fn acquire_static(&self, ctx: &BatchContext, uri: &str) -> Result<RasterBuffer, ImageError> {
        let load_start = Instant::now();
        let raw = self.fetch_bytes(uri, ctx).await?;
        let load_elapsed = load_start.elapsed();

        let decode_start = Instant::now();
        let image = Self::decode_static_blocking(raw, ctx.config.clone()).await?;
        log::debug!(
            "⏱️ 静态路径 - load={}ms decode={}ms",
            load_elapsed.as_millis(),
            decode_start.elapsed().as_millis()
        );

        Ok(image)
    }

    async fn acquire_animated(&self, ctx: &BatchContext, uri: &str) -> Result<DecodedGif, AnimatedFailure> {
        let raw = self
            .fetch_bytes(uri, ctx)
            .await
            .map_err(|error| AnimatedFailure { bytes: None, error })?;

        // 保留一份字节，GIF 解码失败时直接交给静态路径，不再重复拉取
        let retained = RawImageData {
            bytes: raw.bytes.clone(),
            source_hint: raw.source_hint,
        };
        let config = ctx.config.clone();

        let joined = tokio::task::spawn_blocking(move || Self::decode_gif(raw, &config)).await;
        match joined {
            Ok(Ok(gif)) => Ok(gif),
            Ok(Err(error)) => Err(AnimatedFailure {
                bytes: Some(retained),
                error,
            }),
            Err(join_err) => Err(AnimatedFailure {
                bytes: Some(retained),
                error: ImageError::Animation(format!("GIF 解码任务异常终止：{}", join_err)),
            }),
        }
    }

    async fn decode_static_blocking(raw: RawImageData, config: ImageConfig) -> Result<RasterBuffer, ImageError> {
        tokio::task::spawn_blocking(move || Self::decode_static(raw, &config))
            .await
            .map_err(|e| ImageError::Decode(format!("解码任务异常终止：{}", e)))?
    }
}

//! # 批量获取流水线
//!
//! ## 设计思路
//!
//! 一次批量提交被拆成两段：
//! - 工作线程段：每个条目一个 `tokio::spawn` 任务，执行 解析 → 判定 → 拉取 → 解码，
//!   条目之间互不共享可变状态
//! - UI 上下文段：条目完成后依次执行 通知订阅者 → 安装到样式 → 动图登记
//!
//! 跨回 UI 上下文是唯一的同步点。失败条目只记日志并从结果中省略，
//! 批次完成回调在全部条目结束后恰好触发一次。
//!
//! ## 实现思路
//!
//! - `JoinSet` 收集全部条目任务，`join_next` 在 UI 上下文中逐个取回结果。
//! - 宿主以 `Weak` 持有，每次副作用前检查；宿主不在时跳过安装与动图登记。
//! - 结果按提交顺序返回，与条目完成顺序无关。

use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::{JoinHandle, JoinSet};

use super::host::StyleHost;
use super::registry::ResolutionRegistry;
use super::scheduler::FrameScheduler;
use super::source::{AcquiredImage, ImageMetadata, RasterBuffer, ResolvedImage};
use super::{ImageConfig, ImageDescriptor, ImageError, ImageLoader};

/// 批次完成回调，恰好调用一次。
pub type CompletionCallback = Box<dyn FnOnce()>;

/// 单个条目从工作线程带回的结果。
struct EntryOutcome {
    index: usize,
    key: String,
    source_uri: String,
    info: ImageMetadata,
    result: Result<AcquiredImage, ImageError>,
}

/// 批量获取流水线。
pub struct ImagePipeline {
    loader: Arc<ImageLoader>,
    registry: Rc<ResolutionRegistry>,
    scheduler: FrameScheduler,
    host: Weak<dyn StyleHost>,
}

impl ImagePipeline {
    pub fn new(loader: Arc<ImageLoader>, registry: Rc<ResolutionRegistry>, host: Weak<dyn StyleHost>) -> Self {
        let scheduler = FrameScheduler::new(&registry);
        Self {
            loader,
            registry,
            scheduler,
            host,
        }
    }

    pub fn loader(&self) -> &Arc<ImageLoader> {
        &self.loader
    }

    pub fn registry(&self) -> &Rc<ResolutionRegistry> {
        &self.registry
    }

    /// 后台提交一个批次，全部条目结束后调用 `on_complete`（若提供）。必须在 `LocalSet` 内调用。
    pub fn submit(
        self: &Rc<Self>,
        batch: Vec<(String, ImageDescriptor)>,
        on_complete: Option<CompletionCallback>,
    ) -> JoinHandle<Vec<ResolvedImage>> {
        let pipeline = Rc::clone(self);
        tokio::task::spawn_local(async move {
            let resolved = pipeline.load_batch(batch).await;
            if let Some(callback) = on_complete {
                callback();
            }
            resolved
        })
    }

    /// 处理一个批次并返回全部成功条目（按提交顺序）。
    pub async fn load_batch(&self, batch: Vec<(String, ImageDescriptor)>) -> Vec<ResolvedImage> {
        let total = batch.len();
        if total == 0 {
            return Vec::new();
        }

        let batch_start = Instant::now();
        let ctx = match self.loader.batch_context() {
            Ok(ctx) => ctx,
            Err(e) => {
                log::error!("❌ 批次上下文创建失败，整批跳过 - entries={}：{}", total, e);
                return Vec::new();
            }
        };

        let mut tasks = JoinSet::new();
        for (index, (key, descriptor)) in batch.into_iter().enumerate() {
            let loader = Arc::clone(&self.loader);
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move {
                let result = loader.acquire(&ctx, &key, &descriptor).await;
                EntryOutcome {
                    index,
                    key,
                    source_uri: descriptor.source_uri,
                    info: descriptor.info,
                    result,
                }
            });
        }

        let mut resolved: Vec<(usize, ResolvedImage)> = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("❌ 条目任务异常终止：{}", e);
                    continue;
                }
            };

            match outcome.result {
                Ok(acquired) => {
                    let image = self.complete_entry(&outcome.key, acquired, outcome.info, &ctx.config);
                    resolved.push((outcome.index, image));
                }
                Err(e) => {
                    log::warn!(
                        "⚠️ 图片加载失败，已从结果中省略 - key={} uri={}：{}",
                        outcome.key,
                        outcome.source_uri,
                        e
                    );
                }
            }
        }

        resolved.sort_by_key(|(index, _)| *index);
        log::info!(
            "📦 批次处理完成 - success={}/{} elapsed={}ms",
            resolved.len(),
            total,
            batch_start.elapsed().as_millis()
        );

        resolved.into_iter().map(|(_, image)| image).collect()
    }

    /// 在 UI 上下文中执行条目的副作用：通知、安装、动图登记。
    fn complete_entry(
        &self,
        key: &str,
        acquired: AcquiredImage,
        info: ImageMetadata,
        config: &ImageConfig,
    ) -> ResolvedImage {
        match acquired {
            AcquiredImage::Static(image) => {
                let bitmap = Arc::new(image);
                self.publish(key, &bitmap, &info);
                ResolvedImage {
                    name: key.to_string(),
                    bitmap,
                    info,
                    animated: false,
                }
            }
            AcquiredImage::Animated(mut gif) => {
                let bitmap = Arc::new(std::mem::take(&mut gif.first_frame));
                self.publish(key, &bitmap, &info);

                if self.host.strong_count() > 0 {
                    self.scheduler.register(key, gif, info.clone(), self.host.clone(), config);
                } else {
                    log::debug!("⏭️ 宿主已回收，跳过动图登记 - key={}", key);
                }

                ResolvedImage {
                    name: key.to_string(),
                    bitmap,
                    info,
                    animated: true,
                }
            }
        }
    }

    fn publish(&self, key: &str, bitmap: &RasterBuffer, info: &ImageMetadata) {
        self.registry.resolve(key, bitmap);

        let Some(host) = self.host.upgrade() else {
            log::debug!("⏭️ 宿主已回收，跳过安装 - key={}", key);
            return;
        };
        if !host.is_style_loaded() {
            log::debug!("⏭️ 样式未加载，跳过安装 - key={}", key);
            return;
        }

        if let Err(e) = host.add_bitmap_image(key, bitmap, info) {
            log::warn!("⚠️ 图片安装到样式失败 - key={}：{}", key, e);
        }
    }
}

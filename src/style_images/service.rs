//! # 服务层（按地图视图持有）
//!
//! ## 设计思路
//!
//! `ImageService` 是一个地图视图对应的唯一入口，替代全局可变的注册表：
//! 1. 视图创建时 `init`，持有加载器、注册表与流水线
//! 2. 视图销毁时 `teardown`，停止并清空全部动图
//!
//! 测试可以为每个用例创建独立实例，互不干扰。
//!
//! ## 实现思路
//!
//! - 加载器是 `Arc`，可在工作线程共享；注册表与流水线是 `Rc`，只在 UI 上下文使用。
//! - `Drop` 时自动执行 `teardown`，重复调用是空操作。

use std::rc::{Rc, Weak};
use std::sync::Arc;

use tokio::task::JoinHandle;

use super::acquisition::{CompletionCallback, ImagePipeline};
use super::host::StyleHost;
use super::registry::{ResolutionRegistry, SubscriptionHandle};
use super::source::{RasterBuffer, ResolvedImage};
use super::{ImageConfig, ImageDescriptor, ImageError, ImageLoader, ResourceBundle};

/// 单个地图视图的图片服务。
pub struct ImageService {
    loader: Arc<ImageLoader>,
    registry: Rc<ResolutionRegistry>,
    pipeline: Rc<ImagePipeline>,
}

impl ImageService {
    /// 按配置初始化，资源表取自配置中的目录。
    pub fn init(config: ImageConfig, host: Weak<dyn StyleHost>) -> Result<Self, ImageError> {
        Ok(Self::from_loader(Arc::new(ImageLoader::new(config)?), host))
    }

    /// 使用自定义资源表初始化。
    pub fn with_bundle(
        config: ImageConfig,
        bundle: Arc<dyn ResourceBundle>,
        host: Weak<dyn StyleHost>,
    ) -> Result<Self, ImageError> {
        Ok(Self::from_loader(Arc::new(ImageLoader::with_bundle(config, bundle)?), host))
    }

    fn from_loader(loader: Arc<ImageLoader>, host: Weak<dyn StyleHost>) -> Self {
        let registry = ResolutionRegistry::new();
        let pipeline = Rc::new(ImagePipeline::new(Arc::clone(&loader), Rc::clone(&registry), host));
        log::info!("🗺️ 图片服务已初始化");
        Self {
            loader,
            registry,
            pipeline,
        }
    }

    pub fn loader(&self) -> &Arc<ImageLoader> {
        &self.loader
    }

    pub fn registry(&self) -> &Rc<ResolutionRegistry> {
        &self.registry
    }

    /// 订阅某个名称的解析结果。
    pub fn subscribe<F>(&self, name: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&str, &RasterBuffer) + 'static,
    {
        self.registry.subscribe(name, callback)
    }

    /// 处理一个批次并等待全部条目结束。
    pub async fn load_batch(&self, batch: Vec<(String, ImageDescriptor)>) -> Vec<ResolvedImage> {
        self.pipeline.load_batch(batch).await
    }

    /// 后台提交一个批次。必须在 `LocalSet` 内调用。
    pub fn submit(
        &self,
        batch: Vec<(String, ImageDescriptor)>,
        on_complete: Option<CompletionCallback>,
    ) -> JoinHandle<Vec<ResolvedImage>> {
        self.pipeline.submit(batch, on_complete)
    }

    /// 注销某个动图并立即停止它的解码器。返回是否存在登记。
    pub fn unregister_animated(&self, name: &str) -> bool {
        match self.registry.unregister_animated(name) {
            Some(handle) => {
                handle.retire();
                log::info!("🗑️ 动图已注销 - name={}", name);
                true
            }
            None => false,
        }
    }

    /// 停止并清空全部动图。可重复调用。
    pub fn teardown(&self) {
        self.registry.clear_animated();
    }
}

impl Drop for ImageService {
    fn drop(&mut self) {
        self.teardown();
    }
}

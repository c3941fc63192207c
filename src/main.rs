//! # 地图样式图片加载器 — 命令行入口
//!
//! 本文件仅负责参数解析、运行时初始化与结果输出。
//! 用法：`map-image-loader <batch.json> [--config <config.json>] [--preview-ms <n>]`

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::time::Duration;

use map_image_loader::error::AppError;
use map_image_loader::settings;
use map_image_loader::style_images::{
    ImageConfig, ImageError, ImageMetadata, ImageService, RasterBuffer, StyleHost,
};
use serde::Serialize;

struct CliArgs {
    batch: PathBuf,
    config: Option<PathBuf>,
    preview_ms: u64,
}

fn parse_args() -> Result<CliArgs, AppError> {
    let mut args = std::env::args().skip(1);
    let mut batch = None;
    let mut config = None;
    let mut preview_ms = 0;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| AppError::Usage("--config 缺少文件路径".to_string()))?;
                config = Some(PathBuf::from(value));
            }
            "--preview-ms" => {
                let value = args
                    .next()
                    .ok_or_else(|| AppError::Usage("--preview-ms 缺少毫秒数".to_string()))?;
                preview_ms = value
                    .parse()
                    .map_err(|_| AppError::Usage(format!("--preview-ms 不是合法数字: {}", value)))?;
            }
            other if other.starts_with("--") => {
                return Err(AppError::Usage(format!("未知参数: {}", other)));
            }
            other => {
                if batch.replace(PathBuf::from(other)).is_some() {
                    return Err(AppError::Usage("只能指定一个批量描述文件".to_string()));
                }
            }
        }
    }

    let batch = batch.ok_or_else(|| {
        AppError::Usage("用法: map-image-loader <batch.json> [--config <config.json>] [--preview-ms <n>]".to_string())
    })?;

    Ok(CliArgs {
        batch,
        config,
        preview_ms,
    })
}

/// 无界面的样式宿主：只记录安装次数并打日志。
#[derive(Default)]
struct HeadlessStyle {
    installs: RefCell<BTreeMap<String, usize>>,
}

impl StyleHost for HeadlessStyle {
    fn is_style_loaded(&self) -> bool {
        true
    }

    fn add_bitmap_image(&self, name: &str, bitmap: &RasterBuffer, info: &ImageMetadata) -> Result<(), ImageError> {
        *self.installs.borrow_mut().entry(name.to_string()).or_default() += 1;
        log::debug!(
            "🖼️ 安装图片 - name={} size={}x{} scale={} sdf={}",
            name,
            bitmap.width(),
            bitmap.height(),
            info.scale,
            info.sdf
        );
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryEntry {
    name: String,
    width: u32,
    height: u32,
    animated: bool,
    install_count: usize,
}

async fn run(args: CliArgs) -> Result<Vec<SummaryEntry>, AppError> {
    let config = match &args.config {
        Some(path) => settings::load_image_config(path)?,
        None => ImageConfig::default(),
    };
    let batch = settings::load_batch(&args.batch)?;
    log::info!("📥 读取批量描述 - entries={}", batch.len());

    let style = Rc::new(HeadlessStyle::default());
    let host: Weak<dyn StyleHost> = Rc::downgrade(&style) as Weak<dyn StyleHost>;
    let service = ImageService::init(config, host)?;

    let resolved = service.load_batch(batch).await;
    if args.preview_ms > 0 {
        log::info!("⏳ 动图预览 {}ms", args.preview_ms);
        tokio::time::sleep(Duration::from_millis(args.preview_ms)).await;
    }
    service.teardown();

    let installs = style.installs.borrow();
    Ok(resolved
        .into_iter()
        .map(|image| SummaryEntry {
            width: image.bitmap.width(),
            height: image.bitmap.height(),
            animated: image.animated,
            install_count: installs.get(&image.name).copied().unwrap_or(0),
            name: image.name,
        })
        .collect())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            log::error!("{err}");
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("运行时初始化失败: {err}");
            std::process::exit(1);
        }
    };

    let local = tokio::task::LocalSet::new();
    match local.block_on(&runtime, run(args)) {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                log::error!("序列化结果失败: {err}");
                std::process::exit(1);
            }
        },
        Err(err) => {
            log::error!("{err}");
            std::process::exit(1);
        }
    }
}

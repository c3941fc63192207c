//! # 地图样式图片加载器 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              地图视图 (StyleHost 实现方)                  │
//! │                                                          │
//! │  addBitmapImage(name, bitmap, info) ← 安装 / 逐帧重绘     │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ UI 上下文 (LocalSet, !Send)
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            style_images                          │
//! │                                                          │
//! │  ┌─ service ────── ImageService (每个视图一个)            │
//! │  ├─ acquisition ── 批量扇出 + 完成回调                    │
//! │  ├─ registry ───── 订阅通知 + 权威动图句柄                │
//! │  └─ scheduler ──── 逐帧重绘 + 看门狗                      │
//! │         ↕ 工作线程 (tokio::spawn / spawn_blocking)        │
//! │  ┌─ handler ────── 单条目编排                             │
//! │  ├─ loader ─────── HTTP / 文件 / asset / data 拉取         │
//! │  └─ pipeline ───── 静态解码 / GIF 解码 / 降采样           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 二进制与设置层的统一错误类型 `AppError` |
//! | [`settings`] | 从 JSON 文件读取图片配置与批量描述 |
//! | [`style_images`] | 图片解析、安装与动图生命周期 |

pub mod error;
pub mod settings;
pub mod style_images;

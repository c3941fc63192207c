//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 库内部各阶段使用 `ImageError`；二进制入口与设置读取层统一返回 `AppError`，
//! 避免在调用方散落 `.map_err(|e| e.to_string())`。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `ImageError` 与 `std::io::Error` 提供 `From` 转换，调用方直接用 `?`。

use crate::style_images::ImageError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 图片处理流水线错误（拉取 / 解码 / 配置）
    #[error("{0}")]
    Image(#[from] ImageError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 设置文件内容不合法
    #[error("设置文件错误: {0}")]
    Settings(String),

    /// 命令行参数错误
    #[error("参数错误: {0}")]
    Usage(String),
}

//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载“来源解析 → 拉取 → 解码 → 安装”链路中的所有错误来源。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! 注意：本模块内没有任何错误是进程级致命的，错误只会让对应条目或对应帧失败。

/// 图片链路统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("网络错误：{0}")]
    Network(String),

    #[error("解码错误：{0}")]
    Decode(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    /// 内置资源 / 资产查找失败。
    #[error("资源不存在：{0}")]
    ResourceNotFound(String),

    /// 动图解码或逐帧绘制失败。
    #[error("动图错误：{0}")]
    Animation(String),

    /// 样式宿主拒绝安装图片。
    #[error("样式错误：{0}")]
    Style(String),
}

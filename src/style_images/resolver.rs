//! # 来源解析与格式分类
//!
//! ## 设计思路
//!
//! 在拉取之前先把描述里的 `source_uri` 规整成统一形态：
//! - 以路径分隔符开头 → 本地文件，规整为 `file://` URI
//! - 非 `http(s)` 且不带已识别 scheme → 作为内置资源名查找
//! - 查找失败不中断流程，只记录日志并保留原值，由后续拉取阶段自然失败
//!
//! 动图判定是启发式：解码后的原始 URI、解码后的解析 URI 以 `.gif` 结尾或包含 `.gif`，
//! 或者条目名包含 `gif`（不区分大小写），即走 GIF 路径。误判由“GIF 失败回退静态解码”兜底。

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

use super::ImageConfig;

const GIF_URI_MARKER: &str = ".gif";
const GIF_NAME_MARKER: &str = "gif";
const RESOURCE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];
pub(crate) const ASSET_SCHEME_PREFIX: &str = "asset://";

/// 内置资源查找能力（平台资源表的抽象）。
///
/// 在工作线程上调用，因此要求 `Send + Sync`。
pub trait ResourceBundle: Send + Sync {
    /// 按裸资源名查找文件。
    fn resource_path(&self, name: &str) -> Option<PathBuf>;
    /// 按资产相对路径查找文件。
    fn asset_path(&self, path: &str) -> Option<PathBuf>;
}

/// 基于目录的资源表：资源目录 + 资产目录。
#[derive(Debug, Clone, Default)]
pub struct DirectoryBundle {
    resource_dir: Option<PathBuf>,
    asset_dir: Option<PathBuf>,
}

impl DirectoryBundle {
    pub fn new(resource_dir: Option<PathBuf>, asset_dir: Option<PathBuf>) -> Self {
        Self { resource_dir, asset_dir }
    }

    pub fn from_config(config: &ImageConfig) -> Self {
        Self::new(config.resource_dir.clone(), config.asset_dir.clone())
    }

    /// 资源名规整：小写，`-` 替换为 `_`。
    fn normalize_resource_name(name: &str) -> String {
        name.trim().to_lowercase().replace('-', "_")
    }
}

impl ResourceBundle for DirectoryBundle {
    fn resource_path(&self, name: &str) -> Option<PathBuf> {
        let dir = self.resource_dir.as_ref()?;
        if !is_plain_relative(Path::new(name)) {
            return None;
        }

        let exact = dir.join(name);
        if exact.is_file() {
            return Some(exact);
        }

        let normalized = Self::normalize_resource_name(name);
        RESOURCE_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{}", normalized, ext)))
            .find(|candidate| candidate.is_file())
    }

    fn asset_path(&self, path: &str) -> Option<PathBuf> {
        let dir = self.asset_dir.as_ref()?;
        let relative = Path::new(path.trim_start_matches('/'));
        if !is_plain_relative(relative) {
            return None;
        }

        let candidate = dir.join(relative);
        candidate.is_file().then_some(candidate)
    }
}

/// 只允许普通路径段，拒绝 `..`、根目录与盘符，防止跳出资源目录。
fn is_plain_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// 拉取阶段依据的来源形态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceKind {
    Http,
    File,
    Asset,
    Data,
    Resource,
}

impl SourceKind {
    pub(crate) fn of(uri: &str) -> Self {
        let lower = uri.trim_start().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Http
        } else if lower.starts_with("file://") {
            Self::File
        } else if lower.starts_with(ASSET_SCHEME_PREFIX) {
            Self::Asset
        } else if lower.starts_with("data:") {
            Self::Data
        } else {
            Self::Resource
        }
    }
}

/// 本地路径 → `file://` URI。
pub(crate) fn to_file_uri(path: &str) -> String {
    reqwest::Url::from_file_path(path)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| format!("file://{}", path))
}

/// 解析描述中的来源地址。
///
/// 资源查找失败时原样返回，并记录告警。
pub(crate) fn resolve_source_uri(uri: &str, bundle: &dyn ResourceBundle) -> String {
    if uri.starts_with('/') {
        return to_file_uri(uri);
    }

    match SourceKind::of(uri) {
        SourceKind::Resource => match bundle.resource_path(uri) {
            Some(path) => to_file_uri(&path.to_string_lossy()),
            None => {
                log::warn!("⚠️ 未找到内置资源，保留原地址继续：{}", uri);
                uri.to_string()
            }
        },
        _ => uri.to_string(),
    }
}

/// 百分号解码，失败时回退原串。
fn percent_decode_or_raw(value: &str) -> Cow<'_, str> {
    urlencoding::decode(value).unwrap_or(Cow::Borrowed(value))
}

/// 动图判定启发式。
pub(crate) fn is_animated_candidate(name: &str, original_uri: &str, resolved_uri: &str) -> bool {
    let uri_matches = |uri: &str| {
        let decoded = percent_decode_or_raw(uri).to_lowercase();
        decoded.ends_with(GIF_URI_MARKER) || decoded.contains(GIF_URI_MARKER)
    };

    uri_matches(original_uri)
        || uri_matches(resolved_uri)
        || name.to_lowercase().contains(GIF_NAME_MARKER)
}

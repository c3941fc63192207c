//! # 加载与校验模块
//!
//! ## 设计思路
//!
//! 统一处理不同来源（URL / 本地文件 / 内置资源 / 内置资产 / Data URI）的原始字节加载，
//! 并在“尽可能早”的阶段执行输入校验。目标是尽快失败，减少不必要内存与 CPU 消耗。
//!
//! ## 实现思路
//!
//! - URL：内容类型 + 体积校验 + 流式下载 + 流式签名探测，可重试错误指数退避。
//! - Data URI：格式解析 + 解码前体积估算。
//! - 文件：存在性 + metadata 体积限制 + 读取。
//! - 所有来源最终都做一次 magic bytes 校验。

use base64::{Engine as _, engine::general_purpose};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::handler::BatchContext;
use super::resolver::{ASSET_SCHEME_PREFIX, SourceKind};
use super::source::RawImageData;
use super::{ImageConfig, ImageError, ImageLoader};

const STREAM_SNIFF_BYTES: usize = 4096;
const NETWORK_RETRY_MAX_ATTEMPTS: u8 = 3;
const NETWORK_RETRY_BASE_DELAY_MS: u64 = 180;
const BUFFER_INITIAL_CAPACITY: usize = 16 * 1024;

impl ImageLoader {
    /// 按来源形态拉取原始字节。
    pub(super) async fn fetch_bytes(
        &self,
        uri: &str,
        ctx: &BatchContext,
    ) -> Result<RawImageData, ImageError> {
        match SourceKind::of(uri) {
            SourceKind::Http => self.load_from_url(uri, ctx).await,
            SourceKind::File => {
                let path = reqwest::Url::parse(uri)
                    .ok()
                    .and_then(|url| url.to_file_path().ok())
                    .ok_or_else(|| ImageError::InvalidFormat(format!("文件 URI 无效：{}", uri)))?;
                Self::load_from_file(&path, &ctx.config, "file")
            }
            SourceKind::Asset => {
                let relative = &uri.trim_start()[ASSET_SCHEME_PREFIX.len()..];
                let path = self
                    .bundle
                    .asset_path(relative)
                    .ok_or_else(|| ImageError::ResourceNotFound(format!("内置资产不存在：{}", uri)))?;
                Self::load_from_file(&path, &ctx.config, "asset")
            }
            SourceKind::Data => Self::load_from_data_uri(uri, &ctx.config),
            SourceKind::Resource => {
                let path = self
                    .bundle
                    .resource_path(uri)
                    .ok_or_else(|| ImageError::ResourceNotFound(format!("内置资源不存在：{}", uri)))?;
                Self::load_from_file(&path, &ctx.config, "resource")
            }
        }
    }

    /// 从 URL 加载图片原始字节。
    pub(super) async fn load_from_url(
        &self,
        url: &str,
        ctx: &BatchContext,
    ) -> Result<RawImageData, ImageError> {
        log::info!("🌐 开始下载图片 - URL: {}", url);

        let bytes = Self::download_with_validation(&ctx.client, url, &ctx.config).await?;
        Self::validate_image_signature(&bytes)?;

        Ok(RawImageData {
            bytes,
            source_hint: "url",
        })
    }

    /// 从 Data URI（`data:image/...;base64,`）加载图片原始字节。
    pub(super) fn load_from_data_uri(
        data: &str,
        config: &ImageConfig,
    ) -> Result<RawImageData, ImageError> {
        log::debug!("📝 开始处理 data URI 图片");

        let bytes = Self::decode_data_uri(data, config.max_file_size)?;
        Self::validate_image_signature(&bytes)?;

        Ok(RawImageData {
            bytes,
            source_hint: "data",
        })
    }

    /// 从本地路径加载图片原始字节。
    pub(super) fn load_from_file(
        path: &Path,
        config: &ImageConfig,
        source_hint: &'static str,
    ) -> Result<RawImageData, ImageError> {
        log::debug!("📁 开始读取本地图片 - 路径: {}", path.display());

        if !path.exists() {
            return Err(ImageError::FileSystem(format!("文件不存在：{}", path.display())));
        }

        let metadata = std::fs::metadata(path)
            .map_err(|e| ImageError::FileSystem(format!("无法读取文件信息：{}", e)))?;

        if metadata.len() > config.max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "文件过大：{:.2} MB（限制：{:.2} MB）",
                metadata.len() as f64 / 1024.0 / 1024.0,
                config.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| ImageError::FileSystem(format!("无法读取图片文件：{}", e)))?;
        Self::validate_image_signature(&bytes)?;

        Ok(RawImageData { bytes, source_hint })
    }

    /// 构建本批次共享的 HTTP 客户端。
    pub(super) fn build_http_client(config: &ImageConfig) -> Result<reqwest::Client, ImageError> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));

        if let Some(secs) = config.download_timeout {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.connect_timeout {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }

        builder
            .build()
            .map_err(|e| ImageError::Network(format!("无法创建 HTTP 客户端：{}", e)))
    }

    /// 执行带校验的网络下载。
    ///
    /// 使用流式读取，边读边做体积与签名校验。可重试的状态码与连接/超时错误
    /// 最多尝试 `NETWORK_RETRY_MAX_ATTEMPTS` 次。
    pub(super) async fn download_with_validation(
        client: &reqwest::Client,
        url: &str,
        config: &ImageConfig,
    ) -> Result<Vec<u8>, ImageError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ImageError::InvalidFormat(format!("URL 格式错误：{}", e)))?;

        let mut attempt: u8 = 1;
        let mut response = loop {
            let outcome = Self::send(client, parsed.clone()).await;
            let retry_in = match &outcome {
                Ok(resp) if Self::is_retryable_http_status(resp.status()) => {
                    Some(Self::backoff_delay(attempt, Self::retry_after(resp.headers())))
                }
                Err(err) if err.is_timeout() || err.is_connect() => Some(Self::backoff_delay(attempt, None)),
                _ => None,
            };

            match (retry_in, outcome) {
                (Some(delay), outcome) if attempt < NETWORK_RETRY_MAX_ATTEMPTS => {
                    let reason = match outcome {
                        Ok(resp) => format!("HTTP {}", resp.status().as_u16()),
                        Err(err) => err.to_string(),
                    };
                    log::warn!(
                        "⚠️ 下载失败（第 {}/{} 次，可重试）：{}；{}ms 后重试",
                        attempt,
                        NETWORK_RETRY_MAX_ATTEMPTS,
                        reason,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                (_, Ok(resp)) => break resp,
                (_, Err(err)) => return Err(Self::map_reqwest_error(err, config)),
            }
        };

        if !response.status().is_success() {
            return Err(ImageError::Network(format!("HTTP {}", response.status())));
        }

        if let Some(ct) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
        {
            if !Self::is_image_content_type(ct) {
                return Err(ImageError::InvalidFormat(format!("不是图片类型：{}", ct)));
            }
        }

        let declared = response.content_length();
        if let Some(size) = declared.filter(|size| *size > config.max_file_size) {
            return Err(ImageError::ResourceLimit(format!(
                "声明体积 {} bytes 超过限制 {} bytes",
                size, config.max_file_size
            )));
        }

        let capacity = declared
            .filter(|len| *len > 0)
            .map_or(BUFFER_INITIAL_CAPACITY, |len| len.min(config.max_file_size) as usize);
        let mut buffer = Vec::with_capacity(capacity);
        let mut recognized = false;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Self::map_reqwest_error(e, config))?
        {
            if (buffer.len() + chunk.len()) as u64 > config.max_file_size {
                return Err(ImageError::ResourceLimit("下载后文件超过大小限制".to_string()));
            }
            buffer.extend_from_slice(&chunk);

            if !recognized {
                recognized = Self::sniff_prefix(&buffer)?;
            }
        }

        if !recognized {
            Self::validate_image_signature(&buffer)?;
        }

        log::debug!("✅ 下载完成 - {} bytes", buffer.len());
        Ok(buffer)
    }

    async fn send(
        client: &reqwest::Client,
        url: reqwest::Url,
    ) -> Result<reqwest::Response, reqwest::Error> {
        client
            .get(url)
            .header(reqwest::header::ACCEPT, "image/avif,image/webp,image/apng,image/*,*/*;q=0.8")
            .send()
            .await
    }

    /// `Retry-After` 只认秒数形式。
    fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        let secs = headers
            .get(reqwest::header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()?;
        Some(Duration::from_secs(secs))
    }

    /// 指数退避（或服务端提示）加上至多一半的抖动。
    fn backoff_delay(attempt: u8, server_hint: Option<Duration>) -> Duration {
        let base = server_hint.unwrap_or_else(|| {
            Duration::from_millis(NETWORK_RETRY_BASE_DELAY_MS << attempt.saturating_sub(1).min(8))
        });
        let spread = (base.as_millis() as u64 / 2).max(1);
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.subsec_nanos() as u64);
        base + Duration::from_millis(seed % (spread + 1))
    }

    fn is_retryable_http_status(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
    }

    fn is_image_content_type(content_type: &str) -> bool {
        content_type
            .split(';')
            .next()
            .is_some_and(|base| base.trim().to_ascii_lowercase().starts_with("image/"))
    }

    fn map_reqwest_error(e: reqwest::Error, config: &ImageConfig) -> ImageError {
        if e.is_timeout() {
            ImageError::Timeout(format!("下载超时（{:?} 秒）：{}", config.download_timeout, e))
        } else {
            ImageError::Network(format!("请求失败：{}", e))
        }
    }

    /// 解析 `data:...;base64,` 并在解码前按估算体积拒绝超限输入。
    fn decode_data_uri(data: &str, max_file_size: u64) -> Result<Vec<u8>, ImageError> {
        let payload = data
            .trim()
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
            .map(|(_, payload)| payload)
            .ok_or_else(|| ImageError::InvalidFormat("缺少 base64 标记".to_string()))?;

        let estimated = base64::decoded_len_estimate(payload.len()) as u64;
        if estimated > max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "Base64 预计解码 {} bytes，超过限制 {} bytes",
                estimated, max_file_size
            )));
        }

        general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| ImageError::Decode(format!("Base64 解码失败：{}", e)))
    }

    /// 通过文件签名（magic bytes）校验输入是否为图片。
    fn validate_image_signature(bytes: &[u8]) -> Result<(), ImageError> {
        match infer::get(bytes) {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Image => Ok(()),
            Some(kind) => Err(ImageError::InvalidFormat(format!("文件签名不是图片类型：{}", kind.mime_type()))),
            None if bytes.is_empty() => Err(ImageError::InvalidFormat("图片内容为空".to_string())),
            None => Err(ImageError::InvalidFormat("无法识别图片类型".to_string())),
        }
    }

    /// 流式下载时对已到达的前缀做签名判断：`Ok(true)` 已确认是图片，
    /// `Ok(false)` 字节不足继续读；非图片或读满 `STREAM_SNIFF_BYTES` 仍无法识别时报错。
    fn sniff_prefix(bytes: &[u8]) -> Result<bool, ImageError> {
        match infer::get(bytes) {
            Some(_) => Self::validate_image_signature(bytes).map(|_| true),
            None if bytes.len() >= STREAM_SNIFF_BYTES => Err(ImageError::InvalidFormat(format!(
                "下载前 {} 字节内无法识别图片类型",
                STREAM_SNIFF_BYTES
            ))),
            None => Ok(false),
        }
    }
}

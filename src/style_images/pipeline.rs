//! # 解码与变换流水线模块
//!
//! ## 设计思路
//!
//! 将“字节 → 图像 → RGBA”的过程集中管理，并在关键节点增加资源上限控制。
//! 优先做尺寸检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 静态路径：
//! 1. 读取 header 尺寸并按像素/内存上限快速拒绝
//! 2. 完整解码，并按 EXIF 方向自动旋转
//! 3. 根据配置对超大图标降采样
//! 4. 转换为独立持有的 RGBA 缓冲
//!
//! 动图路径：
//! 1. 字节放进可随机访问的 `Cursor`（GIF 解码器需要 seek）
//! 2. 逐帧解码，累计内存超限即失败（由上层回退静态路径）
//! 3. 规整帧延迟，按固有尺寸新分配缓冲并绘制首帧

use fast_image_resize as fr;
use image::codecs::gif::GifDecoder;
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{AnimationDecoder, DynamicImage, ImageBuffer, ImageDecoder, ImageReader, Rgba};
use std::io::Cursor;
use std::time::Duration;

use super::source::{DecodedGif, GifFrame, RasterBuffer, RawImageData};
use super::{ImageConfig, ImageError, ImageLoader};

impl ImageLoader {
    /// 将原始字节解码为可安装到样式的 RGBA 缓冲。
    pub(crate) fn decode_static(
        raw: RawImageData,
        config: &ImageConfig,
    ) -> Result<RasterBuffer, ImageError> {
        let (header_width, header_height) = Self::inspect_dimensions_from_memory(&raw.bytes)?;
        Self::validate_pixel_limits(config, header_width, header_height)?;
        Self::validate_decoded_memory_limits(config, header_width, header_height, 1)?;

        let reader = ImageReader::new(Cursor::new(&raw.bytes))
            .with_guessed_format()
            .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?;
        let mut decoder = reader
            .into_decoder()
            .map_err(|e| ImageError::Decode(format!("无法创建解码器：{}", e)))?;
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

        let mut decoded = DynamicImage::from_decoder(decoder)
            .map_err(|e| ImageError::Decode(format!("图片解码失败：{}", e)))?;
        decoded.apply_orientation(orientation);

        let (raw_width, raw_height) = (decoded.width(), decoded.height());
        if raw_width == 0 || raw_height == 0 {
            return Err(ImageError::Decode("解码结果不是可用的位图（尺寸为 0）".to_string()));
        }

        let optimized = Self::maybe_downscale_icon(decoded, config)?;
        let rgba = optimized.into_rgba8();

        log::debug!(
            "✅ 静态图片解码成功 - 来源: {} 原始尺寸: {}x{} 输出尺寸: {}x{}",
            raw.source_hint,
            raw_width,
            raw_height,
            rgba.width(),
            rgba.height()
        );

        Ok(rgba)
    }

    /// 将原始字节解码为完整的 GIF 帧序列。
    pub(crate) fn decode_gif(raw: RawImageData, config: &ImageConfig) -> Result<DecodedGif, ImageError> {
        let decoder = GifDecoder::new(Cursor::new(raw.bytes))
            .map_err(|e| ImageError::Animation(format!("GIF 解码器创建失败：{}", e)))?;
        let (width, height) = decoder.dimensions();
        if width == 0 || height == 0 {
            return Err(ImageError::Animation("GIF 画布尺寸为 0".to_string()));
        }
        Self::validate_pixel_limits(config, width, height)?;

        let mut frames = Vec::new();
        for frame in decoder.into_frames() {
            let frame = frame.map_err(|e| ImageError::Animation(format!("GIF 帧解码失败：{}", e)))?;
            Self::validate_decoded_memory_limits(config, width, height, frames.len() as u64 + 1)?;

            let (numer, denom) = frame.delay().numer_denom_ms();
            let raw_delay_ms = if denom == 0 { 0 } else { u64::from(numer / denom) };
            frames.push(GifFrame {
                image: frame.into_buffer(),
                delay: Self::normalize_frame_delay(raw_delay_ms, config),
            });
        }

        let first = frames
            .first()
            .ok_or_else(|| ImageError::Animation("GIF 不包含任何帧".to_string()))?;
        let mut first_frame = RasterBuffer::new(width, height);
        paint_frame(&first.image, &mut first_frame)?;

        log::debug!(
            "🎞️ GIF 解码成功 - 来源: {} 尺寸: {}x{} 帧数: {}",
            raw.source_hint,
            width,
            height,
            frames.len()
        );

        Ok(DecodedGif {
            width,
            height,
            frames,
            first_frame,
        })
    }

    /// 过短的帧延迟视为未指定，沿用浏览器惯例的默认值，以此给重绘频率设上限。
    pub(crate) fn normalize_frame_delay(raw_delay_ms: u64, config: &ImageConfig) -> Duration {
        if raw_delay_ms < config.min_frame_delay_ms {
            Duration::from_millis(config.default_frame_delay_ms)
        } else {
            Duration::from_millis(raw_delay_ms)
        }
    }

    /// 仅通过内存中的图片头信息读取宽高。
    fn inspect_dimensions_from_memory(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?
            .into_dimensions()
            .map_err(|e| ImageError::InvalidFormat(format!("无法读取图片尺寸：{}", e)))
    }

    /// 校验像素数量是否超过配置上限。
    fn validate_pixel_limits(config: &ImageConfig, width: u32, height: u32) -> Result<(), ImageError> {
        let pixels = (width as u64)
            .checked_mul(height as u64)
            .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

        if pixels > config.max_decoded_pixels {
            return Err(ImageError::ResourceLimit(format!(
                "图片像素过大：{} 像素（限制：{} 像素）",
                pixels, config.max_decoded_pixels
            )));
        }

        Ok(())
    }

    /// 按 RGBA 估算 `frames` 张画布的内存占用。
    fn validate_decoded_memory_limits(
        config: &ImageConfig,
        width: u32,
        height: u32,
        frames: u64,
    ) -> Result<(), ImageError> {
        let estimated = (width as u64)
            .checked_mul(height as u64)
            .and_then(|pixels| pixels.checked_mul(4))
            .and_then(|bytes| bytes.checked_mul(frames))
            .ok_or_else(|| ImageError::ResourceLimit("图片解码内存估算溢出".to_string()))?;

        if estimated > config.max_decoded_bytes {
            return Err(ImageError::ResourceLimit(format!(
                "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
                estimated as f64 / 1024.0 / 1024.0,
                config.max_decoded_bytes as f64 / 1024.0 / 1024.0
            )));
        }

        Ok(())
    }

    /// 按配置对超大图标做自适应降采样。
    fn maybe_downscale_icon(image: DynamicImage, config: &ImageConfig) -> Result<DynamicImage, ImageError> {
        if !config.adaptive_resize {
            return Ok(image);
        }

        let (width, height) = (image.width(), image.height());
        let source_pixels = (width as u64)
            .checked_mul(height as u64)
            .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

        let over_dimension = width > config.max_icon_dimension || height > config.max_icon_dimension;
        let over_pixels = source_pixels > config.max_icon_pixels;
        if !over_dimension && !over_pixels {
            return Ok(image);
        }

        let dimension_scale = (config.max_icon_dimension as f64 / width as f64)
            .min(config.max_icon_dimension as f64 / height as f64);
        let pixel_scale = (config.max_icon_pixels as f64 / source_pixels as f64).sqrt();
        let scale = dimension_scale.min(pixel_scale).min(1.0);

        if scale <= 0.0 {
            return Err(ImageError::ResourceLimit("缩放比例计算异常".to_string()));
        }

        let target_width = ((width as f64 * scale).floor() as u32).max(1);
        let target_height = ((height as f64 * scale).floor() as u32).max(1);

        log::info!(
            "🧩 图标降采样：{}x{} -> {}x{}（filter={:?}）",
            width,
            height,
            target_width,
            target_height,
            config.resize_filter
        );

        match Self::resize_with_fast_image_resize(&image, target_width, target_height, config.resize_filter) {
            Ok(resized) => Ok(resized),
            Err(err) => {
                log::warn!("⚠️ fast_image_resize 降采样失败，回退 image::resize_exact：{}", err);
                Ok(image.resize_exact(target_width, target_height, config.resize_filter))
            }
        }
    }

    fn resize_with_fast_image_resize(
        image: &DynamicImage,
        target_width: u32,
        target_height: u32,
        filter: FilterType,
    ) -> Result<DynamicImage, ImageError> {
        let src = image.to_rgba8();
        let (src_width, src_height) = src.dimensions();

        let src_image =
            fr::images::Image::from_vec_u8(src_width, src_height, src.into_raw(), fr::PixelType::U8x4)
                .map_err(|e| ImageError::Decode(format!("构建源图像缓冲失败：{}", e)))?;
        let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

        let mut resizer = fr::Resizer::new();
        let options =
            fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(Self::to_fast_filter(filter)));

        resizer
            .resize(&src_image, &mut dst_image, Some(&options))
            .map_err(|e| ImageError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

        let rgba = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(target_width, target_height, dst_image.into_vec())
            .ok_or_else(|| ImageError::Decode("fast_image_resize 输出缓冲长度异常".to_string()))?;

        Ok(DynamicImage::ImageRgba8(rgba))
    }

    fn to_fast_filter(filter: FilterType) -> fr::FilterType {
        match filter {
            FilterType::Nearest => fr::FilterType::Box,
            FilterType::Triangle => fr::FilterType::Bilinear,
            FilterType::CatmullRom => fr::FilterType::CatmullRom,
            FilterType::Gaussian => fr::FilterType::Mitchell,
            FilterType::Lanczos3 => fr::FilterType::Lanczos3,
        }
    }
}

/// 将一帧画布绘制到目标缓冲的整个范围内。尺寸不一致时先缩放。
pub(crate) fn paint_frame(frame: &RasterBuffer, target: &mut RasterBuffer) -> Result<(), ImageError> {
    let (width, height) = target.dimensions();
    if width == 0 || height == 0 {
        return Err(ImageError::Animation("目标缓冲尺寸为 0".to_string()));
    }

    if frame.dimensions() == (width, height) {
        imageops::replace(target, frame, 0, 0);
    } else {
        let scaled = imageops::resize(frame, width, height, FilterType::Triangle);
        imageops::replace(target, &scaled, 0, 0);
    }

    Ok(())
}

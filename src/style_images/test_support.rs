//! 单元测试共用的夹具：内存中生成 PNG/GIF、直接构造解码结果、记录型样式宿主。

use std::cell::{Cell, RefCell};
use std::io::Cursor;
use std::time::Duration;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, ImageFormat, Rgba};

use super::host::StyleHost;
use super::source::{DecodedGif, GifFrame, ImageMetadata, RasterBuffer};
use super::ImageError;

fn gradient(width: u32, height: u32, seed: u8) -> RasterBuffer {
    RasterBuffer::from_fn(width, height, |x, y| {
        Rgba([
            (x.wrapping_mul(7) as u8).wrapping_add(seed),
            (y.wrapping_mul(11) as u8).wrapping_add(seed),
            seed.wrapping_mul(37),
            255,
        ])
    })
}

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    gradient(width, height, 0)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png fixture failed");
    out.into_inner()
}

pub(crate) fn gif_bytes(width: u32, height: u32, frames: usize, delay_ms: u32) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder.set_repeat(Repeat::Infinite).expect("set gif repeat failed");
        for i in 0..frames {
            let frame = Frame::from_parts(
                gradient(width, height, (i as u8).wrapping_mul(60)),
                0,
                0,
                Delay::from_numer_denom_ms(delay_ms, 1),
            );
            encoder.encode_frame(frame).expect("encode gif frame failed");
        }
    }
    out
}

pub(crate) fn decoded_gif(width: u32, height: u32, frames: usize, delay_ms: u64) -> DecodedGif {
    let frames: Vec<GifFrame> = (0..frames)
        .map(|i| GifFrame {
            image: gradient(width, height, (i as u8).wrapping_mul(60)),
            delay: Duration::from_millis(delay_ms),
        })
        .collect();
    let first_frame = frames
        .first()
        .map(|f| f.image.clone())
        .unwrap_or_else(|| RasterBuffer::new(width, height));

    DecodedGif {
        width,
        height,
        frames,
        first_frame,
    }
}

/// 记录每次安装的样式宿主。`fail_first` 大于 0 时，前若干次安装返回错误且不计入。
#[derive(Default)]
pub(crate) struct RecordingHost {
    pub(crate) loaded: Cell<bool>,
    pub(crate) installs: RefCell<Vec<String>>,
    pub(crate) fail_first: Cell<usize>,
    pub(crate) rejected: Cell<usize>,
}

impl RecordingHost {
    pub(crate) fn loaded() -> Self {
        Self {
            loaded: Cell::new(true),
            ..Self::default()
        }
    }

    /// 已加载，但前 `count` 次安装失败。
    pub(crate) fn failing(count: usize) -> Self {
        Self {
            fail_first: Cell::new(count),
            ..Self::loaded()
        }
    }

    pub(crate) fn install_count(&self, name: &str) -> usize {
        self.installs.borrow().iter().filter(|n| n.as_str() == name).count()
    }
}

impl StyleHost for RecordingHost {
    fn is_style_loaded(&self) -> bool {
        self.loaded.get()
    }

    fn add_bitmap_image(&self, name: &str, _bitmap: &RasterBuffer, _info: &ImageMetadata) -> Result<(), ImageError> {
        let remaining = self.fail_first.get();
        if remaining > 0 {
            self.fail_first.set(remaining - 1);
            self.rejected.set(self.rejected.get() + 1);
            return Err(ImageError::Style(format!("拒绝安装 {}", name)));
        }
        self.installs.borrow_mut().push(name.to_string());
        Ok(())
    }
}

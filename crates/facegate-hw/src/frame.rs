//! Frame type and pixel conversions: YUYV/Y16 to grayscale, downsampling, encoding.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, GrayImage, ImageFormat};
use std::io::Cursor;
use std::time::Instant;

/// A captured grayscale camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub image: GrayImage,
    pub captured_at: Instant,
    /// Driver sequence number; monotonic per device, restarts on reopen.
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: GrayImage, sequence: u32) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Shrink by an integer factor (1 returns an unchanged copy).
    pub fn downsample(&self, factor: u32) -> GrayImage {
        if factor <= 1 {
            return self.image.clone();
        }
        let width = (self.width() / factor).max(1);
        let height = (self.height() / factor).max(1);
        imageops::resize(&self.image, width, height, FilterType::Triangle)
    }

    /// Baseline JPEG at `quality` (1–100).
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::with_capacity(self.image.len() / 4);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
            self.image.as_raw(),
            self.width(),
            self.height(),
            ExtendedColorType::L8,
        )?;
        Ok(out)
    }

    /// Lossless PNG.
    pub fn to_png(&self) -> Result<Vec<u8>, FrameError> {
        let mut out = Cursor::new(Vec::new());
        self.image.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    let luma = yuyv[..expected].iter().step_by(2).copied().collect();
    GrayImage::from_raw(width, height, luma).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// Convert 16-bit little-endian grayscale to 8 bits by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    let luma = y16[..expected].chunks_exact(2).map(|px| px[1]).collect();
    GrayImage::from_raw(width, height, luma).ok_or(FrameError::InvalidLength {
        expected,
        actual: y16.len(),
    })
}

/// Copy an 8-bit grayscale buffer.
pub fn grey_to_grayscale(grey: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    GrayImage::from_raw(width, height, grey[..expected].to_vec()).ok_or(FrameError::InvalidLength {
        expected,
        actual: grey.len(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

//! Typed vocabulary for negotiated capture encodings.
//!
//! A [`StreamEncoding`] is the agreement between a capture source and its
//! consumers: pixel format, dimensions, and frame rate. Sources advertise
//! what they can produce, readers ask for what they want, and the
//! negotiated result travels with every frame.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::SpectoError;

/// Pixel layout of uncompressed frames.
///
/// `Bgra8` is the canonical interchange format between capture pipelines
/// and the GPU; `Nv12` is representable for negotiation purposes but has
/// no directly bindable texture form here (planar formats need upstream
/// conversion, which this layer deliberately does not perform).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra8,
    Rgba8,
    Nv12,
}

impl PixelFormat {
    /// Bytes needed for one `width` x `height` frame in this format.
    pub fn frame_bytes(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Bgra8 | Self::Rgba8 => pixels * 4,
            Self::Nv12 => pixels + pixels / 2,
        }
    }

    /// The texture format frames upload as, if the format is GPU-bindable.
    pub fn texture_format(&self) -> Option<wgpu::TextureFormat> {
        match self {
            Self::Bgra8 => Some(wgpu::TextureFormat::Bgra8Unorm),
            Self::Rgba8 => Some(wgpu::TextureFormat::Rgba8Unorm),
            Self::Nv12 => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bgra8 => write!(f, "bgra8"),
            Self::Rgba8 => write!(f, "rgba8"),
            Self::Nv12 => write!(f, "nv12"),
        }
    }
}

/// Rational frame rate, e.g. 30/1 or 30000/1001.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framerate {
    pub numerator: u32,
    pub denominator: u32,
}

impl Framerate {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Nominal time between frames. Zero for a degenerate 0/x rate.
    pub fn frame_duration(&self) -> Duration {
        if self.numerator == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.denominator as f64 / self.numerator as f64)
    }

    pub fn as_f64(&self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self::new(30, 1)
    }
}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Which of a source's streams an encoding query refers to.
///
/// Sources commonly run a lower-resolution preview stream alongside the
/// full record stream; negotiation happens against one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Preview,
    Record,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preview => write!(f, "preview"),
            Self::Record => write!(f, "record"),
        }
    }
}

/// A fully specified uncompressed stream encoding.
///
/// # Examples
///
/// ```
/// use specto::{PixelFormat, StreamEncoding};
///
/// let enc = StreamEncoding::uncompressed(PixelFormat::Bgra8, 640, 480)
///     .with_frame_rate(30, 1);
/// assert_eq!(enc.frame_bytes(), 640 * 480 * 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEncoding {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Framerate,
}

impl StreamEncoding {
    /// An uncompressed encoding at the default 30/1 frame rate.
    pub fn uncompressed(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            frame_rate: Framerate::default(),
        }
    }

    pub fn with_frame_rate(mut self, numerator: u32, denominator: u32) -> Self {
        self.frame_rate = Framerate::new(numerator, denominator);
        self
    }

    /// Bytes in one frame of this encoding.
    pub fn frame_bytes(&self) -> usize {
        self.format.frame_bytes(self.width, self.height)
    }

    /// Nominal time between frames.
    pub fn frame_duration(&self) -> Duration {
        self.frame_rate.frame_duration()
    }
}

impl fmt::Display for StreamEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} @ {}",
            self.width, self.height, self.format, self.frame_rate
        )
    }
}

/// Codec selector for single-frame export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageCodec {
    Jpeg,
    Png,
    Bmp,
}

impl ImageCodec {
    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
            Self::Bmp => image::ImageFormat::Bmp,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Bmp => "bmp",
        }
    }
}

impl fmt::Display for ImageCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => write!(f, "jpeg"),
            Self::Png => write!(f, "png"),
            Self::Bmp => write!(f, "bmp"),
        }
    }
}

impl std::str::FromStr for ImageCodec {
    type Err = SpectoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "bmp" => Ok(Self::Bmp),
            other => Err(SpectoError::Unsupported(format!(
                "unknown image codec: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes() {
        assert_eq!(PixelFormat::Bgra8.frame_bytes(640, 480), 640 * 480 * 4);
        assert_eq!(PixelFormat::Rgba8.frame_bytes(2, 2), 16);
        // NV12: full-res luma plane plus half-res interleaved chroma
        assert_eq!(PixelFormat::Nv12.frame_bytes(640, 480), 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_gpu_bindability() {
        assert!(PixelFormat::Bgra8.texture_format().is_some());
        assert!(PixelFormat::Rgba8.texture_format().is_some());
        assert!(PixelFormat::Nv12.texture_format().is_none());
    }

    #[test]
    fn test_frame_duration() {
        let rate = Framerate::new(30, 1);
        let d = rate.frame_duration();
        assert!(d > Duration::from_millis(33) && d < Duration::from_millis(34));

        assert_eq!(Framerate::new(0, 1).frame_duration(), Duration::ZERO);

        let ntsc = Framerate::new(30000, 1001);
        assert!((ntsc.as_f64() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_encoding_display() {
        let enc = StreamEncoding::uncompressed(PixelFormat::Bgra8, 640, 480);
        assert_eq!(enc.to_string(), "640x480 bgra8 @ 30/1");
    }

    #[test]
    fn test_codec_parsing() {
        assert_eq!("jpeg".parse::<ImageCodec>().unwrap(), ImageCodec::Jpeg);
        assert_eq!("JPG".parse::<ImageCodec>().unwrap(), ImageCodec::Jpeg);
        assert_eq!("png".parse::<ImageCodec>().unwrap(), ImageCodec::Png);
        assert!("tiff".parse::<ImageCodec>().is_err());
    }
}

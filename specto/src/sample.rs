//! One captured frame as a GPU-resident, read-only sample.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::encoding::{ImageCodec, PixelFormat, StreamEncoding};
use crate::error::{Result, SpectoError};
use crate::gpu::{SlotHandle, TexturePool};

/// A non-owning view over one frame in the capture pipeline's texture
/// pool.
///
/// The sample holds a pool slot handle (index plus generation), not the
/// texture itself; [`release`](Self::release) hands the slot back for
/// reuse and every later operation fails with
/// [`SpectoError::SampleInvalid`]. Dropping the sample releases it, so
/// scoped use is leak-free on every exit path. All access is read-only:
/// any number of presenters may bind the same live sample concurrently,
/// and copies never mutate it.
pub struct FrameSample {
    pool: Arc<TexturePool>,
    handle: SlotHandle,
    released: AtomicBool,
    format: PixelFormat,
    width: u32,
    height: u32,
    timestamp: Duration,
    duration: Option<Duration>,
}

impl FrameSample {
    pub(crate) fn new(
        pool: Arc<TexturePool>,
        handle: SlotHandle,
        encoding: StreamEncoding,
        timestamp: Duration,
        duration: Option<Duration>,
    ) -> Self {
        Self {
            pool,
            handle,
            released: AtomicBool::new(false),
            format: encoding.format,
            width: encoding.width,
            height: encoding.height,
            timestamp,
            duration,
        }
    }

    /// Read-only GPU binding for a presenter's draw pass.
    pub fn bind_for_read(&self) -> Result<&wgpu::BindGroup> {
        self.pool.bind_group(self.handle)
    }

    /// Synchronous GPU-to-CPU readback: tightly packed rows in the
    /// sample's pixel format.
    ///
    /// Safe to call while presenters hold read bindings on the same
    /// sample. Blocks for one GPU round-trip; bounded, small.
    pub fn copy_to_buffer(&self) -> Result<Vec<u8>> {
        let texture = self.pool.texture(self.handle)?;
        self.pool
            .device()
            .read_texture_rows(texture, self.width, self.height)
    }

    /// GPU-to-GPU copy into a caller-owned texture of the same
    /// dimensions and format (and `COPY_DST` usage; wgpu validates
    /// format and usage).
    pub fn copy_to_texture(&self, target: &wgpu::Texture) -> Result<()> {
        let texture = self.pool.texture(self.handle)?;

        if target.width() != self.width || target.height() != self.height {
            return Err(SpectoError::DimensionMismatch {
                sample_width: self.width,
                sample_height: self.height,
                target_width: target.width(),
                target_height: target.height(),
            });
        }

        let gfx = self.pool.device();
        let mut encoder = gfx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Sample Copy Encoder"),
            });
        encoder.copy_texture_to_texture(
            texture.as_image_copy(),
            target.as_image_copy(),
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        gfx.queue().submit(Some(encoder.finish()));

        Ok(())
    }

    /// Encode the sample to a still image and write it to `path`.
    ///
    /// Suspends until the encode and write complete on a blocking
    /// worker. The sample stays valid afterwards; export can be
    /// repeated with different codecs.
    pub async fn save_to_file(&self, path: impl AsRef<Path>, codec: ImageCodec) -> Result<()> {
        let data = self.copy_to_buffer()?;
        let (width, height, format) = (self.width, self.height, self.format);
        let target = path.as_ref().to_path_buf();
        let shown = target.display().to_string();

        let encode = tokio::task::spawn_blocking(move || -> Result<()> {
            let rgba = match format {
                PixelFormat::Bgra8 => bgra_to_rgba(data),
                PixelFormat::Rgba8 => data,
                PixelFormat::Nv12 => {
                    return Err(SpectoError::Unsupported(
                        "planar samples have no export path".to_string(),
                    ));
                }
            };

            let image = image::RgbaImage::from_raw(width, height, rgba).ok_or_else(|| {
                SpectoError::Encode("frame bytes do not form an image".to_string())
            })?;

            match codec {
                // JPEG carries no alpha channel
                ImageCodec::Jpeg => image::DynamicImage::ImageRgba8(image)
                    .to_rgb8()
                    .save_with_format(&target, codec.image_format())?,
                _ => image.save_with_format(&target, codec.image_format())?,
            }
            Ok(())
        })
        .await;

        match encode {
            Ok(outcome) => outcome?,
            Err(e) => return Err(SpectoError::Encode(format!("encode task failed: {e}"))),
        }

        log::debug!("sample at {:?} exported to {shown} ({codec})", self.timestamp);
        Ok(())
    }

    /// Hand the texture slot back to the pool. Idempotent: the first
    /// call invalidates the sample, later calls are no-ops. `Drop` calls
    /// this, so an early return or panic cannot leak the slot.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.pool.release(self.handle) {
            log::trace!("sample at {:?} released", self.timestamp);
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.released.load(Ordering::Acquire) && self.pool.is_live(self.handle)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Capture timestamp; deltas between successive samples expose
    /// upstream frame drops.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Nominal frame period, when the source reported one.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

impl Drop for FrameSample {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for FrameSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSample")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .field("valid", &self.is_valid())
            .finish()
    }
}

fn bgra_to_rgba(mut data: Vec<u8>) -> Vec<u8> {
    for pixel in data.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_to_rgba_swaps_channels() {
        let bgra = vec![10, 20, 30, 40, 50, 60, 70, 80];
        let rgba = bgra_to_rgba(bgra);
        assert_eq!(rgba, vec![30, 20, 10, 40, 70, 60, 50, 80]);
    }
}

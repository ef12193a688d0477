//! Shared GPU device and cross-pipeline interop state.

use std::sync::Arc;

use crate::capture::CaptureSource;
use crate::encoding::StreamKind;
use crate::error::{Result, SpectoError};
use crate::gpu::pipeline::{self, PipelineBuilder, bind_group_entries};

/// The one GPU handle every component borrows.
///
/// Owns the wgpu instance/adapter/device/queue plus the interop state the
/// capture and presentation sides share: the bind group layout samples are
/// bound with, the sampler presenters draw with, and the output color
/// format negotiated against the capture session. Construct it once per
/// session with [`GraphicsDevice::from_session`] and hand out `Arc`s;
/// samples and presenters keep the device alive through their back
/// references, never the other way around.
pub struct GraphicsDevice {
    pub(crate) instance: wgpu::Instance,
    pub(crate) adapter: wgpu::Adapter,
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) adapter_info: wgpu::AdapterInfo,
    pub(crate) limits: wgpu::Limits,
    pub(crate) texture_bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) sampler: wgpu::Sampler,
    pub(crate) blit_pipeline_layout: wgpu::PipelineLayout,
    output_format: wgpu::TextureFormat,
}

impl GraphicsDevice {
    /// Create the shared device from an active capture session.
    ///
    /// The session must already be streaming and report an encoding whose
    /// pixel format is GPU-bindable; those checks run before any GPU
    /// resource is acquired, and a failure at any later point drops
    /// whatever was acquired so far. Fails with
    /// [`SpectoError::DeviceCreation`] on an unusable session or when no
    /// adapter is available.
    pub fn from_session(session: &dyn CaptureSource) -> Result<Arc<Self>> {
        if !session.is_streaming() {
            return Err(SpectoError::DeviceCreation(
                "capture session is not streaming".to_string(),
            ));
        }

        let encoding = session
            .current_encoding(StreamKind::Preview)
            .ok_or_else(|| {
                SpectoError::DeviceCreation(
                    "capture session reports no current encoding".to_string(),
                )
            })?;

        let output_format = encoding.format.texture_format().ok_or_else(|| {
            SpectoError::DeviceCreation(format!(
                "pixel format {} has no GPU-bindable texture form",
                encoding.format
            ))
        })?;

        if encoding.width == 0 || encoding.height == 0 {
            return Err(SpectoError::DeviceCreation(format!(
                "session encoding {encoding} has zero-sized dimensions"
            )));
        }

        let device = pollster::block_on(Self::new(output_format))?;

        if encoding.width > device.limits.max_texture_dimension_2d
            || encoding.height > device.limits.max_texture_dimension_2d
        {
            return Err(SpectoError::DeviceCreation(format!(
                "session encoding {} exceeds the adapter's 2D texture limit of {}",
                encoding, device.limits.max_texture_dimension_2d
            )));
        }

        Ok(Arc::new(device))
    }

    async fn new(output_format: wgpu::TextureFormat) -> Result<Self> {
        log::info!("Initializing graphics device...");

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| {
                SpectoError::DeviceCreation(format!("no suitable GPU adapter: {e}"))
            })?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU adapter: {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Specto Graphics Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| SpectoError::DeviceCreation(format!("device request failed: {e}")))?;

        let limits = device.limits();

        let texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Sample Bind Group Layout"),
                entries: &[bind_group_entries::texture(0), bind_group_entries::sampler(1)],
            });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Sample Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let blit_pipeline_layout = pipeline::create_pipeline_layout(
            &device,
            "Blit Pipeline Layout",
            &[&texture_bind_group_layout],
        );

        log::info!("Graphics device initialized");
        log::info!("  Backend: {:?}", adapter_info.backend);
        log::info!("  Output format: {output_format:?}");
        log::info!(
            "  Max texture size: {}x{}",
            limits.max_texture_dimension_2d,
            limits.max_texture_dimension_2d
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            adapter_info,
            limits,
            texture_bind_group_layout,
            sampler,
            blit_pipeline_layout,
            output_format,
        })
    }

    /// Build the fullscreen blit pipeline for a presentation target.
    pub(crate) fn create_blit_pipeline(
        &self,
        label: &str,
        format: wgpu::TextureFormat,
    ) -> wgpu::RenderPipeline {
        PipelineBuilder::new(&self.device, include_str!("shaders/blit.wgsl"), format)
            .with_label(label)
            .with_layout(&self.blit_pipeline_layout)
            .build()
    }

    /// Read a packed-format texture back to tightly packed CPU rows.
    ///
    /// Blocks the calling thread for one GPU round-trip. Rows come back
    /// in the texture's own byte order with the copy-alignment padding
    /// stripped.
    pub(crate) fn read_texture_rows(
        &self,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        let unpadded_bytes_per_row = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;
        let buffer_size = (padded_bytes_per_row * height) as wgpu::BufferAddress;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        let _ = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });

        pollster::block_on(receiver)
            .map_err(|_| SpectoError::CaptureFailed("readback callback dropped".to_string()))?
            .map_err(|e| SpectoError::CaptureFailed(format!("readback mapping failed: {e:?}")))?;

        let mapped = slice.get_mapped_range();
        let mut data = vec![0u8; (unpadded_bytes_per_row * height) as usize];
        for row in 0..height as usize {
            let src = row * padded_bytes_per_row as usize;
            let dst = row * unpadded_bytes_per_row as usize;
            data[dst..dst + unpadded_bytes_per_row as usize]
                .copy_from_slice(&mapped[src..src + unpadded_bytes_per_row as usize]);
        }
        drop(mapped);
        staging.unmap();

        Ok(data)
    }

    /// The raw wgpu device, for callers creating their own copy targets.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The submission queue shared by uploads and presenters.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The texture format this device was negotiated against.
    pub fn output_format(&self) -> wgpu::TextureFormat {
        self.output_format
    }

    /// Adapter name and backend, for diagnostics.
    pub fn adapter_summary(&self) -> String {
        format!(
            "{} ({:?})",
            self.adapter_info.name, self.adapter_info.backend
        )
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .field("output_format", &self.output_format)
            .finish()
    }
}

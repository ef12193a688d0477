//! Frame presentation onto composition and swap-chain targets.

use std::sync::Arc;

use crate::error::{Result, SpectoError};
use crate::gpu::GraphicsDevice;
use crate::sample::FrameSample;

/// Where presented frames end up.
///
/// Composition targets are a front/back texture pair the presenter owns;
/// `present` draws into the back buffer and flips, so the front buffer a
/// compositor reads is always a fully drawn frame. Swap-chain targets
/// wrap a window surface and flip through wgpu's own presentation queue.
enum PresentTarget {
    Composition {
        buffers: [wgpu::Texture; 2],
        views: [wgpu::TextureView; 2],
        front: usize,
    },
    SwapChain {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
}

/// Draws one [`FrameSample`] per call onto a fixed-size target.
///
/// Both target kinds share the same `present` contract: the sample must
/// be live and match the presenter's dimensions exactly. Presenting
/// never consumes or mutates the sample, so one sample may be shown by
/// several presenters before it is released.
///
/// A presenter is `&mut` per call and holds no queue of its own; to
/// drive one target from several tasks, serialize calls through a lock
/// or a channel.
pub struct Presenter {
    gfx: Arc<GraphicsDevice>,
    target: PresentTarget,
    pipeline: wgpu::RenderPipeline,
    width: u32,
    height: u32,
    frames_presented: u64,
}

impl Presenter {
    /// Presenter over an offscreen composition target.
    ///
    /// The presenter owns the front/back texture pair. The front buffer
    /// is readable through [`front_texture`](Self::front_texture) for
    /// compositors and through [`snapshot`](Self::snapshot) for
    /// verification.
    pub fn composition(gfx: &Arc<GraphicsDevice>, width: u32, height: u32) -> Result<Self> {
        Self::check_dimensions(width, height)?;

        let format = gfx.output_format();
        let make_buffer = || {
            gfx.device().create_texture(&wgpu::TextureDescriptor {
                label: Some("Presenter Buffer"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        };
        let buffers = [make_buffer(), make_buffer()];
        let views = [
            buffers[0].create_view(&wgpu::TextureViewDescriptor::default()),
            buffers[1].create_view(&wgpu::TextureViewDescriptor::default()),
        ];

        let pipeline = gfx.create_blit_pipeline("Present Pipeline", format);

        log::info!("Presenter ready: composition target, {width}x{height} ({format:?})");

        Ok(Self {
            gfx: gfx.clone(),
            target: PresentTarget::Composition {
                buffers,
                views,
                front: 0,
            },
            pipeline,
            width,
            height,
            frames_presented: 0,
        })
    }

    /// Presenter over a window's swap-chain surface.
    ///
    /// `target` is the caller's window or panel handle; the surface is
    /// created from it and configured once at the given size. A `Lost`
    /// or `Outdated` surface at present time is reconfigured to the
    /// same size and retried once.
    pub fn swap_chain(
        gfx: &Arc<GraphicsDevice>,
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        Self::check_dimensions(width, height)?;

        let surface = gfx
            .instance
            .create_surface(target)
            .map_err(|e| SpectoError::DeviceCreation(format!("surface creation failed: {e}")))?;

        let caps = surface.get_capabilities(&gfx.adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| *format == gfx.output_format())
            .or_else(|| caps.formats.iter().copied().find(|format| !format.is_srgb()))
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| {
                SpectoError::DeviceCreation(
                    "surface reports no compatible pixel formats".to_string(),
                )
            })?;
        let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode,
            desired_maximum_frame_latency: 2,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
        };
        surface.configure(gfx.device(), &config);

        let pipeline = gfx.create_blit_pipeline("Present Pipeline", format);

        log::info!("Presenter ready: swap-chain target, {width}x{height} ({format:?})");

        Ok(Self {
            gfx: gfx.clone(),
            target: PresentTarget::SwapChain { surface, config },
            pipeline,
            width,
            height,
            frames_presented: 0,
        })
    }

    /// Draw one sample onto the target and flip it to the screen (or to
    /// the front buffer).
    ///
    /// Fails with [`SpectoError::SampleInvalid`] on a released sample
    /// and [`SpectoError::DimensionMismatch`] when the sample's size
    /// differs from the target's; neither failure disturbs the last
    /// frame shown.
    pub fn present(&mut self, sample: &FrameSample) -> Result<()> {
        let bind_group = sample.bind_for_read()?;

        if sample.width() != self.width || sample.height() != self.height {
            return Err(SpectoError::DimensionMismatch {
                sample_width: sample.width(),
                sample_height: sample.height(),
                target_width: self.width,
                target_height: self.height,
            });
        }

        match &mut self.target {
            PresentTarget::Composition { views, front, .. } => {
                let back = 1 - *front;
                blit(&self.gfx, &self.pipeline, &views[back], bind_group);
                *front = back;
            }
            PresentTarget::SwapChain { surface, config } => {
                let frame = match surface.get_current_texture() {
                    Ok(frame) => frame,
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        log::debug!(
                            "Presentation surface lost, reconfiguring at {}x{}",
                            config.width,
                            config.height
                        );
                        surface.configure(self.gfx.device(), config);
                        surface.get_current_texture().map_err(|e| {
                            SpectoError::Present(format!("surface acquisition failed: {e}"))
                        })?
                    }
                    Err(e) => {
                        return Err(SpectoError::Present(format!(
                            "surface acquisition failed: {e}"
                        )));
                    }
                };

                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                blit(&self.gfx, &self.pipeline, &view, bind_group);
                frame.present();
            }
        }

        self.frames_presented += 1;
        log::trace!(
            "presented frame at {:?} ({} total)",
            sample.timestamp(),
            self.frames_presented
        );

        Ok(())
    }

    /// The last fully presented frame of a composition target.
    ///
    /// `None` for swap-chain targets and before the first `present`.
    pub fn front_texture(&self) -> Option<&wgpu::Texture> {
        match &self.target {
            PresentTarget::Composition { buffers, front, .. } if self.frames_presented > 0 => {
                Some(&buffers[*front])
            }
            _ => None,
        }
    }

    /// Read the front buffer back as tightly packed rows in the
    /// device's output format.
    ///
    /// Only composition targets can be read back; swap-chain frames
    /// belong to the windowing system once presented.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        match &self.target {
            PresentTarget::SwapChain { .. } => Err(SpectoError::Unsupported(
                "snapshot is not available for swap-chain targets".to_string(),
            )),
            PresentTarget::Composition { buffers, front, .. } => {
                if self.frames_presented == 0 {
                    return Err(SpectoError::Present(
                        "no frame has been presented yet".to_string(),
                    ));
                }
                self.gfx
                    .read_texture_rows(&buffers[*front], self.width, self.height)
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Frames successfully drawn and flipped since construction.
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    fn check_dimensions(width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(SpectoError::DeviceCreation(
                "presentation target must have non-zero dimensions".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Presenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.target {
            PresentTarget::Composition { .. } => "composition",
            PresentTarget::SwapChain { .. } => "swap-chain",
        };
        f.debug_struct("Presenter")
            .field("target", &kind)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frames_presented", &self.frames_presented)
            .finish()
    }
}

fn blit(
    gfx: &GraphicsDevice,
    pipeline: &wgpu::RenderPipeline,
    view: &wgpu::TextureView,
    bind_group: &wgpu::BindGroup,
) {
    let mut encoder = gfx
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Present Encoder"),
        });
    {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Present Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw(0..3, 0..1); // Full-screen triangle
    }
    gfx.queue().submit(Some(encoder.finish()));
}

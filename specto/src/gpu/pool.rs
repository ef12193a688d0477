//! Pooled frame textures with generation-checked handles.
//!
//! The capture pipeline recycles a small fixed set of GPU textures. A
//! sample never owns its texture; it holds a [`SlotHandle`] (index plus
//! the generation the slot was acquired at), and every access re-checks
//! that the generation still matches. Releasing a slot bumps its
//! generation, so a stale handle can never read memory that has been
//! handed back for reuse.

use std::sync::{Arc, Mutex};

use crate::encoding::StreamEncoding;
use crate::error::{Result, SpectoError};
use crate::gpu::GraphicsDevice;

/// Slots per pool. One in-flight request plus a few retained samples.
pub(crate) const POOL_CAPACITY: usize = 4;

/// Index plus acquisition generation; dead once the slot is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotHandle {
    index: usize,
    generation: u64,
}

struct SlotEntry {
    generation: u64,
    in_use: bool,
}

/// Pure slot bookkeeping, kept free of GPU types so the reuse rules can
/// be exercised without a device.
pub(crate) struct SlotArena {
    slots: Vec<SlotEntry>,
}

impl SlotArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| SlotEntry {
                    generation: 0,
                    in_use: false,
                })
                .collect(),
        }
    }

    /// Claim a free slot at its current generation.
    pub fn acquire(&mut self) -> Option<SlotHandle> {
        let (index, entry) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, entry)| !entry.in_use)?;
        entry.in_use = true;
        Some(SlotHandle {
            index,
            generation: entry.generation,
        })
    }

    /// Return a slot for reuse, invalidating every copy of the handle.
    /// False if the handle is stale or already released.
    pub fn release(&mut self, handle: SlotHandle) -> bool {
        match self.slots.get_mut(handle.index) {
            Some(entry) if entry.in_use && entry.generation == handle.generation => {
                entry.in_use = false;
                entry.generation += 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_live(&self, handle: SlotHandle) -> bool {
        self.slots
            .get(handle.index)
            .is_some_and(|entry| entry.in_use && entry.generation == handle.generation)
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|entry| entry.in_use).count()
    }
}

struct PoolTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

/// Fixed arena of same-encoding frame textures.
///
/// Textures are created once and never reallocated, so handle-checked
/// borrows of them stay valid for the pool's lifetime; only the slot
/// bookkeeping sits behind a lock.
pub(crate) struct TexturePool {
    device: Arc<GraphicsDevice>,
    encoding: StreamEncoding,
    textures: Vec<PoolTexture>,
    arena: Mutex<SlotArena>,
}

impl TexturePool {
    pub fn new(
        device: Arc<GraphicsDevice>,
        encoding: StreamEncoding,
        capacity: usize,
    ) -> Result<Arc<Self>> {
        let format = encoding.format.texture_format().ok_or_else(|| {
            SpectoError::EncodingNegotiation(format!(
                "pixel format {} is not GPU-bindable",
                encoding.format
            ))
        })?;

        let textures = (0..capacity)
            .map(|_| {
                let texture = device.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Frame Pool Texture"),
                    size: wgpu::Extent3d {
                        width: encoding.width,
                        height: encoding.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_DST
                        | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                });

                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                let bind_group = device.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Frame Pool Bind Group"),
                    layout: &device.texture_bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&device.sampler),
                        },
                    ],
                });

                PoolTexture {
                    texture,
                    bind_group,
                }
            })
            .collect();

        log::debug!("frame texture pool ready: {capacity} slots of {encoding}");

        Ok(Arc::new(Self {
            device,
            encoding,
            textures,
            arena: Mutex::new(SlotArena::new(capacity)),
        }))
    }

    /// Claim a slot and upload one frame's bytes into its texture.
    pub fn acquire_and_upload(&self, data: &[u8]) -> Result<SlotHandle> {
        let expected = self.encoding.frame_bytes();
        if data.len() != expected {
            return Err(SpectoError::CaptureFailed(format!(
                "frame size mismatch: expected {expected} bytes for {}, got {}",
                self.encoding,
                data.len()
            )));
        }

        let handle = {
            let mut arena = self
                .arena
                .lock()
                .map_err(|_| SpectoError::CaptureFailed("frame pool lock poisoned".to_string()))?;
            arena.acquire().ok_or_else(|| {
                SpectoError::CaptureFailed(format!(
                    "frame pool exhausted ({} slots live); release previous samples",
                    arena.live_count()
                ))
            })?
        };

        self.device.queue.write_texture(
            self.textures[handle.index].texture.as_image_copy(),
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.encoding.width * 4),
                rows_per_image: Some(self.encoding.height),
            },
            wgpu::Extent3d {
                width: self.encoding.width,
                height: self.encoding.height,
                depth_or_array_layers: 1,
            },
        );

        Ok(handle)
    }

    /// Bind group for a live slot; [`SpectoError::SampleInvalid`] if stale.
    pub fn bind_group(&self, handle: SlotHandle) -> Result<&wgpu::BindGroup> {
        self.check_live(handle)?;
        Ok(&self.textures[handle.index].bind_group)
    }

    /// Texture of a live slot; [`SpectoError::SampleInvalid`] if stale.
    pub fn texture(&self, handle: SlotHandle) -> Result<&wgpu::Texture> {
        self.check_live(handle)?;
        Ok(&self.textures[handle.index].texture)
    }

    /// Hand a slot back. False when the handle was already dead.
    pub fn release(&self, handle: SlotHandle) -> bool {
        if let Ok(mut arena) = self.arena.lock() {
            arena.release(handle)
        } else {
            false
        }
    }

    pub fn is_live(&self, handle: SlotHandle) -> bool {
        self.arena
            .lock()
            .map(|arena| arena.is_live(handle))
            .unwrap_or(false)
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    fn check_live(&self, handle: SlotHandle) -> Result<()> {
        if self.is_live(handle) {
            Ok(())
        } else {
            Err(SpectoError::SampleInvalid)
        }
    }
}

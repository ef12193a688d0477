//! GPU layer: the shared graphics device, the recycled frame texture
//! pool, and the blit pipeline presenters draw with.
//!
//! - `device`: wgpu bring-up and shared interop state
//! - `pool`: generation-checked texture arena backing frame samples
//! - `pipeline`: fullscreen blit pipeline construction

mod device;
mod pipeline;
mod pool;

pub use device::GraphicsDevice;
pub(crate) use pool::{POOL_CAPACITY, SlotHandle, TexturePool};

/// True when at least one GPU adapter can be acquired on this system.
///
/// Cheap enough to call from tests and tooling before committing to
/// device creation.
pub fn is_available() -> bool {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default())).is_ok()
}

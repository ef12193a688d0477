//! Live video capture presented straight from GPU memory.
//!
//! Specto bridges a live capture session (a camera, or a synthetic
//! pattern source for tests) to GPU presentation: frames land in a
//! fixed pool of GPU textures, are handed out as non-owning
//! [`FrameSample`] views, and are drawn by [`Presenter`]s onto
//! composition or swap-chain targets without leaving the GPU. The only
//! CPU round-trips are the explicit ones, buffer copies and still-image
//! export.
//!
//! The crate is organized around four cooperating pieces:
//!
//! - [`GraphicsDevice`]: the per-session GPU handle and the interop
//!   state capture and presentation share
//! - [`CaptureReader`]: pulls frames in capture order, one request at a
//!   time
//! - [`FrameSample`]: a release-aware view over one pooled frame
//! - [`Presenter`]: draws live samples onto a fixed-size target
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use specto::{
//!     CaptureReader, GraphicsDevice, PixelFormat, Presenter, StreamEncoding, SyntheticSource,
//! };
//!
//! # async fn run() -> specto::Result<()> {
//! let encoding = StreamEncoding::uncompressed(PixelFormat::Bgra8, 640, 480);
//! let session = Arc::new(SyntheticSource::new(encoding));
//!
//! let device = GraphicsDevice::from_session(session.as_ref())?;
//! let reader = CaptureReader::create(session, device.clone(), encoding).await?;
//! let mut presenter = Presenter::composition(&device, 640, 480)?;
//!
//! let sample = reader.next_sample().await?;
//! presenter.present(&sample)?;
//! sample.release();
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod encoding;
pub mod error;
pub mod gpu;
pub mod present;
pub mod sample;

#[cfg(feature = "camera")]
pub use capture::CameraSource;
pub use capture::{
    CaptureReader, CaptureSource, FrameStream, RawFrame, SyntheticSource, TestPattern,
};
pub use encoding::{Framerate, ImageCodec, PixelFormat, StreamEncoding, StreamKind};
pub use error::{Result, SpectoError};
pub use gpu::GraphicsDevice;
pub use present::Presenter;
pub use sample::FrameSample;

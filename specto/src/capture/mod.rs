//! Capture sources and the asynchronous frame reader.
//!
//! A [`CaptureSource`] is the boundary to whatever produces frames: the
//! built-in synthetic generator, or a camera pipeline when the `camera`
//! feature is enabled. Sources hand raw frames over a bounded channel
//! wrapped in a [`FrameStream`]; the [`CaptureReader`] turns that stream
//! into GPU-resident samples.
//!
//! - `reader`: negotiation, the single-outstanding-request policy, and
//!   frame-to-sample upload
//! - `synthetic`: paced test-pattern source, always available
//! - `camera`: GStreamer v4l2 source (`camera` feature)

mod reader;
mod synthetic;

#[cfg(feature = "camera")]
mod camera;

pub use reader::CaptureReader;
pub use synthetic::{SyntheticSource, TestPattern};

#[cfg(feature = "camera")]
pub use camera::CameraSource;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::encoding::{StreamEncoding, StreamKind};
use crate::error::{Result, SpectoError};

/// Channel depth between a capture backend and the reader. Small on
/// purpose: a slow consumer should push drops into the backend (where
/// they are counted) rather than accumulate latency here.
pub(crate) const FRAME_CHANNEL_DEPTH: usize = 8;

/// One decoded frame as raw bytes, as handed over by a capture backend.
///
/// `timestamp` is the backend's capture clock, monotonically increasing
/// within a stream. `duration` is the nominal frame period when the
/// backend knows it.
#[derive(Debug)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub timestamp: Duration,
    pub duration: Option<Duration>,
}

/// A live stream of frames opened from a capture source.
///
/// Couples the negotiated encoding with the frame channel, an optional
/// readiness signal (resolved once the backend is actually producing),
/// and an optional teardown guard dropped together with the stream.
pub struct FrameStream {
    encoding: StreamEncoding,
    frames: mpsc::Receiver<Result<RawFrame>>,
    ready: Option<oneshot::Receiver<Result<()>>>,
    _teardown: Option<Box<dyn std::any::Any + Send>>,
}

impl FrameStream {
    pub fn new(encoding: StreamEncoding, frames: mpsc::Receiver<Result<RawFrame>>) -> Self {
        Self {
            encoding,
            frames,
            ready: None,
            _teardown: None,
        }
    }

    /// Attach a readiness signal the backend resolves when streaming
    /// actually starts (camera preroll, pipeline state change).
    pub fn with_ready(mut self, ready: oneshot::Receiver<Result<()>>) -> Self {
        self.ready = Some(ready);
        self
    }

    /// Attach state that must live exactly as long as the stream and be
    /// dropped with it (pipeline handles, generator tasks).
    pub fn with_teardown(mut self, guard: impl std::any::Any + Send) -> Self {
        self._teardown = Some(Box::new(guard));
        self
    }

    pub fn encoding(&self) -> StreamEncoding {
        self.encoding
    }

    /// Wait for the backend's readiness signal, if it provided one.
    pub(crate) async fn ready(&mut self) -> Result<()> {
        match self.ready.take() {
            None => Ok(()),
            Some(rx) => match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(SpectoError::CaptureFailed(
                    "capture backend went away before becoming ready".to_string(),
                )),
            },
        }
    }

    /// Next frame in capture order; `None` once the backend stops.
    pub(crate) async fn recv(&mut self) -> Option<Result<RawFrame>> {
        self.frames.recv().await
    }
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream")
            .field("encoding", &self.encoding)
            .field("ready_pending", &self.ready.is_some())
            .field("teardown", &self._teardown.is_some())
            .finish()
    }
}

/// The capture-session boundary.
///
/// Implementors represent an already initialized, streaming video input.
/// Consumers query the current per-stream encoding and open a frame
/// stream negotiated against a desired encoding; everything upstream of
/// that (device enumeration, permissions) stays outside this crate.
pub trait CaptureSource: Send + Sync {
    /// Whether the session is currently delivering (or able to deliver)
    /// frames.
    fn is_streaming(&self) -> bool;

    /// The encoding currently configured for the given stream, if any.
    fn current_encoding(&self, kind: StreamKind) -> Option<StreamEncoding>;

    /// Open a frame stream producing the desired encoding.
    ///
    /// Fails with [`SpectoError::EncodingNegotiation`] when the source
    /// cannot produce it, and [`SpectoError::CaptureFailed`] when the
    /// session is not in a streamable state.
    fn open_stream(&self, desired: &StreamEncoding) -> Result<FrameStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::PixelFormat;

    #[test]
    fn test_stream_debug_reports_state() {
        let (_tx, rx) = mpsc::channel(1);
        let (_ready_tx, ready_rx) = oneshot::channel();
        let encoding = StreamEncoding::uncompressed(PixelFormat::Bgra8, 64, 48);

        let stream = FrameStream::new(encoding, rx).with_ready(ready_rx);

        let rendered = format!("{stream:?}");
        assert!(rendered.contains("FrameStream"), "got: {rendered}");
        assert!(rendered.contains("ready_pending: true"), "got: {rendered}");
    }
}

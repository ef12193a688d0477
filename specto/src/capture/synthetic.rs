//! Paced synthetic frame source for development and tests.
//!
//! Generates deterministic test patterns at the negotiated frame rate,
//! with the frame index stamped into pixel 0 so consumers can assert
//! delivery order. Failure and gap injection make the error paths of the
//! reader exercisable without real hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::capture::{CaptureSource, FRAME_CHANNEL_DEPTH, FrameStream, RawFrame};
use crate::encoding::{PixelFormat, StreamEncoding, StreamKind};
use crate::error::{Result, SpectoError};

/// Pattern drawn into generated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Vertical color bars, rotated one bar per frame.
    Bars,
    /// Diagonal gradient, scrolled a few steps per frame.
    Gradient,
}

/// An always-available capture source producing synthetic frames.
///
/// The source advertises one or more modes; `open_stream` accepts any
/// packed-format encoding whose dimensions match an advertised mode and
/// paces delivery with a generator task (first frame lands one period
/// after the stream opens, like a sensor warming up). Streams must be
/// opened from within a Tokio runtime.
pub struct SyntheticSource {
    modes: Vec<StreamEncoding>,
    pattern: TestPattern,
    streaming: AtomicBool,
    fail_after: Option<u64>,
    gap_after: Option<u64>,
}

impl SyntheticSource {
    pub fn new(mode: StreamEncoding) -> Self {
        Self {
            modes: vec![mode],
            pattern: TestPattern::Bars,
            streaming: AtomicBool::new(true),
            fail_after: None,
            gap_after: None,
        }
    }

    /// Advertise an additional mode. The first mode is the preview
    /// stream, the last the record stream.
    pub fn with_mode(mut self, mode: StreamEncoding) -> Self {
        self.modes.push(mode);
        self
    }

    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Deliver `frames` frames, then report a capture failure in-band,
    /// as a disconnected device would.
    pub fn with_failure_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Drop exactly one frame after frame index `frames`, leaving a
    /// double-length timestamp delta for consumers to observe.
    pub fn with_gap_after(mut self, frames: u64) -> Self {
        self.gap_after = Some(frames);
        self
    }

    /// Stop advertising and refuse new streams. Streams already open
    /// keep running until dropped.
    pub fn stop(&self) {
        self.streaming.store(false, Ordering::Release);
        log::debug!("synthetic source stopped");
    }
}

impl CaptureSource for SyntheticSource {
    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    fn current_encoding(&self, kind: StreamKind) -> Option<StreamEncoding> {
        if !self.is_streaming() {
            return None;
        }
        match kind {
            StreamKind::Preview => self.modes.first().copied(),
            StreamKind::Record => self.modes.last().copied(),
        }
    }

    fn open_stream(&self, desired: &StreamEncoding) -> Result<FrameStream> {
        if !self.is_streaming() {
            return Err(SpectoError::CaptureFailed(
                "synthetic source is stopped".to_string(),
            ));
        }

        if !matches!(desired.format, PixelFormat::Bgra8 | PixelFormat::Rgba8) {
            return Err(SpectoError::EncodingNegotiation(format!(
                "synthetic source produces packed formats only, not {}",
                desired.format
            )));
        }
        if desired.width == 0 || desired.height == 0 {
            return Err(SpectoError::EncodingNegotiation(
                "frame dimensions must be non-zero".to_string(),
            ));
        }

        let supported = self
            .modes
            .iter()
            .any(|mode| mode.width == desired.width && mode.height == desired.height);
        if !supported {
            let advertised = self
                .modes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(SpectoError::EncodingNegotiation(format!(
                "synthetic source cannot produce {desired}; advertised modes: {advertised}"
            )));
        }

        let encoding = *desired;
        let pattern = self.pattern;
        let fail_after = self.fail_after;
        let gap_after = self.gap_after;

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();

        let generator = tokio::spawn(async move {
            let period = match encoding.frame_duration() {
                d if d.is_zero() => Duration::from_millis(33),
                d => d,
            };
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            let _ = ready_tx.send(Ok(()));

            let mut index: u64 = 0;
            loop {
                ticker.tick().await;

                if fail_after.is_some_and(|after| index >= after) {
                    let _ = tx
                        .send(Err(SpectoError::CaptureFailed(
                            "synthetic source fault injected".to_string(),
                        )))
                        .await;
                    break;
                }

                // A gap consumes the tick without delivering, exactly as
                // an overloaded capture pipeline drops a frame.
                let dropped = gap_after.is_some_and(|after| index == after + 1);
                if !dropped {
                    let frame = RawFrame {
                        data: render_pixels(&encoding, pattern, index),
                        timestamp: frame_timestamp(period, index),
                        duration: Some(period),
                    };
                    if tx.send(Ok(frame)).await.is_err() {
                        break;
                    }
                }

                index += 1;
            }
        });

        log::debug!("synthetic stream opened: {encoding}");

        Ok(FrameStream::new(encoding, rx)
            .with_ready(ready_rx)
            .with_teardown(AbortOnDrop(generator)))
    }
}

/// Capture timestamp of frame `index`: an exact multiple of the frame
/// period, on the stream's own zero-based clock. Computed in `u64`
/// nanoseconds so the clock keeps advancing for any realistic stream
/// length.
fn frame_timestamp(period: Duration, index: u64) -> Duration {
    Duration::from_nanos((period.as_nanos() as u64).saturating_mul(index))
}

/// Stops the generator task as soon as its stream is dropped.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Packed pixel bytes for one frame, with the frame index stamped into
/// pixel 0.
fn render_pixels(encoding: &StreamEncoding, pattern: TestPattern, index: u64) -> Vec<u8> {
    let width = encoding.width as usize;
    let height = encoding.height as usize;
    let mut pixels = vec![0u32; width * height];

    match pattern {
        TestPattern::Bars => {
            const BARS: [(u8, u8, u8); 7] = [
                (255, 255, 255),
                (255, 255, 0),
                (0, 255, 255),
                (0, 255, 0),
                (255, 0, 255),
                (255, 0, 0),
                (0, 0, 255),
            ];
            for (i, pixel) in pixels.iter_mut().enumerate() {
                let col = i % width;
                let bar = (col * BARS.len() / width.max(1) + index as usize) % BARS.len();
                let (r, g, b) = BARS[bar];
                *pixel = pack(encoding.format, r, g, b, 0xFF);
            }
        }
        TestPattern::Gradient => {
            for (i, pixel) in pixels.iter_mut().enumerate() {
                let x = (i % width) as u64;
                let y = (i / width.max(1)) as u64;
                let v = ((x + y + index * 4) % 256) as u8;
                *pixel = pack(encoding.format, v, v, 255 - v, 0xFF);
            }
        }
    }

    if let Some(first) = pixels.first_mut() {
        *first = index as u32;
    }

    bytemuck::cast_slice(&pixels).to_vec()
}

fn pack(format: PixelFormat, r: u8, g: u8, b: u8, a: u8) -> u32 {
    match format {
        PixelFormat::Bgra8 => u32::from_ne_bytes([b, g, r, a]),
        PixelFormat::Rgba8 => u32::from_ne_bytes([r, g, b, a]),
        // Planar formats are rejected at negotiation
        PixelFormat::Nv12 => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode_640() -> StreamEncoding {
        StreamEncoding::uncompressed(PixelFormat::Bgra8, 640, 480)
    }

    #[test]
    fn test_preview_and_record_modes() {
        let record = StreamEncoding::uncompressed(PixelFormat::Bgra8, 1920, 1080);
        let source = SyntheticSource::new(mode_640()).with_mode(record);

        assert!(source.is_streaming());
        assert_eq!(source.current_encoding(StreamKind::Preview), Some(mode_640()));
        assert_eq!(source.current_encoding(StreamKind::Record), Some(record));

        source.stop();
        assert!(!source.is_streaming());
        assert_eq!(source.current_encoding(StreamKind::Preview), None);
    }

    #[tokio::test]
    async fn test_rejects_unknown_mode() {
        let source = SyntheticSource::new(mode_640());
        let desired = StreamEncoding::uncompressed(PixelFormat::Bgra8, 1280, 720);
        match source.open_stream(&desired) {
            Err(SpectoError::EncodingNegotiation(_)) => {}
            other => panic!("expected negotiation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejects_planar_format() {
        let source = SyntheticSource::new(mode_640());
        let desired = StreamEncoding::uncompressed(PixelFormat::Nv12, 640, 480);
        match source.open_stream(&desired) {
            Err(SpectoError::EncodingNegotiation(_)) => {}
            other => panic!("expected negotiation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejects_zero_dimensions() {
        // Advertising a degenerate mode does not make it producible
        let degenerate = StreamEncoding::uncompressed(PixelFormat::Bgra8, 0, 0);
        let source = SyntheticSource::new(degenerate);
        match source.open_stream(&degenerate) {
            Err(SpectoError::EncodingNegotiation(_)) => {}
            other => panic!("expected negotiation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stopped_source_refuses_streams() {
        let source = SyntheticSource::new(mode_640());
        source.stop();
        match source.open_stream(&mode_640()) {
            Err(SpectoError::CaptureFailed(_)) => {}
            other => panic!("expected capture failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delivers_stamped_frames_in_order() {
        let mode = StreamEncoding::uncompressed(PixelFormat::Bgra8, 8, 8).with_frame_rate(1000, 1);
        let source = SyntheticSource::new(mode);
        let mut stream = source.open_stream(&mode).unwrap();
        stream.ready().await.unwrap();

        for expected in 0u32..3 {
            let frame = stream.recv().await.unwrap().unwrap();
            assert_eq!(frame.data.len(), mode.frame_bytes());
            let stamp = u32::from_ne_bytes(frame.data[0..4].try_into().unwrap());
            assert_eq!(stamp, expected);
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let mode = mode_640();
        let a = render_pixels(&mode, TestPattern::Gradient, 7);
        let b = render_pixels(&mode, TestPattern::Gradient, 7);
        assert_eq!(a, b);
        assert_eq!(a.len(), mode.frame_bytes());

        let c = render_pixels(&mode, TestPattern::Gradient, 8);
        assert_ne!(a, c, "consecutive frames must differ");
    }

    #[test]
    fn test_timestamp_clock_does_not_wrap() {
        let period = Duration::from_millis(1);

        assert_eq!(frame_timestamp(period, 0), Duration::ZERO);
        assert_eq!(frame_timestamp(period, 3), period * 3);

        // The clock keeps stepping past u32::MAX frames
        let boundary = u64::from(u32::MAX);
        let before = frame_timestamp(period, boundary);
        let after = frame_timestamp(period, boundary + 1);
        assert!(after > before);
        assert_eq!(after - before, period);
    }
}

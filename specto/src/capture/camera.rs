//! V4L2 camera capture through GStreamer.
//!
//! Frames are decoded and converted on the GStreamer streaming thread
//! and handed to the reader over the stream channel. The appsink keeps
//! at most one buffer and drops upstream when the consumer lags, so a
//! slow reader costs frames (counted at the reader) rather than
//! latency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tokio::sync::{mpsc, oneshot};

use crate::capture::{CaptureSource, FRAME_CHANNEL_DEPTH, FrameStream, RawFrame};
use crate::encoding::{PixelFormat, StreamEncoding, StreamKind};
use crate::error::{Result, SpectoError};

/// Initialize GStreamer once; later calls return the first outcome.
fn ensure_gstreamer() -> Result<()> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

    INIT.get_or_init(|| match gst::init() {
        Ok(()) => {
            log::info!("GStreamer initialized");
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    })
    .clone()
    .map_err(|e| SpectoError::CaptureFailed(format!("GStreamer init failed: {e}")))
}

fn gst_format(format: PixelFormat) -> Option<gst_video::VideoFormat> {
    match format {
        PixelFormat::Bgra8 => Some(gst_video::VideoFormat::Bgra),
        PixelFormat::Rgba8 => Some(gst_video::VideoFormat::Rgba),
        PixelFormat::Nv12 => None,
    }
}

/// A live camera session on a V4L2 device node.
///
/// `videoconvert`/`videoscale`/`videorate` sit between the camera and
/// the appsink, so any packed encoding the GPU side can bind is
/// deliverable regardless of what the sensor natively produces.
#[derive(Debug)]
pub struct CameraSource {
    device: String,
    encoding: StreamEncoding,
    streaming: AtomicBool,
}

impl CameraSource {
    /// A session on `device` (for example `/dev/video0`) that will
    /// deliver `encoding` by default.
    pub fn new(device: impl Into<String>, encoding: StreamEncoding) -> Result<Self> {
        ensure_gstreamer()?;

        if gst_format(encoding.format).is_none() {
            return Err(SpectoError::EncodingNegotiation(format!(
                "pixel format {} is not deliverable from a camera stream",
                encoding.format
            )));
        }
        if encoding.width == 0 || encoding.height == 0 {
            return Err(SpectoError::EncodingNegotiation(
                "frame dimensions must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            device: device.into(),
            encoding,
            streaming: AtomicBool::new(true),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// End the session; open streams run down and new opens fail.
    pub fn stop(&self) {
        self.streaming.store(false, Ordering::Release);
    }
}

impl CaptureSource for CameraSource {
    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    fn current_encoding(&self, _kind: StreamKind) -> Option<StreamEncoding> {
        self.is_streaming().then_some(self.encoding)
    }

    fn open_stream(&self, desired: &StreamEncoding) -> Result<FrameStream> {
        if !self.is_streaming() {
            return Err(SpectoError::CaptureFailed(
                "camera session is stopped".to_string(),
            ));
        }

        let format = gst_format(desired.format).ok_or_else(|| {
            SpectoError::EncodingNegotiation(format!(
                "pixel format {} is not deliverable from a camera stream",
                desired.format
            ))
        })?;
        if desired.width == 0 || desired.height == 0 {
            return Err(SpectoError::EncodingNegotiation(
                "frame dimensions must be non-zero".to_string(),
            ));
        }

        let rate = desired.frame_rate;
        let caps = if rate.numerator > 0 {
            format!(
                "video/x-raw,format={},width={},height={},framerate={}/{}",
                format.to_str(),
                desired.width,
                desired.height,
                rate.numerator,
                rate.denominator
            )
        } else {
            format!(
                "video/x-raw,format={},width={},height={}",
                format.to_str(),
                desired.width,
                desired.height
            )
        };
        let pipeline_str = format!(
            "v4l2src device={} ! videoconvert ! videoscale ! videorate ! {caps} ! appsink name=sink",
            self.device
        );
        log::debug!("GStreamer pipeline: {pipeline_str}");

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| SpectoError::CaptureFailed(format!("pipeline construction failed: {e}")))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| {
                SpectoError::CaptureFailed("parsed element is not a pipeline".to_string())
            })?;

        let app_sink = pipeline
            .by_name("sink")
            .ok_or_else(|| SpectoError::CaptureFailed("appsink missing from pipeline".to_string()))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| {
                SpectoError::CaptureFailed("sink element is not an appsink".to_string())
            })?;

        // One buffered frame, drop upstream; a live source paces itself,
        // so no clock sync on top.
        app_sink.set_property("emit-signals", true);
        app_sink.set_property("sync", false);
        app_sink.set_property("max-buffers", 1u32);
        app_sink.set_property("drop", true);

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();
        let ready_slot = Arc::new(Mutex::new(Some(ready_tx)));

        let expected = desired.frame_bytes();
        let sink_tx = frame_tx.clone();
        let sink_ready = ready_slot.clone();
        app_sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    let data = map.as_slice();

                    if data.len() < expected {
                        let _ = sink_tx.blocking_send(Err(SpectoError::CaptureFailed(format!(
                            "camera delivered {} bytes, expected {expected}",
                            data.len()
                        ))));
                        return Err(gst::FlowError::Error);
                    }

                    let timestamp = buffer
                        .pts()
                        .map(|t| Duration::from_nanos(t.nseconds()))
                        .unwrap_or_default();
                    let duration = buffer.duration().map(|t| Duration::from_nanos(t.nseconds()));

                    if let Ok(mut slot) = sink_ready.lock() {
                        if let Some(ready) = slot.take() {
                            let _ = ready.send(Ok(()));
                        }
                    }

                    let frame = RawFrame {
                        data: data[..expected].to_vec(),
                        timestamp,
                        duration,
                    };
                    if sink_tx.blocking_send(Ok(frame)).is_err() {
                        // reader is gone
                        return Err(gst::FlowError::Eos);
                    }

                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let bus = pipeline
            .bus()
            .ok_or_else(|| SpectoError::CaptureFailed("pipeline has no message bus".to_string()))?;
        let bus_tx = frame_tx;
        let bus_ready = ready_slot;
        let watcher = std::thread::spawn(move || {
            for msg in bus.iter_timed(gst::ClockTime::NONE) {
                match msg.view() {
                    gst::MessageView::Error(err) => {
                        let failure = SpectoError::CaptureFailed(format!(
                            "{} ({:?})",
                            err.error(),
                            err.debug()
                        ));
                        if let Ok(mut slot) = bus_ready.lock() {
                            if let Some(ready) = slot.take() {
                                let _ = ready.send(Err(failure));
                                continue;
                            }
                        }
                        let _ = bus_tx.blocking_send(Err(failure));
                    }
                    gst::MessageView::Eos(_) => {
                        let _ = bus_tx.blocking_send(Err(SpectoError::CaptureFailed(
                            "camera stream ended".to_string(),
                        )));
                    }
                    _ => {}
                }
            }
        });

        let guard = PipelineGuard {
            pipeline: pipeline.clone(),
            app_sink,
            watcher: Some(watcher),
        };

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            SpectoError::CaptureFailed(format!("camera pipeline failed to start: {e}"))
        })?;

        log::info!("Camera stream opened: {} on {}", desired, self.device);

        Ok(FrameStream::new(*desired, frame_rx)
            .with_ready(ready_rx)
            .with_teardown(guard))
    }
}

/// Runs the pipeline down when the stream is dropped: callbacks
/// cleared, state to Null, bus flushed, watcher joined.
struct PipelineGuard {
    pipeline: gst::Pipeline,
    app_sink: gst_app::AppSink,
    watcher: Option<std::thread::JoinHandle<()>>,
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        log::debug!("Stopping camera pipeline");

        self.app_sink
            .set_callbacks(gst_app::AppSinkCallbacks::builder().build());

        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("Failed to set camera pipeline to Null: {e}");
        }
        let _ = self.pipeline.state(Some(gst::ClockTime::from_seconds(2)));

        if let Some(bus) = self.pipeline.bus() {
            bus.set_flushing(true);
        }
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
    }
}

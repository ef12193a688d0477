//! Asynchronous frame acquisition: capture stream in, GPU samples out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};

use crate::capture::{CaptureSource, FrameStream};
use crate::encoding::StreamEncoding;
use crate::error::{Result, SpectoError};
use crate::gpu::{GraphicsDevice, POOL_CAPACITY, TexturePool};
use crate::sample::FrameSample;

/// Wraps a live capture source and turns its frames into [`FrameSample`]s.
///
/// One request at a time: a `next_sample` call issued while another is
/// pending on the same reader is rejected with
/// [`SpectoError::ConcurrentRequest`], which keeps delivery strictly in
/// capture order with no reordering or duplication. Gaps the upstream
/// pipeline drops are surfaced through the sample timestamps and the
/// [`frames_dropped`](Self::frames_dropped) counter, never as errors.
///
/// `close` (or dropping the reader) wakes any pending request with
/// [`SpectoError::ReaderClosed`] and tears the stream down.
pub struct CaptureReader {
    _session: Arc<dyn CaptureSource>,
    pool: Arc<TexturePool>,
    encoding: StreamEncoding,
    stream: Mutex<Option<StreamState>>,
    in_flight: AtomicBool,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    frames_dropped: AtomicU64,
}

struct StreamState {
    stream: FrameStream,
    last_timestamp: Option<Duration>,
}

impl CaptureReader {
    /// Negotiate `desired` against the session and start reading.
    ///
    /// Suspends until the source reports its stream ready (camera
    /// preroll; immediate for synthetic sources). Fails with
    /// [`SpectoError::EncodingNegotiation`] when the desired encoding is
    /// not producible or not GPU-bindable.
    pub async fn create(
        session: Arc<dyn CaptureSource>,
        device: Arc<GraphicsDevice>,
        desired: StreamEncoding,
    ) -> Result<Arc<Self>> {
        if desired.format.texture_format().is_none() {
            return Err(SpectoError::EncodingNegotiation(format!(
                "requested format {} is not GPU-bindable",
                desired.format
            )));
        }
        if desired.width == 0 || desired.height == 0 {
            return Err(SpectoError::EncodingNegotiation(
                "frame dimensions must be non-zero".to_string(),
            ));
        }

        let mut stream = session.open_stream(&desired)?;
        stream.ready().await?;

        let encoding = stream.encoding();
        let pool = TexturePool::new(device, encoding, POOL_CAPACITY)?;
        let (closed_tx, closed_rx) = watch::channel(false);

        log::info!("capture reader ready: {encoding}");

        Ok(Arc::new(Self {
            _session: session,
            pool,
            encoding,
            stream: Mutex::new(Some(StreamState {
                stream,
                last_timestamp: None,
            })),
            in_flight: AtomicBool::new(false),
            closed_tx,
            closed_rx,
            frames_dropped: AtomicU64::new(0),
        }))
    }

    /// Suspend until the next frame arrives and return it as a sample.
    ///
    /// At most one call may be pending per reader; see the type docs for
    /// the full policy. A [`SpectoError::CaptureFailed`] return leaves
    /// the reader usable (retrying is the caller's decision);
    /// [`SpectoError::ReaderClosed`] is terminal.
    pub async fn next_sample(&self) -> Result<FrameSample> {
        if self.is_closed() {
            return Err(SpectoError::ReaderClosed);
        }

        let _guard = InFlightGuard::claim(&self.in_flight)?;
        let mut closed_rx = self.closed_rx.clone();

        let mut slot = self.stream.lock().await;
        let Some(mut state) = slot.take() else {
            return Err(SpectoError::ReaderClosed);
        };

        let outcome = tokio::select! {
            _ = closed_rx.wait_for(|closed| *closed) => None,
            frame = state.stream.recv() => Some(frame),
        };

        let Some(received) = outcome else {
            // Closed while waiting: the stream drops here, the caller
            // fails instead of hanging.
            log::debug!("capture reader closed while a request was pending");
            return Err(SpectoError::ReaderClosed);
        };

        let frame = match received {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                *slot = Some(state);
                return Err(e);
            }
            None => {
                *slot = Some(state);
                return Err(SpectoError::CaptureFailed(
                    "capture stream ended".to_string(),
                ));
            }
        };

        if let Some(previous) = state.last_timestamp {
            let delta = frame.timestamp.saturating_sub(previous);
            let missed = missed_frames(delta, self.encoding.frame_duration());
            if missed > 0 {
                self.frames_dropped.fetch_add(missed, Ordering::AcqRel);
                log::debug!(
                    "capture gap: {missed} frame(s) dropped upstream (timestamp delta {delta:?})"
                );
            }
        }
        state.last_timestamp = Some(frame.timestamp);

        let upload = self.pool.acquire_and_upload(&frame.data);
        *slot = Some(state);
        let handle = upload?;

        log::trace!("frame at {:?} uploaded", frame.timestamp);

        Ok(FrameSample::new(
            self.pool.clone(),
            handle,
            self.encoding,
            frame.timestamp,
            frame.duration,
        ))
    }

    /// Stop reading. Idempotent; any pending `next_sample` fails with
    /// [`SpectoError::ReaderClosed`] and the stream is torn down.
    pub fn close(&self) {
        let was_closed = self.closed_tx.send_replace(true);
        if was_closed {
            return;
        }

        // A pending request holds the stream and drops it on wake; if
        // nobody does, release it here.
        if let Ok(mut slot) = self.stream.try_lock() {
            *slot = None;
        }

        log::debug!("capture reader closed");
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// The encoding negotiated at creation; every returned sample
    /// matches it.
    pub fn encoding(&self) -> StreamEncoding {
        self.encoding
    }

    /// Estimated frames dropped upstream, from timestamp deltas.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Acquire)
    }
}

impl Drop for CaptureReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Claims the reader's single request slot; releases it on every exit
/// path, including early returns and cancellation.
#[derive(Debug)]
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn claim(flag: &'a AtomicBool) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SpectoError::ConcurrentRequest);
        }
        Ok(Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Whole frame periods missing from a timestamp delta, with half a
/// period of jitter tolerance.
fn missed_frames(delta: Duration, period: Duration) -> u64 {
    if period.is_zero() || delta <= period + period / 2 {
        return 0;
    }
    ((delta.as_secs_f64() / period.as_secs_f64()).round() as u64).saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_is_exclusive() {
        let flag = AtomicBool::new(false);

        let first = InFlightGuard::claim(&flag).unwrap();
        match InFlightGuard::claim(&flag) {
            Err(SpectoError::ConcurrentRequest) => {}
            other => panic!("expected rejection, got {other:?}"),
        }

        drop(first);
        assert!(InFlightGuard::claim(&flag).is_ok());
    }

    #[test]
    fn test_missed_frame_estimate() {
        let period = Duration::from_millis(33);

        assert_eq!(missed_frames(period, period), 0);
        // Jitter under half a period is not a gap
        assert_eq!(missed_frames(period + Duration::from_millis(10), period), 0);
        assert_eq!(missed_frames(period * 2, period), 1);
        assert_eq!(missed_frames(period * 4, period), 3);
        assert_eq!(missed_frames(period, Duration::ZERO), 0);
    }
}

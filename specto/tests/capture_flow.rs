/// Integration tests for the capture-to-presentation flow
/// These tests exercise the full path: synthetic session -> device ->
/// reader -> samples -> presenter. Tests that need a real GPU adapter
/// skip themselves on machines without one; session and negotiation
/// validation runs everywhere.
use std::sync::Arc;
use std::time::Duration;

use specto::{
    CaptureReader, CaptureSource, FrameSample, GraphicsDevice, ImageCodec, PixelFormat, Presenter,
    SpectoError, StreamEncoding, StreamKind, SyntheticSource,
};

fn gpu_or_skip() -> bool {
    let available = specto::gpu::is_available();
    if !available {
        eprintln!("no GPU adapter available, skipping");
    }
    available
}

fn test_encoding() -> StreamEncoding {
    // 1000 fps keeps frame waits at a millisecond; 64x4 bytes per row
    // is exactly one copy-alignment unit
    StreamEncoding::uncompressed(PixelFormat::Bgra8, 64, 48).with_frame_rate(1000, 1)
}

async fn open_reader(
    source: SyntheticSource,
) -> (Arc<SyntheticSource>, Arc<GraphicsDevice>, Arc<CaptureReader>) {
    let session = Arc::new(source);
    let device = GraphicsDevice::from_session(session.as_ref()).unwrap();
    let encoding = session.current_encoding(StreamKind::Preview).unwrap();
    let reader = CaptureReader::create(session.clone(), device.clone(), encoding)
        .await
        .unwrap();
    (session, device, reader)
}

fn frame_index(sample: &FrameSample) -> u32 {
    // The synthetic source stamps the frame index into the first pixel
    let data = sample.copy_to_buffer().unwrap();
    u32::from_ne_bytes([data[0], data[1], data[2], data[3]])
}

#[test]
fn test_device_requires_streaming_session() {
    let session = SyntheticSource::new(test_encoding());
    session.stop();

    match GraphicsDevice::from_session(&session) {
        Err(SpectoError::DeviceCreation(_)) => {}
        other => panic!("expected DeviceCreation, got {other:?}"),
    }
}

#[test]
fn test_device_rejects_unbindable_format() {
    let planar = StreamEncoding::uncompressed(PixelFormat::Nv12, 64, 48);
    let session = SyntheticSource::new(planar);

    match GraphicsDevice::from_session(&session) {
        Err(SpectoError::DeviceCreation(msg)) => {
            assert!(msg.contains("nv12"), "unexpected message: {msg}")
        }
        other => panic!("expected DeviceCreation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_negotiation_rejects_unsupported_encodings() {
    let session = SyntheticSource::new(test_encoding());

    // Dimensions the source never advertised
    let unadvertised = StreamEncoding::uncompressed(PixelFormat::Bgra8, 1920, 1080);
    match session.open_stream(&unadvertised) {
        Err(SpectoError::EncodingNegotiation(_)) => {}
        other => panic!("expected EncodingNegotiation, got {other:?}"),
    }

    // A planar format has no packed byte layout to deliver
    let planar = StreamEncoding::uncompressed(PixelFormat::Nv12, 64, 48);
    match session.open_stream(&planar) {
        Err(SpectoError::EncodingNegotiation(_)) => {}
        other => panic!("expected EncodingNegotiation, got {other:?}"),
    }

    // A stopped session refuses streams outright
    session.stop();
    match session.open_stream(&test_encoding()) {
        Err(SpectoError::CaptureFailed(_)) => {}
        other => panic!("expected CaptureFailed, got {other:?}"),
    }
}

#[test]
fn test_zero_dimension_session_rejected() {
    let degenerate = StreamEncoding::uncompressed(PixelFormat::Bgra8, 640, 0);
    let session = SyntheticSource::new(degenerate);

    match GraphicsDevice::from_session(&session) {
        Err(SpectoError::DeviceCreation(msg)) => {
            assert!(msg.contains("zero"), "unexpected message: {msg}")
        }
        other => panic!("expected DeviceCreation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_zero_dimension_request_rejected() {
    if !gpu_or_skip() {
        return;
    }

    let good = Arc::new(SyntheticSource::new(test_encoding()));
    let device = GraphicsDevice::from_session(good.as_ref()).unwrap();

    // Even a session advertising the degenerate mode never reaches
    // texture allocation; the request dies at negotiation
    let degenerate = StreamEncoding::uncompressed(PixelFormat::Bgra8, 0, 0);
    let session = Arc::new(SyntheticSource::new(degenerate));
    let err = CaptureReader::create(session, device, degenerate).await.err();
    match err {
        Some(SpectoError::EncodingNegotiation(_)) => {}
        other => panic!("expected EncodingNegotiation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_capture_present_snapshot_flow() {
    if !gpu_or_skip() {
        return;
    }

    let (_session, device, reader) = open_reader(SyntheticSource::new(test_encoding())).await;
    let mut presenter = Presenter::composition(&device, 64, 48).unwrap();

    let mut timestamps = Vec::new();
    for expected_index in 0..4u32 {
        let sample = reader.next_sample().await.unwrap();
        assert_eq!(sample.width(), 64);
        assert_eq!(sample.height(), 48);
        assert_eq!(sample.format(), PixelFormat::Bgra8);
        assert_eq!(frame_index(&sample), expected_index);
        timestamps.push(sample.timestamp());

        presenter.present(&sample).unwrap();

        // What the presenter shows is byte-for-byte the sample
        let shown = presenter.snapshot().unwrap();
        let source = sample.copy_to_buffer().unwrap();
        assert_eq!(shown, source);

        sample.release();
    }

    assert_eq!(presenter.frames_presented(), 4);
    assert!(presenter.front_texture().is_some());
    for pair in timestamps.windows(2) {
        assert!(pair[0] < pair[1], "timestamps must increase: {pair:?}");
    }
    assert_eq!(reader.frames_dropped(), 0);
}

#[tokio::test]
async fn test_readback_strips_row_padding() {
    if !gpu_or_skip() {
        return;
    }

    // 50x4 = 200 bytes per row, under the 256-byte copy alignment, so
    // both readback paths must strip per-row padding
    let mode = StreamEncoding::uncompressed(PixelFormat::Bgra8, 50, 30).with_frame_rate(1000, 1);
    let (_session, device, reader) = open_reader(SyntheticSource::new(mode)).await;
    let mut presenter = Presenter::composition(&device, 50, 30).unwrap();

    let sample = reader.next_sample().await.unwrap();
    let bytes = sample.copy_to_buffer().unwrap();
    assert_eq!(bytes.len(), 50 * 30 * 4);

    presenter.present(&sample).unwrap();
    assert_eq!(presenter.snapshot().unwrap(), bytes);
}

#[tokio::test]
async fn test_concurrent_requests_rejected() {
    if !gpu_or_skip() {
        return;
    }

    let (_session, _device, reader) = open_reader(SyntheticSource::new(test_encoding())).await;

    let pending = tokio::spawn({
        let reader = reader.clone();
        async move { reader.next_sample().await }
    });
    tokio::task::yield_now().await;

    // The first request is parked waiting for a frame; a second one
    // must be refused, not queued
    match reader.next_sample().await {
        Err(SpectoError::ConcurrentRequest) => {}
        other => panic!("expected ConcurrentRequest, got {other:?}"),
    }

    let sample = pending.await.unwrap().unwrap();
    assert!(sample.is_valid());

    // With the slot free again, sequential requests keep working
    let next = reader.next_sample().await.unwrap();
    assert!(next.timestamp() > sample.timestamp());
}

#[tokio::test]
async fn test_close_cancels_pending_request() {
    if !gpu_or_skip() {
        return;
    }

    let slow = StreamEncoding::uncompressed(PixelFormat::Bgra8, 64, 48).with_frame_rate(2, 1);
    let (_session, _device, reader) = open_reader(SyntheticSource::new(slow)).await;

    let pending = tokio::spawn({
        let reader = reader.clone();
        async move { reader.next_sample().await }
    });
    tokio::task::yield_now().await;

    reader.close();

    match pending.await.unwrap() {
        Err(SpectoError::ReaderClosed) => {}
        other => panic!("expected ReaderClosed, got {other:?}"),
    }

    // Closed is terminal and idempotent
    reader.close();
    assert!(reader.is_closed());
    match reader.next_sample().await {
        Err(SpectoError::ReaderClosed) => {}
        other => panic!("expected ReaderClosed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_released_sample_is_rejected_everywhere() {
    if !gpu_or_skip() {
        return;
    }

    let (_session, device, reader) = open_reader(SyntheticSource::new(test_encoding())).await;
    let mut presenter = Presenter::composition(&device, 64, 48).unwrap();

    let sample = reader.next_sample().await.unwrap();
    assert!(sample.is_valid());

    sample.release();
    sample.release(); // second release is a no-op
    assert!(!sample.is_valid());

    match sample.bind_for_read() {
        Err(SpectoError::SampleInvalid) => {}
        other => panic!("expected SampleInvalid, got {other:?}"),
    }
    match sample.copy_to_buffer() {
        Err(SpectoError::SampleInvalid) => {}
        other => panic!("expected SampleInvalid, got {other:?}"),
    }
    match presenter.present(&sample) {
        Err(SpectoError::SampleInvalid) => {}
        other => panic!("expected SampleInvalid, got {other:?}"),
    }
    match sample.save_to_file("/tmp/never-written.png", ImageCodec::Png).await {
        Err(SpectoError::SampleInvalid) => {}
        other => panic!("expected SampleInvalid, got {other:?}"),
    }

    // The slot went back to the pool; capture continues
    let replacement = reader.next_sample().await.unwrap();
    assert!(replacement.is_valid());
}

#[tokio::test]
async fn test_pool_exhaustion_is_reported_and_recoverable() {
    if !gpu_or_skip() {
        return;
    }

    let (_session, _device, reader) = open_reader(SyntheticSource::new(test_encoding())).await;

    let mut held = Vec::new();
    let mut failure = None;
    for _ in 0..16 {
        match reader.next_sample().await {
            Ok(sample) => held.push(sample),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    match failure {
        Some(SpectoError::CaptureFailed(msg)) => {
            assert!(msg.contains("pool"), "unexpected message: {msg}")
        }
        other => panic!("expected CaptureFailed, got {other:?}"),
    }
    assert_eq!(held.len(), 4);

    // Releasing one slot is enough to capture again
    held.pop().unwrap().release();
    let recovered = reader.next_sample().await.unwrap();
    assert!(recovered.is_valid());
}

#[tokio::test]
async fn test_dimension_mismatch_on_present_and_copy() {
    if !gpu_or_skip() {
        return;
    }

    let (_session, device, reader) = open_reader(SyntheticSource::new(test_encoding())).await;
    let mut small = Presenter::composition(&device, 32, 32).unwrap();

    let sample = reader.next_sample().await.unwrap();

    match small.present(&sample) {
        Err(SpectoError::DimensionMismatch {
            sample_width,
            sample_height,
            target_width,
            target_height,
        }) => {
            assert_eq!((sample_width, sample_height), (64, 48));
            assert_eq!((target_width, target_height), (32, 32));
        }
        other => panic!("expected DimensionMismatch, got {other:?}"),
    }

    let target = device.device().create_texture(&wgpu::TextureDescriptor {
        label: Some("Mismatch Target"),
        size: wgpu::Extent3d {
            width: 32,
            height: 32,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: device.output_format(),
        usage: wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    match sample.copy_to_texture(&target) {
        Err(SpectoError::DimensionMismatch { .. }) => {}
        other => panic!("expected DimensionMismatch, got {other:?}"),
    }

    // The failed present left no half-drawn frame behind
    assert_eq!(small.frames_presented(), 0);
    assert!(small.front_texture().is_none());
}

#[tokio::test]
async fn test_copy_to_texture_same_dimensions() {
    if !gpu_or_skip() {
        return;
    }

    let (_session, device, reader) = open_reader(SyntheticSource::new(test_encoding())).await;
    let sample = reader.next_sample().await.unwrap();

    let target = device.device().create_texture(&wgpu::TextureDescriptor {
        label: Some("Copy Target"),
        size: wgpu::Extent3d {
            width: 64,
            height: 48,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: device.output_format(),
        usage: wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    sample.copy_to_texture(&target).unwrap();

    // Sample stays live and readable after the copy
    assert!(sample.is_valid());
    assert_eq!(frame_index(&sample), 0);
}

#[tokio::test]
async fn test_capture_failure_surfaces_in_band() {
    if !gpu_or_skip() {
        return;
    }

    let source = SyntheticSource::new(test_encoding()).with_failure_after(2);
    let (_session, _device, reader) = open_reader(source).await;

    let first = reader.next_sample().await.unwrap();
    assert_eq!(frame_index(&first), 0);
    let second = reader.next_sample().await.unwrap();
    assert_eq!(frame_index(&second), 1);

    match reader.next_sample().await {
        Err(SpectoError::CaptureFailed(_)) => {}
        other => panic!("expected CaptureFailed, got {other:?}"),
    }

    // The failure does not close the reader; it reports stream end
    assert!(!reader.is_closed());
    match reader.next_sample().await {
        Err(SpectoError::CaptureFailed(_)) => {}
        other => panic!("expected CaptureFailed, got {other:?}"),
    }

    // Samples captured before the failure stay usable
    assert!(first.is_valid());
    assert_eq!(frame_index(&first), 0);
}

#[tokio::test]
async fn test_frame_gap_is_counted_not_fatal() {
    if !gpu_or_skip() {
        return;
    }

    let source = SyntheticSource::new(test_encoding()).with_gap_after(1);
    let (_session, device, reader) = open_reader(source).await;
    let mut presenter = Presenter::composition(&device, 64, 48).unwrap();

    let mut samples = Vec::new();
    for _ in 0..3 {
        let sample = reader.next_sample().await.unwrap();
        presenter.present(&sample).unwrap();
        samples.push(sample);
    }

    // Frame 2 never arrived: indices skip it and the timestamp delta
    // doubles, but capture just keeps going
    assert_eq!(frame_index(&samples[0]), 0);
    assert_eq!(frame_index(&samples[1]), 1);
    assert_eq!(frame_index(&samples[2]), 3);

    let period = Duration::from_millis(1);
    let delta = samples[2].timestamp() - samples[1].timestamp();
    assert_eq!(delta, 2 * period);
    assert_eq!(reader.frames_dropped(), 1);
}

#[tokio::test]
async fn test_sample_shared_by_multiple_presenters() {
    if !gpu_or_skip() {
        return;
    }

    let (_session, device, reader) = open_reader(SyntheticSource::new(test_encoding())).await;
    let mut first = Presenter::composition(&device, 64, 48).unwrap();
    let mut second = Presenter::composition(&device, 64, 48).unwrap();

    let sample = reader.next_sample().await.unwrap();
    let before = sample.copy_to_buffer().unwrap();

    first.present(&sample).unwrap();
    second.present(&sample).unwrap();

    // Presenting reads the sample; it never writes it
    assert_eq!(sample.copy_to_buffer().unwrap(), before);

    let a = first.snapshot().unwrap();
    let b = second.snapshot().unwrap();
    assert_eq!(a, b);

    // Releasing the sample does not disturb already-presented frames
    sample.release();
    assert_eq!(first.snapshot().unwrap(), a);
}

#[tokio::test]
async fn test_end_to_end_grab_present_export() {
    if !gpu_or_skip() {
        return;
    }

    let encoding = StreamEncoding::uncompressed(PixelFormat::Bgra8, 640, 480);
    let (_session, device, reader) = open_reader(SyntheticSource::new(encoding)).await;
    let mut primary = Presenter::composition(&device, 640, 480).unwrap();
    let mut secondary = Presenter::composition(&device, 640, 480).unwrap();

    let sample = reader.next_sample().await.unwrap();
    assert_eq!((sample.width(), sample.height()), (640, 480));

    primary.present(&sample).unwrap();
    secondary.present(&sample).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.jpg");
    sample.save_to_file(&path, ImageCodec::Jpeg).await.unwrap();
    assert!(std::fs::metadata(&path).unwrap().len() > 0);

    // Release is the end of the sample's life; everything after fails
    sample.release();
    match sample.bind_for_read() {
        Err(SpectoError::SampleInvalid) => {}
        other => panic!("expected SampleInvalid, got {other:?}"),
    }
    match secondary.present(&sample) {
        Err(SpectoError::SampleInvalid) => {}
        other => panic!("expected SampleInvalid, got {other:?}"),
    }
}

#[tokio::test]
async fn test_save_to_file_exports_readable_images() {
    if !gpu_or_skip() {
        return;
    }

    let (_session, _device, reader) = open_reader(SyntheticSource::new(test_encoding())).await;
    let sample = reader.next_sample().await.unwrap();

    let dir = tempfile::tempdir().unwrap();

    let png_path = dir.path().join("frame.png");
    sample.save_to_file(&png_path, ImageCodec::Png).await.unwrap();
    let png = image::open(&png_path).unwrap();
    assert_eq!((png.width(), png.height()), (64, 48));

    // Export does not consume the sample; a second codec works too
    let jpeg_path = dir.path().join("frame.jpg");
    sample.save_to_file(&jpeg_path, ImageCodec::Jpeg).await.unwrap();
    let jpeg = image::open(&jpeg_path).unwrap();
    assert_eq!((jpeg.width(), jpeg.height()), (64, 48));

    // PNG is lossless: the decoded pixels are the BGRA sample bytes
    // with channels reordered
    let bytes = sample.copy_to_buffer().unwrap();
    let rgba = png.to_rgba8();
    let pixel = rgba.get_pixel(1, 0);
    assert_eq!(pixel.0, [bytes[6], bytes[5], bytes[4], bytes[7]]);

    assert!(sample.is_valid());
}

#[tokio::test]
async fn test_snapshot_before_first_present_fails() {
    if !gpu_or_skip() {
        return;
    }

    let session = Arc::new(SyntheticSource::new(test_encoding()));
    let device = GraphicsDevice::from_session(session.as_ref()).unwrap();
    let presenter = Presenter::composition(&device, 64, 48).unwrap();

    assert!(presenter.front_texture().is_none());
    match presenter.snapshot() {
        Err(SpectoError::Present(_)) => {}
        other => panic!("expected Present, got {other:?}"),
    }
}

mod common;

use std::time::Duration;

use common::{test_config, wait_until, ScriptedDevice, PROBE_POINT};
use stereocam::capture::device::Setting;
use stereocam::capture::frame::{DenseMeasureKind, View};
use stereocam::error::{CaptureError, ControlError, QueryError};
use stereocam::{CapturePipeline, PipelineState};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publishes_frames_in_timestamp_order() {
    let (device, probe) = ScriptedDevice::new();
    let handle = CapturePipeline::hardware(device, test_config()).spawn().unwrap();
    let camera = handle.camera();

    let mut seen = Vec::new();
    let done = wait_until(WAIT, || {
        if let Some(frame) = camera.latest_frame() {
            seen.push(frame.timestamp);
        }
        camera.metrics().frames_published >= 12
    })
    .await;
    assert!(done);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(camera.state(), PipelineState::Running);

    handle.shutdown().await.unwrap();
    assert_eq!(camera.state(), PipelineState::Closed);
    assert_eq!(probe.get().close_calls, 1);

    // Capacity 8: the history holds the newest 8 frames, oldest first
    let history = camera.history().snapshot();
    assert_eq!(history.len(), 8);
    assert!(history.windows(2).all(|w| w[0].sequence + 1 == w[1].sequence));
    assert_eq!(history.last().map(|f| f.sequence), camera.latest_frame().map(|f| f.sequence));
    assert!(camera.metrics().frames_evicted >= 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queries_answer_from_latest_frame() {
    let (device, _probe) = ScriptedDevice::new();
    let handle = CapturePipeline::hardware(device, test_config()).spawn().unwrap();
    let camera = handle.camera();

    assert!(wait_until(WAIT, || camera.has_frames()).await);
    let point = camera.get_point(1, 1).unwrap();
    assert!((point.y - f64::from(PROBE_POINT[1]) / 1000.0).abs() < 1e-9);
    assert_eq!(camera.get_depth(0, 0), Err(QueryError::NoDepthData));
    assert!(matches!(camera.get_point(9, 9), Err(QueryError::IndexOutOfBounds { .. })));
    assert!(camera.latest_view(View::Right).is_some());
    assert_eq!(camera.device_info().map(|i| i.camera_model.clone()), Some("Scripted".to_string()));

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_depth_defaults_come_from_config() {
    let (device, _probe) = ScriptedDevice::new();
    let mut config = test_config();
    config.capture.dense_measure = DenseMeasureKind::DepthMap;
    config.query.lens_offset_mm = 7.0;
    config.query.window_radius = 15;
    let handle = CapturePipeline::hardware(device, config).spawn().unwrap();
    let camera = handle.camera();

    assert!(wait_until(WAIT, || camera.has_frames()).await);
    assert_eq!(camera.get_depth(0, 0), Ok(3.0));
    assert_eq!(camera.get_depth_with(0, 0, 0, 0.0), Ok(10.0));
    assert_eq!(camera.get_point(0, 0), Err(QueryError::NoPointData));

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_capture_failures_skip_cycles() {
    let (device, _probe) = ScriptedDevice::new();
    let device = device.grab_results(vec![Err(CaptureError::NoNewFrame), Err(CaptureError::Disconnected)]);
    let handle = CapturePipeline::hardware(device, test_config()).spawn().unwrap();
    let camera = handle.camera();

    assert!(wait_until(WAIT, || camera.metrics().frames_published >= 2).await);
    assert_eq!(camera.metrics().capture_failures, 2);

    handle.shutdown().await.unwrap();
    // Sequence numbers only advance on publication
    let latest = camera.latest_frame().unwrap();
    assert_eq!(latest.sequence + 1, camera.metrics().frames_published);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_degraded_view_is_counted_and_published() {
    let (device, _probe) = ScriptedDevice::new();
    let handle = CapturePipeline::hardware(device.failing_view(View::Right), test_config())
        .spawn()
        .unwrap();
    let camera = handle.camera();

    assert!(wait_until(WAIT, || camera.has_frames()).await);
    let frame = camera.latest_frame().unwrap();
    assert!(frame.right.is_broken());
    assert!(camera.latest_view(View::Right).is_none());
    assert!(camera.latest_view(View::Left).is_some());
    let metrics = camera.metrics();
    assert!(metrics.retrieval_failures >= 1);
    assert_eq!(metrics.encoding_failures, 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unencodable_view_counts_as_encoding_failure() {
    let (device, _probe) = ScriptedDevice::new();
    let handle = CapturePipeline::hardware(device.truncated_view(View::Left), test_config())
        .spawn()
        .unwrap();
    let camera = handle.camera();

    assert!(wait_until(WAIT, || camera.has_frames()).await);
    handle.shutdown().await.unwrap();

    let metrics = camera.metrics();
    // A cycle discarded at shutdown may have counted one more
    assert!(metrics.encoding_failures >= metrics.frames_published);
    assert_eq!(metrics.retrieval_failures, 0);
    assert!(camera.latest_view(View::Left).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_setup_is_retried_until_device_opens() {
    let (device, probe) = ScriptedDevice::new();
    let handle = CapturePipeline::hardware(device.failing_opens(3), test_config())
        .spawn()
        .unwrap();
    let camera = handle.camera();

    assert!(wait_until(WAIT, || camera.has_frames()).await);
    assert_eq!(camera.metrics().setup_failures, 3);
    assert_eq!(probe.get().open_attempts, 4);

    handle.shutdown().await.unwrap();
    assert_eq!(probe.get().close_calls, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nothing_captured_is_not_a_fault() {
    let (device, probe) = ScriptedDevice::new();
    let handle = CapturePipeline::hardware(device.failing_opens(usize::MAX), test_config())
        .spawn()
        .unwrap();
    let camera = handle.camera();

    assert!(wait_until(WAIT, || camera.metrics().setup_failures >= 3).await);
    assert_eq!(camera.state(), PipelineState::Uninitialized);
    assert!(camera.latest_frame().is_none());
    assert!(!camera.has_frames());
    assert!(camera.latest_view(View::Left).is_none());
    assert!(camera.device_info().is_none());
    assert_eq!(camera.get_depth(0, 0), Err(QueryError::NoDepthData));
    assert_eq!(camera.get_point(0, 0), Err(QueryError::NoPointData));
    assert_eq!(camera.get_setting(Setting::Gain).await, Err(ControlError::NotReady));
    assert_eq!(probe.get().grabs, 0);

    handle.shutdown().await.unwrap();
    // Closed exactly once even though it never opened
    assert_eq!(probe.get().close_calls, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_settings_routed_through_loop() {
    let (device, probe) = ScriptedDevice::new();
    let handle = CapturePipeline::hardware(device, test_config()).spawn().unwrap();
    let camera = handle.camera();

    assert!(wait_until(WAIT, || camera.state() != PipelineState::Uninitialized).await);
    camera.set_setting(Setting::Exposure, 42).await.unwrap();
    assert_eq!(camera.get_setting(Setting::Exposure).await, Ok(42));
    assert_eq!(probe.get().settings.get(&Setting::Exposure), Some(&42));
    assert!(matches!(
        camera.get_setting(Setting::Hue).await,
        Err(ControlError::Device(_))
    ));

    handle.shutdown().await.unwrap();
    assert_eq!(camera.get_setting(Setting::Exposure).await, Err(ControlError::AlreadyClosed));
    assert_eq!(camera.set_setting(Setting::Exposure, 1).await, Err(ControlError::AlreadyClosed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_device_never_sees_concurrent_polls() {
    let (device, probe) = ScriptedDevice::new();
    let handle = CapturePipeline::hardware(device.grab_delay(Duration::from_millis(20)), test_config())
        .spawn()
        .unwrap();
    let camera = handle.camera();

    assert!(wait_until(WAIT, || camera.metrics().frames_published >= 5).await);
    assert_eq!(probe.get().max_in_flight, 1);
    let metrics = camera.metrics();
    assert!(metrics.cycle_overruns >= 5);
    // Each published frame came from one poll; skipped ticks left no backlog
    assert!(probe.get().grabs as u64 <= metrics.frames_published + 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_shutdown_closes_once() {
    let (device, probe) = ScriptedDevice::new();
    let handle = CapturePipeline::hardware(device, test_config()).spawn().unwrap();
    let camera = handle.camera();
    assert!(wait_until(WAIT, || camera.has_frames()).await);

    let signals: Vec<_> = (0..8)
        .map(|_| {
            let signal = handle.shutdown_signal();
            tokio::spawn(async move { signal.trigger() })
        })
        .collect();
    for signal in signals {
        signal.await.unwrap();
    }
    assert!(handle.shutdown_signal().is_triggered());
    handle.join().await.unwrap();

    assert_eq!(camera.state(), PipelineState::Closed);
    assert_eq!(probe.get().close_calls, 1);

    // Nothing is published after close
    let published = camera.metrics().frames_published;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(camera.metrics().frames_published, published);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_device_fault_releases_device_once() {
    let (device, probe) = ScriptedDevice::new();
    let handle = CapturePipeline::hardware(device.panicking(), test_config()).spawn().unwrap();
    let camera = handle.camera();

    assert!(wait_until(WAIT, || camera.state() == PipelineState::Closed).await);
    assert_eq!(probe.get().close_calls, 1);
    assert!(!camera.has_frames());

    handle.join().await.unwrap();
    assert_eq!(probe.get().close_calls, 1);
}

#[tokio::test]
async fn test_spawn_rejects_invalid_config() {
    let (device, _probe) = ScriptedDevice::new();
    let mut config = test_config();
    config.capture.fps = 0;
    assert!(CapturePipeline::hardware(device, config).spawn().is_err());
}

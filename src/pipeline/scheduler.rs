//! Periodic capture loop.
//!
//! One tokio task owns the capture source and the history writer. Device calls
//! run on the blocking pool; the loop awaits each one before looking at the
//! next tick, so a slow cycle makes later ticks get skipped instead of queued.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use metrics::{counter, histogram};
use tokio::sync::{oneshot, watch};
use tokio::task::{self, JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::camera::Camera;
use super::history::{FrameWriter, HistoryBuffer};
use crate::capture::device::{DeviceInfo, Setting, StereoDevice};
use crate::capture::hardware::HardwareSource;
use crate::capture::simulation::SimulatedSource;
use crate::capture::source::FrameSource;
use crate::error::{CaptureError, ConfigError, ControlError, DeviceError, SetupError};
use crate::utils::{SystemClock, TimeSource};
use crate::Config;

/// Lifecycle shared by both pipeline variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Uninitialized = 0,
    Ready = 1,
    Running = 2,
    ShuttingDown = 3,
    Closed = 4,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Uninitialized,
            1 => PipelineState::Ready,
            2 => PipelineState::Running,
            3 => PipelineState::ShuttingDown,
            _ => PipelineState::Closed,
        }
    }

    pub fn is_closing(&self) -> bool {
        matches!(self, PipelineState::ShuttingDown | PipelineState::Closed)
    }
}

/// State the capture loop publishes for readers
pub(crate) struct PipelineShared {
    state: AtomicU8,
    pub(crate) device_info: ArcSwapOption<DeviceInfo>,
    pub(crate) counters: CachePadded<Counters>,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) cycles: AtomicU64,
    pub(crate) frames_published: AtomicU64,
    pub(crate) capture_failures: AtomicU64,
    pub(crate) retrieval_failures: AtomicU64,
    pub(crate) encoding_failures: AtomicU64,
    pub(crate) setup_failures: AtomicU64,
    pub(crate) cycle_overruns: AtomicU64,
    pub(crate) last_cycle_us: AtomicU64,
}

impl PipelineShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PipelineState::Uninitialized as u8),
            device_info: ArcSwapOption::empty(),
            counters: CachePadded::new(Counters::default()),
        }
    }

    pub(crate) fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Settings requests routed to the loop, which owns the device
pub(crate) enum Command {
    GetSetting {
        setting: Setting,
        reply: oneshot::Sender<Result<i32, ControlError>>,
    },
    SetSetting {
        setting: Setting,
        value: i32,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
}

impl Command {
    fn reject(self, err: ControlError) {
        // The requester may have given up; nothing to do then
        match self {
            Command::GetSetting { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::SetSetting { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

fn control_error(err: DeviceError) -> ControlError {
    match err {
        DeviceError::AlreadyClosed => ControlError::AlreadyClosed,
        other => ControlError::Device(other),
    }
}

/// Requests loop shutdown. Safe to trigger any number of times from anywhere.
#[derive(Clone)]
pub struct ShutdownSignal(Arc<watch::Sender<bool>>);

impl ShutdownSignal {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }
}

/// Owns the capture source and closes it exactly once, also when unwinding.
struct SourceGuard {
    source: Box<dyn FrameSource>,
    closed: bool,
}

impl SourceGuard {
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.source.close();
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Capture source released without shutdown, closing it");
            self.close();
        }
    }
}

/// A configured capture source, not yet running
pub struct CapturePipeline {
    source: Box<dyn FrameSource>,
    config: Config,
}

impl CapturePipeline {
    pub fn new(source: Box<dyn FrameSource>, config: Config) -> Self {
        Self { source, config }
    }

    pub fn hardware<D: StereoDevice>(device: D, config: Config) -> Self {
        let source = HardwareSource::new(device, &config.capture);
        Self::new(Box::new(source), config)
    }

    pub fn simulation(config: Config) -> Self {
        Self::simulation_with_clock(config, Arc::new(SystemClock))
    }

    pub fn simulation_with_clock(config: Config, clock: Arc<dyn TimeSource>) -> Self {
        let source = SimulatedSource::new(config.capture.camera_name.clone(), clock);
        Self::new(Box::new(source), config)
    }

    /// Start the capture loop on the current tokio runtime.
    pub fn spawn(self) -> Result<PipelineHandle, ConfigError> {
        self.config.validate()?;

        let capacity = self.config.history_capacity();
        let (writer, reader) = HistoryBuffer::with_capacity(capacity);
        let shared = Arc::new(PipelineShared::new());
        let (command_tx, command_rx) = flume::bounded(32);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let variant = self.source.variant();
        let period = self.config.period_for(variant);

        info!(?variant, capacity, ?period, "Starting capture pipeline");

        let capture_loop = CaptureLoop {
            source: Some(SourceGuard {
                source: self.source,
                closed: false,
            }),
            writer,
            shared: Arc::clone(&shared),
            shutdown: shutdown_rx.clone(),
            period,
            setup_retry: Duration::from_millis(self.config.capture.setup_retry_ms),
            last_setup_attempt: None,
            next_sequence: 0,
        };
        let task = tokio::spawn(capture_loop.run(command_rx, shutdown_rx));

        Ok(PipelineHandle {
            camera: Camera::new(reader, shared, command_tx, variant, self.config.query.clone()),
            shutdown: ShutdownSignal(Arc::new(shutdown_tx)),
            task,
        })
    }
}

/// Running pipeline. Dropping it without `shutdown` also stops the loop.
pub struct PipelineHandle {
    camera: Camera,
    shutdown: ShutdownSignal,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    /// Reader handle for queries and settings.
    pub fn camera(&self) -> Camera {
        self.camera.clone()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Stop scheduling cycles, let the in-flight one finish, close the source.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.shutdown.trigger();
        self.task.await
    }

    /// Wait for the loop to end after a signal was triggered elsewhere.
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}

struct CaptureLoop {
    source: Option<SourceGuard>,
    writer: FrameWriter,
    shared: Arc<PipelineShared>,
    shutdown: watch::Receiver<bool>,
    period: Duration,
    setup_retry: Duration,
    last_setup_attempt: Option<Instant>,
    next_sequence: u64,
}

impl CaptureLoop {
    async fn run(mut self, commands: flume::Receiver<Command>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let flow = tokio::select! {
                biased;
                _ = shutdown.changed() => ControlFlow::Break(()),
                _ = ticker.tick() => self.tick().await,
                Ok(command) = commands.recv_async() => self.handle(command).await,
            };
            if flow.is_break() || *shutdown.borrow() {
                break;
            }
        }

        self.finish().await;
    }

    async fn tick(&mut self) -> ControlFlow<()> {
        match self.shared.state() {
            PipelineState::Uninitialized => self.try_setup().await,
            PipelineState::Ready | PipelineState::Running => self.cycle().await,
            PipelineState::ShuttingDown | PipelineState::Closed => ControlFlow::Break(()),
        }
    }

    /// Run `f` against the source on the blocking pool.
    ///
    /// Returns `None` once the source is gone, e.g. after `f` panicked; the
    /// guard has closed it while unwinding.
    async fn with_source<R, F>(&mut self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut SourceGuard) -> R + Send + 'static,
    {
        let mut guard = self.source.take()?;
        match task::spawn_blocking(move || {
            let result = f(&mut guard);
            (guard, result)
        })
        .await
        {
            Ok((guard, result)) => {
                self.source = Some(guard);
                Some(result)
            }
            Err(e) => {
                error!(error = %e, "Capture source call failed, source released");
                None
            }
        }
    }

    async fn try_setup(&mut self) -> ControlFlow<()> {
        if let Some(last) = self.last_setup_attempt {
            if last.elapsed() < self.setup_retry {
                return ControlFlow::Continue(());
            }
        }
        self.last_setup_attempt = Some(Instant::now());

        let Some(result) = self.with_source(|guard| guard.source.setup()).await else {
            return ControlFlow::Break(());
        };

        match result {
            Ok(info) => {
                info!(
                    model = %info.camera_model,
                    serial = %info.serial_number,
                    resolution = ?info.resolution,
                    fps = info.fps,
                    "Capture source ready"
                );
                self.shared.device_info.store(Some(Arc::new(info)));
                self.shared.set_state(PipelineState::Ready);
                ControlFlow::Continue(())
            }
            Err(SetupError::AlreadyClosed) => ControlFlow::Break(()),
            Err(e) => {
                self.shared.counters.setup_failures.fetch_add(1, Ordering::Relaxed);
                counter!("stereocam_setup_failures_total").increment(1);
                warn!(error = %e, retry_in = ?self.setup_retry, "Setup failed");
                ControlFlow::Continue(())
            }
        }
    }

    async fn cycle(&mut self) -> ControlFlow<()> {
        let sequence = self.next_sequence;
        let started = Instant::now();

        let Some(result) = self.with_source(move |guard| guard.source.capture(sequence)).await else {
            return ControlFlow::Break(());
        };
        self.record_cycle(started.elapsed());

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(CaptureError::AlreadyClosed) => return ControlFlow::Break(()),
            Err(e) => {
                self.shared.counters.capture_failures.fetch_add(1, Ordering::Relaxed);
                counter!("stereocam_capture_failures_total", "kind" => e.kind()).increment(1);
                error!(kind = e.kind(), error = %e, "Capture failed, skipping cycle");
                return ControlFlow::Continue(());
            }
        };

        if outcome.retrieval_failures > 0 {
            let failed = u64::from(outcome.retrieval_failures);
            self.shared.counters.retrieval_failures.fetch_add(failed, Ordering::Relaxed);
            counter!("stereocam_retrieval_failures_total").increment(failed);
        }
        if outcome.encoding_failures > 0 {
            let failed = u64::from(outcome.encoding_failures);
            self.shared.counters.encoding_failures.fetch_add(failed, Ordering::Relaxed);
            counter!("stereocam_encoding_failures_total").increment(failed);
        }

        if *self.shutdown.borrow() {
            debug!(sequence, "Shutdown requested, discarding in-flight frame");
            return ControlFlow::Break(());
        }

        let evicts = self.writer.is_full();
        match self.writer.append(outcome.frame) {
            Ok(frame) => {
                self.next_sequence += 1;
                self.shared.counters.frames_published.fetch_add(1, Ordering::Relaxed);
                counter!("stereocam_frames_published_total").increment(1);
                if evicts {
                    counter!("stereocam_frames_evicted_total").increment(1);
                }
                if self.shared.state() == PipelineState::Ready {
                    self.shared.set_state(PipelineState::Running);
                    info!(timestamp = frame.timestamp, "First frame published");
                }
            }
            Err(e) => {
                self.shared.counters.capture_failures.fetch_add(1, Ordering::Relaxed);
                counter!("stereocam_capture_failures_total", "kind" => "out_of_order").increment(1);
                warn!(error = %e, "Frame refused by history");
            }
        }
        ControlFlow::Continue(())
    }

    fn record_cycle(&self, elapsed: Duration) {
        let counters = &self.shared.counters;
        counters.cycles.fetch_add(1, Ordering::Relaxed);
        counters.last_cycle_us.store(elapsed.as_micros() as u64, Ordering::Relaxed);
        histogram!("stereocam_cycle_duration_seconds").record(elapsed.as_secs_f64());

        if elapsed > self.period {
            counters.cycle_overruns.fetch_add(1, Ordering::Relaxed);
            counter!("stereocam_cycle_overruns_total").increment(1);
            debug!(?elapsed, period = ?self.period, "Cycle overran its period, skipping missed ticks");
        }
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        if self.shared.state() == PipelineState::Uninitialized {
            command.reject(ControlError::NotReady);
            return ControlFlow::Continue(());
        }

        match command {
            Command::GetSetting { setting, reply } => {
                let result = self
                    .with_source(move |guard| guard.source.get_setting(setting))
                    .await
                    .unwrap_or(Err(DeviceError::AlreadyClosed))
                    .map_err(control_error);
                let _ = reply.send(result);
            }
            Command::SetSetting { setting, value, reply } => {
                let result = self
                    .with_source(move |guard| guard.source.set_setting(setting, value))
                    .await
                    .unwrap_or(Err(DeviceError::AlreadyClosed))
                    .map_err(control_error);
                if result.is_ok() {
                    info!(?setting, value, "Camera setting changed");
                }
                let _ = reply.send(result);
            }
        }

        if self.source.is_some() {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    }

    async fn finish(mut self) {
        self.shared.set_state(PipelineState::ShuttingDown);
        info!("Capture loop shutting down");

        if let Some(mut guard) = self.source.take() {
            if let Err(e) = task::spawn_blocking(move || guard.close()).await {
                error!(error = %e, "Closing capture source panicked");
            }
        }

        self.shared.set_state(PipelineState::Closed);
        info!("Capture source closed");
    }
}

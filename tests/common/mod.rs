#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use stereocam::capture::device::{DeviceInfo, OpenParams, Setting, StereoDevice};
use stereocam::capture::frame::{DenseMeasure, DenseMeasureKind, DepthMap, PixelFormat, PointMap, RawImage, View};
use stereocam::capture::simulation::simulated_device_info;
use stereocam::error::{CaptureError, DeviceError, SetupError};
use stereocam::{Config, Resolution};

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 2;

/// Point stored at (1, 1) of the scripted point map, millimeters
pub const PROBE_POINT: [f32; 3] = [1400.0, 2100.0, 2800.0];

/// What the test can observe about a device after it moved into a pipeline
#[derive(Debug, Default)]
pub struct ProbeState {
    pub open_attempts: usize,
    pub close_calls: usize,
    pub grabs: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub settings: BTreeMap<Setting, i32>,
}

#[derive(Debug, Clone, Default)]
pub struct Probe(Arc<Mutex<ProbeState>>);

impl Probe {
    pub fn get(&self) -> std::sync::MutexGuard<'_, ProbeState> {
        self.0.lock().unwrap()
    }
}

pub struct ScriptedDevice {
    probe: Probe,
    failing_opens: usize,
    grab_script: VecDeque<Result<(), CaptureError>>,
    failing_views: Vec<View>,
    truncated_views: Vec<View>,
    measure_width: u32,
    grab_delay: Duration,
    panic_on_grab: bool,
    timestamp: u64,
}

impl ScriptedDevice {
    pub fn new() -> (Self, Probe) {
        let probe = Probe::default();
        let device = Self {
            probe: probe.clone(),
            failing_opens: 0,
            grab_script: VecDeque::new(),
            failing_views: Vec::new(),
            truncated_views: Vec::new(),
            measure_width: WIDTH,
            grab_delay: Duration::ZERO,
            panic_on_grab: false,
            timestamp: 1_000,
        };
        (device, probe)
    }

    pub fn failing_opens(mut self, count: usize) -> Self {
        self.failing_opens = count;
        self
    }

    /// Results for the first grabs; later grabs succeed.
    pub fn grab_results(mut self, results: Vec<Result<(), CaptureError>>) -> Self {
        self.grab_script = results.into();
        self
    }

    pub fn failing_view(mut self, view: View) -> Self {
        self.failing_views.push(view);
        self
    }

    /// The view is returned with a pixel buffer too short to encode.
    pub fn truncated_view(mut self, view: View) -> Self {
        self.truncated_views.push(view);
        self
    }

    pub fn measure_width(mut self, width: u32) -> Self {
        self.measure_width = width;
        self
    }

    pub fn grab_delay(mut self, delay: Duration) -> Self {
        self.grab_delay = delay;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_grab = true;
        self
    }
}

impl StereoDevice for ScriptedDevice {
    fn open(&mut self, _params: &OpenParams) -> Result<(), SetupError> {
        let mut state = self.probe.get();
        state.open_attempts += 1;
        if state.open_attempts <= self.failing_opens {
            return Err(SetupError::Open("camera not detected".into()));
        }
        Ok(())
    }

    fn grab(&mut self) -> Result<(), CaptureError> {
        if self.panic_on_grab {
            panic!("driver fault");
        }
        {
            let mut state = self.probe.get();
            state.grabs += 1;
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        if !self.grab_delay.is_zero() {
            std::thread::sleep(self.grab_delay);
        }
        self.probe.get().in_flight -= 1;

        let result = self.grab_script.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.timestamp += 10;
        }
        result
    }

    fn retrieve_view(&mut self, view: View) -> Result<RawImage, DeviceError> {
        if self.failing_views.contains(&view) {
            return Err(DeviceError::Unavailable(format!("{} view lost", view.as_str())));
        }
        let shade = match view {
            View::Left => 40,
            View::Right => 120,
            View::Depth => 200,
        };
        let mut len = (WIDTH * HEIGHT * 4) as usize;
        if self.truncated_views.contains(&view) {
            len -= 4;
        }
        Ok(RawImage {
            width: WIDTH,
            height: HEIGHT,
            format: PixelFormat::Bgra8,
            data: Bytes::from(vec![shade; len]),
        })
    }

    fn retrieve_measure(&mut self, kind: DenseMeasureKind) -> Result<DenseMeasure, DeviceError> {
        let (w, h) = (self.measure_width, HEIGHT);
        Ok(match kind {
            DenseMeasureKind::DepthMap => {
                let mut cells = vec![10.0f32; (w * h) as usize];
                if let Some(last) = cells.last_mut() {
                    *last = f32::NAN;
                }
                DenseMeasure::Depth(DepthMap::new(w, h, cells).unwrap())
            }
            DenseMeasureKind::PointMap => {
                let mut cells = vec![[0.0f32; 3]; (w * h) as usize];
                cells[(w + 1) as usize] = PROBE_POINT;
                DenseMeasure::Points(PointMap::new(w, h, cells).unwrap())
            }
        })
    }

    fn timestamp_ms(&self) -> u64 {
        self.timestamp
    }

    fn get_setting(&self, setting: Setting) -> Result<i32, DeviceError> {
        self.probe
            .get()
            .settings
            .get(&setting)
            .copied()
            .ok_or(DeviceError::UnsupportedSetting(setting))
    }

    fn set_setting(&mut self, setting: Setting, value: i32) -> Result<(), DeviceError> {
        self.probe.get().settings.insert(setting, value);
        Ok(())
    }

    fn device_info(&self) -> Result<DeviceInfo, DeviceError> {
        let mut info = simulated_device_info();
        info.camera_model = "Scripted".into();
        info.resolution = (WIDTH, HEIGHT);
        Ok(info)
    }

    fn close(&mut self) {
        self.probe.get().close_calls += 1;
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.capture.period_ms = 5;
    config.capture.simulation_period_ms = 5;
    config.capture.setup_retry_ms = 0;
    config.capture.resolution = Resolution::Vga;
    config.capture.jpeg_quality = 80;
    config.history.capacity = 8;
    config
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}

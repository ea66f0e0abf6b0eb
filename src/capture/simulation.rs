//! Deterministic stand-in for a stereo camera, for development without hardware

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use super::device::{DeviceInfo, LensCalibration, Setting, StereoCalibration};
use super::encode::encode_jpeg;
use super::frame::{Frame, ImageRecord, PixelFormat, RawImage, View};
use super::source::{CaptureOutcome, FrameSource, Variant};
use crate::error::{CaptureError, DeviceError, SetupError};
use crate::query::Point3D;
use crate::utils::TimeSource;

pub const PLACEHOLDER_WIDTH: u32 = 320;
pub const PLACEHOLDER_HEIGHT: u32 = 240;

/// Nominal distance the simulated camera "sees", in millimeters
pub const SIM_STANDOFF_MM: f64 = 300.0;

pub const PLACEHOLDER_TAG: &str = "placeholder";

/// Point returned for every simulated point query, in meters
pub fn simulated_point() -> Point3D {
    Point3D {
        x: 0.0,
        y: 0.0,
        z: SIM_STANDOFF_MM / 1000.0,
    }
}

/// Depth returned for every simulated depth query, in millimeters
pub fn simulated_depth(lens_offset_mm: f64) -> f64 {
    SIM_STANDOFF_MM - lens_offset_mm
}

pub struct SimulatedSource {
    name: String,
    clock: Arc<dyn TimeSource>,
    placeholders: [Option<Bytes>; 3],
    settings: BTreeMap<Setting, i32>,
    closed: bool,
}

impl SimulatedSource {
    pub fn new(name: impl Into<String>, clock: Arc<dyn TimeSource>) -> Self {
        let placeholders = View::ALL.map(|view| {
            let image = placeholder_pattern(view);
            match encode_jpeg(&image, 90) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(view = view.as_str(), error = %e, "Placeholder encoding failed");
                    None
                }
            }
        });

        Self {
            name: name.into(),
            clock,
            placeholders,
            settings: default_settings(),
            closed: false,
        }
    }

    fn record(&self, view: View, timestamp: u64) -> ImageRecord {
        let camera_id = format!("{}_{}", self.name, view.as_str());
        let tags = BTreeSet::from([PLACEHOLDER_TAG.to_string(), format!("{camera_id} - {timestamp}")]);
        let slot = match view {
            View::Left => 0,
            View::Right => 1,
            View::Depth => 2,
        };
        ImageRecord {
            camera_id,
            width: PLACEHOLDER_WIDTH,
            height: PLACEHOLDER_HEIGHT,
            timestamp,
            encoded_bytes: self.placeholders[slot].clone(),
            tags,
        }
    }
}

impl FrameSource for SimulatedSource {
    fn variant(&self) -> Variant {
        Variant::Simulation
    }

    fn setup(&mut self) -> Result<DeviceInfo, SetupError> {
        if self.closed {
            return Err(SetupError::AlreadyClosed);
        }
        Ok(simulated_device_info())
    }

    fn capture(&mut self, sequence: u64) -> Result<CaptureOutcome, CaptureError> {
        if self.closed {
            return Err(CaptureError::AlreadyClosed);
        }

        let timestamp = self.clock.now_ms();
        let left = self.record(View::Left, timestamp);
        let right = self.record(View::Right, timestamp);
        let depth = self.record(View::Depth, timestamp);
        // Placeholders are the only thing that can go missing here
        let encoding_failures = [&left, &right, &depth].iter().filter(|r| r.is_broken()).count() as u32;

        let frame = Frame::assemble(sequence, timestamp, left, right, depth, None)
            .map_err(|e| CaptureError::Device(e.to_string()))?;
        debug!(sequence, timestamp, "Synthesized placeholder frame");

        Ok(CaptureOutcome {
            frame,
            retrieval_failures: 0,
            encoding_failures,
        })
    }

    fn get_setting(&self, setting: Setting) -> Result<i32, DeviceError> {
        if self.closed {
            return Err(DeviceError::AlreadyClosed);
        }
        self.settings
            .get(&setting)
            .copied()
            .ok_or(DeviceError::UnsupportedSetting(setting))
    }

    fn set_setting(&mut self, setting: Setting, value: i32) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::AlreadyClosed);
        }
        self.settings.insert(setting, value);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

fn default_settings() -> BTreeMap<Setting, i32> {
    BTreeMap::from([
        (Setting::Brightness, 4),
        (Setting::Contrast, 4),
        (Setting::Hue, 0),
        (Setting::Saturation, 4),
        (Setting::Sharpness, 4),
        (Setting::Gamma, 8),
        (Setting::Gain, 50),
        (Setting::Exposure, 50),
        (Setting::WhitebalanceTemperature, 4600),
        (Setting::LedStatus, 1),
    ])
}

/// Fixed gray-level pattern, different per view.
fn placeholder_pattern(view: View) -> RawImage {
    let (w, h) = (PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT);
    let mut data = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            let value = match view {
                View::Left => (x * 255 / (w - 1)) as u8,
                View::Right => (y * 255 / (h - 1)) as u8,
                View::Depth => {
                    if (x / 40 + y / 40) % 2 == 0 {
                        64
                    } else {
                        192
                    }
                }
            };
            data.push(value);
        }
    }
    RawImage {
        width: w,
        height: h,
        format: PixelFormat::Gray8,
        data: Bytes::from(data),
    }
}

pub fn simulated_device_info() -> DeviceInfo {
    let lens = LensCalibration {
        fx: 700.0,
        fy: 700.0,
        cx: 640.0,
        cy: 360.0,
        distortion: [0.0; 12],
        fov_vertical: 45.0,
        fov_horizontal: 90.0,
        fov_diagonal: 100.0,
    };
    DeviceInfo {
        camera_model: "Simulated Stereo".into(),
        serial_number: "1234567890".into(),
        camera_firmware: "1.0.0".into(),
        sensors_firmware: "1.0.0".into(),
        resolution: (1280, 720),
        fps: 30,
        calibration: StereoCalibration {
            baseline: 120.0,
            left_cam: lens.clone(),
            right_cam: lens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn source(clock: &ManualClock) -> SimulatedSource {
        SimulatedSource::new("sim", Arc::new(clock.clone()))
    }

    #[test]
    fn test_capture_tags_views_with_timestamp() {
        let clock = ManualClock::starting_at(1_000);
        let mut sim = source(&clock);
        sim.setup().unwrap();

        let outcome = sim.capture(0).unwrap();
        let frame = &outcome.frame;
        assert_eq!(outcome.degraded_views(), 0);
        assert_eq!(frame.timestamp, 1_000);
        assert_eq!(frame.left.camera_id, "sim_left");
        assert!(frame.left.tags.contains(PLACEHOLDER_TAG));
        assert!(frame.right.tags.contains("sim_right - 1000"));
        assert!(frame.dense_measure.is_none());
        assert!(!frame.depth.is_broken());
    }

    #[test]
    fn test_placeholders_differ_per_view() {
        let clock = ManualClock::starting_at(0);
        let mut sim = source(&clock);
        let frame = sim.capture(0).unwrap().frame;
        assert_ne!(frame.left.encoded_bytes, frame.right.encoded_bytes);
        assert_ne!(frame.left.encoded_bytes, frame.depth.encoded_bytes);
    }

    #[test]
    fn test_settings_roundtrip_until_closed() {
        let clock = ManualClock::starting_at(0);
        let mut sim = source(&clock);
        assert_eq!(sim.get_setting(Setting::Gain), Ok(50));
        sim.set_setting(Setting::Gain, 80).unwrap();
        assert_eq!(sim.get_setting(Setting::Gain), Ok(80));

        sim.close();
        assert_eq!(sim.get_setting(Setting::Gain), Err(DeviceError::AlreadyClosed));
        assert!(matches!(sim.capture(1), Err(CaptureError::AlreadyClosed)));
        assert_eq!(sim.setup(), Err(SetupError::AlreadyClosed));
    }

    #[test]
    fn test_simulated_queries_are_constant() {
        assert_eq!(simulated_point(), Point3D { x: 0.0, y: 0.0, z: 0.3 });
        assert_eq!(simulated_depth(7.0), 293.0);
    }
}

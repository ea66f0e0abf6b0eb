//! Vendor-agnostic contract over a stereo depth camera.
//!
//! The pipeline never links a driver directly. A driver crate implements
//! [`StereoDevice`] and hands it to [`HardwareSource`](super::HardwareSource).

use serde::{Deserialize, Serialize};

use crate::capture::frame::{DenseMeasure, DenseMeasureKind, RawImage, View};
use crate::error::{CaptureError, DeviceError, SetupError};

/// Blocking device handle.
///
/// Calls are made from one thread at a time; the capture loop owns the handle
/// for its whole life and calls `close` exactly once.
pub trait StereoDevice: Send + 'static {
    fn open(&mut self, params: &OpenParams) -> Result<(), SetupError>;

    /// Wait for the next image set. Views and measures retrieved afterwards
    /// belong to this set.
    fn grab(&mut self) -> Result<(), CaptureError>;

    fn retrieve_view(&mut self, view: View) -> Result<RawImage, DeviceError>;

    fn retrieve_measure(&mut self, kind: DenseMeasureKind) -> Result<DenseMeasure, DeviceError>;

    /// Capture time of the last grabbed set, in milliseconds.
    fn timestamp_ms(&self) -> u64;

    fn get_setting(&self, setting: Setting) -> Result<i32, DeviceError>;

    fn set_setting(&mut self, setting: Setting, value: i32) -> Result<(), DeviceError>;

    fn device_info(&self) -> Result<DeviceInfo, DeviceError>;

    fn close(&mut self);
}

/// Parameters passed to [`StereoDevice::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenParams {
    pub resolution: Resolution,
    pub fps: u32,
    pub depth_mode: DepthMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Hd2k,
    Hd1080,
    Hd1200,
    Hd720,
    Svga,
    Vga,
}

impl Resolution {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Hd2k => (2208, 1242),
            Resolution::Hd1080 => (1920, 1080),
            Resolution::Hd1200 => (1920, 1200),
            Resolution::Hd720 => (1280, 720),
            Resolution::Svga => (960, 600),
            Resolution::Vga => (672, 376),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMode {
    Performance,
    Quality,
    Ultra,
    Neural,
}

/// Exposure and image controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    Brightness,
    Contrast,
    Hue,
    Saturation,
    Sharpness,
    Gamma,
    Gain,
    Exposure,
    WhitebalanceTemperature,
    LedStatus,
}

impl Setting {
    pub const ALL: [Setting; 10] = [
        Setting::Brightness,
        Setting::Contrast,
        Setting::Hue,
        Setting::Saturation,
        Setting::Sharpness,
        Setting::Gamma,
        Setting::Gain,
        Setting::Exposure,
        Setting::WhitebalanceTemperature,
        Setting::LedStatus,
    ];
}

/// Static device metadata, cached at setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub camera_model: String,
    pub serial_number: String,
    pub camera_firmware: String,
    pub sensors_firmware: String,
    pub resolution: (u32, u32),
    pub fps: u32,
    pub calibration: StereoCalibration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoCalibration {
    /// Distance between the optical centers, in millimeters
    pub baseline: f64,
    pub left_cam: LensCalibration,
    pub right_cam: LensCalibration,
}

/// Pinhole intrinsics of one lens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensCalibration {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// k1, k2, p1, p2, k3, k4, k5, k6, s1, s2, s3, s4
    pub distortion: [f64; 12],
    pub fov_vertical: f64,
    pub fov_horizontal: f64,
    pub fov_diagonal: f64,
}

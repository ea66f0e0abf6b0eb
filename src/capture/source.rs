use serde::{Deserialize, Serialize};

use super::device::{DeviceInfo, Setting};
use super::frame::Frame;
use crate::error::{CaptureError, DeviceError, SetupError};

/// Which pipeline implementation runs, chosen once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Hardware,
    Simulation,
}

/// Capability set shared by the hardware and simulation pipelines.
///
/// Every method is blocking and is only ever called from the capture loop.
pub trait FrameSource: Send + 'static {
    fn variant(&self) -> Variant;

    /// Bring the source up and report its metadata.
    fn setup(&mut self) -> Result<DeviceInfo, SetupError>;

    /// Run one capture cycle and build a complete frame.
    fn capture(&mut self, sequence: u64) -> Result<CaptureOutcome, CaptureError>;

    fn get_setting(&self, setting: Setting) -> Result<i32, DeviceError>;

    fn set_setting(&mut self, setting: Setting, value: i32) -> Result<(), DeviceError>;

    /// Release the underlying device. Further calls fail with `AlreadyClosed`.
    fn close(&mut self);
}

/// A frame plus how many of its views were published without data
#[derive(Debug)]
pub struct CaptureOutcome {
    pub frame: Frame,
    /// Views the device failed to hand over
    pub retrieval_failures: u32,
    /// Views retrieved but not encodable
    pub encoding_failures: u32,
}

impl CaptureOutcome {
    pub fn degraded_views(&self) -> u32 {
        self.retrieval_failures + self.encoding_failures
    }
}

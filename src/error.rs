//! Error taxonomy for the acquisition pipeline.
//!
//! Capture and encoding failures are recovered inside the capture loop and only
//! ever surface as logs and metrics. Query and control errors are returned to
//! the caller that asked.

use thiserror::Error;

use crate::capture::device::Setting;

/// A device poll produced no usable image set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("no new frame available")]
    NoNewFrame,
    #[error("device disconnected")]
    Disconnected,
    #[error("device poll timed out")]
    Timeout,
    #[error("device error: {0}")]
    Device(String),
    #[error("capture source already closed")]
    AlreadyClosed,
}

impl CaptureError {
    /// Short stable label used for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::NoNewFrame => "no_new_frame",
            CaptureError::Disconnected => "disconnected",
            CaptureError::Timeout => "timeout",
            CaptureError::Device(_) => "device",
            CaptureError::AlreadyClosed => "already_closed",
        }
    }
}

/// Transforming one view into its transport encoding failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("jpeg encoder failed: {0}")]
    Jpeg(String),
}

/// A spatial query could not be answered from the given frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("frame carries no depth map")]
    NoDepthData,
    #[error("frame carries no point map")]
    NoPointData,
    #[error("depth window around ({x}, {y}) lies outside the map")]
    OutOfBounds { x: u32, y: u32 },
    #[error("pixel ({x}, {y}) outside {width}x{height} point map")]
    IndexOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// The capture source could not be brought up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("failed to open device: {0}")]
    Open(String),
    #[error("capture source already closed")]
    AlreadyClosed,
}

/// A single device call (view, measure or setting) failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device call failed: {0}")]
    Unavailable(String),
    #[error("setting {0:?} is not supported")]
    UnsupportedSetting(Setting),
    #[error("device already closed")]
    AlreadyClosed,
}

/// A settings request routed through the capture loop failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("capture source is not set up yet")]
    NotReady,
    #[error("capture pipeline already closed")]
    AlreadyClosed,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Frame parts violate the dimension invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("{what} is {actual_width}x{actual_height}, expected {width}x{height}")]
    DimensionMismatch {
        what: &'static str,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

/// The history buffer refused a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("frame timestamp {current} precedes last published {previous}")]
    OutOfOrder { previous: u64, current: u64 },
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub mod device;
pub mod encode;
pub mod frame;
pub mod hardware;
pub mod simulation;
pub mod source;

pub use device::{DepthMode, DeviceInfo, OpenParams, Resolution, Setting, StereoDevice};
pub use frame::{DenseMeasure, DenseMeasureKind, DepthMap, Frame, ImageRecord, PixelFormat, PointMap, RawImage, View};
pub use hardware::{HardwareSource, RawFrameSet};
pub use simulation::SimulatedSource;
pub use source::{CaptureOutcome, FrameSource, Variant};

pub mod camera;
pub mod history;
pub mod scheduler;

pub use camera::Camera;
pub use history::{FrameReader, FrameWriter, HistoryBuffer, HistoryStats};
pub use scheduler::{CapturePipeline, PipelineHandle, PipelineState, ShutdownSignal};

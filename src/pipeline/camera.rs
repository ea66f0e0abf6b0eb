//! Read side of a running pipeline, handed to presentation and query callers

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::history::FrameReader;
use super::scheduler::{Command, PipelineShared, PipelineState};
use crate::capture::device::{DeviceInfo, Setting};
use crate::capture::frame::{Frame, View};
use crate::capture::simulation::{simulated_depth, simulated_point};
use crate::capture::source::Variant;
use crate::error::{ControlError, QueryError};
use crate::query::{self, Point3D};
use crate::{Metrics, QueryConfig};

/// Cloneable reader handle. Nothing here blocks the capture loop.
#[derive(Clone)]
pub struct Camera {
    frames: FrameReader,
    shared: Arc<PipelineShared>,
    commands: flume::Sender<Command>,
    variant: Variant,
    query: QueryConfig,
}

impl Camera {
    pub(crate) fn new(
        frames: FrameReader,
        shared: Arc<PipelineShared>,
        commands: flume::Sender<Command>,
        variant: Variant,
        query: QueryConfig,
    ) -> Self {
        Self {
            frames,
            shared,
            commands,
            variant,
            query,
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frames.latest()
    }

    pub fn has_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Full history access: offsets, snapshots, buffer stats.
    pub fn history(&self) -> &FrameReader {
        &self.frames
    }

    /// Encoded bytes of one view of the newest frame.
    pub fn latest_view(&self, view: View) -> Option<Bytes> {
        self.frames.latest()?.view(view).encoded_bytes.clone()
    }

    /// Depth at `(x, y)` with the configured window and lens offset.
    pub fn get_depth(&self, x: u32, y: u32) -> Result<f64, QueryError> {
        self.get_depth_with(x, y, self.query.window_radius, self.query.lens_offset_mm)
    }

    pub fn get_depth_with(&self, x: u32, y: u32, window_radius: u32, lens_offset_mm: f64) -> Result<f64, QueryError> {
        match self.variant {
            Variant::Simulation => Ok(simulated_depth(lens_offset_mm)),
            Variant::Hardware => {
                let frame = self.frames.latest().ok_or(QueryError::NoDepthData)?;
                query::get_depth(&frame, x, y, window_radius, lens_offset_mm)
            }
        }
    }

    pub fn get_point(&self, x: u32, y: u32) -> Result<Point3D, QueryError> {
        match self.variant {
            Variant::Simulation => Ok(simulated_point()),
            Variant::Hardware => {
                let frame = self.frames.latest().ok_or(QueryError::NoPointData)?;
                query::get_point(&frame, x, y)
            }
        }
    }

    /// Device metadata, available once setup succeeded.
    pub fn device_info(&self) -> Option<Arc<DeviceInfo>> {
        self.shared.device_info.load_full()
    }

    pub async fn get_setting(&self, setting: Setting) -> Result<i32, ControlError> {
        let (reply, response) = oneshot::channel();
        self.request(Command::GetSetting { setting, reply }).await?;
        response.await.unwrap_or(Err(ControlError::AlreadyClosed))
    }

    pub async fn set_setting(&self, setting: Setting, value: i32) -> Result<(), ControlError> {
        let (reply, response) = oneshot::channel();
        self.request(Command::SetSetting { setting, value, reply }).await?;
        response.await.unwrap_or(Err(ControlError::AlreadyClosed))
    }

    async fn request(&self, command: Command) -> Result<(), ControlError> {
        if self.state().is_closing() {
            return Err(ControlError::AlreadyClosed);
        }
        self.commands
            .send_async(command)
            .await
            .map_err(|_| ControlError::AlreadyClosed)
    }

    pub fn metrics(&self) -> Metrics {
        let counters = &self.shared.counters;
        Metrics {
            cycles: counters.cycles.load(Ordering::Relaxed),
            frames_published: counters.frames_published.load(Ordering::Relaxed),
            frames_evicted: self.frames.stats().evicted as u64,
            capture_failures: counters.capture_failures.load(Ordering::Relaxed),
            retrieval_failures: counters.retrieval_failures.load(Ordering::Relaxed),
            encoding_failures: counters.encoding_failures.load(Ordering::Relaxed),
            setup_failures: counters.setup_failures.load(Ordering::Relaxed),
            cycle_overruns: counters.cycle_overruns.load(Ordering::Relaxed),
            last_cycle_us: counters.last_cycle_us.load(Ordering::Relaxed),
        }
    }
}

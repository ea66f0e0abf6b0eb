//! Hardware-backed capture: one grab, three encoded views, one dense measure

use std::collections::BTreeSet;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use super::device::{DeviceInfo, OpenParams, Setting, StereoDevice};
use super::encode::encode_parallel;
use super::frame::{DenseMeasure, DenseMeasureKind, Frame, ImageRecord, RawImage, View};
use super::source::{CaptureOutcome, FrameSource, Variant};
use crate::error::{CaptureError, DeviceError, EncodingError, SetupError};
use crate::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    Unopened,
    Open,
    Closed,
}

/// Everything retrieved from the device for one grab
#[derive(Debug)]
pub struct RawFrameSet {
    pub timestamp: u64,
    pub left: Result<RawImage, DeviceError>,
    pub right: Result<RawImage, DeviceError>,
    pub depth: Result<RawImage, DeviceError>,
    pub measure: Result<DenseMeasure, DeviceError>,
}

/// Capture source delegating to a real [`StereoDevice`]
pub struct HardwareSource<D: StereoDevice> {
    device: D,
    params: OpenParams,
    dense_measure: DenseMeasureKind,
    camera_id: String,
    jpeg_quality: u8,
    state: DeviceState,
}

impl<D: StereoDevice> HardwareSource<D> {
    pub fn new(device: D, config: &CaptureConfig) -> Self {
        Self {
            device,
            params: OpenParams {
                resolution: config.resolution,
                fps: config.fps,
                depth_mode: config.depth_mode,
            },
            dense_measure: config.dense_measure,
            camera_id: config.camera_name.clone(),
            jpeg_quality: config.jpeg_quality,
            state: DeviceState::Unopened,
        }
    }

    /// Grab one image set and retrieve every view and the configured measure.
    pub fn poll_frame(&mut self) -> Result<RawFrameSet, CaptureError> {
        match self.state {
            DeviceState::Closed => return Err(CaptureError::AlreadyClosed),
            DeviceState::Unopened => return Err(CaptureError::Device("device not open".into())),
            DeviceState::Open => {}
        }

        self.device.grab()?;
        let timestamp = self.device.timestamp_ms();

        Ok(RawFrameSet {
            timestamp,
            left: self.device.retrieve_view(View::Left),
            right: self.device.retrieve_view(View::Right),
            depth: self.device.retrieve_view(View::Depth),
            measure: self.device.retrieve_measure(self.dense_measure),
        })
    }

    /// Encode the raw views and fold them into a frame.
    ///
    /// A view that failed to retrieve or encode keeps its slot with no bytes.
    /// A measure that failed or does not line up with the left view is dropped.
    pub fn transform(&self, raw: RawFrameSet, sequence: u64) -> Result<CaptureOutcome, CaptureError> {
        let views = [(View::Left, raw.left), (View::Right, raw.right), (View::Depth, raw.depth)];

        let retrieved: Vec<&RawImage> = views.iter().filter_map(|(_, r)| r.as_ref().ok()).collect();
        let mut encoded = encode_parallel(&retrieved, self.jpeg_quality).into_iter();

        let (open_width, open_height) = self.params.resolution.dimensions();
        let mut retrieval_failures = 0;
        let mut encoding_failures = 0;
        let mut records = Vec::with_capacity(3);

        for (view, retrieved) in &views {
            let (dims, bytes) = match retrieved {
                Ok(image) => {
                    let bytes = encoded
                        .next()
                        .unwrap_or_else(|| Err(EncodingError::Jpeg("missing encoder result".into())));
                    let bytes = match bytes {
                        Ok(bytes) => Some(bytes),
                        Err(e) => {
                            warn!(view = view.as_str(), error = %e, "Encoding failed, publishing view without data");
                            encoding_failures += 1;
                            None
                        }
                    };
                    (Some((image.width, image.height)), bytes)
                }
                Err(e) => {
                    warn!(view = view.as_str(), error = %e, "View retrieval failed");
                    retrieval_failures += 1;
                    (None, None)
                }
            };
            records.push((*view, dims, bytes));
        }

        // A missing view borrows the size of the first view the device did return
        let fallback = records
            .iter()
            .find_map(|(_, dims, _)| *dims)
            .unwrap_or((open_width, open_height));
        let mut records = records.into_iter().map(|(view, dims, bytes)| {
            let (width, height) = dims.unwrap_or(fallback);
            self.record(view, width, height, raw.timestamp, bytes)
        });

        // Three records were pushed above
        let (Some(left), Some(right), Some(depth)) = (records.next(), records.next(), records.next()) else {
            return Err(CaptureError::Device("incomplete view set".into()));
        };

        let dense_measure = match raw.measure {
            Ok(measure) if measure.dimensions() == (left.width, left.height) => Some(measure),
            Ok(measure) => {
                let (width, height) = measure.dimensions();
                warn!(
                    width,
                    height,
                    left_width = left.width,
                    left_height = left.height,
                    "Dense measure does not match left view, dropping it"
                );
                None
            }
            Err(e) => {
                warn!(kind = ?self.dense_measure, error = %e, "Measure retrieval failed");
                None
            }
        };

        let frame = Frame::assemble(sequence, raw.timestamp, left, right, depth, dense_measure)
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        Ok(CaptureOutcome {
            frame,
            retrieval_failures,
            encoding_failures,
        })
    }

    fn record(&self, view: View, width: u32, height: u32, timestamp: u64, bytes: Option<Bytes>) -> ImageRecord {
        ImageRecord {
            camera_id: format!("{}_{}", self.camera_id, view.as_str()),
            width,
            height,
            timestamp,
            encoded_bytes: bytes,
            tags: BTreeSet::new(),
        }
    }
}

impl<D: StereoDevice> FrameSource for HardwareSource<D> {
    fn variant(&self) -> Variant {
        Variant::Hardware
    }

    fn setup(&mut self) -> Result<DeviceInfo, SetupError> {
        match self.state {
            DeviceState::Closed => return Err(SetupError::AlreadyClosed),
            DeviceState::Unopened => {
                self.device.open(&self.params)?;
                self.state = DeviceState::Open;
                info!(params = ?self.params, "Camera open");
            }
            DeviceState::Open => {}
        }

        self.device
            .device_info()
            .map_err(|e| SetupError::Open(format!("device info unavailable: {e}")))
    }

    #[instrument(skip(self))]
    fn capture(&mut self, sequence: u64) -> Result<CaptureOutcome, CaptureError> {
        let raw = self.poll_frame()?;
        debug!(timestamp = raw.timestamp, "Grabbed image set");
        self.transform(raw, sequence)
    }

    fn get_setting(&self, setting: Setting) -> Result<i32, DeviceError> {
        match self.state {
            DeviceState::Closed => Err(DeviceError::AlreadyClosed),
            _ => self.device.get_setting(setting),
        }
    }

    fn set_setting(&mut self, setting: Setting, value: i32) -> Result<(), DeviceError> {
        match self.state {
            DeviceState::Closed => Err(DeviceError::AlreadyClosed),
            _ => self.device.set_setting(setting, value),
        }
    }

    fn close(&mut self) {
        if self.state == DeviceState::Closed {
            return;
        }
        self.device.close();
        self.state = DeviceState::Closed;
        info!("Camera closed");
    }
}

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Immutable stereo snapshot published once per successful capture cycle
#[derive(Debug, Clone)]
pub struct Frame {
    /// Publication order, assigned by the capture loop
    pub sequence: u64,

    /// Capture time in milliseconds (device clock or wall clock)
    pub timestamp: u64,

    pub left: ImageRecord,
    pub right: ImageRecord,
    pub depth: ImageRecord,

    /// Per-pixel measure aligned to `left`, absent in simulation
    pub dense_measure: Option<DenseMeasure>,
}

impl Frame {
    /// Assemble a frame, checking that right and the dense measure agree with left.
    pub fn assemble(
        sequence: u64,
        timestamp: u64,
        left: ImageRecord,
        right: ImageRecord,
        depth: ImageRecord,
        dense_measure: Option<DenseMeasure>,
    ) -> Result<Self, FrameError> {
        check_dims("right image", &left, right.width, right.height)?;
        if let Some(measure) = &dense_measure {
            let (width, height) = measure.dimensions();
            check_dims("dense measure", &left, width, height)?;
        }

        Ok(Self {
            sequence,
            timestamp,
            left,
            right,
            depth,
            dense_measure,
        })
    }

    pub fn view(&self, view: View) -> &ImageRecord {
        match view {
            View::Left => &self.left,
            View::Right => &self.right,
            View::Depth => &self.depth,
        }
    }

    pub fn depth_map(&self) -> Option<&DepthMap> {
        match &self.dense_measure {
            Some(DenseMeasure::Depth(map)) => Some(map),
            _ => None,
        }
    }

    pub fn point_map(&self) -> Option<&PointMap> {
        match &self.dense_measure {
            Some(DenseMeasure::Points(map)) => Some(map),
            _ => None,
        }
    }
}

fn check_dims(what: &'static str, left: &ImageRecord, width: u32, height: u32) -> Result<(), FrameError> {
    if left.width == width && left.height == height {
        return Ok(());
    }
    Err(FrameError::DimensionMismatch {
        what,
        width: left.width,
        height: left.height,
        actual_width: width,
        actual_height: height,
    })
}

/// One encoded view inside a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub camera_id: String,
    pub width: u32,
    pub height: u32,
    pub timestamp: u64,
    /// JPEG bytes, `None` only when the view failed to retrieve or encode
    pub encoded_bytes: Option<Bytes>,
    pub tags: BTreeSet<String>,
}

impl ImageRecord {
    pub fn is_broken(&self) -> bool {
        self.encoded_bytes.is_none()
    }
}

/// Named image views a stereo device exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Left,
    Right,
    Depth,
}

impl View {
    pub const ALL: [View; 3] = [View::Left, View::Right, View::Depth];

    pub fn as_str(&self) -> &'static str {
        match self {
            View::Left => "left",
            View::Right => "right",
            View::Depth => "depth",
        }
    }
}

/// Pixel layouts a device may hand back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Bgra8,
    Rgba8,
    Bgr8,
    Rgb8,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Unencoded view as retrieved from the device
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

/// Row-major 2-D grid
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

impl<T> Grid<T> {
    /// Returns `None` when `data` does not hold exactly `width * height` cells.
    pub fn new(width: u32, height: u32, data: Vec<T>) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_rows(rows: Vec<Vec<T>>) -> Option<Self> {
        let height = rows.len() as u32;
        let width = rows.first().map_or(0, |row| row.len()) as u32;
        if rows.iter().any(|row| row.len() as u32 != width) {
            return None;
        }
        Self::new(width, height, rows.into_iter().flatten().collect())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Cell at column `x`, row `y`.
    pub fn get(&self, x: u32, y: u32) -> Option<&T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y as usize * self.width as usize + x as usize)
    }

    pub fn row(&self, y: u32) -> Option<&[T]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.width as usize;
        self.data.get(start..start + self.width as usize)
    }
}

impl<T: Clone> Grid<T> {
    pub fn filled(width: u32, height: u32, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }
}

/// Scalar distances in millimeters, NaN marks invalid pixels
pub type DepthMap = Grid<f32>;

/// XYZ coordinates in millimeters
pub type PointMap = Grid<[f32; 3]>;

#[derive(Debug, Clone, PartialEq)]
pub enum DenseMeasure {
    Depth(DepthMap),
    Points(PointMap),
}

impl DenseMeasure {
    pub fn kind(&self) -> DenseMeasureKind {
        match self {
            DenseMeasure::Depth(_) => DenseMeasureKind::DepthMap,
            DenseMeasure::Points(_) => DenseMeasureKind::PointMap,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            DenseMeasure::Depth(map) => (map.width(), map.height()),
            DenseMeasure::Points(map) => (map.width(), map.height()),
        }
    }
}

/// Which dense measure a pipeline retrieves each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenseMeasureKind {
    DepthMap,
    PointMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(width: u32, height: u32) -> ImageRecord {
        ImageRecord {
            camera_id: "cam".into(),
            width,
            height,
            timestamp: 1,
            encoded_bytes: Some(Bytes::from_static(b"jpeg")),
            tags: BTreeSet::new(),
        }
    }

    #[test]
    fn test_grid_indexing_is_row_major() {
        let grid = Grid::from_rows(vec![vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 2);
        assert_eq!(grid.get(2, 0), Some(&3));
        assert_eq!(grid.get(0, 1), Some(&4));
        assert_eq!(grid.get(3, 0), None);
        assert_eq!(grid.row(1), Some(&[4, 5, 6][..]));
    }

    #[test]
    fn test_grid_rejects_ragged_rows() {
        assert!(Grid::from_rows(vec![vec![1, 2], vec![3]]).is_none());
        assert!(Grid::new(2, 2, vec![1.0f32; 3]).is_none());
    }

    #[test]
    fn test_assemble_rejects_mismatched_right() {
        let err = Frame::assemble(0, 1, record(4, 2), record(2, 2), record(4, 2), None).unwrap_err();
        assert!(matches!(err, FrameError::DimensionMismatch { what: "right image", .. }));
    }

    #[test]
    fn test_assemble_rejects_mismatched_measure() {
        let measure = DenseMeasure::Depth(DepthMap::filled(3, 2, 1.0));
        let err = Frame::assemble(0, 1, record(4, 2), record(4, 2), record(4, 2), Some(measure)).unwrap_err();
        assert!(matches!(err, FrameError::DimensionMismatch { what: "dense measure", .. }));
    }

    #[test]
    fn test_measure_accessors() {
        let measure = DenseMeasure::Points(PointMap::filled(4, 2, [0.0; 3]));
        let frame = Frame::assemble(0, 1, record(4, 2), record(4, 2), record(4, 2), Some(measure)).unwrap();
        assert!(frame.depth_map().is_none());
        assert_eq!(frame.point_map().map(|m| m.width()), Some(4));
        assert_eq!(frame.dense_measure.as_ref().map(|m| m.kind()), Some(DenseMeasureKind::PointMap));
    }

    #[test]
    fn test_broken_record() {
        let mut rec = record(1, 1);
        assert!(!rec.is_broken());
        rec.encoded_bytes = None;
        assert!(rec.is_broken());
    }
}

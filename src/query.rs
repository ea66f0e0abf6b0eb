//! Spatial queries against a single frame.
//!
//! All functions are pure with respect to the frame; they never touch the
//! history buffer or the device.

use serde::{Deserialize, Serialize};

use crate::capture::frame::Frame;
use crate::error::QueryError;

/// Millimeters per meter
const MM_PER_M: f64 = 1000.0;

/// Relative depth error of the stereo matcher
const RELATIVE_DEPTH_ERROR: f64 = 0.001;

/// Point in camera coordinates, meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Mean depth in millimeters around `(x, y)`, minus `lens_offset_mm`.
///
/// The square window `[x - r, x + r] × [y - r, y + r]` is clamped to the map;
/// NaN cells are skipped. A radius of 0 reads the single pixel as is. A window
/// with no finite cells yields NaN.
pub fn get_depth(frame: &Frame, x: u32, y: u32, window_radius: u32, lens_offset_mm: f64) -> Result<f64, QueryError> {
    let map = frame.depth_map().ok_or(QueryError::NoDepthData)?;
    let out_of_bounds = QueryError::OutOfBounds { x, y };

    if window_radius == 0 {
        let value = map.get(x, y).ok_or(out_of_bounds)?;
        return Ok(f64::from(*value) - lens_offset_mm);
    }

    if map.width() == 0 || map.height() == 0 {
        return Err(out_of_bounds);
    }
    let x0 = x.saturating_sub(window_radius);
    let y0 = y.saturating_sub(window_radius);
    let x1 = x.saturating_add(window_radius).min(map.width() - 1);
    let y1 = y.saturating_add(window_radius).min(map.height() - 1);
    if x0 > x1 || y0 > y1 {
        return Err(out_of_bounds);
    }

    let mut sum = 0.0f64;
    let mut count = 0usize;
    for row in y0..=y1 {
        let Some(cells) = map.row(row) else { continue };
        for value in &cells[x0 as usize..=x1 as usize] {
            if value.is_finite() {
                sum += f64::from(*value);
                count += 1;
            }
        }
    }

    if count == 0 {
        return Ok(f64::NAN);
    }
    Ok(sum / count as f64 - lens_offset_mm)
}

/// 3-D point at `(x, y)`, converted from millimeters to meters.
pub fn get_point(frame: &Frame, x: u32, y: u32) -> Result<Point3D, QueryError> {
    let map = frame.point_map().ok_or(QueryError::NoPointData)?;
    let [px, py, pz] = map.get(x, y).ok_or(QueryError::IndexOutOfBounds {
        x,
        y,
        width: map.width(),
        height: map.height(),
    })?;

    Ok(Point3D {
        x: f64::from(*px) / MM_PER_M,
        y: f64::from(*py) / MM_PER_M,
        z: f64::from(*pz) / MM_PER_M,
    })
}

/// Expected absolute error of a depth reading, same unit as `depth`.
pub fn depth_uncertainty_mm(depth: f64) -> f64 {
    (depth * RELATIVE_DEPTH_ERROR).abs()
}

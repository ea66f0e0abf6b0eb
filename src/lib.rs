pub mod capture;
pub mod error;
pub mod pipeline;
pub mod query;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{DenseMeasureKind, DepthMode, Frame, Resolution, Variant, View};
pub use error::ConfigError;
pub use pipeline::{Camera, CapturePipeline, PipelineHandle, PipelineState};
pub use query::Point3D;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix for environment overrides, e.g. `STEREOCAM_CAPTURE__VARIANT=simulation`
pub const ENV_PREFIX: &str = "STEREOCAM";

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub history: HistoryConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub variant: Variant,
    pub camera_name: String,
    pub resolution: Resolution,
    pub fps: u32,
    pub depth_mode: DepthMode,
    pub dense_measure: DenseMeasureKind,
    pub period_ms: u64,
    /// Cycle period of the simulation variant, which has no sensor rate to follow
    pub simulation_period_ms: u64,
    pub jpeg_quality: u8,
    /// Minimum spacing between device open attempts
    pub setup_retry_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub retention_secs: u32,
    /// 0 derives the capacity from `retention_secs * fps`
    pub capacity: usize,
}

/// Defaults for depth queries that don't pass their own window and offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    pub window_radius: u32,
    pub lens_offset_mm: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                variant: Variant::Hardware,
                camera_name: "stereocam".into(),
                resolution: Resolution::Hd1080,
                fps: 30,
                depth_mode: DepthMode::Quality,
                dense_measure: DenseMeasureKind::PointMap,
                period_ms: 33, // 30fps target
                simulation_period_ms: 1000,
                jpeg_quality: 95,
                setup_retry_ms: 1000,
            },
            history: HistoryConfig {
                retention_secs: 40,
                capacity: 0,
            },
            query: QueryConfig {
                window_radius: 0,
                lens_offset_mm: 0.0,
            },
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `STEREOCAM_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;
        if capture.fps == 0 {
            return Err(ConfigError::Invalid("capture.fps must be positive".into()));
        }
        if capture.period_ms == 0 {
            return Err(ConfigError::Invalid("capture.period_ms must be positive".into()));
        }
        if capture.simulation_period_ms == 0 {
            return Err(ConfigError::Invalid("capture.simulation_period_ms must be positive".into()));
        }
        if !(1..=100).contains(&capture.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "capture.jpeg_quality must be within 1..=100, got {}",
                capture.jpeg_quality
            )));
        }
        if self.history_capacity() == 0 {
            return Err(ConfigError::Invalid(
                "history needs a non-zero capacity or retention_secs".into(),
            ));
        }
        Ok(())
    }

    /// Frames kept in memory: the explicit capacity, or retention time × frame rate.
    pub fn history_capacity(&self) -> usize {
        if self.history.capacity > 0 {
            return self.history.capacity;
        }
        self.history.retention_secs as usize * self.capture.fps as usize
    }

    /// Capture cycle period for the given pipeline variant.
    pub fn period_for(&self, variant: Variant) -> Duration {
        match variant {
            Variant::Hardware => Duration::from_millis(self.capture.period_ms),
            Variant::Simulation => Duration::from_millis(self.capture.simulation_period_ms),
        }
    }
}

/// Performance counters collected throughout the pipeline
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    pub cycles: u64,
    pub frames_published: u64,
    pub frames_evicted: u64,
    pub capture_failures: u64,
    /// Views published without data because the device did not return them
    pub retrieval_failures: u64,
    /// Views published without data because JPEG encoding failed
    pub encoding_failures: u64,
    pub setup_failures: u64,
    pub cycle_overruns: u64,
    pub last_cycle_us: u64,
}

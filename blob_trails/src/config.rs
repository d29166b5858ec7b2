// THEORY:
// All tunable behavior of the engine lives in one explicit value, `TrackerConfig`,
// which is handed to the `TrackerRegistry` at construction. Nothing in the
// analysis modules reads global state.
//
// The configuration is loaded from a JSON file. Every field has a default, so a
// file only needs to name what it overrides. `validate` runs on every load and
// rejects values that would make the trackers loop forever or read outside the
// reference raster; such a configuration is fatal at startup.

use crate::core_modules::projection::Homography;
use crate::error::{Result, TrackingError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the tracker registry and its tick loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Trajectory samples retained by each line and circle tracker.
    pub max_history_length: usize,
    /// Projected samples retained by each path matcher.
    pub path_history_length: usize,
    /// Seconds before a sample is evicted regardless of count.
    pub max_sample_age: f64,
    /// A line is reported only when its residual is below this value.
    /// `None` disables line reporting.
    pub line_detection_residual_threshold: Option<f64>,
    /// A circle is rejected when its residual exceeds this value.
    pub circle_detection_residual_threshold: Option<f64>,
    /// A circle is rejected when its radius exceeds this value. Without a limit
    /// the algebraic fit finds a huge circle in almost any point set.
    pub circle_max_radius: Option<f64>,
    /// Idle ticks a tracker survives without new samples.
    pub max_lifetime: u32,
    /// Smallest window, in samples, that a shape fit is attempted on.
    pub track_length: usize,
    /// Samples added to the window on each widening step.
    pub track_step: usize,
    /// Upper bound on how long the tick loop waits for events before ticking.
    pub poll_timeout_ms: u64,
    pub path: PathConfig,
    pub projection: ProjectionConfig,
    /// Grayscale images describing the reference paths. Non-zero pixels are path.
    pub reference_paths: Vec<PathBuf>,
}

/// Settings of the nearest-path search done by every path matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Radius, in pixels, of the neighborhood searched for the closest path pixel.
    pub max_distance: u32,
    /// Padding around traveled segments, and extra clearance from the raster edge.
    pub margin: u32,
    /// Projected moves shorter than this are treated as jitter.
    pub min_step: f64,
    /// Value given to off-path cells during the nearest-path search.
    pub off_path_penalty: f64,
}

/// Four control points in camera space and where they land in model space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub input: [[f64; 2]; 4],
    pub output: [[f64; 2]; 4],
}

const FRAME_CORNERS: [[f64; 2]; 4] = [[0.0, 0.0], [640.0, 0.0], [640.0, 480.0], [0.0, 480.0]];

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_history_length: 50,
            path_history_length: 300,
            max_sample_age: 1e6,
            line_detection_residual_threshold: Some(64.0),
            circle_detection_residual_threshold: Some(8192.0),
            circle_max_radius: Some(256.0),
            max_lifetime: 30,
            track_length: 20,
            track_step: 20,
            poll_timeout_ms: 33,
            path: PathConfig::default(),
            projection: ProjectionConfig::default(),
            reference_paths: Vec::new(),
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            max_distance: 32,
            margin: 8,
            min_step: 4.0,
            off_path_penalty: 255.0,
        }
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            input: FRAME_CORNERS,
            output: FRAME_CORNERS,
        }
    }
}

impl ProjectionConfig {
    /// Builds the camera-to-model transform. Identical control point sets mean
    /// no projection at all.
    pub fn homography(&self) -> Result<Option<Homography>> {
        if self.input == self.output {
            return Ok(None);
        }
        Homography::from_correspondences(&self.input, &self.output).map(Some)
    }
}

impl TrackerConfig {
    /// Reads, parses and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        // Three parameters per circle fit.
        if self.track_length < 3 {
            return invalid("track_length must be at least 3");
        }
        if self.track_step == 0 {
            return invalid("track_step must be positive");
        }
        if self.max_history_length < self.track_length {
            return invalid("max_history_length must be at least track_length");
        }
        if self.path_history_length == 0 {
            return invalid("path_history_length must be positive");
        }
        if self.max_sample_age.is_nan() || self.max_sample_age < 0.0 {
            return invalid("max_sample_age must be non-negative");
        }
        if self.max_lifetime == 0 {
            return invalid("max_lifetime must be positive");
        }
        if self.poll_timeout_ms == 0 {
            return invalid("poll_timeout_ms must be positive");
        }
        for (name, threshold) in [
            ("line_detection_residual_threshold", self.line_detection_residual_threshold),
            ("circle_detection_residual_threshold", self.circle_detection_residual_threshold),
            ("circle_max_radius", self.circle_max_radius),
        ] {
            if threshold.is_some_and(|value| value.is_nan()) {
                return Err(TrackingError::Config(format!("{name} must be a number")));
            }
        }
        self.path.validate()
    }
}

impl PathConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_distance == 0 {
            return invalid("path.max_distance must be positive");
        }
        // The neighborhood search reads up to max_distance past the sample; the
        // margin keeps that read inside the raster.
        if self.margin == 0 {
            return invalid("path.margin must be positive");
        }
        if self.min_step.is_nan() || self.min_step < 0.0 {
            return invalid("path.min_step must be non-negative");
        }
        if self.off_path_penalty.is_nan() {
            return invalid("path.off_path_penalty must be a number");
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Result<()> {
    Err(TrackingError::Config(message.to_string()))
}

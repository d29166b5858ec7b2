// THEORY:
// Every failure the engine can observe is named here, in one enum. Most of them
// never reach the caller of the tick loop: the per-tick numerical conditions
// (`InsufficientHistory`, `OutOfBounds`, `DegenerateFit`) are recovered where
// they happen and degrade to "no detection". Only configuration and asset
// problems are meant to stop the process, and those happen at startup.

use crate::core_modules::timed_sample::BlobId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackingError {
    /// A read-only view asked for more samples than the buffer holds.
    #[error("history holds {available} samples, {requested} requested")]
    EmptyHistory { requested: usize, available: usize },

    /// A fit was requested before enough samples accumulated.
    #[error("not enough history to fit: {available} samples, {required} required")]
    InsufficientHistory { required: usize, available: usize },

    /// A position is too close to the raster edge, or projects to infinity.
    #[error("position ({x:.1}, {y:.1}) is outside the searchable raster area")]
    OutOfBounds { x: f64, y: f64 },

    /// The least-squares system does not have full column rank.
    #[error("least-squares system is rank deficient (rank {rank} of {columns})")]
    DegenerateFit { rank: usize, columns: usize },

    /// The projection control points do not define a perspective transform.
    #[error("projection control points do not define a homography")]
    DegenerateProjection,

    #[error("blob {0} is not tracked")]
    UnknownBlob(BlobId),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to load reference path: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrackingError>;

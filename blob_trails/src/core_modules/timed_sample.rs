// THEORY:
// A `TimedSample` is the smallest unit of data in the engine: one observed
// position of a blob and the moment it was observed. Like the pixel in an image
// pipeline it is a "dumb" value. It knows nothing about the blob it belongs to
// or about the shapes that will be fitted through it.
//
// Timestamps are monotonic seconds supplied by whoever feeds the engine. The
// engine never reads a clock of its own, so a replay of the same events gives the
// same results.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Identifier assigned to a blob by the upstream detector. Trusted as-is.
pub type BlobId = u64;

/// Anything that can live in a `HistoryBuffer` must say when it was observed.
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

/// A single observed position and its capture time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedSample {
    pub position: Point2<f64>,
    /// Monotonic capture time, in seconds.
    pub timestamp: f64,
}

impl TimedSample {
    pub fn new(position: Point2<f64>, timestamp: f64) -> Self {
        Self {
            position,
            timestamp,
        }
    }
}

impl Timestamped for TimedSample {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// A position update for one blob, as delivered by the external detector.
/// Extra fields sent alongside (size, age, ...) are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlobUpdate {
    pub blob_id: BlobId,
    pub x: f64,
    pub y: f64,
}

impl BlobUpdate {
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

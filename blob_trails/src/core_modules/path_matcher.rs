// THEORY:
// A `PathMatcher` follows one blob against one reference path. It answers two
// questions each tick: how much of the path has the blob covered (`traveled`),
// and how closely did it stick to it (`error`).
//
// Key architectural principles:
// 1.  **Project, Then Remember**: Each sample is mapped into model space, snapped to
//     the nearest path pixel within `max_distance`, and stored with its distance.
//     Snaps that move less than `min_step` from the previous one are jitter; they
//     keep the matcher alive but are not stored.
// 2.  **Edge Guard**: Samples closer than `margin + max_distance` to the raster edge
//     are dropped with `OutOfBounds`, so the neighborhood search never leaves the
//     raster.
// 3.  **Corridor Coverage**: Completion is computed by painting a padded rectangle
//     over every pair of consecutive snapped points and counting the path pixels
//     the painted corridor covers.
// 4.  **Same Lifecycle as Shapes**: `travel` recomputes only after new data, and
//     otherwise decays `lifetime` and repeats the previous answer.

use crate::config::TrackerConfig;
use crate::core_modules::history::HistoryBuffer;
use crate::core_modules::path_reference::PathReference;
use crate::core_modules::timed_sample::{TimedSample, Timestamped};
use crate::error::{Result, TrackingError};
use image::{GrayImage, Luma};
use nalgebra::Point2;
use serde::Serialize;
use std::sync::Arc;

/// Error reported before any sample has been matched.
pub const UNTRAVELED_ERROR: f64 = 1e100;

/// A sample and where it landed on the reference path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedPoint {
    /// The position as it arrived, in camera space.
    pub raw_position: Point2<f64>,
    /// The nearest path pixel, in model space.
    pub projected_position: Point2<i64>,
    /// Distance from the model-space sample to `projected_position`.
    pub distance: f64,
    pub timestamp: f64,
}

impl Timestamped for ProjectedPoint {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// What `follow` did with an accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    /// The sample was projected and stored.
    Appended,
    /// The sample snapped too close to the previous one and was not stored.
    Redundant,
}

/// Completion and tracking error of one blob against one path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PathProgress {
    /// Fraction of the path's pixels covered, in `[0, 1]`.
    pub traveled: f64,
    /// Root-mean-square distance of the stored samples to the path.
    pub error: f64,
}

impl Default for PathProgress {
    fn default() -> Self {
        Self {
            traveled: 0.0,
            error: UNTRAVELED_ERROR,
        }
    }
}

/// Tracks how far along one reference path a single blob has moved.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    reference: Arc<PathReference>,
    history: HistoryBuffer<ProjectedPoint>,
    /// Padding around each corridor segment, also part of the edge guard.
    margin: u32,
    min_step: f64,
    lifetime: i32,
    max_lifetime: i32,
    /// Set by `follow`, cleared by `travel`.
    updated: bool,
    progress: PathProgress,
}

impl PathMatcher {
    pub fn new(reference: Arc<PathReference>, config: &TrackerConfig) -> Self {
        let max_lifetime = i32::try_from(config.max_lifetime).unwrap_or(i32::MAX);
        Self {
            reference,
            history: HistoryBuffer::new(config.path_history_length, config.max_sample_age),
            margin: config.path.margin,
            min_step: config.path.min_step,
            lifetime: max_lifetime,
            max_lifetime,
            updated: false,
            progress: PathProgress::default(),
        }
    }

    /// Projects `sample` onto the reference path and records it.
    pub fn follow(&mut self, sample: &TimedSample) -> Result<FollowOutcome> {
        let out_of_bounds = TrackingError::OutOfBounds {
            x: sample.position.x,
            y: sample.position.y,
        };
        let position = match self.reference.projection() {
            Some(homography) => homography.apply(&sample.position).ok_or(out_of_bounds)?,
            None => sample.position,
        };
        if !position.x.is_finite() || !position.y.is_finite() {
            return Err(TrackingError::OutOfBounds {
                x: position.x,
                y: position.y,
            });
        }

        // Truncate to the pixel grid.
        let (x, y) = (position.x as i64, position.y as i64);
        let reach = i64::from(self.margin) + i64::from(self.reference.max_distance());
        let (width, height) = (
            i64::from(self.reference.width()),
            i64::from(self.reference.height()),
        );
        if x < reach || x > width - reach || y < reach || y > height - reach {
            return Err(TrackingError::OutOfBounds {
                x: position.x,
                y: position.y,
            });
        }

        let (projected_position, distance) = self.reference.nearest_path_cell(x, y);

        if let Ok(last) = self.history.latest() {
            let step = projected_position - last.projected_position;
            let step = ((step.x * step.x + step.y * step.y) as f64).sqrt();
            if step < self.min_step {
                self.updated = true;
                return Ok(FollowOutcome::Redundant);
            }
        }

        self.history.append(ProjectedPoint {
            raw_position: sample.position,
            projected_position,
            distance,
            timestamp: sample.timestamp,
        });
        self.updated = true;
        Ok(FollowOutcome::Appended)
    }

    /// Recomputes completion and error if new samples arrived; otherwise decays.
    pub fn travel(&mut self) -> PathProgress {
        if !self.updated {
            self.lifetime = self.lifetime.saturating_sub(1);
            return self.progress;
        }
        self.lifetime = self.max_lifetime;
        self.updated = false;

        let traveled = match self.reference.path_area() {
            0 => 0.0,
            area => {
                let covered = self.reference.covered_area(&self.corridor());
                (covered as f64 / area as f64).clamp(0.0, 1.0)
            }
        };

        let error = if self.history.is_empty() {
            UNTRAVELED_ERROR
        } else {
            let squared: f64 = self.history.iter().map(|p| p.distance * p.distance).sum();
            (squared / self.history.len() as f64).sqrt()
        };

        self.progress = PathProgress { traveled, error };
        self.progress
    }

    /// Paints a `margin`-padded rectangle over each pair of consecutive snapped
    /// points. A lone point paints the rectangle around itself.
    pub fn corridor(&self) -> GrayImage {
        let mut corridor = GrayImage::new(self.reference.width(), self.reference.height());
        let points: Vec<Point2<i64>> = self.history.iter().map(|p| p.projected_position).collect();
        match points.as_slice() {
            [] => {}
            [only] => self.paint_segment(&mut corridor, only, only),
            _ => {
                for pair in points.windows(2) {
                    self.paint_segment(&mut corridor, &pair[0], &pair[1]);
                }
            }
        }
        corridor
    }

    fn paint_segment(&self, corridor: &mut GrayImage, from: &Point2<i64>, to: &Point2<i64>) {
        let margin = i64::from(self.margin);
        let max_x = i64::from(corridor.width()) - 1;
        let max_y = i64::from(corridor.height()) - 1;
        let x0 = (from.x.min(to.x) - margin).max(0);
        let x1 = (from.x.max(to.x) + margin).min(max_x);
        let y0 = (from.y.min(to.y) - margin).max(0);
        let y1 = (from.y.max(to.y) + margin).min(max_y);
        for y in y0..=y1 {
            for x in x0..=x1 {
                corridor.put_pixel(x as u32, y as u32, Luma([1]));
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.lifetime > 0
    }

    pub fn lifetime(&self) -> i32 {
        self.lifetime
    }

    pub fn progress(&self) -> PathProgress {
        self.progress
    }

    pub fn history(&self) -> &HistoryBuffer<ProjectedPoint> {
        &self.history
    }

    pub fn reference(&self) -> &PathReference {
        &self.reference
    }
}

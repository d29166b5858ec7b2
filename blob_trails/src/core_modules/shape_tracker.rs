// THEORY:
// A `ShapeTracker` asks one question about a blob's recent trajectory: "does it
// look like this shape?" The lifecycle (following samples, deciding when to
// refit, counting down idle ticks) is the same for every shape, so it lives
// here once. What differs between a line and a circle is captured by the
// `ShapeModel` trait: how a point becomes a regression row, and how a fit is
// turned into a detection.
//
// Key architectural principles:
// 1.  **Dirty-Flag Refits**: `follow` only records a sample. The expensive fit runs
//     in `track`, once per tick, and only if something new arrived since the last
//     tick. An idle tick decrements `lifetime` and returns the previous fit as is.
// 2.  **Widening Window**: The fit starts on the newest `track_length` samples and
//     widens by `track_step` while history allows, keeping whichever window gave
//     the lowest residual. More points reject noise; fewer points stay recent.
// 3.  **Local Recovery**: Too little history or a rank-deficient system never
//     escapes `track`. They degrade to "no fit" or to a fit with a huge residual.

use crate::config::TrackerConfig;
use crate::core_modules::history::HistoryBuffer;
use crate::core_modules::least_squares::{self, FitResult};
use crate::core_modules::projection::Homography;
use crate::core_modules::timed_sample::TimedSample;
use crate::error::{Result, TrackingError};
use nalgebra::{DMatrix, DVector, Point2};
use tracing::{debug, trace};

/// The shape-specific half of a tracker.
pub trait ShapeModel {
    /// What `identify` reports when the fit is accepted.
    type Detection;

    /// Regressors per sample, not counting the intercept column.
    const REGRESSORS: usize;

    /// Writes the regressors of `point` into `row` (length `REGRESSORS`) and
    /// returns the regression target.
    fn regression_row(point: &Point2<f64>, row: &mut [f64]) -> f64;

    /// Turns the last fit into a detection, or `None` when it fails the model's gates.
    /// `recent` holds the samples the completeness-style scores are measured on.
    fn identify(&self, fit: &FitResult, recent: &[Point2<f64>]) -> Option<Self::Detection>;
}

/// Lifecycle and windowed least-squares fitting shared by every shape.
#[derive(Debug, Clone)]
pub struct ShapeTracker<M> {
    model: M,
    /// Projected (model-space) positions, oldest first.
    history: HistoryBuffer<TimedSample>,
    projection: Option<Homography>,
    /// The fit produced by the last tick that had new data.
    last_fit: Option<FitResult>,
    /// Idle ticks left before this tracker is considered dead.
    lifetime: i32,
    max_lifetime: i32,
    track_length: usize,
    track_step: usize,
    /// Set by `follow`, cleared by `track`.
    dirty: bool,
}

impl<M: ShapeModel> ShapeTracker<M> {
    pub fn new(model: M, config: &TrackerConfig, projection: Option<Homography>) -> Self {
        let max_lifetime = i32::try_from(config.max_lifetime).unwrap_or(i32::MAX);
        Self {
            model,
            history: HistoryBuffer::new(config.max_history_length, config.max_sample_age),
            projection,
            last_fit: None,
            lifetime: max_lifetime,
            max_lifetime,
            track_length: config.track_length,
            track_step: config.track_step.max(1),
            dirty: false,
        }
    }

    /// Projects `sample` into model space and records it.
    pub fn follow(&mut self, sample: &TimedSample) -> Result<()> {
        let position = match &self.projection {
            Some(homography) => {
                homography
                    .apply(&sample.position)
                    .ok_or(TrackingError::OutOfBounds {
                        x: sample.position.x,
                        y: sample.position.y,
                    })?
            }
            None => sample.position,
        };
        self.history.append(TimedSample::new(position, sample.timestamp));
        self.dirty = true;
        Ok(())
    }

    /// Refits if new samples arrived since the last call; otherwise decays.
    pub fn track(&mut self) -> Option<FitResult> {
        if !self.dirty {
            self.lifetime = self.lifetime.saturating_sub(1);
            return self.last_fit.clone();
        }
        self.lifetime = self.max_lifetime;
        self.dirty = false;

        self.last_fit = match self.fit() {
            Ok(fit) => Some(fit),
            Err(err) => {
                trace!(%err, "no shape fit this tick");
                None
            }
        };
        self.last_fit.clone()
    }

    /// The model's verdict on the last fit.
    pub fn identify(&self) -> Option<M::Detection> {
        let fit = self.last_fit.as_ref()?;
        let recent: Vec<Point2<f64>> = self
            .history
            .window(self.track_length)
            .ok()?
            .map(|sample| sample.position)
            .collect();
        self.model.identify(fit, &recent)
    }

    pub fn is_alive(&self) -> bool {
        self.lifetime > 0
    }

    pub fn lifetime(&self) -> i32 {
        self.lifetime
    }

    pub fn last_fit(&self) -> Option<&FitResult> {
        self.last_fit.as_ref()
    }

    pub fn history(&self) -> &HistoryBuffer<TimedSample> {
        &self.history
    }

    fn fit(&self) -> Result<FitResult> {
        let available = self.history.len();
        if available < self.track_length {
            return Err(TrackingError::InsufficientHistory {
                required: self.track_length,
                available,
            });
        }

        let mut window = self.track_length;
        let mut best = self.fit_window(window)?;
        while window + self.track_step <= self.history.max_length()
            && window + self.track_step <= available
        {
            window += self.track_step;
            let candidate = self.fit_window(window)?;
            if candidate.residual < best.residual {
                best = candidate;
            }
        }
        Ok(best)
    }

    /// Least-squares fit over the newest `window` samples, with an intercept column.
    fn fit_window(&self, window: usize) -> Result<FitResult> {
        let columns = M::REGRESSORS + 1;
        let mut design = DMatrix::zeros(window, columns);
        let mut target = DVector::zeros(window);
        let mut row = vec![0.0; M::REGRESSORS];
        for (r, sample) in self.history.window(window)?.enumerate() {
            target[r] = M::regression_row(&sample.position, &mut row);
            for (c, value) in row.iter().enumerate() {
                design[(r, c)] = *value;
            }
            design[(r, M::REGRESSORS)] = 1.0;
        }

        Ok(least_squares::solve(&design, &target).unwrap_or_else(|err| {
            debug!(%err, window, "degenerate shape fit");
            FitResult::degenerate(columns)
        }))
    }
}

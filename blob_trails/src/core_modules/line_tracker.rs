// THEORY:
// The line model fits `y = slope·x + intercept` in model space. Points are used
// as they are: `x` is the single regressor and `y` is the target. This is an
// ordinary (vertical-offset) regression, so near-vertical runs of points fit
// poorly, and an exactly vertical run is rank deficient and never reported.
//
// The residual threshold is the precision/recall knob: the lower it is, the
// straighter a trajectory must be before a line is reported.

use crate::config::TrackerConfig;
use crate::core_modules::least_squares::FitResult;
use crate::core_modules::shape_tracker::{ShapeModel, ShapeTracker};
use nalgebra::Point2;
use serde::Serialize;

pub type LineTracker = ShapeTracker<LineModel>;

/// Gate applied to line fits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineModel {
    /// Lines are reported only when the residual is strictly below this value.
    /// Without a threshold nothing is reported.
    pub residual_threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineDetection {
    pub slope: f64,
    pub intercept: f64,
}

impl LineModel {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            residual_threshold: config.line_detection_residual_threshold,
        }
    }
}

impl ShapeModel for LineModel {
    type Detection = LineDetection;
    const REGRESSORS: usize = 1;

    fn regression_row(point: &Point2<f64>, row: &mut [f64]) -> f64 {
        row[0] = point.x;
        point.y
    }

    fn identify(&self, fit: &FitResult, _recent: &[Point2<f64>]) -> Option<LineDetection> {
        let threshold = self.residual_threshold?;
        if fit.residual < threshold {
            Some(LineDetection {
                slope: fit.parameters[0],
                intercept: fit.parameters[1],
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::timed_sample::TimedSample;

    fn tracker(threshold: Option<f64>) -> LineTracker {
        LineTracker::new(
            LineModel {
                residual_threshold: threshold,
            },
            &TrackerConfig::default(),
            None,
        )
    }

    fn feed(tracker: &mut LineTracker, points: impl IntoIterator<Item = (f64, f64)>) {
        for (i, (x, y)) in points.into_iter().enumerate() {
            tracker
                .follow(&TimedSample::new(Point2::new(x, y), i as f64 * 0.03))
                .unwrap();
        }
    }

    #[test]
    fn exact_line_is_recovered() {
        let mut line = tracker(Some(64.0));
        feed(&mut line, (0..20).map(|i| {
            let x = i as f64 * 3.0;
            (x, 2.0 * x + 1.0)
        }));

        let fit = line.track().expect("twenty samples are enough to fit");
        assert!(fit.residual < 1e-6);
        let detection = line.identify().unwrap();
        assert!((detection.slope - 2.0).abs() < 1e-6);
        assert!((detection.intercept - 1.0).abs() < 1e-6);
    }

    #[test]
    fn too_little_history_is_undetected() {
        let mut line = tracker(Some(64.0));
        feed(&mut line, (0..19).map(|i| (i as f64, i as f64)));
        assert!(line.track().is_none());
        assert!(line.identify().is_none());
        assert_eq!(line.lifetime(), 30);
    }

    #[test]
    fn threshold_gates_monotonically() {
        // A zig-zag around y = x/2 gives a fixed, non-zero residual.
        let points: Vec<(f64, f64)> = (0..40)
            .map(|i| {
                let x = i as f64;
                let wobble = if i % 2 == 0 { 1.5 } else { -1.5 };
                (x, 0.5 * x + wobble)
            })
            .collect();

        let mut unbounded = tracker(None);
        feed(&mut unbounded, points.iter().copied());
        let residual = unbounded.track().unwrap().residual;
        assert!(residual > 1.0);
        assert!(unbounded.identify().is_none(), "no threshold means no detection");

        let mut strict = tracker(Some(residual * 0.5));
        feed(&mut strict, points.iter().copied());
        strict.track();
        assert!(strict.identify().is_none());

        let mut lenient = tracker(Some(residual * 2.0));
        feed(&mut lenient, points.iter().copied());
        lenient.track();
        assert!(lenient.identify().is_some());
    }

    #[test]
    fn widening_keeps_the_lower_residual_window() {
        // Old samples wander off the line, the newest 20 sit exactly on it.
        let mut line = tracker(Some(64.0));
        let noisy = (0..20).map(|i| (i as f64, if i % 2 == 0 { 10.0 } else { -10.0 }));
        let clean = (20..40).map(|i| (i as f64, -(i as f64) + 4.0));
        feed(&mut line, noisy.chain(clean));

        let fit = line.track().unwrap();
        assert!(fit.residual < 1e-6);
        let detection = line.identify().unwrap();
        assert!((detection.slope + 1.0).abs() < 1e-6);
        assert!((detection.intercept - 4.0).abs() < 1e-6);
    }

    #[test]
    fn vertical_run_is_rejected() {
        let mut line = tracker(Some(64.0));
        feed(&mut line, (0..20).map(|i| (5.0, i as f64)));
        let fit = line.track().unwrap();
        assert!(fit.is_degenerate());
        assert!(line.identify().is_none());
    }
}

// THEORY:
// The circle model uses the algebraic circle fit. Expanding
// `(x - cx)² + (y - cy)² = r²` gives
// `-2x·cx - 2y·cy + c = -(x² + y²)` with `c = cx² + cy² - r²`, which is linear in
// `(cx, cy, c)`. Each point becomes the row `(-2x, -2y, 1)` with target
// `-(x² + y²)`, and an ordinary least-squares solve yields the center. The radius
// follows as `sqrt(cx² + cy² - c)`.
//
// Nearly straight point sets fit a circle of enormous radius, so the radius cap
// is as important a gate as the residual. The residual is measured in the
// transformed space (squared pixels), which is why its threshold is large.
//
// `completeness` is a cheap heuristic: the length of the mean offset of the
// recent points from the fitted center, divided by the radius. Points spread all
// around the circle average out near the center (low value); points bunched on
// one arc do not (high value). It is not a swept-angle measurement.

use crate::config::TrackerConfig;
use crate::core_modules::least_squares::FitResult;
use crate::core_modules::shape_tracker::{ShapeModel, ShapeTracker};
use nalgebra::{Point2, Vector2};
use serde::Serialize;

pub type CircleTracker = ShapeTracker<CircleModel>;

/// Gates applied to circle fits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleModel {
    /// Circles wider than this are rejected.
    pub max_radius: Option<f64>,
    /// Circles whose residual exceeds this are rejected.
    pub residual_threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CircleDetection {
    pub center_x: f64,
    pub center_y: f64,
    pub radius: f64,
    pub completeness: f64,
}

impl CircleModel {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            max_radius: config.circle_max_radius,
            residual_threshold: config.circle_detection_residual_threshold,
        }
    }
}

impl ShapeModel for CircleModel {
    type Detection = CircleDetection;
    const REGRESSORS: usize = 2;

    fn regression_row(point: &Point2<f64>, row: &mut [f64]) -> f64 {
        row[0] = -2.0 * point.x;
        row[1] = -2.0 * point.y;
        -(point.x * point.x + point.y * point.y)
    }

    fn identify(&self, fit: &FitResult, recent: &[Point2<f64>]) -> Option<CircleDetection> {
        let center = Point2::new(fit.parameters[0], fit.parameters[1]);
        let c = fit.parameters[2];
        let radius = (center.coords.norm_squared() - c).sqrt();
        if !radius.is_finite() || radius <= 0.0 {
            return None;
        }
        if self.max_radius.is_some_and(|max| radius > max) {
            return None;
        }
        if self.residual_threshold.is_some_and(|max| fit.residual > max) {
            return None;
        }
        if recent.is_empty() {
            return None;
        }

        let offset_sum: Vector2<f64> = recent.iter().map(|p| p - center).sum();
        let mean_offset = offset_sum / recent.len() as f64;

        Some(CircleDetection {
            center_x: center.x,
            center_y: center.y,
            radius,
            completeness: mean_offset.norm() / radius,
        })
    }
}

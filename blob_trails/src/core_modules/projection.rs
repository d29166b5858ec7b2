// THEORY:
// Blob positions arrive in camera coordinates, but lines, circles and reference
// paths are described in a model space (for example the floor plane seen from an
// angle). A planar perspective transform, a homography, maps one onto the other.
//
// The transform is built once from four control point pairs and copied into
// every tracker that needs it; it is a plain 3x3 matrix and never changes.

use crate::error::{Result, TrackingError};
use nalgebra::{Matrix3, Point2, SMatrix, SVector};

const EPS: f64 = 1e-12;

/// A 3x3 planar perspective transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    pub fn from_matrix(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    /// Solves for the transform taking each `src[i]` onto `dst[i]`.
    ///
    /// With `h33` fixed to one, each correspondence contributes two rows of an
    /// 8x8 linear system. Three collinear control points make it singular.
    pub fn from_correspondences(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Result<Self> {
        if has_collinear_triple(src) || has_collinear_triple(dst) {
            return Err(TrackingError::DegenerateProjection);
        }

        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for (i, (&[x, y], &[u, v])) in src.iter().zip(dst.iter()).enumerate() {
            let r = 2 * i;
            a[(r, 0)] = x;
            a[(r, 1)] = y;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -x * u;
            a[(r, 7)] = -y * u;
            b[r] = u;

            a[(r + 1, 3)] = x;
            a[(r + 1, 4)] = y;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -x * v;
            a[(r + 1, 7)] = -y * v;
            b[r + 1] = v;
        }

        let h = a.lu().solve(&b).ok_or(TrackingError::DegenerateProjection)?;
        if h.iter().any(|value| !value.is_finite()) {
            return Err(TrackingError::DegenerateProjection);
        }

        Ok(Self {
            matrix: Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0),
        })
    }

    /// Maps a camera-space point into model space. Points sent to infinity by the
    /// transform have no image and yield `None`.
    pub fn apply(&self, point: &Point2<f64>) -> Option<Point2<f64>> {
        let v = self.matrix * point.to_homogeneous();
        let w = v[2];
        if !w.is_finite() || w.abs() <= EPS || !v[0].is_finite() || !v[1].is_finite() {
            return None;
        }
        Some(Point2::new(v[0] / w, v[1] / w))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }
}

fn has_collinear_triple(points: &[[f64; 2]; 4]) -> bool {
    let scale = points
        .iter()
        .flat_map(|p| p.iter())
        .fold(1.0_f64, |acc, v| acc.max(v.abs()));
    let tolerance = 1e-9 * scale * scale;
    (0..4).any(|skip| {
        let [a, b, c]: [[f64; 2]; 3] = match skip {
            0 => [points[1], points[2], points[3]],
            1 => [points[0], points[2], points[3]],
            2 => [points[0], points[1], points[3]],
            _ => [points[0], points[1], points[2]],
        };
        let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
        cross.abs() <= tolerance
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: [[f64; 2]; 4] = [[0.0, 0.0], [640.0, 0.0], [640.0, 480.0], [0.0, 480.0]];

    fn close(a: &Point2<f64>, b: &Point2<f64>) -> bool {
        (a - b).norm() < 1e-6
    }

    #[test]
    fn identical_corners_give_identity() {
        let h = Homography::from_correspondences(&FRAME, &FRAME).unwrap();
        let p = Point2::new(123.0, 45.5);
        assert!(close(&h.apply(&p).unwrap(), &p));
    }

    #[test]
    fn scaling_is_recovered() {
        let half = [[0.0, 0.0], [320.0, 0.0], [320.0, 240.0], [0.0, 240.0]];
        let h = Homography::from_correspondences(&FRAME, &half).unwrap();
        let m = h.matrix();
        assert!((m[(0, 0)] - 0.5).abs() < 1e-9 && (m[(1, 1)] - 0.5).abs() < 1e-9);
        assert!(m[(2, 0)].abs() < 1e-12 && m[(2, 1)].abs() < 1e-12);
        assert!(close(&h.apply(&Point2::new(320.0, 240.0)).unwrap(), &Point2::new(160.0, 120.0)));
    }

    #[test]
    fn control_points_map_onto_targets() {
        let skewed = [[10.0, 20.0], [600.0, 5.0], [500.0, 470.0], [40.0, 400.0]];
        let h = Homography::from_correspondences(&FRAME, &skewed).unwrap();
        for (src, dst) in FRAME.iter().zip(skewed.iter()) {
            let mapped = h.apply(&Point2::new(src[0], src[1])).unwrap();
            assert!(close(&mapped, &Point2::new(dst[0], dst[1])));
        }
    }

    #[test]
    fn collinear_control_points_are_rejected() {
        let line = [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        assert!(matches!(
            Homography::from_correspondences(&line, &FRAME),
            Err(TrackingError::DegenerateProjection)
        ));
    }

    #[test]
    fn points_at_infinity_have_no_image() {
        // Third row (1, 0, -5): w vanishes on the line x = 5.
        let h = Homography::from_matrix(Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, -5.0));
        assert!(h.apply(&Point2::new(5.0, 3.0)).is_none());
        assert!(h.apply(&Point2::new(6.0, 3.0)).is_some());
    }
}

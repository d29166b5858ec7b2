// THEORY:
// Both shape trackers reduce their problem to the same question: given a design
// matrix `A` and a target vector `b`, which `x` minimizes `|A·x - b|`? This
// module answers it once, through a singular value decomposition.
//
// The SVD also tells us when the question has no unique answer. If `A` loses
// column rank (collinear points fed to the circle model, a vertical run of points
// fed to the line model) the solve reports `DegenerateFit` instead of inventing
// parameters. Callers turn that into a `FitResult` with a huge residual, so the
// detection thresholds reject it on their own.

use crate::error::{Result, TrackingError};
use nalgebra::{DMatrix, DVector};

/// Residual given to fits whose system had no unique solution.
pub const DEGENERATE_RESIDUAL: f64 = 1e100;

/// Singular values below this fraction of the largest one count as zero.
const RANK_TOLERANCE: f64 = 1e-10;

/// Model parameters and the root-mean-square residual of one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub parameters: DVector<f64>,
    pub residual: f64,
}

impl FitResult {
    /// Placeholder fit for a rank-deficient system.
    pub fn degenerate(parameter_count: usize) -> Self {
        Self {
            parameters: DVector::zeros(parameter_count),
            residual: DEGENERATE_RESIDUAL,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.residual >= DEGENERATE_RESIDUAL
    }
}

/// Ordinary least squares. The residual is `sqrt(sum(r²) / rows)`.
pub fn solve(design: &DMatrix<f64>, target: &DVector<f64>) -> Result<FitResult> {
    let (rows, columns) = design.shape();
    let svd = design.clone().svd(true, true);
    let largest = svd.singular_values.max();
    let tolerance = largest * RANK_TOLERANCE;
    let rank = if largest > 0.0 { svd.rank(tolerance) } else { 0 };
    if rank < columns {
        return Err(TrackingError::DegenerateFit { rank, columns });
    }

    let parameters = svd
        .solve(target, tolerance)
        .map_err(|_| TrackingError::DegenerateFit { rank, columns })?;
    let residuals = design * &parameters - target;
    let residual = (residuals.norm_squared() / rows as f64).sqrt();
    if !residual.is_finite() {
        return Err(TrackingError::DegenerateFit { rank, columns });
    }

    Ok(FitResult {
        parameters,
        residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_system_has_zero_residual() {
        // y = 3x - 2
        let xs = [0.0, 1.0, 2.0, 5.0, 8.0];
        let design = DMatrix::from_fn(xs.len(), 2, |r, c| if c == 0 { xs[r] } else { 1.0 });
        let target = DVector::from_iterator(xs.len(), xs.iter().map(|x| 3.0 * x - 2.0));

        let fit = solve(&design, &target).unwrap();
        assert!((fit.parameters[0] - 3.0).abs() < 1e-9);
        assert!((fit.parameters[1] + 2.0).abs() < 1e-9);
        assert!(fit.residual < 1e-9);
    }

    #[test]
    fn residual_is_root_mean_square() {
        // Best constant through 0 and 2 is 1, off by one at both rows.
        let design = DMatrix::from_element(2, 1, 1.0);
        let target = DVector::from_vec(vec![0.0, 2.0]);
        let fit = solve(&design, &target).unwrap();
        assert!((fit.parameters[0] - 1.0).abs() < 1e-12);
        assert!((fit.residual - 1.0).abs() < 1e-12);
    }

    #[test]
    fn duplicated_columns_are_degenerate() {
        let design = DMatrix::from_fn(6, 3, |r, c| if c == 2 { 1.0 } else { r as f64 });
        let target = DVector::from_fn(6, |r, _| (r * r) as f64);
        assert!(matches!(
            solve(&design, &target),
            Err(TrackingError::DegenerateFit { rank: 2, columns: 3 })
        ));
    }

    #[test]
    fn degenerate_placeholder_is_flagged() {
        let fit = FitResult::degenerate(3);
        assert!(fit.is_degenerate());
        assert_eq!(fit.parameters.len(), 3);
    }
}

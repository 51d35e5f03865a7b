//! Small dense linear solves.
//!
//! Every Levenberg–Marquardt iteration solves a damped normal-equation system
//!
//! ```text
//! (JᵀJ + λ D) δ = -Jᵀr
//! ```
//!
//! and the final covariance estimate needs `(JᵀJ)⁺`. The parameter dimension is
//! tiny (a handful of kinematic slots plus one amplitude per line), so SVD is
//! cheap and handles the rank-deficient cases (an amplitude pinned at zero
//! makes its kinematic columns vanish) without special-casing.

use nalgebra::{DMatrix, DVector};

/// Singular-value cut-offs tried in order, relative to the largest singular value.
const TOLERANCES: [f64; 3] = [1e-10, 1e-8, 1e-6];

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);
    let scale = svd.singular_values.max();
    if !(scale.is_finite() && scale > 0.0) {
        return None;
    }

    for &tol in &TOLERANCES {
        if let Ok(beta) = svd.solve(y, tol * scale) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// `JᵀJ` for a column-major Jacobian.
pub fn normal_matrix(jacobian: &DMatrix<f64>) -> DMatrix<f64> {
    jacobian.tr_mul(jacobian)
}

/// Moore–Penrose pseudo-inverse of a symmetric matrix, dropping singular
/// values below `1e-10 · σ_max`.
pub fn pseudo_inverse(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let svd = m.clone().svd(true, true);
    let scale = svd.singular_values.max();
    if !(scale.is_finite() && scale > 0.0) {
        return None;
    }
    let inv = svd.pseudo_inverse(TOLERANCES[0] * scale).ok()?;
    inv.iter().all(|v| v.is_finite()).then_some(inv)
}

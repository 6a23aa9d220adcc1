//! Linear least squares solver.
//!
//! Every Levenberg–Marquardt step solves a small linear problem:
//!
//! ```text
//! minimize ‖J δ + r‖² + λ ‖D δ‖²
//! ```
//!
//! which we pose as an ordinary least-squares system on the augmented matrix
//! `[J; √λ D]` and right-hand side `[-r; 0]`. Solving the augmented system with
//! SVD avoids forming `JᵀJ` explicitly, which matters here because the
//! Arrhenius columns (`log10_A`, `Ea`) are strongly collinear.
//!
//! (Nalgebra's `QR::solve` is intended for square systems and will panic for
//! non-square matrices, so we stay with SVD.)

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-14, 1e-12, 1e-10] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve one damped Gauss–Newton step `(JᵀJ + λ D²) δ = -Jᵀ r`.
///
/// `scale` holds the diagonal of `D` (one entry per column of `jacobian`).
/// The columns are equilibrated by `D` before the SVD so that the singular
/// value cut-off is relative to each parameter's own sensitivity.
pub fn damped_step(
    jacobian: &DMatrix<f64>,
    residuals: &DVector<f64>,
    scale: &DVector<f64>,
    damping: f64,
) -> Option<DVector<f64>> {
    let n = jacobian.nrows();
    let p = jacobian.ncols();
    if residuals.len() != n || scale.len() != p {
        return None;
    }

    // Zero columns stay unscaled; their step is then driven by damping alone.
    let col_scale: Vec<f64> = scale
        .iter()
        .map(|&d| if d.is_finite() && d > 0.0 { d } else { 1.0 })
        .collect();

    let sqrt_lambda = damping.sqrt();
    let mut a = DMatrix::<f64>::zeros(n + p, p);
    let mut b = DVector::<f64>::zeros(n + p);

    for j in 0..p {
        for i in 0..n {
            a[(i, j)] = jacobian[(i, j)] / col_scale[j];
        }
        a[(n + j, j)] = sqrt_lambda;
    }
    for i in 0..n {
        b[i] = -residuals[i];
    }

    let z = solve_least_squares(&a, &b)?;
    Some(DVector::from_iterator(
        p,
        z.iter().zip(col_scale.iter()).map(|(zj, dj)| zj / dj),
    ))
}

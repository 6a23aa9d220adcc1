//! Finite-difference Jacobian of a residual function.
//!
//! Columns are independent (one perturbed parameter each), so they are
//! evaluated in parallel. Each column uses a central difference with step
//! `h_j = rel_step * max(|p_j|, 1)`; if one side of the stencil cannot be
//! evaluated, the other one-sided difference against the base residuals is
//! used instead.

use nalgebra::{DMatrix, DVector, Vector4};
use rayon::prelude::*;

/// Jacobian `∂r_i/∂p_j` of `residual_fn` at `params`.
///
/// `base` must be `residual_fn(params)`; it is only used for the one-sided
/// fallback. An error is returned only when both sides of a stencil fail.
pub fn finite_difference_jacobian<F, E>(
    residual_fn: F,
    params: &Vector4<f64>,
    base: &DVector<f64>,
    rel_step: f64,
) -> Result<DMatrix<f64>, E>
where
    F: Fn(&Vector4<f64>) -> Result<DVector<f64>, E> + Sync,
    E: Send,
{
    let columns: Vec<DVector<f64>> = (0..params.len())
        .into_par_iter()
        .map(|j| {
            let h = rel_step * params[j].abs().max(1.0);

            let mut plus = *params;
            plus[j] += h;
            let mut minus = *params;
            minus[j] -= h;

            match (residual_fn(&plus), residual_fn(&minus)) {
                (Ok(rp), Ok(rm)) => Ok((rp - rm) / (2.0 * h)),
                (Ok(rp), Err(_)) => Ok((rp - base) / h),
                (Err(_), Ok(rm)) => Ok((base - rm) / h),
                (Err(e), Err(_)) => Err(e),
            }
        })
        .collect::<Result<Vec<_>, E>>()?;

    Ok(DMatrix::from_columns(&columns))
}

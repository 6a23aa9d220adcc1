//! Standard errors and correlations from a covariance matrix.

use nalgebra::Matrix4;

use crate::domain::{CovarianceMatrix, N_PARAMS, ParameterSet, StandardErrors};
use crate::error::FitError;

/// Square roots of the covariance diagonal.
///
/// This does not attempt any recovery: a negative (or non-finite) variance is
/// reported as `InvalidCovariance` naming the offending parameter.
pub fn standard_errors(covariance: &CovarianceMatrix) -> Result<StandardErrors, FitError> {
    let mut se = [0.0; N_PARAMS];
    for (i, out) in se.iter_mut().enumerate() {
        let variance = covariance.variance(i);
        if !(variance.is_finite() && variance >= 0.0) {
            return Err(FitError::InvalidCovariance {
                parameter: ParameterSet::NAMES[i],
                variance,
            });
        }
        *out = variance.sqrt();
    }
    Ok(StandardErrors {
        log10_a: se[0],
        ea: se[1],
        dh: se[2],
        ds: se[3],
    })
}

/// Correlation matrix `cov_ij / (σ_i σ_j)`; entries with a zero σ are `NaN`.
pub fn correlation_matrix(covariance: &CovarianceMatrix) -> Matrix4<f64> {
    Matrix4::from_fn(|i, j| covariance.correlation(i, j))
}

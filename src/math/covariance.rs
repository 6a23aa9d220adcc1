//! Parameter covariance from a Jacobian at the optimum.
//!
//! `Cov = s² (JᵀJ)⁻¹`. The inversion is done on the column-equilibrated
//! matrix `S = D⁻¹ JᵀJ D⁻¹` (unit diagonal, `D = √diag(JᵀJ)`), whose
//! eigenvalues give a scale-free reciprocal condition number. The raw
//! `JᵀJ` mixes columns of order 1 (`log10_A`) with columns of order 1e-4
//! (`Ea` in J/mol), so its plain condition number says nothing about
//! identifiability.

use nalgebra::{DMatrix, Matrix4};

use crate::domain::{N_PARAMS, ParameterSet};
use crate::error::Degeneracy;

/// Scaled normal matrix and its conditioning.
#[derive(Debug, Clone, Copy)]
pub struct NormalMatrix {
    /// `S = D⁻¹ JᵀJ D⁻¹`.
    pub scaled: Matrix4<f64>,
    /// `D` diagonal (column norms of `J`).
    pub column_norms: [f64; N_PARAMS],
    /// `λ_min / λ_max` of `S` (may be slightly negative from round-off).
    pub reciprocal_condition: f64,
}

/// Build the scaled normal matrix of a `n × 4` Jacobian.
pub fn normal_matrix(jacobian: &DMatrix<f64>) -> Result<NormalMatrix, Degeneracy> {
    let jtj = jacobian.tr_mul(jacobian);

    let mut column_norms = [0.0; N_PARAMS];
    for (j, norm) in column_norms.iter_mut().enumerate() {
        let d = jtj[(j, j)].sqrt();
        if !(d.is_finite() && d > 0.0) {
            return Err(Degeneracy::InsensitiveParameter {
                parameter: ParameterSet::NAMES[j],
            });
        }
        *norm = d;
    }

    let scaled = Matrix4::from_fn(|i, j| jtj[(i, j)] / (column_norms[i] * column_norms[j]));
    let eigen = scaled.symmetric_eigen();
    let max = eigen.eigenvalues.max();
    let min = eigen.eigenvalues.min();
    let reciprocal_condition = if max > 0.0 && max.is_finite() { min / max } else { 0.0 };

    Ok(NormalMatrix {
        scaled,
        column_norms,
        reciprocal_condition,
    })
}

/// `residual_variance · (JᵀJ)⁻¹`, or the reason it cannot be trusted.
pub fn covariance_from_jacobian(
    jacobian: &DMatrix<f64>,
    residual_variance: f64,
    degeneracy_threshold: f64,
) -> Result<Matrix4<f64>, Degeneracy> {
    let normal = normal_matrix(jacobian)?;
    let ill = Degeneracy::IllConditioned {
        reciprocal_condition: normal.reciprocal_condition,
    };

    if !(normal.reciprocal_condition >= degeneracy_threshold) {
        return Err(ill);
    }
    let inverse = normal.scaled.try_inverse().ok_or(ill)?;

    let d = normal.column_norms;
    let cov = Matrix4::from_fn(|i, j| residual_variance * inverse[(i, j)] / (d[i] * d[j]));
    // Round-off leaves tiny asymmetries; the estimate is symmetric by definition.
    let cov = (cov + cov.transpose()) * 0.5;

    if cov.iter().all(|v| v.is_finite()) {
        Ok(cov)
    } else {
        Err(ill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_posed() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            6,
            4,
            &[
                1.0, 0.0, 0.0, 0.0, //
                0.0, 2.0, 0.0, 0.0, //
                0.0, 0.0, 3.0, 0.0, //
                0.0, 0.0, 0.0, 4.0, //
                1.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, 1.0, //
            ],
        )
    }

    #[test]
    fn matches_direct_inverse_for_well_posed_jacobian() {
        let j = well_posed();
        let jtj = j.tr_mul(&j);
        let direct = jtj.try_inverse().unwrap() * 0.5;

        let cov = covariance_from_jacobian(&j, 0.5, 1e-10).unwrap();
        for r in 0..4 {
            for c in 0..4 {
                assert!((cov[(r, c)] - direct[(r, c)]).abs() < 1e-12);
                assert!((cov[(r, c)] - cov[(c, r)]).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn scaling_a_column_does_not_change_conditioning() {
        let j = well_posed();
        let mut scaled = j.clone();
        scaled.column_mut(1).scale_mut(1e-5);

        let a = normal_matrix(&j).unwrap().reciprocal_condition;
        let b = normal_matrix(&scaled).unwrap().reciprocal_condition;
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn collinear_columns_are_degenerate() {
        let mut j = well_posed();
        let col0 = j.column(0).into_owned();
        j.set_column(1, &(col0 * -3.0));

        match covariance_from_jacobian(&j, 1.0, 1e-10) {
            Err(Degeneracy::IllConditioned { reciprocal_condition }) => {
                assert!(reciprocal_condition < 1e-10);
            }
            other => panic!("expected IllConditioned, got {other:?}"),
        }
    }

    #[test]
    fn zero_column_names_the_parameter() {
        let mut j = well_posed();
        j.column_mut(3).fill(0.0);
        assert_eq!(
            covariance_from_jacobian(&j, 1.0, 1e-10).unwrap_err(),
            Degeneracy::InsensitiveParameter { parameter: "dS" }
        );
    }
}

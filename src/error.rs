//! Error types.
//!
//! Two layers:
//!
//! - `ModelError` / `FitError`: discriminated failures of the numerical core.
//!   Every fallible core operation returns one of these; nothing panics.
//! - `AppError`: what the `kfit` binary reports, with a process exit code.

use thiserror::Error;

use crate::domain::ParameterSet;

/// Failure of a single concentration-model evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ModelError {
    /// An intermediate exponential would leave the finite `f64` range.
    #[error("numeric overflow evaluating {quantity} at T = {temperature} K")]
    NumericOverflow {
        quantity: &'static str,
        temperature: f64,
    },
    /// A parameter or input was NaN/Inf before evaluation started.
    #[error("non-finite {name} supplied to the concentration model")]
    NonFiniteParameter { name: &'static str },
}

/// Why a covariance estimate could not be trusted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Degeneracy {
    /// Scaled `JᵀJ` is (numerically) singular.
    IllConditioned { reciprocal_condition: f64 },
    /// A Jacobian column vanished: the residuals do not depend on that parameter.
    InsensitiveParameter { parameter: &'static str },
    /// `n_obs == n_params`, so the residual variance is undefined.
    NoResidualDegreesOfFreedom,
}

impl std::fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Degeneracy::IllConditioned {
                reciprocal_condition,
            } => write!(
                f,
                "scaled normal matrix is ill-conditioned (rcond = {reciprocal_condition:.3e})"
            ),
            Degeneracy::InsensitiveParameter { parameter } => {
                write!(f, "residuals do not depend on {parameter}")
            }
            Degeneracy::NoResidualDegreesOfFreedom => {
                write!(f, "no residual degrees of freedom (n_obs == n_params)")
            }
        }
    }
}

/// Failure of the residual/solver/uncertainty pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// Malformed experiment data, options, or parameter vector.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The model could not be evaluated for one experiment at a candidate point.
    #[error("residual evaluation failed for experiment #{experiment}: {source}")]
    ResidualEvaluation {
        experiment: usize,
        #[source]
        source: ModelError,
    },

    /// Budget exhausted before the convergence criteria were met, or the
    /// search stalled on a plateau of multi-temperature data.
    #[error("no convergence after {iterations} iterations (best SSR = {cost:.6e})")]
    ConvergenceFailure {
        best: ParameterSet,
        cost: f64,
        iterations: usize,
    },

    /// Converged, but the covariance (and hence standard errors) is not trustworthy.
    #[error("degenerate fit (SSR = {cost:.6e}): {reason}")]
    DegenerateFit {
        best: ParameterSet,
        cost: f64,
        reason: Degeneracy,
    },

    #[error("invalid covariance: variance of {parameter} is {variance}")]
    InvalidCovariance {
        parameter: &'static str,
        variance: f64,
    },
}

impl FitError {
    /// Best parameters and their SSR, for failures that still carry an iterate.
    pub fn best_iterate(&self) -> Option<(ParameterSet, f64)> {
        match self {
            FitError::ConvergenceFailure { best, cost, .. }
            | FitError::DegenerateFit { best, cost, .. } => Some((*best, *cost)),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let exit_code = match &err {
            FitError::InvalidInput(_) => 2,
            FitError::ConvergenceFailure { .. } => 3,
            FitError::ResidualEvaluation { .. }
            | FitError::DegenerateFit { .. }
            | FitError::InvalidCovariance { .. } => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_errors_map_to_distinct_exit_codes() {
        let best = ParameterSet::new(6.0, 45_000.0, -10_000.0, -50.0);
        let input: AppError = FitError::InvalidInput("x".into()).into();
        let conv: AppError = FitError::ConvergenceFailure {
            best,
            cost: 1.0,
            iterations: 3,
        }
        .into();
        let degen: AppError = FitError::DegenerateFit {
            best,
            cost: 1.0,
            reason: Degeneracy::NoResidualDegreesOfFreedom,
        }
        .into();
        assert_eq!(input.exit_code(), 2);
        assert_eq!(conv.exit_code(), 3);
        assert_eq!(degen.exit_code(), 4);
        assert!(degen.to_string().contains("degrees of freedom"));
    }

    #[test]
    fn best_iterate_only_for_failures_with_parameters() {
        let best = ParameterSet::new(1.0, 2.0, 3.0, 4.0);
        let err = FitError::ConvergenceFailure {
            best,
            cost: 0.5,
            iterations: 10,
        };
        assert_eq!(err.best_iterate(), Some((best, 0.5)));
        assert_eq!(FitError::InvalidInput("bad".into()).best_iterate(), None);
    }
}

//! Reporting utilities: residual tables, derived rate constants, and
//! formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{ExperimentData, ParameterSet};
use crate::error::FitError;
use crate::models::{ReactionRates, predict_series};

pub mod format;

pub use format::*;

/// One observation with its fitted value.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualRow {
    pub experiment: String,
    pub temperature: f64,
    pub time: f64,
    pub observed: f64,
    pub fitted: f64,
    pub residual: f64,
}

/// Rate constants implied by the fitted parameters for one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRow {
    pub experiment: String,
    pub initial_concentration: f64,
    pub rates: ReactionRates,
    pub equilibrium_concentration: f64,
}

/// How the multi-start search went (for the summary header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSummary {
    pub starts: usize,
    pub best_start: Option<usize>,
    pub failed: usize,
}

/// Fitted values and residuals for every observation, in residual-vector order.
pub fn compute_residuals(experiments: &[ExperimentData], params: &ParameterSet) -> Result<Vec<ResidualRow>, FitError> {
    let mut out = Vec::new();
    for (idx, e) in experiments.iter().enumerate() {
        let fitted = predict_series(e.times(), e.initial_concentration(), e.temperature(), params)
            .map_err(|source| FitError::ResidualEvaluation {
                experiment: idx,
                source,
            })?;
        for ((&time, &observed), fitted) in e.times().iter().zip(e.concentrations()).zip(fitted) {
            out.push(ResidualRow {
                experiment: e.label().to_string(),
                temperature: e.temperature(),
                time,
                observed,
                fitted,
                residual: observed - fitted,
            });
        }
    }
    Ok(out)
}

/// `Kc`, `kf`, `kr` and `C_A,eq` per experiment at `params`.
pub fn rate_table(experiments: &[ExperimentData], params: &ParameterSet) -> Result<Vec<RateRow>, FitError> {
    experiments
        .iter()
        .enumerate()
        .map(|(idx, e)| {
            let rates = ReactionRates::evaluate(e.temperature(), params).map_err(|source| {
                FitError::ResidualEvaluation {
                    experiment: idx,
                    source,
                }
            })?;
            Ok(RateRow {
                experiment: e.label().to_string(),
                initial_concentration: e.initial_concentration(),
                equilibrium_concentration: rates.equilibrium_concentration(e.initial_concentration()),
                rates,
            })
        })
        .collect()
}

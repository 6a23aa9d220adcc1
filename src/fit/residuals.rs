//! Residual vector over all experiments for one shared parameter vector.
//!
//! Layout: experiments in input order, observations in time order within each
//! experiment. `r_i = observed_i - predicted_i`.

use crate::domain::{ExperimentData, ParameterSet};
use crate::error::FitError;
use crate::models::predict_series;

/// Total number of observations across all experiments.
pub fn observation_count(experiments: &[ExperimentData]) -> usize {
    experiments.iter().map(ExperimentData::len).sum()
}

/// Stack `observed - predicted` for every experiment.
pub fn residuals(params: &ParameterSet, experiments: &[ExperimentData]) -> Result<Vec<f64>, FitError> {
    let mut out = Vec::with_capacity(observation_count(experiments));
    for (idx, e) in experiments.iter().enumerate() {
        let predicted = predict_series(e.times(), e.initial_concentration(), e.temperature(), params)
            .map_err(|source| FitError::ResidualEvaluation {
                experiment: idx,
                source,
            })?;
        out.extend(
            e.concentrations()
                .iter()
                .zip(predicted.iter())
                .map(|(obs, pred)| obs - pred),
        );
    }
    Ok(out)
}

/// Sum of squared residuals.
pub fn sum_of_squares(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

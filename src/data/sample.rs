//! Synthetic kinetic experiments.
//!
//! Observations are the model curve at known parameters plus optional
//! Gaussian noise (seeded, so runs are reproducible). Noisy values are
//! clamped at zero because a concentration cannot be negative.

use log::debug;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::domain::{ExperimentData, ParameterSet};
use crate::error::FitError;
use crate::models::predict_series;

/// What to simulate: one experiment per temperature, all sharing the
/// initial concentration and sampling times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSpec {
    pub params: ParameterSet,
    pub temperatures: Vec<f64>,
    pub initial_concentration: f64,
    pub times: Vec<f64>,
    /// Absolute standard deviation of the additive noise (0 = exact data).
    pub noise_sd: f64,
    pub seed: u64,
}

/// `points` evenly spaced times in `(0, t_max]`.
pub fn uniform_times(t_max: f64, points: usize) -> Vec<f64> {
    (1..=points)
        .map(|i| t_max * i as f64 / points as f64)
        .collect()
}

/// Simulate every experiment in `spec`.
pub fn generate_experiments(spec: &SimulationSpec) -> Result<Vec<ExperimentData>, FitError> {
    if !(spec.noise_sd.is_finite() && spec.noise_sd >= 0.0) {
        return Err(FitError::InvalidInput(format!(
            "noise standard deviation must be finite and >= 0, got {}",
            spec.noise_sd
        )));
    }
    if spec.temperatures.is_empty() {
        return Err(FitError::InvalidInput(
            "at least one temperature is required".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let noise = if spec.noise_sd > 0.0 {
        Some(
            Normal::new(0.0, spec.noise_sd)
                .map_err(|e| FitError::InvalidInput(format!("noise distribution: {e}")))?,
        )
    } else {
        None
    };

    let mut out = Vec::with_capacity(spec.temperatures.len());
    for (idx, &temperature) in spec.temperatures.iter().enumerate() {
        let exact = predict_series(&spec.times, spec.initial_concentration, temperature, &spec.params)
            .map_err(|source| FitError::ResidualEvaluation {
                experiment: idx,
                source,
            })?;

        let observed = match &noise {
            Some(dist) => exact
                .iter()
                .map(|c| (c + dist.sample(&mut rng)).max(0.0))
                .collect(),
            None => exact,
        };

        debug!(
            "simulated {} points at T={temperature} K (sd={})",
            observed.len(),
            spec.noise_sd
        );
        out.push(ExperimentData::new(
            temperature,
            spec.initial_concentration,
            spec.times.clone(),
            observed,
        )?);
    }
    Ok(out)
}

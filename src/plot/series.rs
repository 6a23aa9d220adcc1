//! Plot series: what the renderer draws, decoupled from how it is drawn.
//!
//! A series is a labelled list of `(time, concentration)` pairs. Fitting code
//! never builds these; they are assembled after the fact from experiments and
//! a parameter set.

use crate::domain::{ExperimentData, ParameterSet};
use crate::error::{FitError, ModelError};
use crate::models::predict_series;

/// Glyphs for observed points, cycled per experiment.
const POINT_GLYPHS: [char; 6] = ['o', 'x', '+', '*', '#', '@'];

/// Glyphs for fitted curves, cycled per experiment.
const LINE_GLYPHS: [char; 4] = ['-', '~', '=', ':'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    /// Scatter of observations.
    Points,
    /// Polyline through the samples.
    Line,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotSeries {
    pub label: String,
    pub kind: SeriesKind,
    pub glyph: char,
    pub points: Vec<(f64, f64)>,
}

/// Observations of one experiment.
pub fn observed_series(experiment: &ExperimentData, glyph: char) -> PlotSeries {
    PlotSeries {
        label: format!("{} observed", experiment.label()),
        kind: SeriesKind::Points,
        glyph,
        points: experiment
            .times()
            .iter()
            .copied()
            .zip(experiment.concentrations().iter().copied())
            .collect(),
    }
}

/// Model curve for one experiment, sampled evenly on `[0, t_last]`.
pub fn fitted_series(
    experiment: &ExperimentData,
    params: &ParameterSet,
    samples: usize,
    glyph: char,
) -> Result<PlotSeries, ModelError> {
    let samples = samples.max(2);
    let t_end = experiment.times().last().copied().unwrap_or(0.0);
    let times: Vec<f64> = (0..samples)
        .map(|i| t_end * i as f64 / (samples - 1) as f64)
        .collect();
    let values = predict_series(
        &times,
        experiment.initial_concentration(),
        experiment.temperature(),
        params,
    )?;

    Ok(PlotSeries {
        label: format!("{} fitted", experiment.label()),
        kind: SeriesKind::Line,
        glyph,
        points: times.into_iter().zip(values).collect(),
    })
}

/// Observed (and, given parameters, fitted) series for every experiment.
pub fn experiment_series(
    experiments: &[ExperimentData],
    params: Option<&ParameterSet>,
    samples: usize,
) -> Result<Vec<PlotSeries>, FitError> {
    let mut out = Vec::with_capacity(experiments.len() * 2);
    for (idx, e) in experiments.iter().enumerate() {
        if let Some(p) = params {
            let line = fitted_series(e, p, samples, LINE_GLYPHS[idx % LINE_GLYPHS.len()])
                .map_err(|source| FitError::ResidualEvaluation {
                    experiment: idx,
                    source,
                })?;
            out.push(line);
        }
        out.push(observed_series(e, POINT_GLYPHS[idx % POINT_GLYPHS.len()]));
    }
    Ok(out)
}

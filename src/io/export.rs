//! CSV exports.
//!
//! The exports are meant to be easy to consume in spreadsheets or downstream
//! scripts. Experiment CSVs use the same long format that `ingest` reads.

use std::io::Write;
use std::path::Path;

use crate::domain::{ExperimentData, ParameterSet};
use crate::error::{AppError, FitError};
use crate::plot::series::fitted_series;
use crate::report::ResidualRow;

const EXPERIMENT_HEADER: [&str; 5] = ["experiment", "temperature_k", "initial_concentration", "time_s", "concentration"];

/// Write per-observation fitted values and residuals.
pub fn write_residuals_csv(path: &Path, rows: &[ResidualRow]) -> Result<(), AppError> {
    let mut writer = create_writer(path, "residual")?;
    write_row(
        &mut writer,
        &["experiment", "temperature_k", "time_s", "observed", "fitted", "residual"],
    )?;
    for r in rows {
        write_row(
            &mut writer,
            &[
                r.experiment.clone(),
                format!("{}", r.temperature),
                format!("{}", r.time),
                format!("{}", r.observed),
                format!("{:.10}", r.fitted),
                format!("{:.10}", r.residual),
            ],
        )?;
    }
    finish(writer)
}

/// Write densely sampled model curves (one block per experiment).
pub fn write_curves_csv(
    path: &Path,
    experiments: &[ExperimentData],
    params: &ParameterSet,
    samples: usize,
) -> Result<(), AppError> {
    let mut writer = create_writer(path, "curve")?;
    write_row(&mut writer, &["experiment", "temperature_k", "time_s", "concentration"])?;
    for (idx, e) in experiments.iter().enumerate() {
        let curve = fitted_series(e, params, samples, '-')
            .map_err(|source| FitError::ResidualEvaluation {
                experiment: idx,
                source,
            })?;
        for (t, c) in curve.points {
            write_row(
                &mut writer,
                &[
                    e.label().to_string(),
                    format!("{}", e.temperature()),
                    format!("{t}"),
                    format!("{c:.10}"),
                ],
            )?;
        }
    }
    finish(writer)
}

/// Write experiments in the ingest format.
pub fn write_experiments_csv(path: &Path, experiments: &[ExperimentData]) -> Result<(), AppError> {
    let mut writer = create_writer(path, "experiment")?;
    write_experiments(&mut writer, experiments)?;
    finish(writer)
}

/// Write experiments in the ingest format to any sink (e.g. stdout).
pub fn write_experiments<W: Write>(writer: &mut csv::Writer<W>, experiments: &[ExperimentData]) -> Result<(), AppError> {
    write_row(writer, &EXPERIMENT_HEADER)?;
    for e in experiments {
        for (t, c) in e.times().iter().zip(e.concentrations()) {
            write_row(
                writer,
                &[
                    e.label().to_string(),
                    format!("{}", e.temperature()),
                    format!("{}", e.initial_concentration()),
                    format!("{t}"),
                    format!("{c}"),
                ],
            )?;
        }
    }
    Ok(())
}

fn create_writer(path: &Path, what: &str) -> Result<csv::Writer<std::fs::File>, AppError> {
    csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create {what} CSV '{}': {e}", path.display())))
}

fn write_row<W: Write, S: AsRef<[u8]>>(writer: &mut csv::Writer<W>, fields: &[S]) -> Result<(), AppError> {
    writer
        .write_record(fields)
        .map_err(|e| AppError::new(2, format!("Failed to write CSV row: {e}")))
}

fn finish<W: Write>(mut writer: csv::Writer<W>) -> Result<(), AppError> {
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush CSV: {e}")))
}

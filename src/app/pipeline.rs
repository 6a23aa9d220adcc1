//! Shared "fit pipeline" logic.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! CSV ingest -> multi-start fit -> rate table + residuals
//!
//! Front-ends can then focus on presentation (printing, plotting, exports).

use log::{info, warn};

use crate::domain::{Estimate, FitConfig};
use crate::error::{AppError, FitError};
use crate::fit::multistart::fit_multistart;
use crate::io::ingest::{IngestedData, load_experiments};
use crate::report::{RateRow, ResidualRow, SearchSummary, compute_residuals, rate_table};

/// All computed outputs of a single `kfit fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub ingest: IngestedData,
    pub estimate: Estimate,
    pub search: SearchSummary,
    pub rates: Vec<RateRow>,
    pub residuals: Vec<ResidualRow>,
}

/// Execute the full fitting pipeline and return the computed outputs.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    let ingest = load_experiments(&config.data_path)?;
    run_fit_with_data(config, ingest)
}

/// Execute the fitting pipeline on already ingested experiments.
///
/// A degenerate fit is not an error here: its best point is still reported,
/// flagged as such. Every other fit failure is.
pub fn run_fit_with_data(config: &FitConfig, ingest: IngestedData) -> Result<RunOutput, AppError> {
    info!(
        "fitting {} experiments ({} observations) from {} start(s)",
        ingest.experiments.len(),
        ingest.observation_count(),
        config.starts
    );

    let (estimate, search) = match fit_multistart(
        &config.initial_guess,
        &ingest.experiments,
        &config.solver,
        config.starts,
        config.seed,
    ) {
        Ok(found) => {
            let search = SearchSummary {
                starts: config.starts,
                best_start: Some(found.best_start),
                failed: found.failures.len(),
            };
            (Estimate::Full(found.best), search)
        }
        Err(FitError::DegenerateFit { best, cost, reason }) => {
            warn!("degenerate fit: {reason}");
            let search = SearchSummary {
                starts: config.starts,
                best_start: None,
                failed: config.starts,
            };
            let estimate = Estimate::Degenerate {
                params: best,
                ssr: cost,
                reason: reason.to_string(),
            };
            (estimate, search)
        }
        Err(err) => return Err(err.into()),
    };

    let rates = rate_table(&ingest.experiments, estimate.params())?;
    let residuals = compute_residuals(&ingest.experiments, estimate.params())?;

    Ok(RunOutput {
        ingest,
        estimate,
        search,
        rates,
        residuals,
    })
}

//! Multi-start fitting.
//!
//! The Arrhenius valley (`log10_A` vs `Ea`) is long and narrow, so a single
//! start can stall on a poor guess. We run the caller's guess plus seeded
//! Gaussian perturbations of it, each as a fully independent fit (parallel),
//! and keep the lowest-SSR success.
//!
//! Selection rules:
//! 1. Minimum SSR among successful fits; ties go to the lower start index.
//! 2. If no start succeeds, an `InvalidInput` error wins (it is a property of
//!    the data, not of the start); otherwise the failure carrying the lowest
//!    SSR is returned so the caller still sees the best iterate.

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

use crate::domain::{ExperimentData, FitOutcome, N_PARAMS, ParameterSet, SolverOptions};
use crate::error::FitError;
use crate::fit::solver::fit;

/// Standard deviation of the start perturbation per parameter
/// (`log10_A`, `Ea` J/mol, `dH` J/mol, `dS` J/(mol·K)).
pub const PERTURBATION_SD: [f64; N_PARAMS] = [1.0, 10_000.0, 10_000.0, 20.0];

/// Output of a multi-start run.
#[derive(Debug, Clone)]
pub struct MultiStartFit {
    pub best: FitOutcome,
    /// Index of the start that produced `best` (0 = caller's guess).
    pub best_start: usize,
    pub starts: Vec<ParameterSet>,
    /// Starts that failed and why (for diagnostics).
    pub failures: Vec<(usize, FitError)>,
}

/// Caller's guess followed by `count - 1` seeded perturbations of it.
pub fn start_points(initial: &ParameterSet, count: usize, seed: u64) -> Result<Vec<ParameterSet>, FitError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normals = PERTURBATION_SD
        .iter()
        .map(|&sd| Normal::new(0.0, sd))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| FitError::InvalidInput(format!("perturbation distribution: {e}")))?;

    let mut out = Vec::with_capacity(count);
    if count == 0 {
        return Ok(out);
    }
    out.push(*initial);
    for _ in 1..count {
        let base = initial.as_array();
        let mut p = [0.0; N_PARAMS];
        for k in 0..N_PARAMS {
            p[k] = base[k] + normals[k].sample(&mut rng);
        }
        out.push(ParameterSet::new(p[0], p[1], p[2], p[3]));
    }
    Ok(out)
}

/// Fit from `starts` starting points and keep the best.
pub fn fit_multistart(
    initial: &ParameterSet,
    experiments: &[ExperimentData],
    options: &SolverOptions,
    starts: usize,
    seed: u64,
) -> Result<MultiStartFit, FitError> {
    if starts == 0 {
        return Err(FitError::InvalidInput("at least one start is required".to_string()));
    }
    let guesses = start_points(initial, starts, seed)?;

    let results: Vec<(usize, Result<FitOutcome, FitError>)> = guesses
        .par_iter()
        .enumerate()
        .map(|(idx, guess)| (idx, fit(guess, experiments, options)))
        .collect();

    let mut best: Option<(usize, FitOutcome)> = None;
    let mut failures = Vec::new();
    for (idx, result) in results {
        match result {
            Ok(outcome) => {
                debug!("start #{idx}: SSR={:.6e}", outcome.quality.ssr);
                let better = match &best {
                    None => true,
                    Some((best_idx, b)) => {
                        outcome.quality.ssr < b.quality.ssr
                            || (outcome.quality.ssr == b.quality.ssr && idx < *best_idx)
                    }
                };
                if better {
                    best = Some((idx, outcome));
                }
            }
            Err(e) => {
                debug!("start #{idx} failed: {e}");
                failures.push((idx, e));
            }
        }
    }

    match best {
        Some((best_start, best)) => {
            info!(
                "multi-start: best of {starts} starts is #{best_start} ({} failed)",
                failures.len()
            );
            Ok(MultiStartFit {
                best,
                best_start,
                starts: guesses,
                failures,
            })
        }
        None => Err(pick_failure(failures)),
    }
}

fn pick_failure(failures: Vec<(usize, FitError)>) -> FitError {
    if let Some((_, e)) = failures
        .iter()
        .find(|(_, e)| matches!(e, FitError::InvalidInput(_)))
    {
        return e.clone();
    }

    let mut chosen: Option<(f64, FitError)> = None;
    let mut first: Option<FitError> = None;
    for (_, e) in failures {
        match e.best_iterate() {
            Some((_, cost)) if chosen.as_ref().is_none_or(|(c, _)| cost < *c) => {
                chosen = Some((cost, e));
            }
            _ => {
                if first.is_none() {
                    first = Some(e);
                }
            }
        }
    }

    chosen
        .map(|(_, e)| e)
        .or(first)
        .unwrap_or_else(|| FitError::InvalidInput("no starts were run".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{SimulationSpec, generate_experiments, uniform_times};
    use crate::error::Degeneracy;

    fn experiments(temperatures: Vec<f64>) -> Vec<ExperimentData> {
        generate_experiments(&SimulationSpec {
            params: ParameterSet::new(7.0, 50_190.0, -10_000.0, -35.3),
            temperatures,
            initial_concentration: 10.0,
            times: uniform_times(100.0, 10),
            noise_sd: 0.01,
            seed: 5,
        })
        .unwrap()
    }

    fn guess() -> ParameterSet {
        ParameterSet::new(6.0, 45_000.0, -10_000.0, -50.0)
    }

    #[test]
    fn first_start_is_the_callers_guess() {
        let pts = start_points(&guess(), 4, 9).unwrap();
        assert_eq!(pts.len(), 4);
        assert_eq!(pts[0], guess());
        assert!(pts[1..].iter().all(|p| *p != guess() && p.is_finite()));
        assert_eq!(pts, start_points(&guess(), 4, 9).unwrap());
        assert!(start_points(&guess(), 0, 9).unwrap().is_empty());
    }

    #[test]
    fn never_worse_than_the_single_start() {
        let exps = experiments(vec![298.15, 308.15, 323.15]);
        let opts = SolverOptions::default();
        let single = fit(&guess(), &exps, &opts).unwrap();
        let multi = fit_multistart(&guess(), &exps, &opts, 6, 42).unwrap();

        assert!(multi.best.quality.ssr <= single.quality.ssr);
        assert_eq!(multi.starts.len(), 6);
        assert!(multi.best_start < 6);
        assert!(multi.failures.iter().all(|(idx, _)| *idx < 6));
    }

    #[test]
    fn single_start_matches_plain_fit() {
        let exps = experiments(vec![298.15, 308.15, 323.15]);
        let opts = SolverOptions::default();
        let single = fit(&guess(), &exps, &opts).unwrap();
        let multi = fit_multistart(&guess(), &exps, &opts, 1, 0).unwrap();
        assert_eq!(multi.best, single);
        assert_eq!(multi.best_start, 0);
    }

    #[test]
    fn zero_starts_is_invalid() {
        let exps = experiments(vec![298.15, 323.15]);
        assert!(matches!(
            fit_multistart(&guess(), &exps, &SolverOptions::default(), 0, 1),
            Err(FitError::InvalidInput(_))
        ));
    }

    #[test]
    fn isothermal_data_never_succeeds() {
        let exps = experiments(vec![298.15, 298.15]);
        match fit_multistart(&guess(), &exps, &SolverOptions::default(), 3, 7) {
            Err(e) => {
                assert!(matches!(
                    e,
                    FitError::DegenerateFit { .. } | FitError::ConvergenceFailure { .. }
                ));
                let (best, cost) = e.best_iterate().unwrap();
                assert!(best.is_finite() && cost.is_finite());
            }
            Ok(found) => panic!("isothermal data cannot identify dH and dS, got {:?}", found.best),
        }
    }

    #[test]
    fn failure_choice_prefers_lowest_cost() {
        let p = guess();
        let failures = vec![
            (0, FitError::ConvergenceFailure { best: p, cost: 5.0, iterations: 800 }),
            (1, FitError::DegenerateFit { best: p, cost: 1.0, reason: Degeneracy::NoResidualDegreesOfFreedom }),
            (2, FitError::ConvergenceFailure { best: p, cost: f64::INFINITY, iterations: 0 }),
        ];
        assert!(matches!(pick_failure(failures), FitError::DegenerateFit { cost, .. } if cost == 1.0));

        let with_input = vec![
            (0, FitError::ConvergenceFailure { best: p, cost: 5.0, iterations: 800 }),
            (1, FitError::InvalidInput("bad".into())),
        ];
        assert!(matches!(pick_failure(with_input), FitError::InvalidInput(_)));
    }
}

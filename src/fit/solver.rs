//! Levenberg–Marquardt fit of `(log10_A, Ea, dH, dS)` to all experiments.
//!
//! Given:
//! - an initial guess
//! - the experiment list (fixed order = residual layout)
//! - solver options
//!
//! we minimise `Σ r_i(p)²` with a Marquardt-scaled LM iteration:
//! - Jacobian by central finite differences (columns in parallel)
//! - each step solves `[J; √λ D] δ = [-r; 0]` by SVD
//! - a trial point that cannot be evaluated (numeric overflow) is treated
//!   exactly like one that does not lower the cost: reject, raise λ, retry
//!
//! At the optimum, the covariance is `s² (JᵀJ)⁻¹` with `s² = SSR / (n - 4)`.

use std::time::Instant;

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, Vector4};

use crate::domain::{
    CovarianceMatrix, ExperimentData, FitOutcome, FitQuality, N_PARAMS, ParameterSet, SolverOptions,
    Termination,
};
use crate::error::{Degeneracy, FitError};
use crate::fit::residuals::{observation_count, residuals};
use crate::fit::uncertainty::standard_errors;
use crate::math::{covariance_from_jacobian, damped_step, finite_difference_jacobian};

/// λ never drops below this after accepted steps.
const MIN_DAMPING: f64 = 1e-12;

/// Beyond this λ every step is numerically zero: the point is stationary.
const MAX_DAMPING: f64 = 1e16;

/// SSR below `EXACT_FIT_FLOOR · Σ y²` is round-off, not misfit.
const EXACT_FIT_FLOOR: f64 = 1e-26;

/// Fit the model to `experiments` starting from `initial_guess`.
pub fn fit(
    initial_guess: &ParameterSet,
    experiments: &[ExperimentData],
    options: &SolverOptions,
) -> Result<FitOutcome, FitError> {
    validate_inputs(initial_guess, experiments, options)?;

    let started = Instant::now();
    let n_obs = observation_count(experiments);
    let eval = |p: &Vector4<f64>| -> Result<DVector<f64>, FitError> {
        residuals(&ParameterSet::from_vector(p), experiments).map(DVector::from_vec)
    };

    let mut params = initial_guess.to_vector();
    let mut r = match eval(&params) {
        Ok(r) => r,
        Err(e) => {
            warn!("initial guess cannot be evaluated: {e}");
            return Err(FitError::ConvergenceFailure {
                best: *initial_guess,
                cost: f64::INFINITY,
                iterations: 0,
            });
        }
    };
    let mut cost = r.norm_squared();
    let cost_floor = EXACT_FIT_FLOOR * data_scale(experiments);

    let mut lambda = options.initial_damping;
    let mut scale = DVector::<f64>::zeros(N_PARAMS);
    let mut jacobian: Option<DMatrix<f64>> = None;
    let mut iterations = 0usize;

    debug!(
        "LM start: n_obs={n_obs}, SSR={cost:.6e}, guess=({})",
        ParameterSet::from_vector(&params)
    );

    let termination = loop {
        if cost <= cost_floor {
            break Termination::ExactFit;
        }
        let out_of_time = options
            .max_duration
            .is_some_and(|limit| started.elapsed() >= limit);
        if iterations >= options.max_iterations || out_of_time {
            warn!(
                "LM budget exhausted after {iterations} iterations (time limit hit: {out_of_time}), SSR={cost:.6e}"
            );
            return Err(FitError::ConvergenceFailure {
                best: ParameterSet::from_vector(&params),
                cost,
                iterations,
            });
        }
        iterations += 1;

        // The Jacobian is only recomputed after an accepted step.
        let j = match jacobian.take() {
            Some(j) => j,
            None => {
                let j = finite_difference_jacobian(&eval, &params, &r, options.finite_difference_step)
                    .map_err(|e| {
                        warn!("Jacobian evaluation failed at the current iterate: {e}");
                        FitError::ConvergenceFailure {
                            best: ParameterSet::from_vector(&params),
                            cost,
                            iterations,
                        }
                    })?;
                // Moré scaling: D only ever grows, which keeps λ meaningful.
                for (k, col) in j.column_iter().enumerate() {
                    scale[k] = scale[k].max(col.norm());
                }
                j
            }
        };

        let trial = damped_step(&j, &r, &scale, lambda)
            .map(|step| Vector4::from_iterator(step.iter().copied()))
            .map(|step| (step, params + step))
            .filter(|(_, trial)| trial.iter().all(|v| v.is_finite()));

        let accepted = match trial {
            Some((step, trial)) => match eval(&trial) {
                Ok(r_trial) => {
                    let cost_trial = r_trial.norm_squared();
                    if cost_trial < cost {
                        Some((step, trial, r_trial, cost_trial))
                    } else {
                        None
                    }
                }
                Err(e) => {
                    debug!("LM iter {iterations}: trial point infeasible ({e}), λ={lambda:.3e}");
                    None
                }
            },
            None => None,
        };

        match accepted {
            Some((step, trial, r_trial, cost_trial)) => {
                let reduction = (cost - cost_trial) / cost;
                let step_norm = relative_step_norm(&step, &params);
                params = trial;
                r = r_trial;
                cost = cost_trial;
                lambda = (lambda / 10.0).max(MIN_DAMPING);

                debug!(
                    "LM iter {iterations}: SSR={cost:.6e}, rel.reduction={reduction:.3e}, step={step_norm:.3e}, λ={lambda:.3e}"
                );

                if reduction < options.tolerance {
                    break Termination::CostReduction;
                }
                if step_norm < options.tolerance {
                    break Termination::StepSize;
                }
            }
            None => {
                lambda *= 10.0;
                jacobian = Some(j);
                if lambda > MAX_DAMPING {
                    break Termination::Stationary;
                }
            }
        }
    };

    let best = ParameterSet::from_vector(&params);
    info!("LM converged after {iterations} iterations ({termination:?}): SSR={cost:.6e}, {best}");

    let dof = n_obs - N_PARAMS;
    if dof == 0 {
        warn!("no residual degrees of freedom; covariance unavailable");
        return Err(FitError::DegenerateFit {
            best,
            cost,
            reason: Degeneracy::NoResidualDegreesOfFreedom,
        });
    }

    let j = match jacobian {
        Some(j) => j,
        None => finite_difference_jacobian(&eval, &params, &r, options.finite_difference_step).map_err(
            |e| {
                warn!("Jacobian evaluation failed at the optimum: {e}");
                FitError::ConvergenceFailure {
                    best,
                    cost,
                    iterations,
                }
            },
        )?,
    };

    let residual_variance = cost / dof as f64;
    let covariance = covariance_from_jacobian(&j, residual_variance, options.degeneracy_threshold)
        .map(CovarianceMatrix::new)
        .map_err(|reason| stalled_or_degenerate(experiments, termination, best, cost, iterations, reason))?;
    let standard_errors = standard_errors(&covariance)?;

    let n = n_obs as f64;
    let quality = FitQuality {
        ssr: cost,
        rmse: (cost / n).sqrt(),
        residual_variance,
        n_obs,
        dof,
        bic: n * (cost / n).max(f64::MIN_POSITIVE).ln() + N_PARAMS as f64 * n.ln(),
        iterations,
    };

    Ok(FitOutcome {
        params: best,
        covariance,
        standard_errors,
        quality,
        termination,
    })
}

fn validate_inputs(
    initial_guess: &ParameterSet,
    experiments: &[ExperimentData],
    options: &SolverOptions,
) -> Result<(), FitError> {
    if experiments.is_empty() {
        return Err(FitError::InvalidInput("no experiments supplied".to_string()));
    }
    let n_obs = observation_count(experiments);
    if n_obs < N_PARAMS {
        return Err(FitError::InvalidInput(format!(
            "{n_obs} observations cannot determine {N_PARAMS} parameters"
        )));
    }
    if !initial_guess.is_finite() {
        return Err(FitError::InvalidInput(format!(
            "initial guess must be finite ({initial_guess})"
        )));
    }
    options.validate()
}

/// Classify a singular covariance at the final iterate.
///
/// With several temperatures the model is identifiable, so a parameter the
/// residuals ignore (or a damping blow-up) means the search stalled on a
/// plateau, not that the data cannot pin the parameters down.
fn stalled_or_degenerate(
    experiments: &[ExperimentData],
    termination: Termination,
    best: ParameterSet,
    cost: f64,
    iterations: usize,
    reason: Degeneracy,
) -> FitError {
    let stalled = matches!(reason, Degeneracy::InsensitiveParameter { .. })
        || termination == Termination::Stationary;
    if stalled && distinct_temperatures(experiments) > 1 {
        warn!("search stalled ({reason}, {termination:?}); retry from another starting point");
        FitError::ConvergenceFailure {
            best,
            cost,
            iterations,
        }
    } else {
        warn!("degenerate fit: {reason}");
        FitError::DegenerateFit { best, cost, reason }
    }
}

fn distinct_temperatures(experiments: &[ExperimentData]) -> usize {
    let mut temps: Vec<f64> = experiments.iter().map(ExperimentData::temperature).collect();
    temps.sort_by(f64::total_cmp);
    temps.dedup();
    temps.len()
}

/// `Σ y²` over all observations, floored at 1 so all-zero data still has a scale.
fn data_scale(experiments: &[ExperimentData]) -> f64 {
    experiments
        .iter()
        .flat_map(|e| e.concentrations().iter())
        .map(|c| c * c)
        .sum::<f64>()
        .max(1.0)
}

/// `‖δ_j / max(|p_j|, 1)‖`: a step size that is comparable across parameters.
fn relative_step_norm(step: &Vector4<f64>, params: &Vector4<f64>) -> f64 {
    step.iter()
        .zip(params.iter())
        .map(|(d, p)| (d / p.abs().max(1.0)).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{SimulationSpec, generate_experiments, uniform_times};
    use crate::fit::residuals::sum_of_squares;

    fn truth() -> ParameterSet {
        ParameterSet::new(7.0, 50_190.0, -10_000.0, -35.3)
    }

    fn guess() -> ParameterSet {
        ParameterSet::new(6.0, 45_000.0, -10_000.0, -50.0)
    }

    fn simulated(noise_sd: f64, seed: u64) -> Vec<ExperimentData> {
        generate_experiments(&SimulationSpec {
            params: truth(),
            temperatures: vec![298.15, 308.15, 323.15],
            initial_concentration: 10.0,
            times: uniform_times(100.0, 10),
            noise_sd,
            seed,
        })
        .unwrap()
    }

    /// Three-temperature benchmark set. At 298.15 K only 8.649, 7.441 and
    /// 5.644 are measured values; the remaining points of every series are
    /// filled in from the model at (7, 50.19 kJ/mol, -10 kJ/mol, -35.3) and rounded.
    fn reference_experiments() -> Vec<ExperimentData> {
        let times = uniform_times(100.0, 10);
        vec![
            ExperimentData::new(
                298.15,
                10.0,
                times.clone(),
                vec![8.649, 7.441, 7.055, 6.584, 6.257, 6.043, 5.891, 5.788, 5.693, 5.644],
            )
            .unwrap(),
            ExperimentData::new(
                308.15,
                10.0,
                times.clone(),
                vec![7.820, 6.783, 6.301, 6.065, 5.946, 5.893, 5.891, 5.856, 5.847, 5.841],
            )
            .unwrap(),
            ExperimentData::new(
                323.15,
                10.0,
                times,
                vec![6.750, 6.340, 6.285, 6.281, 6.283, 6.286, 6.289, 6.282, 6.266, 6.286],
            )
            .unwrap(),
        ]
    }

    #[test]
    fn recovers_parameters_from_exact_data() {
        let exps = simulated(0.0, 0);
        for start in [
            guess(),
            ParameterSet::new(5.0, 40_000.0, -5_000.0, -20.0),
            ParameterSet::new(8.0, 60_000.0, -20_000.0, -60.0),
        ] {
            let out = fit(&start, &exps, &SolverOptions::default()).unwrap();
            let p = out.params;
            let t = truth();
            assert!((p.log10_a - t.log10_a).abs() < 1e-5, "log10_A {}", p.log10_a);
            assert!((p.ea - t.ea).abs() < 0.1, "Ea {}", p.ea);
            assert!((p.dh - t.dh).abs() < 0.1, "dH {}", p.dh);
            assert!((p.ds - t.ds).abs() < 1e-4, "dS {}", p.ds);
            assert!(out.quality.ssr < 1e-12);
        }
    }

    #[test]
    fn noisy_fits_land_within_three_standard_errors() {
        let t = truth().as_array();
        let trials = 20;
        let mut within = 0;
        for seed in 0..trials {
            let exps = simulated(0.01, 1000 + seed);
            let out = fit(&guess(), &exps, &SolverOptions::default()).unwrap();
            let p = out.params.as_array();
            let se = out.standard_errors.as_array();
            assert!(se.iter().all(|s| s.is_finite() && *s > 0.0));
            if (0..4).all(|k| (p[k] - t[k]).abs() <= 3.0 * se[k]) {
                within += 1;
            }
        }
        assert!(within >= 17, "only {within}/{trials} fits within 3 SE");
    }

    #[test]
    fn isothermal_data_is_degenerate() {
        let times = uniform_times(100.0, 10);
        let spec = SimulationSpec {
            params: truth(),
            temperatures: vec![298.15, 298.15],
            initial_concentration: 10.0,
            times,
            noise_sd: 0.005,
            seed: 3,
        };
        let exps = generate_experiments(&spec).unwrap();
        match fit(&guess(), &exps, &SolverOptions::default()) {
            Err(FitError::DegenerateFit { best, cost, reason }) => {
                assert!(best.is_finite());
                assert!(cost.is_finite());
                assert!(matches!(
                    reason,
                    Degeneracy::IllConditioned { .. } | Degeneracy::InsensitiveParameter { .. }
                ));
            }
            other => panic!("expected DegenerateFit, got {other:?}"),
        }
    }

    #[test]
    fn plateau_stall_with_several_temperatures_is_a_convergence_failure() {
        // Kinetics this fast relax before the first sample, so log10_A and Ea
        // stop mattering long before the true optimum is reached.
        let exps = simulated(0.0, 0);
        let plateau = ParameterSet::new(2.0, 10_000.0, 5_000.0, 0.0);
        match fit(&plateau, &exps, &SolverOptions::default()) {
            Err(FitError::ConvergenceFailure { best, cost, .. }) => {
                assert!(best.is_finite());
                assert!(cost > 1.0, "SSR {cost}");
            }
            other => panic!("expected ConvergenceFailure, got {other:?}"),
        }

        let far = ParameterSet::new(12.0, 90_000.0, -40_000.0, -100.0);
        let out = fit(&far, &exps, &SolverOptions::default()).unwrap();
        assert!((out.params.ea - truth().ea).abs() < 0.1, "Ea {}", out.params.ea);
    }

    #[test]
    fn reference_scenario_converges_with_finite_errors() {
        let exps = reference_experiments();
        let out = fit(&guess(), &exps, &SolverOptions::default()).unwrap();

        assert!(out.params.ea > 0.0);
        assert!(out.params.ea > 40_000.0 && out.params.ea < 55_000.0, "Ea {}", out.params.ea);
        for se in out.standard_errors.as_array() {
            assert!(se.is_finite() && se > 0.0);
        }
        assert_eq!(out.quality.n_obs, 30);
        assert_eq!(out.quality.dof, 26);

        // The reported SSR is the SSR of the reported parameters.
        let r = residuals(&out.params, &exps).unwrap();
        assert!((sum_of_squares(&r) - out.quality.ssr).abs() < 1e-12);
    }

    #[test]
    fn fits_are_independent_and_repeatable() {
        let exps = reference_experiments();
        let a = fit(&guess(), &exps, &SolverOptions::default()).unwrap();
        let b = fit(&guess(), &exps, &SolverOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tiny_budget_is_a_convergence_failure() {
        let exps = reference_experiments();
        let opts = SolverOptions {
            max_iterations: 2,
            ..SolverOptions::default()
        };
        match fit(&guess(), &exps, &opts) {
            Err(FitError::ConvergenceFailure {
                best,
                cost,
                iterations,
            }) => {
                assert_eq!(iterations, 2);
                assert!(best.is_finite());
                let start = sum_of_squares(&residuals(&guess(), &exps).unwrap());
                assert!(cost <= start);
            }
            other => panic!("expected ConvergenceFailure, got {other:?}"),
        }
    }

    #[test]
    fn zero_time_budget_is_a_convergence_failure() {
        let exps = reference_experiments();
        let opts = SolverOptions {
            max_duration: Some(std::time::Duration::ZERO),
            ..SolverOptions::default()
        };
        assert!(matches!(
            fit(&guess(), &exps, &opts),
            Err(FitError::ConvergenceFailure { iterations: 0, .. })
        ));
    }

    #[test]
    fn unevaluable_guess_is_a_convergence_failure() {
        let exps = reference_experiments();
        let wild = ParameterSet::new(500.0, 45_000.0, -10_000.0, -50.0);
        match fit(&wild, &exps, &SolverOptions::default()) {
            Err(FitError::ConvergenceFailure { best, cost, .. }) => {
                assert_eq!(best, wild);
                assert!(cost.is_infinite());
            }
            other => panic!("expected ConvergenceFailure, got {other:?}"),
        }
    }

    #[test]
    fn invalid_inputs_are_rejected_up_front() {
        let exps = reference_experiments();
        let opts = SolverOptions::default();

        assert!(matches!(fit(&guess(), &[], &opts), Err(FitError::InvalidInput(_))));

        let few = vec![ExperimentData::new(300.0, 10.0, vec![1.0, 2.0, 3.0], vec![9.0, 8.5, 8.0]).unwrap()];
        assert!(matches!(fit(&guess(), &few, &opts), Err(FitError::InvalidInput(_))));

        let nan_guess = ParameterSet::new(6.0, f64::NAN, -10_000.0, -50.0);
        assert!(matches!(fit(&nan_guess, &exps, &opts), Err(FitError::InvalidInput(_))));

        let bad_opts = SolverOptions {
            finite_difference_step: 0.0,
            ..SolverOptions::default()
        };
        assert!(matches!(fit(&guess(), &exps, &bad_opts), Err(FitError::InvalidInput(_))));
    }

    #[test]
    fn exactly_determined_system_has_no_covariance() {
        // Two temperatures, two points each, starting at the generating parameters.
        let spec = SimulationSpec {
            params: truth(),
            temperatures: vec![298.15, 323.15],
            initial_concentration: 10.0,
            times: vec![10.0, 40.0],
            noise_sd: 0.0,
            seed: 0,
        };
        let exps = generate_experiments(&spec).unwrap();
        assert!(matches!(
            fit(&truth(), &exps, &SolverOptions::default()),
            Err(FitError::DegenerateFit {
                reason: Degeneracy::NoResidualDegreesOfFreedom,
                ..
            })
        ));
    }

    #[test]
    fn exact_start_terminates_immediately() {
        let exps = simulated(0.0, 0);
        let out = fit(&truth(), &exps, &SolverOptions::default()).unwrap();
        assert_eq!(out.termination, Termination::ExactFit);
        assert_eq!(out.quality.iterations, 0);
        assert_eq!(out.params, truth());
        assert!(out.standard_errors.as_array().iter().all(|s| *s < 1e-9));
    }
}

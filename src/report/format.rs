//! Terminal formatting for fit runs.
//!
//! Energies arrive in J/mol and are converted to the display unit here and
//! nowhere else.

use crate::domain::{EnergyUnit, Estimate, FitConfig, FitOutcome, N_PARAMS, ParameterSet};
use crate::io::ingest::IngestedData;
use crate::report::{RateRow, SearchSummary};

const ENTROPY_UNIT: &str = "J/(mol·K)";

/// Format the full run summary (dataset + search + parameters + diagnostics).
pub fn format_run_summary(
    ingest: &IngestedData,
    estimate: &Estimate,
    search: &SearchSummary,
    rates: &[RateRow],
    config: &FitConfig,
) -> String {
    let mut out = String::new();

    out.push_str("=== kfit - reversible A <=> B kinetic fit ===\n");
    out.push_str(&format!("Data: {}\n", config.data_path.display()));
    out.push_str(&format!(
        "Rows: read={} used={} skipped={}\n",
        ingest.rows_read,
        ingest.rows_used,
        ingest.row_errors.len()
    ));
    for err in ingest.row_errors.iter().take(5) {
        out.push_str(&format!("  line {}: {}\n", err.line, err.message));
    }
    if ingest.row_errors.len() > 5 {
        out.push_str(&format!("  ... {} more\n", ingest.row_errors.len() - 5));
    }

    out.push_str(&format!(
        "Experiments: {} | observations: {}\n",
        ingest.experiments.len(),
        ingest.observation_count()
    ));
    out.push_str(&format!(
        "  {:<20} {:>8} {:>10} {:>6} {:>18}\n",
        "experiment", "T [K]", "C0", "n", "time range [s]"
    ));
    for e in &ingest.experiments {
        let (t0, t1) = match (e.times().first(), e.times().last()) {
            (Some(a), Some(b)) => (*a, *b),
            _ => (f64::NAN, f64::NAN),
        };
        out.push_str(&format!(
            "  {:<20} {:>8.2} {:>10.4} {:>6} {:>18}\n",
            truncate(e.label(), 20),
            e.temperature(),
            e.initial_concentration(),
            e.len(),
            format!("[{t0}, {t1}]")
        ));
    }

    out.push_str(&format!("\nSearch: {}\n", format_search(search)));
    out.push('\n');
    out.push_str(&format_estimate(estimate, config.display_unit));

    if !rates.is_empty() {
        out.push('\n');
        out.push_str(&format_rate_table(rates));
    }

    out
}

/// Parameters, uncertainties and diagnostics of one estimate.
pub fn format_estimate(estimate: &Estimate, unit: EnergyUnit) -> String {
    let mut out = String::new();
    match estimate {
        Estimate::Full(outcome) => {
            out.push_str(&format!(
                "Status: converged ({:?}, {} iterations)\n",
                outcome.termination, outcome.quality.iterations
            ));
            out.push_str(&format_parameters(&outcome.params, Some(outcome), unit));
            out.push_str(&format!(
                "\nFit quality: SSR={:.6e} RMSE={:.6e} s²={:.6e} n={} dof={} BIC={:.3}\n",
                outcome.quality.ssr,
                outcome.quality.rmse,
                outcome.quality.residual_variance,
                outcome.quality.n_obs,
                outcome.quality.dof,
                outcome.quality.bic
            ));
            out.push('\n');
            out.push_str(&format_correlation(outcome));
        }
        Estimate::Degenerate { params, ssr, reason } => {
            out.push_str(&format!("Status: DEGENERATE ({reason})\n"));
            out.push_str("Uncertainties unavailable: the data do not determine every parameter.\n");
            out.push_str(&format_parameters(params, None, unit));
            out.push_str(&format!("\nFit quality: SSR={ssr:.6e}\n"));
        }
    }
    out
}

fn format_search(search: &SearchSummary) -> String {
    match search.best_start {
        Some(best) if search.starts > 1 => format!(
            "{} starts, best #{best}, {} failed",
            search.starts, search.failed
        ),
        Some(_) => "single start".to_string(),
        None => format!("{} starts, none succeeded", search.starts),
    }
}

fn format_parameters(params: &ParameterSet, outcome: Option<&FitOutcome>, unit: EnergyUnit) -> String {
    let values = params.as_array();
    let errors = outcome.map(|o| o.standard_errors.as_array());
    let units = ["", unit.label(), unit.label(), ENTROPY_UNIT];

    let mut out = String::from("Parameters:\n");
    for k in 0..N_PARAMS {
        // Energies (Ea, dH) are the only converted quantities.
        let convert = |v: f64| if k == 1 || k == 2 { unit.from_joules(v) } else { v };
        let value = convert(values[k]);
        let line = match &errors {
            Some(se) => format!(
                "  {:<8} = {:>14.4} ± {:<10.4} {}",
                ParameterSet::NAMES[k],
                value,
                convert(se[k]),
                units[k]
            ),
            None => format!(
                "  {:<8} = {:>14.4}   {:<10} {}",
                ParameterSet::NAMES[k],
                value,
                "n/a",
                units[k]
            ),
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

fn format_correlation(outcome: &FitOutcome) -> String {
    let mut out = String::from("Correlation:\n");
    out.push_str(&format!("  {:<8}", ""));
    for name in ParameterSet::NAMES {
        out.push_str(&format!(" {name:>8}"));
    }
    out.push('\n');
    for (i, name) in ParameterSet::NAMES.iter().enumerate() {
        out.push_str(&format!("  {name:<8}"));
        for j in 0..N_PARAMS {
            let rho = outcome.covariance.correlation(i, j);
            if rho.is_finite() {
                out.push_str(&format!(" {rho:>8.3}"));
            } else {
                out.push_str(&format!(" {:>8}", "n/a"));
            }
        }
        out.push('\n');
    }
    out
}

/// Per-experiment `Kc`, `kf`, `kr`, `C_A,eq` table.
pub fn format_rate_table(rows: &[RateRow]) -> String {
    let mut out = String::from("Rates at fitted parameters:\n");
    out.push_str(
        format!(
            "  {:<20} {:>8} {:>12} {:>12} {:>12} {:>10}\n",
            "experiment", "T [K]", "Kc", "kf [1/s]", "kr [1/s]", "C_eq"
        )
        .trim_end(),
    );
    out.push('\n');
    for r in rows {
        out.push_str(
            format!(
                "  {:<20} {:>8.2} {:>12.4e} {:>12.4e} {:>12.4e} {:>10.4}\n",
                truncate(&r.experiment, 20),
                r.rates.temperature,
                r.rates.kc,
                r.rates.kf,
                r.rates.kr,
                r.equilibrium_concentration
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CovarianceMatrix, FitQuality, StandardErrors, Termination};
    use crate::report::rate_table;

    fn outcome() -> FitOutcome {
        FitOutcome {
            params: ParameterSet::new(6.969, 50_017.0, -10_041.0, -35.43),
            covariance: CovarianceMatrix::from_rows(&[
                [1.0, 0.9, 0.0, 0.0],
                [0.9, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 0.0],
            ]),
            standard_errors: StandardErrors {
                log10_a: 0.037,
                ea: 215.0,
                dh: 70.0,
                ds: 0.22,
            },
            quality: FitQuality {
                ssr: 1.2e-3,
                rmse: 6.3e-3,
                residual_variance: 4.6e-5,
                n_obs: 30,
                dof: 26,
                bic: -290.0,
                iterations: 14,
            },
            termination: Termination::CostReduction,
        }
    }

    #[test]
    fn energies_are_shown_in_the_display_unit() {
        let text = format_estimate(&Estimate::Full(outcome()), EnergyUnit::Kj);
        assert!(text.contains("Status: converged (CostReduction, 14 iterations)"));
        assert!(text.contains("50.0170 ± 0.2150"));
        assert!(text.contains("-10.0410 ± 0.0700"));
        // Entropy is never rescaled.
        assert!(text.contains("-35.4300 ± 0.2200"));
        assert!(text.contains("kJ/mol"));

        let joules = format_estimate(&Estimate::Full(outcome()), EnergyUnit::J);
        assert!(joules.contains("50017.0000 ± 215.0000"));
    }

    #[test]
    fn correlation_table_marks_undefined_entries() {
        let text = format_estimate(&Estimate::Full(outcome()), EnergyUnit::Kj);
        assert!(text.contains("Correlation:"));
        assert!(text.contains("0.900"));
        assert!(text.contains("n/a"));
    }

    #[test]
    fn degenerate_estimates_are_flagged() {
        let estimate = Estimate::Degenerate {
            params: ParameterSet::new(7.0, 50_000.0, -10_000.0, -35.0),
            ssr: 0.25,
            reason: "scaled normal matrix is ill-conditioned (rcond = 1.000e-16)".to_string(),
        };
        let text = format_estimate(&estimate, EnergyUnit::Kj);
        assert!(text.contains("DEGENERATE"));
        assert!(text.contains("Uncertainties unavailable"));
        assert!(text.contains("50.0000   n/a"));
        assert!(!text.contains('±'));
    }

    #[test]
    fn rate_table_lists_every_experiment() {
        let exps = vec![
            crate::domain::ExperimentData::with_label("cold", 298.15, 10.0, vec![10.0], vec![8.6]).unwrap(),
            crate::domain::ExperimentData::with_label("a-very-long-experiment-name", 323.15, 10.0, vec![10.0], vec![6.7])
                .unwrap(),
        ];
        let rows = rate_table(&exps, &ParameterSet::new(7.0, 50_190.0, -10_000.0, -35.3)).unwrap();
        let text = format_rate_table(&rows);
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("cold"));
        assert!(text.contains("a-very-long-experim."));
        assert!(text.contains("323.15"));
    }

    #[test]
    fn search_line_variants() {
        let single = SearchSummary { starts: 1, best_start: Some(0), failed: 0 };
        let multi = SearchSummary { starts: 8, best_start: Some(3), failed: 2 };
        let none = SearchSummary { starts: 4, best_start: None, failed: 4 };
        assert_eq!(format_search(&single), "single start");
        assert_eq!(format_search(&multi), "8 starts, best #3, 2 failed");
        assert_eq!(format_search(&none), "4 starts, none succeeded");
    }
}

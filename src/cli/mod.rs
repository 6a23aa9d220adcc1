//! Command-line parsing for the kinetic parameter fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code. Energies on the command line are in
//! `--energy-unit` (kJ/mol by default) and are converted to J/mol in `app`.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::domain::EnergyUnit;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "kfit",
    version,
    about = "Arrhenius / van't Hoff parameter fitting for reversible A <=> B kinetics"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit log10(A), Ea, dH and dS to a concentration CSV, print diagnostics, optionally plot/export.
    Fit(FitArgs),
    /// Generate synthetic experiments from known parameters (CSV in the `fit` input format).
    Simulate(SimulateArgs),
    /// Plot a previously exported fit report JSON.
    Plot(PlotArgs),
}

/// Options for fitting.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Observation CSV (experiment,temperature_k,initial_concentration,time_s,concentration).
    #[arg(value_name = "CSV")]
    pub data: PathBuf,

    /// Unit of --ea/--dh (and of energies in the printed summary).
    #[arg(long, value_enum, default_value_t = EnergyUnit::Kj)]
    pub energy_unit: EnergyUnit,

    /// Initial guess for log10 of the pre-exponential factor (s⁻¹).
    #[arg(long = "log10-a", default_value_t = 6.0, allow_hyphen_values = true)]
    pub log10_a: f64,

    /// Initial guess for the forward activation energy.
    #[arg(long, default_value_t = 45.0, allow_hyphen_values = true)]
    pub ea: f64,

    /// Initial guess for the reaction enthalpy.
    #[arg(long, default_value_t = -10.0, allow_hyphen_values = true)]
    pub dh: f64,

    /// Initial guess for the reaction entropy, J/(mol·K).
    #[arg(long, default_value_t = -50.0, allow_hyphen_values = true)]
    pub ds: f64,

    /// Relative convergence tolerance (cost reduction and step size).
    #[arg(long, default_value_t = 1e-8)]
    pub tolerance: f64,

    /// Maximum number of attempted LM steps.
    #[arg(long, default_value_t = 800)]
    pub max_iterations: usize,

    /// Relative finite-difference step for the Jacobian.
    #[arg(long, default_value_t = 1e-6)]
    pub fd_step: f64,

    /// Initial Levenberg-Marquardt damping.
    #[arg(long, default_value_t = 1e-3)]
    pub initial_damping: f64,

    /// Minimum reciprocal condition number of the scaled normal matrix.
    #[arg(long, default_value_t = 1e-10)]
    pub degeneracy_threshold: f64,

    /// Optional wall-clock budget per start, in seconds.
    #[arg(long, allow_negative_numbers = true)]
    pub max_seconds: Option<f64>,

    /// Number of starting points (1 = the given guess only).
    #[arg(long, default_value_t = 1)]
    pub starts: usize,

    /// Seed for the perturbed starting points.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Export the fit report (parameters, covariance, data) to JSON.
    #[arg(long = "export-report", value_name = "JSON")]
    pub export_report: Option<PathBuf>,

    /// Export per-observation fitted values and residuals to CSV.
    #[arg(long = "export-residuals", value_name = "CSV")]
    pub export_residuals: Option<PathBuf>,

    /// Export densely sampled fitted curves to CSV.
    #[arg(long = "export-curves", value_name = "CSV")]
    pub export_curves: Option<PathBuf>,
}

/// Options for synthetic data generation.
#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Unit of --ea/--dh.
    #[arg(long, value_enum, default_value_t = EnergyUnit::Kj)]
    pub energy_unit: EnergyUnit,

    /// log10 of the pre-exponential factor (s⁻¹).
    #[arg(long = "log10-a", default_value_t = 7.0, allow_hyphen_values = true)]
    pub log10_a: f64,

    /// Forward activation energy.
    #[arg(long, default_value_t = 50.19, allow_hyphen_values = true)]
    pub ea: f64,

    /// Reaction enthalpy.
    #[arg(long, default_value_t = -10.0, allow_hyphen_values = true)]
    pub dh: f64,

    /// Reaction entropy, J/(mol·K).
    #[arg(long, default_value_t = -35.3, allow_hyphen_values = true)]
    pub ds: f64,

    /// Comma-separated temperatures (K), one experiment each.
    #[arg(long, value_delimiter = ',', default_values_t = [298.15, 308.15, 323.15])]
    pub temperatures: Vec<f64>,

    /// Initial concentration of A (mol/L).
    #[arg(long, default_value_t = 10.0)]
    pub c0: f64,

    /// Last sampling time (s).
    #[arg(long, default_value_t = 100.0)]
    pub t_max: f64,

    /// Samples per experiment, evenly spaced in (0, t_max].
    #[arg(long, default_value_t = 10)]
    pub points: usize,

    /// Standard deviation of additive Gaussian noise (mol/L).
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Random seed for the noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output CSV (stdout if omitted).
    #[arg(short = 'o', long, value_name = "CSV")]
    pub output: Option<PathBuf>,
}

/// Options for plotting a saved report.
#[derive(Debug, Parser)]
pub struct PlotArgs {
    /// Report JSON file produced by `kfit fit --export-report`.
    #[arg(long, value_name = "JSON")]
    pub report: PathBuf,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_defaults_match_the_documented_guess() {
        let cli = Cli::parse_from(["kfit", "fit", "data.csv"]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(cli.verbose, 0);
        assert_eq!(args.data, PathBuf::from("data.csv"));
        assert_eq!(args.energy_unit, EnergyUnit::Kj);
        assert_eq!((args.log10_a, args.ea, args.dh, args.ds), (6.0, 45.0, -10.0, -50.0));
        assert_eq!(args.max_iterations, 800);
        assert_eq!(args.starts, 1);
        assert!(!args.no_plot);
    }

    #[test]
    fn negative_values_and_verbosity_parse() {
        let cli = Cli::parse_from([
            "kfit", "-vv", "fit", "d.csv", "--dh", "-12.5", "--ds", "-40", "--energy-unit", "j", "--starts", "8",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.dh, -12.5);
        assert_eq!(args.ds, -40.0);
        assert_eq!(args.energy_unit, EnergyUnit::J);
        assert_eq!(args.starts, 8);
    }

    #[test]
    fn simulate_temperature_list() {
        let cli = Cli::parse_from(["kfit", "simulate", "--temperatures", "300,310", "--noise", "0.01"]);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.temperatures, vec![300.0, 310.0]);
        assert_eq!(args.noise, 0.01);

        let defaults = Cli::parse_from(["kfit", "simulate"]);
        let Command::Simulate(args) = defaults.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.temperatures, vec![298.15, 308.15, 323.15]);
        assert!(args.output.is_none());
    }

    #[test]
    fn plot_requires_a_report() {
        assert!(Cli::try_parse_from(["kfit", "plot"]).is_err());
        assert!(Cli::try_parse_from(["kfit", "plot", "--report", "fit.json"]).is_ok());
    }
}

//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs the logger
//! - runs the fit pipeline
//! - prints reports/plots
//! - writes optional exports

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use log::{LevelFilter, debug, info};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use crate::cli::{Cli, Command, FitArgs, PlotArgs, SimulateArgs};
use crate::data::sample::{SimulationSpec, generate_experiments, uniform_times};
use crate::domain::{EnergyUnit, Estimate, FitConfig, FitReport, ParameterSet, SolverOptions};
use crate::error::AppError;

pub mod pipeline;

/// Samples per fitted curve in plots and curve exports.
const CURVE_SAMPLES: usize = 101;

/// Entry point for the `kfit` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Plot(args) => handle_plot(args),
    }
}

/// Log level for `-v` repetitions: warn, info, debug, trace.
pub fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn init_logging(verbose: u8) {
    // Fails only if a logger is already installed; keep that one.
    if let Err(e) = TermLogger::init(
        level_for_verbosity(verbose),
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        debug!("logger already initialised: {e}");
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args)?;
    let run = pipeline::run_fit(&config)?;

    println!(
        "{}",
        crate::report::format_run_summary(&run.ingest, &run.estimate, &run.search, &run.rates, &config)
    );

    if config.plot {
        let series = crate::plot::experiment_series(
            &run.ingest.experiments,
            Some(run.estimate.params()),
            CURVE_SAMPLES,
        )?;
        println!(
            "{}",
            crate::plot::render_plot(&series, config.plot_width, config.plot_height)
        );
    }

    // Optional exports.
    if let Some(path) = &config.export_report {
        let report = FitReport::new(&run.estimate, &run.ingest.experiments, Utc::now());
        crate::io::report::write_report_json(path, &report)?;
        info!("wrote report to {}", path.display());
    }
    if let Some(path) = &config.export_residuals {
        crate::io::export::write_residuals_csv(path, &run.residuals)?;
        info!("wrote residuals to {}", path.display());
    }
    if let Some(path) = &config.export_curves {
        crate::io::export::write_curves_csv(path, &run.ingest.experiments, run.estimate.params(), CURVE_SAMPLES)?;
        info!("wrote curves to {}", path.display());
    }

    match &run.estimate {
        Estimate::Full(_) => Ok(()),
        Estimate::Degenerate { reason, .. } => Err(AppError::new(
            4,
            format!("Fit is degenerate ({reason}); parameter uncertainties are unavailable."),
        )),
    }
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let spec = simulation_spec_from_args(&args)?;
    let experiments = generate_experiments(&spec)?;

    match &args.output {
        Some(path) => {
            crate::io::export::write_experiments_csv(path, &experiments)?;
            info!(
                "wrote {} experiments ({} points each) to {}",
                experiments.len(),
                spec.times.len(),
                path.display()
            );
        }
        None => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            crate::io::export::write_experiments(&mut writer, &experiments)?;
            writer
                .flush()
                .map_err(|e| AppError::new(2, format!("Failed to write CSV to stdout: {e}")))?;
        }
    }
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let report = crate::io::report::read_report_json(&args.report)?;
    let experiments = report.experiment_data()?;

    println!(
        "Report: {} | status={:?} | generated {}",
        args.report.display(),
        report.status,
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let series = crate::plot::experiment_series(&experiments, Some(&report.params), CURVE_SAMPLES)?;
    println!("{}", crate::plot::render_plot(&series, args.width, args.height));
    Ok(())
}

/// Parameter set from CLI values, with energies converted to J/mol.
fn params_from_cli(unit: EnergyUnit, log10_a: f64, ea: f64, dh: f64, ds: f64) -> ParameterSet {
    ParameterSet::new(log10_a, unit.to_joules(ea), unit.to_joules(dh), ds)
}

pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig, AppError> {
    let max_duration = match args.max_seconds {
        Some(secs) => Some(
            Duration::try_from_secs_f64(secs)
                .map_err(|e| AppError::new(2, format!("Invalid --max-seconds {secs}: {e}")))?,
        ),
        None => None,
    };

    Ok(FitConfig {
        data_path: PathBuf::from(&args.data),
        initial_guess: params_from_cli(args.energy_unit, args.log10_a, args.ea, args.dh, args.ds),
        solver: SolverOptions {
            tolerance: args.tolerance,
            max_iterations: args.max_iterations,
            finite_difference_step: args.fd_step,
            initial_damping: args.initial_damping,
            degeneracy_threshold: args.degeneracy_threshold,
            max_duration,
        },
        starts: args.starts,
        seed: args.seed,
        display_unit: args.energy_unit,
        plot: !args.no_plot,
        plot_width: args.width,
        plot_height: args.height,
        export_report: args.export_report.clone(),
        export_residuals: args.export_residuals.clone(),
        export_curves: args.export_curves.clone(),
    })
}

pub fn simulation_spec_from_args(args: &SimulateArgs) -> Result<SimulationSpec, AppError> {
    if !(args.t_max.is_finite() && args.t_max > 0.0) || args.points == 0 {
        return Err(AppError::new(2, "--t-max must be > 0 and --points at least 1."));
    }
    Ok(SimulationSpec {
        params: params_from_cli(args.energy_unit, args.log10_a, args.ea, args.dh, args.ds),
        temperatures: args.temperatures.clone(),
        initial_concentration: args.c0,
        times: uniform_times(args.t_max, args.points),
        noise_sd: args.noise,
        seed: args.seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitStatus;

    fn parse(argv: &[&str]) -> Command {
        Cli::parse_from(argv).command
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for_verbosity(0), LevelFilter::Warn);
        assert_eq!(level_for_verbosity(1), LevelFilter::Info);
        assert_eq!(level_for_verbosity(2), LevelFilter::Debug);
        assert_eq!(level_for_verbosity(9), LevelFilter::Trace);
    }

    #[test]
    fn repeated_logger_setup_is_harmless() {
        init_logging(0);
        init_logging(3);
        assert!(log::max_level() <= LevelFilter::Trace);
    }

    #[test]
    fn cli_energies_are_converted_to_joules() {
        let Command::Fit(args) = parse(&["kfit", "fit", "d.csv", "--ea", "50", "--max-seconds", "2.5"]) else {
            panic!("expected fit");
        };
        let cfg = fit_config_from_args(&args).unwrap();
        assert_eq!(cfg.initial_guess, ParameterSet::new(6.0, 50_000.0, -10_000.0, -50.0));
        assert_eq!(cfg.solver.max_duration, Some(Duration::from_millis(2500)));
        assert!(cfg.plot);

        let Command::Fit(args) = parse(&["kfit", "fit", "d.csv", "--energy-unit", "j", "--ea", "50000"]) else {
            panic!("expected fit");
        };
        let cfg = fit_config_from_args(&args).unwrap();
        assert_eq!(cfg.initial_guess.ea, 50_000.0);
        assert_eq!(cfg.initial_guess.dh, -10.0);
    }

    #[test]
    fn negative_time_budget_is_rejected() {
        let Command::Fit(args) = parse(&["kfit", "fit", "d.csv", "--max-seconds", "-1"]) else {
            panic!("expected fit");
        };
        assert_eq!(fit_config_from_args(&args).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn simulate_then_fit_then_plot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data.csv");
        let report = dir.path().join("fit.json");
        let residuals = dir.path().join("residuals.csv");
        let curves = dir.path().join("curves.csv");

        let Command::Simulate(sim) = parse(&[
            "kfit",
            "simulate",
            "--noise",
            "0.005",
            "--seed",
            "3",
            "-o",
            data.to_str().unwrap(),
        ]) else {
            panic!("expected simulate");
        };
        handle_simulate(sim).unwrap();

        let Command::Fit(fit) = parse(&[
            "kfit",
            "fit",
            data.to_str().unwrap(),
            "--no-plot",
            "--export-report",
            report.to_str().unwrap(),
            "--export-residuals",
            residuals.to_str().unwrap(),
            "--export-curves",
            curves.to_str().unwrap(),
        ]) else {
            panic!("expected fit");
        };
        handle_fit(fit).unwrap();

        let saved = crate::io::report::read_report_json(&report).unwrap();
        assert_eq!(saved.status, FitStatus::Converged);
        assert_eq!(saved.experiments.len(), 3);
        assert!((saved.params.ea - 50_190.0).abs() < 3_000.0, "Ea {}", saved.params.ea);
        assert!(residuals.exists() && curves.exists());

        let Command::Plot(plot) = parse(&["kfit", "plot", "--report", report.to_str().unwrap(), "--width", "40"]) else {
            panic!("expected plot");
        };
        handle_plot(plot).unwrap();
    }

    #[test]
    fn simulate_rejects_empty_time_grid() {
        let Command::Simulate(sim) = parse(&["kfit", "simulate", "--points", "0"]) else {
            panic!("expected simulate");
        };
        assert_eq!(simulation_spec_from_args(&sim).unwrap_err().exit_code(), 2);
    }
}

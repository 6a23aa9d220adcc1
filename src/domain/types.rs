//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - reloaded later for plotting or comparisons
//!
//! Unit convention: energies are J/mol, entropy J/(mol·K), temperature K,
//! time s, concentration mol/L. Conversions to kJ/mol happen only at the
//! CLI/report boundary via `EnergyUnit`.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use nalgebra::{Matrix4, Vector4};
use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Number of fitted parameters.
pub const N_PARAMS: usize = 4;

/// Kinetic/thermodynamic parameter vector, in fixed order `[log10_a, ea, dh, ds]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Decimal log of the Arrhenius pre-exponential factor (s⁻¹).
    pub log10_a: f64,
    /// Activation energy of the forward reaction (J/mol).
    pub ea: f64,
    /// Reaction enthalpy (J/mol).
    pub dh: f64,
    /// Reaction entropy (J/(mol·K)).
    pub ds: f64,
}

impl ParameterSet {
    pub const NAMES: [&'static str; N_PARAMS] = ["log10_A", "Ea", "dH", "dS"];

    pub fn new(log10_a: f64, ea: f64, dh: f64, ds: f64) -> Self {
        Self {
            log10_a,
            ea,
            dh,
            ds,
        }
    }

    pub fn to_vector(&self) -> Vector4<f64> {
        Vector4::new(self.log10_a, self.ea, self.dh, self.ds)
    }

    pub fn from_vector(v: &Vector4<f64>) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    pub fn as_array(&self) -> [f64; N_PARAMS] {
        [self.log10_a, self.ea, self.dh, self.ds]
    }

    pub fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }
}

impl std::fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "log10_A={:.4}, Ea={:.1} J/mol, dH={:.1} J/mol, dS={:.3} J/(mol K)",
            self.log10_a, self.ea, self.dh, self.ds
        )
    }
}

/// One standard error per parameter (same order/units as `ParameterSet`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardErrors {
    pub log10_a: f64,
    pub ea: f64,
    pub dh: f64,
    pub ds: f64,
}

impl StandardErrors {
    pub fn as_array(&self) -> [f64; N_PARAMS] {
        [self.log10_a, self.ea, self.dh, self.ds]
    }
}

/// Parameter covariance at the optimum (ordering of `ParameterSet`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CovarianceMatrix(Matrix4<f64>);

impl CovarianceMatrix {
    pub fn new(matrix: Matrix4<f64>) -> Self {
        Self(matrix)
    }

    pub fn from_rows(rows: &[[f64; N_PARAMS]; N_PARAMS]) -> Self {
        Self(Matrix4::from_fn(|i, j| rows[i][j]))
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.0[(i, j)]
    }

    pub fn variance(&self, i: usize) -> f64 {
        self.0[(i, i)]
    }

    /// `cov_ij / (σ_i σ_j)`, or `NaN` when either σ is zero.
    pub fn correlation(&self, i: usize, j: usize) -> f64 {
        let denom = (self.variance(i).max(0.0) * self.variance(j).max(0.0)).sqrt();
        if denom > 0.0 { self.get(i, j) / denom } else { f64::NAN }
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    pub fn to_rows(&self) -> [[f64; N_PARAMS]; N_PARAMS] {
        let mut out = [[0.0; N_PARAMS]; N_PARAMS];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = self.0[(i, j)];
            }
        }
        out
    }
}

/// Energy unit used at the input/output boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EnergyUnit {
    /// J/mol (the internal unit).
    J,
    /// kJ/mol.
    Kj,
}

impl EnergyUnit {
    pub fn to_joules(self, value: f64) -> f64 {
        match self {
            EnergyUnit::J => value,
            EnergyUnit::Kj => value * 1000.0,
        }
    }

    pub fn from_joules(self, value: f64) -> f64 {
        match self {
            EnergyUnit::J => value,
            EnergyUnit::Kj => value / 1000.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EnergyUnit::J => "J/mol",
            EnergyUnit::Kj => "kJ/mol",
        }
    }
}

/// Serialized/plain form of an experiment. Converting into `ExperimentData`
/// runs the full validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    #[serde(default)]
    pub label: Option<String>,
    pub temperature: f64,
    pub initial_concentration: f64,
    pub times: Vec<f64>,
    pub concentrations: Vec<f64>,
}

/// One isothermal batch experiment: `C_A(t)` observations at temperature `T`.
///
/// Immutable once constructed; all invariants are checked by `new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ExperimentRecord", into = "ExperimentRecord")]
pub struct ExperimentData {
    label: String,
    temperature: f64,
    initial_concentration: f64,
    times: Vec<f64>,
    concentrations: Vec<f64>,
}

impl ExperimentData {
    pub fn new(
        temperature: f64,
        initial_concentration: f64,
        times: Vec<f64>,
        concentrations: Vec<f64>,
    ) -> Result<Self, FitError> {
        Self::with_label(
            format!("{temperature:.2} K"),
            temperature,
            initial_concentration,
            times,
            concentrations,
        )
    }

    pub fn with_label(
        label: impl Into<String>,
        temperature: f64,
        initial_concentration: f64,
        times: Vec<f64>,
        concentrations: Vec<f64>,
    ) -> Result<Self, FitError> {
        let label = label.into();
        if !(temperature.is_finite() && temperature > 0.0) {
            return Err(FitError::InvalidInput(format!(
                "experiment '{label}': temperature must be finite and > 0 K, got {temperature}"
            )));
        }
        if !(initial_concentration.is_finite() && initial_concentration >= 0.0) {
            return Err(FitError::InvalidInput(format!(
                "experiment '{label}': initial concentration must be finite and >= 0, got {initial_concentration}"
            )));
        }
        if times.len() != concentrations.len() {
            return Err(FitError::InvalidInput(format!(
                "experiment '{label}': {} times but {} concentrations",
                times.len(),
                concentrations.len()
            )));
        }
        if times.is_empty() {
            return Err(FitError::InvalidInput(format!(
                "experiment '{label}': no observations"
            )));
        }
        if !(times[0].is_finite() && times[0] > 0.0) {
            return Err(FitError::InvalidInput(format!(
                "experiment '{label}': first time must be finite and > 0 s, got {}",
                times[0]
            )));
        }
        for w in times.windows(2) {
            if !(w[1].is_finite() && w[1] > w[0]) {
                return Err(FitError::InvalidInput(format!(
                    "experiment '{label}': times must be strictly increasing ({} then {})",
                    w[0], w[1]
                )));
            }
        }
        if let Some(c) = concentrations
            .iter()
            .find(|c| !(c.is_finite() && **c >= 0.0))
        {
            return Err(FitError::InvalidInput(format!(
                "experiment '{label}': concentrations must be finite and >= 0, got {c}"
            )));
        }

        Ok(Self {
            label,
            temperature,
            initial_concentration,
            times,
            concentrations,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn initial_concentration(&self) -> f64 {
        self.initial_concentration
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn concentrations(&self) -> &[f64] {
        &self.concentrations
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

impl TryFrom<ExperimentRecord> for ExperimentData {
    type Error = FitError;

    fn try_from(value: ExperimentRecord) -> Result<Self, Self::Error> {
        match value.label {
            Some(label) => ExperimentData::with_label(
                label,
                value.temperature,
                value.initial_concentration,
                value.times,
                value.concentrations,
            ),
            None => ExperimentData::new(
                value.temperature,
                value.initial_concentration,
                value.times,
                value.concentrations,
            ),
        }
    }
}

impl From<ExperimentData> for ExperimentRecord {
    fn from(value: ExperimentData) -> Self {
        ExperimentRecord {
            label: Some(value.label),
            temperature: value.temperature,
            initial_concentration: value.initial_concentration,
            times: value.times,
            concentrations: value.concentrations,
        }
    }
}

/// Levenberg–Marquardt solver settings.
///
/// Absent fields (in JSON) take the defaults of `SolverOptions::default()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Relative cost-reduction / scaled step threshold for convergence.
    pub tolerance: f64,
    /// Hard cap on attempted LM steps (accepted or rejected).
    pub max_iterations: usize,
    /// Relative step for central finite differences: `h * max(|p|, 1)`.
    pub finite_difference_step: f64,
    /// Starting Marquardt damping λ.
    pub initial_damping: f64,
    /// Minimum reciprocal condition number of the column-scaled `JᵀJ`
    /// below which the covariance is reported as degenerate.
    pub degeneracy_threshold: f64,
    /// Optional wall-clock budget for a single fit.
    pub max_duration: Option<Duration>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 200 * N_PARAMS,
            finite_difference_step: 1e-6,
            initial_damping: 1e-3,
            degeneracy_threshold: 1e-10,
            max_duration: None,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<(), FitError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(FitError::InvalidInput(format!(
                    "solver option {name} must be finite and > 0, got {v}"
                )))
            }
        };
        positive("tolerance", self.tolerance)?;
        positive("finite_difference_step", self.finite_difference_step)?;
        positive("initial_damping", self.initial_damping)?;
        positive("degeneracy_threshold", self.degeneracy_threshold)?;
        if self.max_iterations == 0 {
            return Err(FitError::InvalidInput(
                "solver option max_iterations must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why the solver stopped successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Relative SSR reduction fell below tolerance.
    CostReduction,
    /// Scaled step norm fell below tolerance.
    StepSize,
    /// SSR reached the round-off floor of the data.
    ExactFit,
    /// Damping saturated: no descent step exists from the current point.
    Stationary,
}

/// Fit quality diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    /// Sum of squared residuals.
    pub ssr: f64,
    pub rmse: f64,
    /// `ssr / dof`.
    pub residual_variance: f64,
    pub n_obs: usize,
    pub dof: usize,
    pub bic: f64,
    pub iterations: usize,
}

/// Result of one successful fit. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub params: ParameterSet,
    pub covariance: CovarianceMatrix,
    pub standard_errors: StandardErrors,
    pub quality: FitQuality,
    pub termination: Termination,
}

/// Best estimate of a run.
///
/// A degenerate fit still has a best point (and SSR) worth reporting, it just
/// has no trustworthy uncertainties.
#[derive(Debug, Clone, PartialEq)]
pub enum Estimate {
    Full(FitOutcome),
    Degenerate {
        params: ParameterSet,
        ssr: f64,
        reason: String,
    },
}

impl Estimate {
    pub fn params(&self) -> &ParameterSet {
        match self {
            Estimate::Full(outcome) => &outcome.params,
            Estimate::Degenerate { params, .. } => params,
        }
    }

    pub fn ssr(&self) -> f64 {
        match self {
            Estimate::Full(outcome) => outcome.quality.ssr,
            Estimate::Degenerate { ssr, .. } => *ssr,
        }
    }

    pub fn status(&self) -> FitStatus {
        match self {
            Estimate::Full(_) => FitStatus::Converged,
            Estimate::Degenerate { .. } => FitStatus::Degenerate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    Converged,
    Degenerate,
}

/// Portable fit report (JSON).
///
/// Energies are always J/mol here, whatever unit the terminal used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub energy_unit: String,
    pub status: FitStatus,
    pub params: ParameterSet,
    pub ssr: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_errors: Option<StandardErrors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covariance: Option<[[f64; N_PARAMS]; N_PARAMS]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<FitQuality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degeneracy: Option<String>,
    pub experiments: Vec<ExperimentRecord>,
}

impl FitReport {
    pub fn new(estimate: &Estimate, experiments: &[ExperimentData], generated_at: DateTime<Utc>) -> Self {
        let (termination, standard_errors, covariance, quality, degeneracy) = match estimate {
            Estimate::Full(o) => (
                Some(o.termination),
                Some(o.standard_errors),
                Some(o.covariance.to_rows()),
                Some(o.quality),
                None,
            ),
            Estimate::Degenerate { reason, .. } => (None, None, None, None, Some(reason.clone())),
        };
        Self {
            tool: "kfit".to_string(),
            generated_at,
            energy_unit: "J/mol".to_string(),
            status: estimate.status(),
            params: *estimate.params(),
            ssr: estimate.ssr(),
            termination,
            standard_errors,
            covariance,
            quality,
            degeneracy,
            experiments: experiments.iter().cloned().map(ExperimentRecord::from).collect(),
        }
    }

    /// Validated experiments carried by the report.
    pub fn experiment_data(&self) -> Result<Vec<ExperimentData>, FitError> {
        self.experiments
            .iter()
            .cloned()
            .map(ExperimentData::try_from)
            .collect()
    }
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults). Energies are already in J/mol.
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub data_path: PathBuf,
    pub initial_guess: ParameterSet,
    pub solver: SolverOptions,

    /// Total number of starting points (1 = caller's guess only).
    pub starts: usize,
    pub seed: u64,

    /// Unit for energies in terminal output.
    pub display_unit: EnergyUnit,

    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,

    pub export_report: Option<PathBuf>,
    pub export_residuals: Option<PathBuf>,
    pub export_curves: Option<PathBuf>,
}

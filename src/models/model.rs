//! Closed-form batch-reactor model for A ⇌ B (first order both ways).
//!
//! With `C_B(0) = 0` and mass balance `C_A + C_B = C0`:
//!
//! - `Kc = kf / kr = exp(-ΔG / RT) = exp((-ΔH + T ΔS) / RT)`
//! - `C_A,eq = C0 / (1 + Kc)`
//! - `kf = 10^log10_A · exp(-Ea / RT)`, `kr = kf / Kc`
//! - `C_A(t) = C_A,eq + (C0 - C_A,eq) · exp(-(kf + kr) t)`
//!
//! Numerical notes:
//! - Every exponential is assembled in log space and rejected with
//!   `ModelError::NumericOverflow` when its exponent exceeds `MAX_EXPONENT`.
//! - `kf + kr = kf (1 + exp(-x))` uses a softplus so that `ln(k_total)` is
//!   available without forming `1/Kc` when `Kc` is tiny.
//! - Underflow (`kf → 0`) is legal and gives a flat curve at `C0`.

use crate::domain::ParameterSet;
use crate::error::ModelError;

/// Universal gas constant, J/(mol·K).
pub const GAS_CONSTANT: f64 = 8.314;

/// Largest exponent we hand to `exp` (ln(f64::MAX) ≈ 709.78).
const MAX_EXPONENT: f64 = 700.0;

/// Above this, `ln(1 + e^y) == y` to double precision.
const SOFTPLUS_LINEAR: f64 = 36.0;

/// Rate and equilibrium constants at one temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReactionRates {
    pub temperature: f64,
    /// Equilibrium constant `kf / kr`.
    pub kc: f64,
    /// Forward rate coefficient (s⁻¹).
    pub kf: f64,
    /// Reverse rate coefficient (s⁻¹).
    pub kr: f64,
    /// Relaxation rate `kf + kr` (s⁻¹).
    pub k_total: f64,
}

impl ReactionRates {
    pub fn evaluate(temperature: f64, params: &ParameterSet) -> Result<Self, ModelError> {
        if !(temperature.is_finite() && temperature > 0.0) {
            return Err(ModelError::NonFiniteParameter {
                name: "temperature",
            });
        }
        for (name, value) in ParameterSet::NAMES.into_iter().zip(params.as_array()) {
            if !value.is_finite() {
                return Err(ModelError::NonFiniteParameter { name });
            }
        }

        let rt = GAS_CONSTANT * temperature;
        let overflow = |quantity: &'static str| ModelError::NumericOverflow {
            quantity,
            temperature,
        };

        // ln Kc = -ΔG / RT
        let ln_kc = (-params.dh + temperature * params.ds) / rt;
        if ln_kc.abs() > MAX_EXPONENT {
            return Err(overflow("equilibrium constant"));
        }

        let ln_kf = params.log10_a * std::f64::consts::LN_10 - params.ea / rt;
        if !ln_kf.is_finite() || ln_kf > MAX_EXPONENT {
            return Err(overflow("forward rate coefficient"));
        }

        // ln(kf + kr) = ln kf + ln(1 + 1/Kc)
        let ln_k_total = ln_kf + softplus(-ln_kc);
        if ln_k_total > MAX_EXPONENT {
            return Err(overflow("relaxation rate"));
        }

        let kc = ln_kc.exp();
        let kf = ln_kf.exp();
        let kr = (ln_kf - ln_kc).exp();
        let k_total = ln_k_total.exp();

        Ok(Self {
            temperature,
            kc,
            kf,
            kr,
            k_total,
        })
    }

    /// Equilibrium concentration of A for a start of pure A at `c0`.
    pub fn equilibrium_concentration(&self, c0: f64) -> f64 {
        c0 / (1.0 + self.kc)
    }

    /// `C_A(t)` for a start of pure A at `c0`.
    pub fn concentration(&self, t: f64, c0: f64) -> Result<f64, ModelError> {
        let c_eq = self.equilibrium_concentration(c0);
        let c = c_eq + (c0 - c_eq) * (-self.k_total * t).exp();
        if c.is_finite() {
            Ok(c)
        } else {
            Err(ModelError::NumericOverflow {
                quantity: "concentration",
                temperature: self.temperature,
            })
        }
    }
}

fn softplus(y: f64) -> f64 {
    if y > SOFTPLUS_LINEAR {
        y
    } else {
        y.exp().ln_1p()
    }
}

/// Predict `C_A(t)` for one time point.
pub fn predict(t: f64, c0: f64, temperature: f64, params: &ParameterSet) -> Result<f64, ModelError> {
    ReactionRates::evaluate(temperature, params)?.concentration(t, c0)
}

/// Predict `C_A` at every time in `times` (rates are evaluated once).
pub fn predict_series(
    times: &[f64],
    c0: f64,
    temperature: f64,
    params: &ParameterSet,
) -> Result<Vec<f64>, ModelError> {
    let rates = ReactionRates::evaluate(temperature, params)?;
    times.iter().map(|&t| rates.concentration(t, c0)).collect()
}

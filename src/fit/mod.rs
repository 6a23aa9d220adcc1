//! Parameter estimation.
//!
//! Responsibilities:
//!
//! - build the stacked residual vector over all experiments
//! - minimise its sum of squares (Levenberg–Marquardt)
//! - turn the final Jacobian into standard errors and correlations
//! - optionally repeat from perturbed starts and keep the best (parallel)

pub mod multistart;
pub mod residuals;
pub mod solver;
pub mod uncertainty;

pub use multistart::*;
pub use residuals::*;
pub use solver::*;
pub use uncertainty::*;

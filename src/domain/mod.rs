//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - experiment records (`ExperimentData`)
//! - the fitted parameter vector and its uncertainty (`ParameterSet`,
//!   `CovarianceMatrix`, `StandardErrors`)
//! - solver/run configuration (`SolverOptions`, `FitConfig`)
//! - fit outputs (`FitOutcome`, `FitQuality`, `Estimate`)
//! - the serializable run report (`FitReport`)

pub mod types;

pub use types::*;

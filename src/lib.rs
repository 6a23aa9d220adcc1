//! `kinetic-fit` library crate.
//!
//! Estimates `log10(A)`, `Ea`, `ΔH` and `ΔS` of a reversible first-order
//! reaction A ⇌ B from batch concentration series measured at several
//! temperatures.
//!
//! The binary (`kfit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the numerical core (`models`, `fit`, `math`) has no I/O and can be reused

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;

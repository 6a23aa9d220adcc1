//! Reversible first-order reaction model.
//!
//! The model is implemented as small, pure functions so that residual and
//! solver code can stay generic.

pub mod model;

pub use model::*;

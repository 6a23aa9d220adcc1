//! Data sources that do not come from a file: seeded synthetic experiments.

pub mod sample;

pub use sample::*;

//! Input/output helpers.
//!
//! - CSV ingest + grouping (`ingest`)
//! - residual/curve/experiment CSV exports (`export`)
//! - fit report JSON read/write (`report`)

pub mod export;
pub mod ingest;
pub mod report;

pub use export::*;
pub use ingest::*;
pub use report::*;

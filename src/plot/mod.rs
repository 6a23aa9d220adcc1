//! Terminal plotting: series assembly (`series`) and the ASCII renderer (`ascii`).

pub mod ascii;
pub mod series;

pub use ascii::*;
pub use series::*;

//! Core data models.

mod match_result;
mod stats;

pub use match_result::*;
pub use stats::*;

//! Accelerator backend interface for GemmRoute.

pub mod planner;
pub mod runtime;
pub mod simulated;

pub use planner::*;
pub use runtime::*;
pub use simulated::*;

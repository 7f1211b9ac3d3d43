//! Host backend for GemmRoute.

pub mod planner;
pub mod runtime;

pub use planner::*;
pub use runtime::*;

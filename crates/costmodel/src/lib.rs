//! Cost-model store for the predictive (PM1) offload policy.

pub mod model;
pub mod params;

pub use model::*;
pub use params::*;

//! Matrix descriptors and reference GEMM primitives for GemmRoute.

pub mod buffer;
pub mod config;
pub mod matmul;
pub mod matrix;
pub mod utils;

pub use buffer::*;
pub use config::*;
pub use matmul::*;
pub use matrix::*;
pub use utils::*;

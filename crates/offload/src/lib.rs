//! GemmRoute offload facade: configuration, placement decisions and
//! accelerator execution for GEMM calls.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod decision;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod session;
pub mod settings;

#[cfg(feature = "cli")]
pub use cli::*;
pub use config::*;
pub use decision::*;
pub use error::*;
pub use executor::*;
pub use lifecycle::*;
pub use session::*;
pub use settings::*;

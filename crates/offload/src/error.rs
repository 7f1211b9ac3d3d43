//! Error types for offload initialization and execution.

use gemmroute_backend_gpu::planner::{Operand, PlanError};
use gemmroute_backend_gpu::runtime::DeviceError;
use gemmroute_costmodel::CostModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("PM1 parameters unavailable")]
    ParamsUnavailable(#[source] CostModelError),
    #[error("runtime configuration already holds an offload configuration")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("device allocation for operand {operand} failed")]
    Allocation {
        operand: Operand,
        #[source]
        source: DeviceError,
    },
    #[error("transfer of operand {operand} failed")]
    Transfer {
        operand: Operand,
        #[source]
        source: DeviceError,
    },
    #[error("device gemm failed")]
    Compute(#[source] DeviceError),
    #[error("releasing device buffer of operand {operand} failed")]
    Release {
        operand: Operand,
        #[source]
        source: DeviceError,
    },
    #[error("offload configuration has no compute context")]
    NoContext,
    #[error("gemm cannot be expressed on the device")]
    Unsupported(#[from] PlanError),
}

impl ExecutionError {
    /// Short failure class for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Allocation { .. } => "allocation",
            ExecutionError::Transfer { .. } => "transfer",
            ExecutionError::Compute(_) => "compute",
            ExecutionError::Release { .. } => "release",
            ExecutionError::NoContext => "no-context",
            ExecutionError::Unsupported(_) => "unsupported",
        }
    }
}

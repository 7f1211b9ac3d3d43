//! Host runtime entrypoints.

use crate::planner::{CpuGemmPlan, CpuPlanner};
use anyhow::{Context, Result};
use gemmroute_kernels::config::{GemmShape, Scalar};
use gemmroute_kernels::matmul::{reference_gemm, StridedOperand, StridedOutput};
use gemmroute_kernels::matrix::Matrix;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostExecution {
    pub shape: GemmShape,
    pub time_ms: f64,
}

#[derive(Debug, Default)]
pub struct HostExecutor {
    planner: CpuPlanner,
}

impl HostExecutor {
    pub fn new(planner: CpuPlanner) -> Self {
        Self { planner }
    }

    /// `C <- alpha * op(A) * op(B) + beta * C` on host memory.
    pub fn execute_gemm(
        &self,
        alpha: Scalar,
        a: &Matrix,
        b: &Matrix,
        beta: Scalar,
        c: &mut Matrix,
    ) -> Result<HostExecution> {
        let plan = self.planner.plan_gemm(a, b, c)?;
        self.dispatch_gemm(plan, alpha, a, b, beta, c)
    }

    fn dispatch_gemm(
        &self,
        plan: CpuGemmPlan,
        alpha: Scalar,
        a: &Matrix,
        b: &Matrix,
        beta: Scalar,
        c: &mut Matrix,
    ) -> Result<HostExecution> {
        debug!(
            m = plan.shape.m,
            n = plan.shape.n,
            k = plan.shape.k,
            dtype = ?plan.output_type,
            parallel = plan.parallel_columns,
            "executing host gemm"
        );
        let start = Instant::now();
        let a_view = StridedOperand::from_matrix(a, "A")?;
        let b_view = StridedOperand::from_matrix(b, "B")?;
        let c_view = StridedOutput::from_matrix(c)?;
        reference_gemm(alpha, &a_view, &b_view, beta, c_view)
            .with_context(|| format!("host gemm {}x{}x{}", plan.shape.m, plan.shape.n, plan.shape.k))?;

        Ok(HostExecution {
            shape: plan.shape,
            time_ms: start.elapsed().as_secs_f64() * 1e3,
        })
    }
}

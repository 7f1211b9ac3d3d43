//! Planning logic for host execution.

use anyhow::{bail, Result};
use gemmroute_kernels::buffer::Residency;
use gemmroute_kernels::config::{DataType, GemmShape};
use gemmroute_kernels::matrix::{gemm_shape, Matrix};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuGemmPlan {
    pub shape: GemmShape,
    pub output_type: DataType,
    /// Output columns are contiguous enough to be updated in parallel.
    pub parallel_columns: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuPlanner;

impl CpuPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn plan_gemm(&self, a: &Matrix, b: &Matrix, c: &Matrix) -> Result<CpuGemmPlan> {
        for (name, matrix) in [("A", a), ("B", b), ("C", c)] {
            if matrix.residency() != Residency::Host {
                bail!("operand {name} is device resident; the host path needs host storage");
            }
            if matrix.dtype().is_integer() {
                bail!("operand {name} has integer datatype; only s/d/c/z gemm runs on the host");
            }
            matrix.validate_extent()?;
        }

        let shape = gemm_shape(a, c);
        Ok(CpuGemmPlan {
            shape,
            output_type: c.dtype(),
            parallel_columns: c.row_stride() == 1 && c.col_stride() >= shape.m,
        })
    }
}

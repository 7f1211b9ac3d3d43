//! Device-side attributes of an offloaded GEMM.

use crate::runtime::{DeviceDatatype, Operation};
use gemmroute_kernels::config::{DataType, GemmShape};
use gemmroute_kernels::matrix::{gemm_shape, Matrix};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    A,
    B,
    C,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operand::A => "A",
            Operand::B => "B",
            Operand::C => "C",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("operand {operand} has datatype {dtype:?} which the device gemm cannot express")]
    UnsupportedDatatype { operand: Operand, dtype: DataType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuGemmPlan {
    pub shape: GemmShape,
    pub trans_a: Operation,
    pub trans_b: Operation,
    pub a_type: DeviceDatatype,
    pub b_type: DeviceDatatype,
    pub c_type: DeviceDatatype,
    pub compute_type: DeviceDatatype,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GpuPlanner;

impl GpuPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn plan_gemm(&self, a: &Matrix, b: &Matrix, c: &Matrix) -> Result<GpuGemmPlan, PlanError> {
        let a_type = device_type(Operand::A, a)?;
        let b_type = device_type(Operand::B, b)?;
        let c_type = device_type(Operand::C, c)?;

        Ok(GpuGemmPlan {
            shape: gemm_shape(a, c),
            trans_a: operation(a),
            trans_b: operation(b),
            a_type,
            b_type,
            c_type,
            compute_type: compute_type(a.dtype(), b.dtype(), c.dtype()),
            lda: a.leading_dim(),
            ldb: b.leading_dim(),
            ldc: c.leading_dim(),
        })
    }
}

fn device_type(operand: Operand, matrix: &Matrix) -> Result<DeviceDatatype, PlanError> {
    DeviceDatatype::from_data_type(matrix.dtype()).ok_or(PlanError::UnsupportedDatatype {
        operand,
        dtype: matrix.dtype(),
    })
}

/// A conjugated complex operand is always read conjugate-transposed.
fn operation(matrix: &Matrix) -> Operation {
    if matrix.dtype().is_complex() && matrix.is_conjugated() {
        Operation::ConjugateTranspose
    } else if matrix.is_transposed() {
        Operation::Transpose
    } else {
        Operation::None
    }
}

/// Single precision only when every operand is single precision of the same
/// kind; anything mixed widens to double.
fn compute_type(a: DataType, b: DataType, c: DataType) -> DeviceDatatype {
    let any_complex = a.is_complex() || b.is_complex() || c.is_complex();
    if !any_complex {
        if a == DataType::Float32 && b == DataType::Float32 && c == DataType::Float32 {
            DeviceDatatype::F32R
        } else {
            DeviceDatatype::F64R
        }
    } else if a == DataType::Complex32 && b == DataType::Complex32 && c == DataType::Complex32 {
        DeviceDatatype::F32C
    } else {
        DeviceDatatype::F64C
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemmroute_kernels::buffer::ElementBuffer;

    fn host(dtype: DataType, rows: usize, cols: usize) -> Matrix {
        Matrix::from_host(rows, cols, ElementBuffer::zeros(dtype, rows * cols)).unwrap()
    }

    #[test]
    fn all_single_real_computes_in_single() {
        let a = host(DataType::Float32, 4, 3);
        let b = host(DataType::Float32, 3, 2);
        let c = host(DataType::Float32, 4, 2);
        let plan = GpuPlanner::new().plan_gemm(&a, &b, &c).unwrap();
        assert_eq!(plan.compute_type, DeviceDatatype::F32R);
        assert_eq!(plan.shape, GemmShape::new(4, 2, 3));
        assert_eq!((plan.lda, plan.ldb, plan.ldc), (4, 3, 4));
        assert_eq!(plan.trans_a, Operation::None);
    }

    #[test]
    fn mixed_precision_widens() {
        let a = host(DataType::Float32, 4, 3);
        let b = host(DataType::Float64, 3, 2);
        let c = host(DataType::Float32, 4, 2);
        let plan = GpuPlanner::new().plan_gemm(&a, &b, &c).unwrap();
        assert_eq!(plan.compute_type, DeviceDatatype::F64R);
        assert_eq!(plan.b_type, DeviceDatatype::F64R);

        let a = host(DataType::Complex32, 4, 3);
        let b = host(DataType::Complex32, 3, 2);
        let c = host(DataType::Complex64, 4, 2);
        let plan = GpuPlanner::new().plan_gemm(&a, &b, &c).unwrap();
        assert_eq!(plan.compute_type, DeviceDatatype::F64C);
    }

    #[test]
    fn conjugated_complex_is_promoted() {
        let a = host(DataType::Complex64, 3, 4)
            .with_transpose(true)
            .with_conjugate(true);
        let b = host(DataType::Complex64, 3, 2).with_conjugate(false);
        let c = host(DataType::Complex64, 4, 2);
        let plan = GpuPlanner::new().plan_gemm(&a, &b, &c).unwrap();
        assert_eq!(plan.trans_a, Operation::ConjugateTranspose);
        assert_eq!(plan.trans_b, Operation::None);
        assert_eq!(plan.compute_type, DeviceDatatype::F64C);

        // Conjugation means nothing for real data.
        let real = host(DataType::Float64, 3, 4)
            .with_transpose(true)
            .with_conjugate(true);
        assert_eq!(operation(&real), Operation::Transpose);
    }

    #[test]
    fn integer_operand_cannot_be_planned() {
        let a = host(DataType::Int32, 2, 2);
        let b = host(DataType::Float32, 2, 2);
        let c = host(DataType::Float32, 2, 2);
        let err = GpuPlanner::new().plan_gemm(&a, &b, &c).unwrap_err();
        assert_eq!(
            err,
            PlanError::UnsupportedDatatype {
                operand: Operand::A,
                dtype: DataType::Int32
            }
        );
    }
}

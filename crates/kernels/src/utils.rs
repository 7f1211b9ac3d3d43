//! Shared helpers for kernel implementations.

use crate::config::GemmShape;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    #[error("buffer holds {actual} elements but the layout needs {needed}")]
    BufferTooSmall { needed: usize, actual: usize },
    #[error("{len} bytes is not a whole number of {element_size}-byte elements")]
    ByteLength { len: usize, element_size: usize },
    #[error(
        "gemm dimension mismatch: op(A) is {a_rows}x{a_cols}, op(B) is {b_rows}x{b_cols}, C is {c_rows}x{c_cols}"
    )]
    DimensionMismatch {
        a_rows: usize,
        a_cols: usize,
        b_rows: usize,
        b_cols: usize,
        c_rows: usize,
        c_cols: usize,
    },
    #[error("integer gemm is not supported by the reference kernel")]
    IntegerUnsupported,
    #[error("operand {0} is not host resident")]
    NotHostResident(&'static str),
}

/// Check that `op(A)` is m x k, `op(B)` is k x n and C is m x n.
pub fn validate_gemm_dims(
    shape: GemmShape,
    a_dims: (usize, usize),
    b_dims: (usize, usize),
    c_dims: (usize, usize),
) -> Result<(), KernelError> {
    let (a_rows, a_cols) = a_dims;
    let (b_rows, b_cols) = b_dims;
    let (c_rows, c_cols) = c_dims;
    if a_rows != shape.m
        || a_cols != shape.k
        || b_rows != shape.k
        || b_cols != shape.n
        || c_rows != shape.m
        || c_cols != shape.n
    {
        return Err(KernelError::DimensionMismatch {
            a_rows,
            a_cols,
            b_rows,
            b_cols,
            c_rows,
            c_cols,
        });
    }
    Ok(())
}

/// Elements reached by a strided `rows x cols` layout.
pub fn strided_extent(rows: usize, cols: usize, row_stride: usize, col_stride: usize) -> usize {
    if rows == 0 || cols == 0 {
        return 0;
    }
    (rows - 1) * row_stride + (cols - 1) * col_stride + 1
}

//! Strided reference GEMM: `C <- alpha * op(A) * op(B) + beta * C`.
//!
//! Every element is widened to double complex for accumulation and narrowed
//! to C's type on store, so one code path serves s/d/c/z and mixed-precision
//! operands. This is the host compute primitive and also what the simulated
//! accelerator runs; it is a correctness reference, not a tuned kernel.

use crate::buffer::ElementBuffer;
use crate::config::{GemmShape, Scalar};
use crate::matrix::Matrix;
use crate::utils::{strided_extent, validate_gemm_dims, KernelError};
use num_complex::{Complex32, Complex64};
use rayon::prelude::*;

/// Read-only operand view over host elements.
#[derive(Debug, Clone, Copy)]
pub struct StridedOperand<'a> {
    pub data: &'a ElementBuffer,
    pub length: usize,
    pub width: usize,
    pub row_stride: usize,
    pub col_stride: usize,
    pub transposed: bool,
    pub conjugated: bool,
}

impl<'a> StridedOperand<'a> {
    pub fn from_matrix(matrix: &'a Matrix, name: &'static str) -> Result<Self, KernelError> {
        let data = matrix
            .host_data()
            .ok_or(KernelError::NotHostResident(name))?;
        Ok(Self {
            data,
            length: matrix.length(),
            width: matrix.width(),
            row_stride: matrix.row_stride(),
            col_stride: matrix.col_stride(),
            transposed: matrix.is_transposed(),
            conjugated: matrix.is_conjugated(),
        })
    }

    /// Dimensions after applying the transpose mark.
    pub fn op_dims(&self) -> (usize, usize) {
        if self.transposed {
            (self.width, self.length)
        } else {
            (self.length, self.width)
        }
    }

    fn at(&self, row: usize, col: usize) -> Complex64 {
        let (r, c) = if self.transposed { (col, row) } else { (row, col) };
        let value = self.data.get(r * self.row_stride + c * self.col_stride);
        if self.conjugated {
            value.conj()
        } else {
            value
        }
    }

    fn validate_extent(&self) -> Result<(), KernelError> {
        let needed = strided_extent(self.length, self.width, self.row_stride, self.col_stride);
        if self.data.len() < needed {
            return Err(KernelError::BufferTooSmall {
                needed,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

/// Mutable view over the result matrix.
#[derive(Debug)]
pub struct StridedOutput<'a> {
    pub data: &'a mut ElementBuffer,
    pub length: usize,
    pub width: usize,
    pub row_stride: usize,
    pub col_stride: usize,
}

impl<'a> StridedOutput<'a> {
    pub fn from_matrix(matrix: &'a mut Matrix) -> Result<Self, KernelError> {
        let length = matrix.length();
        let width = matrix.width();
        let row_stride = matrix.row_stride();
        let col_stride = matrix.col_stride();
        let data = matrix
            .host_data_mut()
            .ok_or(KernelError::NotHostResident("C"))?;
        Ok(Self {
            data,
            length,
            width,
            row_stride,
            col_stride,
        })
    }
}

trait Element: Copy + Send + Sync {
    fn widen(self) -> Complex64;
    fn narrow(value: Complex64) -> Self;
}

impl Element for f32 {
    fn widen(self) -> Complex64 {
        Complex64::new(self as f64, 0.0)
    }

    fn narrow(value: Complex64) -> Self {
        value.re as f32
    }
}

impl Element for f64 {
    fn widen(self) -> Complex64 {
        Complex64::new(self, 0.0)
    }

    fn narrow(value: Complex64) -> Self {
        value.re
    }
}

impl Element for Complex32 {
    fn widen(self) -> Complex64 {
        Complex64::new(self.re as f64, self.im as f64)
    }

    fn narrow(value: Complex64) -> Self {
        Complex32::new(value.re as f32, value.im as f32)
    }
}

impl Element for Complex64 {
    fn widen(self) -> Complex64 {
        self
    }

    fn narrow(value: Complex64) -> Self {
        value
    }
}

/// Run the reference GEMM. With `beta == 0` the old contents of C are never
/// read, so uninitialized or poisoned C buffers are fine.
pub fn reference_gemm(
    alpha: Scalar,
    a: &StridedOperand<'_>,
    b: &StridedOperand<'_>,
    beta: Scalar,
    c: StridedOutput<'_>,
) -> Result<(), KernelError> {
    if a.data.data_type().is_integer()
        || b.data.data_type().is_integer()
        || c.data.data_type().is_integer()
    {
        return Err(KernelError::IntegerUnsupported);
    }

    let (a_rows, a_cols) = a.op_dims();
    let shape = GemmShape::new(c.length, c.width, a_cols);
    validate_gemm_dims(shape, (a_rows, a_cols), b.op_dims(), (c.length, c.width))?;
    a.validate_extent()?;
    b.validate_extent()?;
    let needed = strided_extent(c.length, c.width, c.row_stride, c.col_stride);
    if c.data.len() < needed {
        return Err(KernelError::BufferTooSmall {
            needed,
            actual: c.data.len(),
        });
    }

    let alpha = alpha.to_complex();
    let beta = if beta.is_zero() {
        None
    } else {
        Some(beta.to_complex())
    };
    let layout = OutputLayout {
        shape,
        row_stride: c.row_stride,
        col_stride: c.col_stride,
    };

    match c.data {
        ElementBuffer::F32(values) => update_output(values, layout, alpha, beta, a, b),
        ElementBuffer::F64(values) => update_output(values, layout, alpha, beta, a, b),
        ElementBuffer::C32(values) => update_output(values, layout, alpha, beta, a, b),
        ElementBuffer::C64(values) => update_output(values, layout, alpha, beta, a, b),
        ElementBuffer::I32(_) => return Err(KernelError::IntegerUnsupported),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct OutputLayout {
    shape: GemmShape,
    row_stride: usize,
    col_stride: usize,
}

fn update_output<T: Element>(
    values: &mut [T],
    layout: OutputLayout,
    alpha: Complex64,
    beta: Option<Complex64>,
    a: &StridedOperand<'_>,
    b: &StridedOperand<'_>,
) {
    let GemmShape { m, n, k } = layout.shape;
    if m == 0 || n == 0 {
        return;
    }

    let compute = |row: usize, col: usize, old: T| -> T {
        let mut acc = Complex64::new(0.0, 0.0);
        for p in 0..k {
            acc += a.at(row, p) * b.at(p, col);
        }
        let mut result = alpha * acc;
        if let Some(beta) = beta {
            result += beta * old.widen();
        }
        T::narrow(result)
    };

    if layout.row_stride == 1 && layout.col_stride >= m {
        values
            .par_chunks_mut(layout.col_stride)
            .take(n)
            .enumerate()
            .for_each(|(col, column)| {
                for (row, value) in column.iter_mut().take(m).enumerate() {
                    *value = compute(row, col, *value);
                }
            });
    } else {
        for col in 0..n {
            for row in 0..m {
                let idx = row * layout.row_stride + col * layout.col_stride;
                values[idx] = compute(row, col, values[idx]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataType;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn column_major(array: &Array2<f64>) -> ElementBuffer {
        let (rows, cols) = array.dim();
        ElementBuffer::from_fn(DataType::Float64, rows * cols, |idx| {
            Complex64::new(array[(idx % rows, idx / rows)], 0.0)
        })
    }

    #[test]
    fn real_gemm_matches_ndarray() {
        let (m, n, k) = (7, 5, 9);
        let lhs = Array2::from_shape_fn((m, k), |(i, j)| (i + 2 * j) as f64 * 0.1);
        let rhs = Array2::from_shape_fn((k, n), |(i, j)| (i * j + 1) as f64 * 0.05);
        let reference = lhs.dot(&rhs);

        let a = Matrix::from_host(m, k, column_major(&lhs)).unwrap();
        let b = Matrix::from_host(k, n, column_major(&rhs)).unwrap();
        let mut c = Matrix::from_host(m, n, ElementBuffer::zeros(DataType::Float64, m * n)).unwrap();

        let a_view = StridedOperand::from_matrix(&a, "A").unwrap();
        let b_view = StridedOperand::from_matrix(&b, "B").unwrap();
        reference_gemm(
            Scalar::ONE,
            &a_view,
            &b_view,
            Scalar::ZERO,
            StridedOutput::from_matrix(&mut c).unwrap(),
        )
        .expect("reference gemm");

        let out = c.host_data().unwrap();
        for j in 0..n {
            for i in 0..m {
                assert_abs_diff_eq!(out.get(i + j * m).re, reference[(i, j)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn transposed_operand_and_beta_accumulate() {
        // A stored 3x2, used as A^T (2x3); B is 3x2; C is 2x2 with ld 4.
        let a_data = ElementBuffer::F32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b_data = ElementBuffer::F32(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        let a = Matrix::from_host(3, 2, a_data).unwrap().with_transpose(true);
        let b = Matrix::from_host(3, 2, b_data).unwrap();
        let c_data = ElementBuffer::F32(vec![10.0, 20.0, -1.0, -1.0, 30.0, 40.0, -1.0, -1.0]);
        let mut c = Matrix::from_host_padded(2, 2, 4, c_data).unwrap();

        reference_gemm(
            Scalar::Real(2.0),
            &StridedOperand::from_matrix(&a, "A").unwrap(),
            &StridedOperand::from_matrix(&b, "B").unwrap(),
            Scalar::Real(1.0),
            StridedOutput::from_matrix(&mut c).unwrap(),
        )
        .unwrap();

        // A^T * B = [[1+3, 2], [4+6, 5]] = [[4, 2], [10, 5]]
        let out = c.host_data().unwrap();
        assert_eq!(
            out,
            &ElementBuffer::F32(vec![18.0, 40.0, -1.0, -1.0, 34.0, 50.0, -1.0, -1.0])
        );
    }

    #[test]
    fn zero_beta_ignores_poisoned_output() {
        let a = Matrix::from_host(2, 2, ElementBuffer::F64(vec![1.0, 0.0, 0.0, 1.0])).unwrap();
        let b = Matrix::from_host(2, 2, ElementBuffer::F64(vec![3.0, 4.0, 5.0, 6.0])).unwrap();
        let poisoned = ElementBuffer::filled(DataType::Float64, 4, Complex64::new(f64::NAN, 0.0));
        let mut c = Matrix::from_host(2, 2, poisoned).unwrap();

        reference_gemm(
            Scalar::ONE,
            &StridedOperand::from_matrix(&a, "A").unwrap(),
            &StridedOperand::from_matrix(&b, "B").unwrap(),
            Scalar::ZERO,
            StridedOutput::from_matrix(&mut c).unwrap(),
        )
        .unwrap();

        assert_eq!(c.host_data().unwrap(), &ElementBuffer::F64(vec![3.0, 4.0, 5.0, 6.0]));
    }

    #[test]
    fn conjugate_transpose_complex() {
        // A = [[i]] stored 1x1, conjugate-transposed gives -i; B = [[2]].
        let a = Matrix::from_host(1, 1, ElementBuffer::C64(vec![Complex64::new(0.0, 1.0)]))
            .unwrap()
            .with_transpose(true)
            .with_conjugate(true);
        let b = Matrix::from_host(1, 1, ElementBuffer::C64(vec![Complex64::new(2.0, 0.0)])).unwrap();
        let mut c = Matrix::from_host(1, 1, ElementBuffer::zeros(DataType::Complex64, 1)).unwrap();

        reference_gemm(
            Scalar::ONE,
            &StridedOperand::from_matrix(&a, "A").unwrap(),
            &StridedOperand::from_matrix(&b, "B").unwrap(),
            Scalar::ZERO,
            StridedOutput::from_matrix(&mut c).unwrap(),
        )
        .unwrap();

        assert_eq!(c.host_data().unwrap().get(0), Complex64::new(0.0, -2.0));
    }

    #[test]
    fn mismatched_inner_dimension_is_rejected() {
        let a = Matrix::from_host(2, 3, ElementBuffer::zeros(DataType::Float32, 6)).unwrap();
        let b = Matrix::from_host(2, 2, ElementBuffer::zeros(DataType::Float32, 4)).unwrap();
        let mut c = Matrix::from_host(2, 2, ElementBuffer::zeros(DataType::Float32, 4)).unwrap();

        let err = reference_gemm(
            Scalar::ONE,
            &StridedOperand::from_matrix(&a, "A").unwrap(),
            &StridedOperand::from_matrix(&b, "B").unwrap(),
            Scalar::ZERO,
            StridedOutput::from_matrix(&mut c).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::DimensionMismatch { .. }));
    }
}

//! Matrix descriptors as handed to the GEMM front end.

use crate::buffer::{DeviceBuffer, ElementBuffer, Residency, Storage};
use crate::config::{DataType, GemmShape};
use crate::utils::{strided_extent, KernelError};

/// A strided matrix plus its transpose/conjugate marks.
///
/// `length` and `width` describe the stored matrix; the transpose mark only
/// changes how a GEMM reads it. Column-major storage has `row_stride == 1`
/// and `col_stride` equal to the leading dimension.
#[derive(Debug)]
pub struct Matrix {
    dtype: DataType,
    length: usize,
    width: usize,
    row_stride: usize,
    col_stride: usize,
    transposed: bool,
    conjugated: bool,
    storage: Storage,
}

impl Matrix {
    /// Densely packed column-major matrix over existing storage.
    pub fn new(dtype: DataType, length: usize, width: usize, storage: Storage) -> Self {
        Self {
            dtype,
            length,
            width,
            row_stride: 1,
            col_stride: length.max(1),
            transposed: false,
            conjugated: false,
            storage,
        }
    }

    /// Densely packed column-major host matrix; `data` must hold exactly
    /// `length * width` elements.
    pub fn from_host(length: usize, width: usize, data: ElementBuffer) -> Result<Self, KernelError> {
        if data.len() != length * width {
            return Err(KernelError::BufferTooSmall {
                needed: length * width,
                actual: data.len(),
            });
        }
        Ok(Self::new(data.data_type(), length, width, Storage::Host(data)))
    }

    /// Column-major host matrix with an explicit leading dimension.
    pub fn from_host_padded(
        length: usize,
        width: usize,
        leading_dim: usize,
        data: ElementBuffer,
    ) -> Result<Self, KernelError> {
        let matrix = Self::new(data.data_type(), length, width, Storage::Host(data))
            .with_strides(1, leading_dim);
        matrix.validate_extent()?;
        Ok(matrix)
    }

    pub fn with_strides(mut self, row_stride: usize, col_stride: usize) -> Self {
        self.row_stride = row_stride;
        self.col_stride = col_stride;
        self
    }

    pub fn with_transpose(mut self, transposed: bool) -> Self {
        self.transposed = transposed;
        self
    }

    pub fn with_conjugate(mut self, conjugated: bool) -> Self {
        self.conjugated = conjugated;
        self
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn col_stride(&self) -> usize {
        self.col_stride
    }

    pub fn leading_dim(&self) -> usize {
        self.col_stride
    }

    pub fn is_transposed(&self) -> bool {
        self.transposed
    }

    pub fn is_conjugated(&self) -> bool {
        self.conjugated
    }

    pub fn element_size_bytes(&self) -> usize {
        self.dtype.element_size_bytes()
    }

    /// Inner dimension this matrix contributes when used as the left operand.
    pub fn contraction_dim(&self) -> usize {
        if self.transposed {
            self.length
        } else {
            self.width
        }
    }

    /// Bytes spanned by the buffer: `col_stride * width * element_size`.
    pub fn buffer_size_bytes(&self) -> usize {
        self.col_stride * self.width * self.element_size_bytes()
    }

    pub fn residency(&self) -> Residency {
        self.storage.residency()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn host_data(&self) -> Option<&ElementBuffer> {
        match &self.storage {
            Storage::Host(data) => Some(data),
            Storage::Device(_) => None,
        }
    }

    pub fn host_data_mut(&mut self) -> Option<&mut ElementBuffer> {
        match &mut self.storage {
            Storage::Host(data) => Some(data),
            Storage::Device(_) => None,
        }
    }

    pub fn device_buffer(&self) -> Option<&DeviceBuffer> {
        match &self.storage {
            Storage::Device(buffer) => Some(buffer),
            Storage::Host(_) => None,
        }
    }

    /// Number of elements the strides reach into the buffer.
    pub fn required_elements(&self) -> usize {
        strided_extent(self.length, self.width, self.row_stride, self.col_stride)
    }

    pub fn validate_extent(&self) -> Result<(), KernelError> {
        let needed = self.required_elements();
        let actual = match &self.storage {
            Storage::Host(data) => data.len(),
            Storage::Device(buffer) => buffer.len_bytes() / self.element_size_bytes(),
        };
        if actual < needed {
            return Err(KernelError::BufferTooSmall { needed, actual });
        }
        Ok(())
    }
}

/// `m`, `n` from C and the contraction dimension from A.
pub fn gemm_shape(a: &Matrix, c: &Matrix) -> GemmShape {
    GemmShape::new(c.length(), c.width(), a.contraction_dim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_matrix_reports_leading_dim_bytes() {
        let data = ElementBuffer::zeros(DataType::Float64, 6 * 3);
        let matrix = Matrix::from_host_padded(4, 3, 6, data).expect("padded matrix");
        assert_eq!(matrix.leading_dim(), 6);
        assert_eq!(matrix.buffer_size_bytes(), 6 * 3 * 8);
        assert_eq!(matrix.required_elements(), 3 + 2 * 6 + 1);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let data = ElementBuffer::zeros(DataType::Float32, 10);
        assert!(Matrix::from_host(4, 3, data).is_err());

        let data = ElementBuffer::zeros(DataType::Float32, 10);
        assert!(Matrix::from_host_padded(4, 3, 5, data).is_err());
    }

    #[test]
    fn contraction_dim_follows_transpose() {
        let a = Matrix::from_host(5, 7, ElementBuffer::zeros(DataType::Float32, 35)).unwrap();
        let c = Matrix::from_host(5, 2, ElementBuffer::zeros(DataType::Float32, 10)).unwrap();
        assert_eq!(gemm_shape(&a, &c), GemmShape::new(5, 2, 7));

        let at = Matrix::from_host(7, 5, ElementBuffer::zeros(DataType::Float32, 35))
            .unwrap()
            .with_transpose(true);
        assert_eq!(gemm_shape(&at, &c), GemmShape::new(5, 2, 7));
    }
}

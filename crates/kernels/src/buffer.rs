//! Typed element storage and ownership-aware buffer handles.

use crate::config::DataType;
use crate::utils::KernelError;
use num_complex::{Complex32, Complex64};
use serde::{Deserialize, Serialize};

/// Host-resident, typed matrix contents.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementBuffer {
    F32(Vec<f32>),
    F64(Vec<f64>),
    C32(Vec<Complex32>),
    C64(Vec<Complex64>),
    I32(Vec<i32>),
}

impl ElementBuffer {
    pub fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::Float32 => ElementBuffer::F32(vec![0.0; len]),
            DataType::Float64 => ElementBuffer::F64(vec![0.0; len]),
            DataType::Complex32 => ElementBuffer::C32(vec![Complex32::new(0.0, 0.0); len]),
            DataType::Complex64 => ElementBuffer::C64(vec![Complex64::new(0.0, 0.0); len]),
            DataType::Int32 => ElementBuffer::I32(vec![0; len]),
        }
    }

    /// Every element set to `value`, narrowed to `dtype`.
    pub fn filled(dtype: DataType, len: usize, value: Complex64) -> Self {
        let mut buffer = Self::zeros(dtype, len);
        for idx in 0..len {
            buffer.set(idx, value);
        }
        buffer
    }

    pub fn from_fn<F>(dtype: DataType, len: usize, mut f: F) -> Self
    where
        F: FnMut(usize) -> Complex64,
    {
        let mut buffer = Self::zeros(dtype, len);
        for idx in 0..len {
            buffer.set(idx, f(idx));
        }
        buffer
    }

    /// Reinterpret raw device bytes as elements of `dtype`.
    pub fn from_bytes(dtype: DataType, bytes: &[u8]) -> Result<Self, KernelError> {
        let elem = dtype.element_size_bytes();
        if bytes.len() % elem != 0 {
            return Err(KernelError::ByteLength {
                len: bytes.len(),
                element_size: elem,
            });
        }
        let mut buffer = Self::zeros(dtype, bytes.len() / elem);
        buffer.as_bytes_mut().copy_from_slice(bytes);
        Ok(buffer)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ElementBuffer::F32(_) => DataType::Float32,
            ElementBuffer::F64(_) => DataType::Float64,
            ElementBuffer::C32(_) => DataType::Complex32,
            ElementBuffer::C64(_) => DataType::Complex64,
            ElementBuffer::I32(_) => DataType::Int32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ElementBuffer::F32(v) => v.len(),
            ElementBuffer::F64(v) => v.len(),
            ElementBuffer::C32(v) => v.len(),
            ElementBuffer::C64(v) => v.len(),
            ElementBuffer::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ElementBuffer::F32(v) => bytemuck::cast_slice(v),
            ElementBuffer::F64(v) => bytemuck::cast_slice(v),
            ElementBuffer::C32(v) => bytemuck::cast_slice(v),
            ElementBuffer::C64(v) => bytemuck::cast_slice(v),
            ElementBuffer::I32(v) => bytemuck::cast_slice(v),
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            ElementBuffer::F32(v) => bytemuck::cast_slice_mut(v),
            ElementBuffer::F64(v) => bytemuck::cast_slice_mut(v),
            ElementBuffer::C32(v) => bytemuck::cast_slice_mut(v),
            ElementBuffer::C64(v) => bytemuck::cast_slice_mut(v),
            ElementBuffer::I32(v) => bytemuck::cast_slice_mut(v),
        }
    }

    /// Element `idx` widened to double complex.
    pub fn get(&self, idx: usize) -> Complex64 {
        match self {
            ElementBuffer::F32(v) => Complex64::new(v[idx] as f64, 0.0),
            ElementBuffer::F64(v) => Complex64::new(v[idx], 0.0),
            ElementBuffer::C32(v) => Complex64::new(v[idx].re as f64, v[idx].im as f64),
            ElementBuffer::C64(v) => v[idx],
            ElementBuffer::I32(v) => Complex64::new(v[idx] as f64, 0.0),
        }
    }

    /// Store `value` at `idx`; real buffers keep only the real part.
    pub fn set(&mut self, idx: usize, value: Complex64) {
        match self {
            ElementBuffer::F32(v) => v[idx] = value.re as f32,
            ElementBuffer::F64(v) => v[idx] = value.re,
            ElementBuffer::C32(v) => v[idx] = Complex32::new(value.re as f32, value.im as f32),
            ElementBuffer::C64(v) => v[idx] = value,
            ElementBuffer::I32(v) => v[idx] = value.re as i32,
        }
    }
}

/// Where a buffer currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Residency {
    Host,
    Device,
}

/// Opaque handle to accelerator memory. Only the accelerator that issued it
/// can interpret the id.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DeviceBuffer {
    id: u64,
    len_bytes: usize,
}

impl DeviceBuffer {
    pub fn new(id: u64, len_bytes: usize) -> Self {
        Self { id, len_bytes }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }
}

/// Backing memory of a matrix. The variant is the residency.
#[derive(Debug)]
pub enum Storage {
    Host(ElementBuffer),
    Device(DeviceBuffer),
}

impl Storage {
    pub fn residency(&self) -> Residency {
        match self {
            Storage::Host(_) => Residency::Host,
            Storage::Device(_) => Residency::Device,
        }
    }

    pub fn is_device_resident(&self) -> bool {
        self.residency() == Residency::Device
    }
}

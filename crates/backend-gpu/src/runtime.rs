//! Accelerator runtime abstractions.
//!
//! [`Accelerator`] is the seam between the offload orchestrator and a real
//! device runtime (a BLAS-style library handle plus its memory API). It is
//! modelled on the shape of such runtimes: explicit allocate/free,
//! blocking host<->device copies, an asynchronous `gemm_ex` on the context's
//! stream, and an explicit stream wait.

use gemmroute_kernels::buffer::DeviceBuffer;
use gemmroute_kernels::config::{DataType, Scalar};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Handle to a compute context created by an [`Accelerator`].
pub type ContextId = u64;

/// Status codes reported by [`DeviceError`].
pub mod status {
    pub const INVALID_VALUE: i32 = 1;
    pub const OUT_OF_MEMORY: i32 = 2;
    pub const NOT_INITIALIZED: i32 = 3;
    pub const INVALID_HANDLE: i32 = 400;
    pub const NOT_SUPPORTED: i32 = 801;
    pub const UNKNOWN: i32 = 999;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    CreateContext,
    DestroyContext,
    SetPointerMode,
    Allocate,
    Free,
    CopyToDevice,
    CopyToHost,
    Gemm,
    Synchronize,
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceOp::CreateContext => "create context",
            DeviceOp::DestroyContext => "destroy context",
            DeviceOp::SetPointerMode => "set pointer mode",
            DeviceOp::Allocate => "allocate",
            DeviceOp::Free => "free",
            DeviceOp::CopyToDevice => "copy to device",
            DeviceOp::CopyToHost => "copy to host",
            DeviceOp::Gemm => "gemm_ex",
            DeviceOp::Synchronize => "stream synchronize",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{op} failed with device status {status}")]
pub struct DeviceError {
    pub op: DeviceOp,
    pub status: i32,
}

impl DeviceError {
    pub fn new(op: DeviceOp, status: i32) -> Self {
        Self { op, status }
    }
}

/// Where `gemm_ex` reads alpha and beta from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerMode {
    Host,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    None,
    Transpose,
    ConjugateTranspose,
}

impl Operation {
    pub fn is_transposed(&self) -> bool {
        !matches!(self, Operation::None)
    }
}

/// Element type tags understood by the device GEMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceDatatype {
    F32R,
    F64R,
    F32C,
    F64C,
}

impl DeviceDatatype {
    pub fn from_data_type(dtype: DataType) -> Option<Self> {
        match dtype {
            DataType::Float32 => Some(DeviceDatatype::F32R),
            DataType::Float64 => Some(DeviceDatatype::F64R),
            DataType::Complex32 => Some(DeviceDatatype::F32C),
            DataType::Complex64 => Some(DeviceDatatype::F64C),
            DataType::Int32 => None,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            DeviceDatatype::F32R => DataType::Float32,
            DeviceDatatype::F64R => DataType::Float64,
            DeviceDatatype::F32C => DataType::Complex32,
            DeviceDatatype::F64C => DataType::Complex64,
        }
    }
}

/// Arguments of one extended-precision device GEMM. Scalars are passed by
/// value and therefore require [`PointerMode::Host`].
#[derive(Debug)]
pub struct GemmExArgs<'a> {
    pub trans_a: Operation,
    pub trans_b: Operation,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: Scalar,
    pub a: &'a DeviceBuffer,
    pub a_type: DeviceDatatype,
    pub lda: usize,
    pub b: &'a DeviceBuffer,
    pub b_type: DeviceDatatype,
    pub ldb: usize,
    pub beta: Scalar,
    pub c: &'a DeviceBuffer,
    pub c_type: DeviceDatatype,
    pub ldc: usize,
    pub compute_type: DeviceDatatype,
}

pub trait Accelerator: Send + Sync {
    fn name(&self) -> &str;
    fn create_context(&self) -> Result<ContextId, DeviceError>;
    fn destroy_context(&self, context: ContextId) -> Result<(), DeviceError>;
    fn set_pointer_mode(&self, context: ContextId, mode: PointerMode) -> Result<(), DeviceError>;
    fn allocate(&self, len_bytes: usize) -> Result<DeviceBuffer, DeviceError>;
    fn free(&self, buffer: &DeviceBuffer) -> Result<(), DeviceError>;
    /// Blocking copy; waits for prior work on the device.
    fn copy_to_device(&self, dst: &DeviceBuffer, src: &[u8]) -> Result<(), DeviceError>;
    /// Blocking copy; waits for prior work on the device.
    fn copy_to_host(&self, dst: &mut [u8], src: &DeviceBuffer) -> Result<(), DeviceError>;
    /// Enqueue a GEMM on the context's stream.
    fn gemm_ex(&self, context: ContextId, args: &GemmExArgs<'_>) -> Result<(), DeviceError>;
    /// Wait for all work enqueued on the context's stream.
    fn synchronize(&self, context: ContextId) -> Result<(), DeviceError>;
}

pub type DynAccelerator = Arc<dyn Accelerator>;

/// Owner of one accelerator compute context. The context is destroyed
/// exactly once: by [`ComputeContext::destroy`], or on drop otherwise.
pub struct ComputeContext {
    accelerator: DynAccelerator,
    id: ContextId,
    live: bool,
}

impl ComputeContext {
    pub fn create(accelerator: DynAccelerator) -> Result<Self, DeviceError> {
        let id = accelerator.create_context()?;
        debug!(accelerator = accelerator.name(), context = id, "created compute context");
        Ok(Self {
            accelerator,
            id,
            live: true,
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn accelerator(&self) -> &dyn Accelerator {
        self.accelerator.as_ref()
    }

    pub fn set_pointer_mode(&self, mode: PointerMode) -> Result<(), DeviceError> {
        self.accelerator.set_pointer_mode(self.id, mode)
    }

    pub fn gemm_ex(&self, args: &GemmExArgs<'_>) -> Result<(), DeviceError> {
        self.accelerator.gemm_ex(self.id, args)
    }

    pub fn synchronize(&self) -> Result<(), DeviceError> {
        self.accelerator.synchronize(self.id)
    }

    pub fn destroy(mut self) -> Result<(), DeviceError> {
        self.live = false;
        self.accelerator.destroy_context(self.id)
    }
}

impl fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeContext")
            .field("accelerator", &self.accelerator.name())
            .field("id", &self.id)
            .field("live", &self.live)
            .finish()
    }
}

impl Drop for ComputeContext {
    fn drop(&mut self) {
        if self.live {
            self.live = false;
            if let Err(err) = self.accelerator.destroy_context(self.id) {
                warn!(context = self.id, error = %err, "failed to destroy compute context on drop");
            }
        }
    }
}

//! Offloaded execution of a GEMM on the configured accelerator.
//!
//! Host-resident operands are staged into scratch device buffers, the
//! device GEMM runs on the configuration's compute context, and C is copied
//! back when it was staged. Device-resident operands are used in place.
//! Scratch buffers are released on every path, including early returns.

use crate::config::OffloadConfig;
use crate::error::ExecutionError;
use gemmroute_backend_gpu::planner::{GpuPlanner, Operand};
use gemmroute_backend_gpu::runtime::{Accelerator, ComputeContext, GemmExArgs};
use gemmroute_kernels::buffer::{DeviceBuffer, ElementBuffer, Storage};
use gemmroute_kernels::config::Scalar;
use gemmroute_kernels::matrix::Matrix;
use tracing::{debug, error, warn};

/// Device buffer owned by one execution call. Freed on drop unless it was
/// released explicitly.
pub struct ScratchBuffer<'d> {
    device: &'d dyn Accelerator,
    operand: Operand,
    buffer: DeviceBuffer,
    live: bool,
}

impl<'d> ScratchBuffer<'d> {
    pub fn allocate(
        device: &'d dyn Accelerator,
        operand: Operand,
        len_bytes: usize,
    ) -> Result<Self, ExecutionError> {
        let buffer = device
            .allocate(len_bytes)
            .map_err(|source| ExecutionError::Allocation { operand, source })?;
        Ok(Self {
            device,
            operand,
            buffer,
            live: true,
        })
    }

    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    pub fn release(mut self) -> Result<(), ExecutionError> {
        self.live = false;
        self.device
            .free(&self.buffer)
            .map_err(|source| ExecutionError::Release {
                operand: self.operand,
                source,
            })
    }
}

impl Drop for ScratchBuffer<'_> {
    fn drop(&mut self) {
        if self.live {
            self.live = false;
            if let Err(err) = self.device.free(&self.buffer) {
                warn!(operand = %self.operand, error = %err, "failed to free scratch buffer");
            }
        }
    }
}

/// Where the device sees an operand.
enum Staged<'m, 'd> {
    Resident(&'m DeviceBuffer),
    Scratch(ScratchBuffer<'d>),
}

impl Staged<'_, '_> {
    fn buffer(&self) -> &DeviceBuffer {
        match self {
            Staged::Resident(buffer) => *buffer,
            Staged::Scratch(scratch) => scratch.buffer(),
        }
    }
}

/// Run `C <- alpha * op(A) * op(B) + beta * C` on the accelerator.
///
/// Callers are expected to have asked [`crate::decision::should_offload`]
/// first. The call holds the configuration's context lock for its whole
/// duration.
pub fn execute_offloaded(
    config: &OffloadConfig,
    alpha: Scalar,
    a: &Matrix,
    b: &Matrix,
    beta: Scalar,
    c: &mut Matrix,
) -> Result<(), ExecutionError> {
    let guard = config.lock_context();
    let context = guard.as_ref().ok_or(ExecutionError::NoContext)?;
    let result = run(context, alpha, a, b, beta, c);
    if let Err(err) = &result {
        error!(kind = err.kind(), error = %err, "offloaded gemm failed");
    }
    result
}

fn run(
    context: &ComputeContext,
    alpha: Scalar,
    a: &Matrix,
    b: &Matrix,
    beta: Scalar,
    c: &mut Matrix,
) -> Result<(), ExecutionError> {
    let plan = GpuPlanner::new().plan_gemm(a, b, c)?;
    let device = context.accelerator();

    let a_staged = stage(device, Operand::A, a, true)?;
    let b_staged = stage(device, Operand::B, b, true)?;
    // Packed C is fully overwritten when beta is zero.
    let upload_c = !(beta.is_zero() && c.leading_dim() == c.length());
    let c_staged = stage(device, Operand::C, c, upload_c)?;

    debug!(
        m = plan.shape.m,
        n = plan.shape.n,
        k = plan.shape.k,
        dtype = ?c.dtype(),
        compute_type = ?plan.compute_type,
        stage_a = matches!(a_staged, Staged::Scratch(_)),
        stage_b = matches!(b_staged, Staged::Scratch(_)),
        stage_c = matches!(c_staged, Staged::Scratch(_)),
        upload_c,
        "launching offloaded gemm"
    );

    let args = GemmExArgs {
        trans_a: plan.trans_a,
        trans_b: plan.trans_b,
        m: plan.shape.m,
        n: plan.shape.n,
        k: plan.shape.k,
        alpha,
        a: a_staged.buffer(),
        a_type: plan.a_type,
        lda: plan.lda,
        b: b_staged.buffer(),
        b_type: plan.b_type,
        ldb: plan.ldb,
        beta,
        c: c_staged.buffer(),
        c_type: plan.c_type,
        ldc: plan.ldc,
        compute_type: plan.compute_type,
    };
    context.gemm_ex(&args).map_err(ExecutionError::Compute)?;

    release(a_staged)?;
    release(b_staged)?;

    match c_staged {
        Staged::Scratch(scratch) => {
            if let Some(data) = c.host_data_mut() {
                download(device, &scratch, data)?;
            }
            scratch.release()
        }
        Staged::Resident(_) => context.synchronize().map_err(ExecutionError::Compute),
    }
}

/// Stage a host-resident operand into a fresh device buffer spanning
/// `col_stride * width` elements, copying its contents when `upload` is set.
fn stage<'m, 'd>(
    device: &'d dyn Accelerator,
    operand: Operand,
    matrix: &'m Matrix,
    upload: bool,
) -> Result<Staged<'m, 'd>, ExecutionError> {
    let data = match matrix.storage() {
        Storage::Device(buffer) => return Ok(Staged::Resident(buffer)),
        Storage::Host(data) => data,
    };

    let scratch = ScratchBuffer::allocate(device, operand, matrix.buffer_size_bytes())?;
    if upload {
        let bytes = data.as_bytes();
        let len = bytes.len().min(scratch.buffer().len_bytes());
        device
            .copy_to_device(scratch.buffer(), &bytes[..len])
            .map_err(|source| ExecutionError::Transfer { operand, source })?;
    }
    Ok(Staged::Scratch(scratch))
}

fn release(staged: Staged<'_, '_>) -> Result<(), ExecutionError> {
    match staged {
        Staged::Scratch(scratch) => scratch.release(),
        Staged::Resident(_) => Ok(()),
    }
}

fn download(
    device: &dyn Accelerator,
    scratch: &ScratchBuffer<'_>,
    data: &mut ElementBuffer,
) -> Result<(), ExecutionError> {
    let bytes = data.as_bytes_mut();
    let len = bytes.len().min(scratch.buffer().len_bytes());
    device
        .copy_to_host(&mut bytes[..len], scratch.buffer())
        .map_err(|source| ExecutionError::Transfer {
            operand: Operand::C,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemmroute_backend_gpu::simulated::{FaultPlan, SimulatedAccelerator};

    #[test]
    fn scratch_buffer_is_freed_on_drop() {
        let device = SimulatedAccelerator::new();
        {
            let _scratch = ScratchBuffer::allocate(&device, Operand::A, 64).unwrap();
            assert_eq!(device.live_buffers(), 1);
        }
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn explicit_release_frees_once() {
        let device = SimulatedAccelerator::new();
        let scratch = ScratchBuffer::allocate(&device, Operand::B, 64).unwrap();
        scratch.release().unwrap();
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn release_failure_names_the_operand() {
        let device = SimulatedAccelerator::with_faults(FaultPlan {
            fail_free_at: Some(1),
            ..FaultPlan::default()
        });
        let scratch = ScratchBuffer::allocate(&device, Operand::C, 8).unwrap();
        let err = scratch.release().unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Release {
                operand: Operand::C,
                ..
            }
        ));
    }
}

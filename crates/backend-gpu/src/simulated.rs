//! Host-memory-backed accelerator.
//!
//! `SimulatedAccelerator` behaves like a discrete device from the
//! orchestrator's point of view: memory lives in its own arena and is only
//! reachable through copies, contexts must exist and use host pointer mode
//! before `gemm_ex` runs, and every call is recorded in an event log. A
//! [`FaultPlan`] makes any individual step fail with a device status, which
//! is how partial-failure paths get exercised without hardware.

use crate::runtime::{
    status, Accelerator, ContextId, DeviceDatatype, DeviceError, DeviceOp, GemmExArgs, Operation,
    PointerMode,
};
use gemmroute_kernels::buffer::{DeviceBuffer, ElementBuffer};
use gemmroute_kernels::config::DataType;
use gemmroute_kernels::matmul::{reference_gemm, StridedOperand, StridedOutput};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

/// Steps that should fail. Counters are 1-based over the accelerator's
/// lifetime, so `fail_allocation_at: Some(2)` fails the second allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub fail_create_context: bool,
    pub fail_set_pointer_mode: bool,
    pub fail_destroy_context: bool,
    pub fail_allocation_at: Option<usize>,
    pub fail_copy_to_device_at: Option<usize>,
    pub fail_copy_to_host: bool,
    pub fail_gemm: bool,
    pub fail_free_at: Option<usize>,
    pub fail_synchronize: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    ContextCreated(ContextId),
    ContextDestroyed(ContextId),
    PointerModeSet(ContextId, PointerMode),
    Allocated { buffer: u64, bytes: usize },
    Freed { buffer: u64 },
    CopyToDevice { buffer: u64, bytes: usize },
    CopyToHost { buffer: u64, bytes: usize },
    Gemm {
        m: usize,
        n: usize,
        k: usize,
        compute_type: DeviceDatatype,
    },
    Synchronized(ContextId),
}

#[derive(Debug, Default)]
struct SimState {
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    contexts: HashMap<ContextId, Option<PointerMode>>,
    events: Vec<DeviceEvent>,
    allocation_attempts: usize,
    copy_to_device_attempts: usize,
    free_attempts: usize,
    faults: FaultPlan,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn context(&self, op: DeviceOp, context: ContextId) -> Result<Option<PointerMode>, DeviceError> {
        self.contexts
            .get(&context)
            .copied()
            .ok_or(DeviceError::new(op, status::INVALID_HANDLE))
    }

    fn buffer(&self, op: DeviceOp, buffer: &DeviceBuffer) -> Result<&Vec<u8>, DeviceError> {
        self.buffers
            .get(&buffer.id())
            .ok_or(DeviceError::new(op, status::INVALID_HANDLE))
    }
}

#[derive(Debug, Default)]
pub struct SimulatedAccelerator {
    state: Mutex<SimState>,
}

impl SimulatedAccelerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: FaultPlan) -> Self {
        let accelerator = Self::new();
        accelerator.set_faults(faults);
        accelerator
    }

    pub fn set_faults(&self, faults: FaultPlan) {
        self.state.lock().faults = faults;
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    pub fn pointer_mode(&self, context: ContextId) -> Option<PointerMode> {
        self.state.lock().contexts.get(&context).copied().flatten()
    }

    pub fn gemm_calls(&self) -> usize {
        self.count(|event| matches!(event, DeviceEvent::Gemm { .. }))
    }

    pub fn copies_to_device(&self) -> Vec<(u64, usize)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                DeviceEvent::CopyToDevice { buffer, bytes } => Some((*buffer, *bytes)),
                _ => None,
            })
            .collect()
    }

    pub fn synchronizations(&self) -> usize {
        self.count(|event| matches!(event, DeviceEvent::Synchronized(_)))
    }

    fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&DeviceEvent) -> bool,
    {
        self.state.lock().events.iter().filter(|e| predicate(e)).count()
    }

    /// Allocate a device buffer holding `data`, for building device-resident
    /// operands.
    pub fn upload(&self, data: &ElementBuffer) -> Result<DeviceBuffer, DeviceError> {
        let buffer = self.allocate(data.as_bytes().len())?;
        self.copy_to_device(&buffer, data.as_bytes())?;
        Ok(buffer)
    }

    pub fn download(
        &self,
        buffer: &DeviceBuffer,
        dtype: DataType,
    ) -> Result<ElementBuffer, DeviceError> {
        let state = self.state.lock();
        let bytes = state.buffer(DeviceOp::CopyToHost, buffer)?;
        ElementBuffer::from_bytes(dtype, bytes)
            .map_err(|_| DeviceError::new(DeviceOp::CopyToHost, status::INVALID_VALUE))
    }
}

impl Accelerator for SimulatedAccelerator {
    fn name(&self) -> &str {
        "simulated"
    }

    fn create_context(&self) -> Result<ContextId, DeviceError> {
        let mut state = self.state.lock();
        if state.faults.fail_create_context {
            return Err(DeviceError::new(DeviceOp::CreateContext, status::NOT_INITIALIZED));
        }
        let id = state.next_id();
        state.contexts.insert(id, None);
        state.events.push(DeviceEvent::ContextCreated(id));
        Ok(id)
    }

    fn destroy_context(&self, context: ContextId) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.context(DeviceOp::DestroyContext, context)?;
        if state.faults.fail_destroy_context {
            return Err(DeviceError::new(DeviceOp::DestroyContext, status::UNKNOWN));
        }
        state.contexts.remove(&context);
        state.events.push(DeviceEvent::ContextDestroyed(context));
        Ok(())
    }

    fn set_pointer_mode(&self, context: ContextId, mode: PointerMode) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.context(DeviceOp::SetPointerMode, context)?;
        if state.faults.fail_set_pointer_mode {
            return Err(DeviceError::new(DeviceOp::SetPointerMode, status::INVALID_VALUE));
        }
        state.contexts.insert(context, Some(mode));
        state.events.push(DeviceEvent::PointerModeSet(context, mode));
        Ok(())
    }

    fn allocate(&self, len_bytes: usize) -> Result<DeviceBuffer, DeviceError> {
        let mut state = self.state.lock();
        state.allocation_attempts += 1;
        if state.faults.fail_allocation_at == Some(state.allocation_attempts) {
            return Err(DeviceError::new(DeviceOp::Allocate, status::OUT_OF_MEMORY));
        }
        let id = state.next_id();
        state.buffers.insert(id, vec![0u8; len_bytes]);
        state.events.push(DeviceEvent::Allocated {
            buffer: id,
            bytes: len_bytes,
        });
        trace!(buffer = id, bytes = len_bytes, "simulated allocation");
        Ok(DeviceBuffer::new(id, len_bytes))
    }

    fn free(&self, buffer: &DeviceBuffer) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.free_attempts += 1;
        if state.faults.fail_free_at == Some(state.free_attempts) {
            return Err(DeviceError::new(DeviceOp::Free, status::INVALID_VALUE));
        }
        state
            .buffers
            .remove(&buffer.id())
            .ok_or(DeviceError::new(DeviceOp::Free, status::INVALID_HANDLE))?;
        state.events.push(DeviceEvent::Freed {
            buffer: buffer.id(),
        });
        Ok(())
    }

    fn copy_to_device(&self, dst: &DeviceBuffer, src: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.copy_to_device_attempts += 1;
        if state.faults.fail_copy_to_device_at == Some(state.copy_to_device_attempts) {
            return Err(DeviceError::new(DeviceOp::CopyToDevice, status::UNKNOWN));
        }
        let target = state
            .buffers
            .get_mut(&dst.id())
            .ok_or(DeviceError::new(DeviceOp::CopyToDevice, status::INVALID_HANDLE))?;
        if src.len() > target.len() {
            return Err(DeviceError::new(DeviceOp::CopyToDevice, status::INVALID_VALUE));
        }
        target[..src.len()].copy_from_slice(src);
        state.events.push(DeviceEvent::CopyToDevice {
            buffer: dst.id(),
            bytes: src.len(),
        });
        Ok(())
    }

    fn copy_to_host(&self, dst: &mut [u8], src: &DeviceBuffer) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if state.faults.fail_copy_to_host {
            return Err(DeviceError::new(DeviceOp::CopyToHost, status::UNKNOWN));
        }
        let source = state.buffer(DeviceOp::CopyToHost, src)?;
        if dst.len() > source.len() {
            return Err(DeviceError::new(DeviceOp::CopyToHost, status::INVALID_VALUE));
        }
        dst.copy_from_slice(&source[..dst.len()]);
        state.events.push(DeviceEvent::CopyToHost {
            buffer: src.id(),
            bytes: dst.len(),
        });
        Ok(())
    }

    fn gemm_ex(&self, context: ContextId, args: &GemmExArgs<'_>) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let mode = state.context(DeviceOp::Gemm, context)?;
        if mode != Some(PointerMode::Host) {
            return Err(DeviceError::new(DeviceOp::Gemm, status::NOT_SUPPORTED));
        }
        if state.faults.fail_gemm {
            return Err(DeviceError::new(DeviceOp::Gemm, status::UNKNOWN));
        }

        let invalid = |_| DeviceError::new(DeviceOp::Gemm, status::INVALID_VALUE);
        let a_data = ElementBuffer::from_bytes(
            args.a_type.data_type(),
            state.buffer(DeviceOp::Gemm, args.a)?,
        )
        .map_err(invalid)?;
        let b_data = ElementBuffer::from_bytes(
            args.b_type.data_type(),
            state.buffer(DeviceOp::Gemm, args.b)?,
        )
        .map_err(invalid)?;
        let mut c_data = ElementBuffer::from_bytes(
            args.c_type.data_type(),
            state.buffer(DeviceOp::Gemm, args.c)?,
        )
        .map_err(invalid)?;

        let a = device_operand(&a_data, args.trans_a, (args.m, args.k), args.lda);
        let b = device_operand(&b_data, args.trans_b, (args.k, args.n), args.ldb);
        let c = StridedOutput {
            data: &mut c_data,
            length: args.m,
            width: args.n,
            row_stride: 1,
            col_stride: args.ldc,
        };
        reference_gemm(args.alpha, &a, &b, args.beta, c).map_err(invalid)?;

        let target = state
            .buffers
            .get_mut(&args.c.id())
            .ok_or(DeviceError::new(DeviceOp::Gemm, status::INVALID_HANDLE))?;
        let bytes = c_data.as_bytes();
        target[..bytes.len()].copy_from_slice(bytes);
        state.events.push(DeviceEvent::Gemm {
            m: args.m,
            n: args.n,
            k: args.k,
            compute_type: args.compute_type,
        });
        Ok(())
    }

    fn synchronize(&self, context: ContextId) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.context(DeviceOp::Synchronize, context)?;
        if state.faults.fail_synchronize {
            return Err(DeviceError::new(DeviceOp::Synchronize, status::UNKNOWN));
        }
        state.events.push(DeviceEvent::Synchronized(context));
        Ok(())
    }
}

/// Column-major operand whose op() has dimensions `op_dims`.
fn device_operand(
    data: &ElementBuffer,
    op: Operation,
    op_dims: (usize, usize),
    leading_dim: usize,
) -> StridedOperand<'_> {
    let (rows, cols) = op_dims;
    let (length, width) = if op.is_transposed() {
        (cols, rows)
    } else {
        (rows, cols)
    };
    StridedOperand {
        data,
        length,
        width,
        row_stride: 1,
        col_stride: leading_dim,
        transposed: op.is_transposed(),
        conjugated: op == Operation::ConjugateTranspose,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemmroute_kernels::config::Scalar;

    #[test]
    fn gemm_requires_host_pointer_mode() {
        let device = SimulatedAccelerator::new();
        let ctx = device.create_context().unwrap();
        let a = device.upload(&ElementBuffer::F64(vec![2.0])).unwrap();
        let b = device.upload(&ElementBuffer::F64(vec![3.0])).unwrap();
        let c = device.allocate(8).unwrap();
        let args = GemmExArgs {
            trans_a: Operation::None,
            trans_b: Operation::None,
            m: 1,
            n: 1,
            k: 1,
            alpha: Scalar::ONE,
            a: &a,
            a_type: DeviceDatatype::F64R,
            lda: 1,
            b: &b,
            b_type: DeviceDatatype::F64R,
            ldb: 1,
            beta: Scalar::ZERO,
            c: &c,
            c_type: DeviceDatatype::F64R,
            ldc: 1,
            compute_type: DeviceDatatype::F64R,
        };

        let err = device.gemm_ex(ctx, &args).unwrap_err();
        assert_eq!(err.status, status::NOT_SUPPORTED);

        device.set_pointer_mode(ctx, PointerMode::Host).unwrap();
        device.gemm_ex(ctx, &args).unwrap();
        assert_eq!(
            device.download(&c, DataType::Float64).unwrap(),
            ElementBuffer::F64(vec![6.0])
        );
        assert_eq!(device.gemm_calls(), 1);
    }

    #[test]
    fn nth_allocation_fails() {
        let device = SimulatedAccelerator::with_faults(FaultPlan {
            fail_allocation_at: Some(2),
            ..FaultPlan::default()
        });
        let first = device.allocate(16).unwrap();
        let err = device.allocate(16).unwrap_err();
        assert_eq!(err, DeviceError::new(DeviceOp::Allocate, status::OUT_OF_MEMORY));
        assert_eq!(device.live_buffers(), 1);
        device.free(&first).unwrap();
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn unknown_handles_are_rejected() {
        let device = SimulatedAccelerator::new();
        assert_eq!(
            device.free(&DeviceBuffer::new(42, 8)).unwrap_err().status,
            status::INVALID_HANDLE
        );
        assert_eq!(device.synchronize(7).unwrap_err().status, status::INVALID_HANDLE);
    }
}

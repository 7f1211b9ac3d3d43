//! Placement decisions: should this GEMM run on the accelerator?
//!
//! Decisions only read the configuration and the operand descriptors. Every
//! check that fails turns into "stay on the host"; configuration problems
//! found along the way are logged, never returned.

use crate::config::{OffloadConfig, Policy, Threshold};
use gemmroute_costmodel::CostModel;
use gemmroute_kernels::buffer::Residency;
use gemmroute_kernels::config::{GemmDtype, Scalar, ShapeClass};
use gemmroute_kernels::matrix::{gemm_shape, Matrix};
use serde::Serialize;
use tracing::{error, trace};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DecisionReason {
    DatatypeDisabled { dtype: GemmDtype },
    IntegerOperand,
    NonUnitRowStride,
    PolicyNever,
    PolicyAlways,
    ConjugateWithoutTranspose,
    Threshold { effort: u64, threshold: Threshold },
    Predicted { accelerator_cost: f64, host_cost: f64 },
    MissingCostModel,
    MissingCoefficients { dtype: GemmDtype, shape: ShapeClass },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    pub offload: bool,
    pub reason: DecisionReason,
}

impl Decision {
    fn host(reason: DecisionReason) -> Self {
        Self {
            offload: false,
            reason,
        }
    }
}

/// True when the GEMM described by the operands should run on the
/// accelerator.
pub fn should_offload(
    config: &OffloadConfig,
    alpha: Scalar,
    a: &Matrix,
    b: &Matrix,
    beta: Scalar,
    c: &Matrix,
) -> bool {
    decide(config, alpha, a, b, beta, c).offload
}

/// Like [`should_offload`], but also reports which rule decided.
pub fn decide(
    config: &OffloadConfig,
    _alpha: Scalar,
    a: &Matrix,
    b: &Matrix,
    _beta: Scalar,
    c: &Matrix,
) -> Decision {
    let dtype = match c.dtype().gemm_dtype() {
        Some(dtype) if config.is_disabled(dtype) => {
            return Decision::host(DecisionReason::DatatypeDisabled { dtype })
        }
        Some(dtype) => dtype,
        None => return Decision::host(DecisionReason::IntegerOperand),
    };
    let operands = [a, b, c];
    if operands.iter().any(|m| m.dtype().is_integer()) {
        return Decision::host(DecisionReason::IntegerOperand);
    }
    if operands.iter().any(|m| m.row_stride() != 1) {
        return Decision::host(DecisionReason::NonUnitRowStride);
    }

    let shape = gemm_shape(a, c);
    let decision = match config.policy() {
        Policy::Never => Decision::host(DecisionReason::PolicyNever),
        Policy::Always => Decision {
            offload: true,
            reason: DecisionReason::PolicyAlways,
        },
        Policy::Threshold => {
            if dtype.is_complex() && conjugate_without_transpose(a, b) {
                return Decision::host(DecisionReason::ConjugateWithoutTranspose);
            }
            let effort = shape.effort();
            let threshold = config.threshold(dtype);
            Decision {
                offload: threshold.is_met_by(effort),
                reason: DecisionReason::Threshold { effort, threshold },
            }
        }
        Policy::Predictive => {
            if dtype.is_complex() && conjugate_without_transpose(a, b) {
                return Decision::host(DecisionReason::ConjugateWithoutTranspose);
            }
            predict(config.cost_model(), dtype, shape.shape_class(), shape.effort(), &operands)
        }
    };
    trace!(
        m = shape.m,
        n = shape.n,
        k = shape.k,
        dtype = %dtype,
        offload = decision.offload,
        "placement decision"
    );
    decision
}

/// The device path cannot read a conjugated operand without transposing it.
fn conjugate_without_transpose(a: &Matrix, b: &Matrix) -> bool {
    [a, b]
        .iter()
        .any(|m| m.is_conjugated() && !m.is_transposed())
}

fn predict(
    model: Option<&CostModel>,
    dtype: GemmDtype,
    shape: ShapeClass,
    mnk: u64,
    operands: &[&Matrix; 3],
) -> Decision {
    let Some(model) = model else {
        error!("predictive policy active without a cost model");
        return Decision::host(DecisionReason::MissingCostModel);
    };
    let Some(coefficients) = model.coefficients(dtype, shape) else {
        error!(dtype = %dtype, shape = ?shape, "no PM1 coefficients for gemm");
        return Decision::host(DecisionReason::MissingCoefficients { dtype, shape });
    };

    let (mut to_accelerator, mut to_host) = (0.0, 0.0);
    if model.transfer_needed() {
        for matrix in operands {
            let cost = model.transfer_cost(matrix.buffer_size_bytes());
            match matrix.residency() {
                Residency::Device => to_host += cost,
                Residency::Host => to_accelerator += cost,
            }
        }
    }

    let accelerator_cost = to_accelerator + coefficients.device_cost(mnk);
    let host_cost = to_host + coefficients.host_cost(mnk);
    Decision {
        offload: accelerator_cost < host_cost,
        reason: DecisionReason::Predicted {
            accelerator_cost,
            host_cost,
        },
    }
}

//! Linear transfer and compute cost model used by the PM1 policy.

use crate::params::{read_params, Coefficients, CostModelError, Pm1Params};
use gemmroute_kernels::config::{GemmDtype, ShapeClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// `per_byte * bytes + offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferModel {
    pub per_byte: f64,
    pub offset: f64,
}

impl TransferModel {
    pub fn cost(&self, bytes: usize) -> f64 {
        self.per_byte * bytes as f64 + self.offset
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GemmCoefficients {
    pub host_linear: f64,
    pub host_offset: f64,
    pub device_linear: f64,
    pub device_offset: f64,
}

impl GemmCoefficients {
    pub fn host_cost(&self, mnk: u64) -> f64 {
        self.host_linear * mnk as f64 + self.host_offset
    }

    pub fn device_cost(&self, mnk: u64) -> f64 {
        self.device_linear * mnk as f64 + self.device_offset
    }
}

impl From<Coefficients> for GemmCoefficients {
    fn from(value: Coefficients) -> Self {
        let [host_linear, host_offset, device_linear, device_offset] = value.0;
        Self {
            host_linear,
            host_offset,
            device_linear,
            device_offset,
        }
    }
}

impl From<GemmCoefficients> for Coefficients {
    fn from(value: GemmCoefficients) -> Self {
        Coefficients([
            value.host_linear,
            value.host_offset,
            value.device_linear,
            value.device_offset,
        ])
    }
}

/// Coefficients keyed by datatype family and shape class.
#[derive(Debug, Clone, PartialEq)]
pub struct CostModel {
    transfer_needed: bool,
    transfer: TransferModel,
    gemm: HashMap<(GemmDtype, ShapeClass), GemmCoefficients>,
}

impl Default for CostModel {
    fn default() -> Self {
        Self::from_params(&Pm1Params::default())
    }
}

impl CostModel {
    pub fn from_params(params: &Pm1Params) -> Self {
        let entries = [
            (GemmDtype::Single, ShapeClass::Elongated, params.sgemm),
            (GemmDtype::Single, ShapeClass::Squarish, params.sgemm_sq),
            (GemmDtype::Double, ShapeClass::Elongated, params.dgemm),
            (GemmDtype::Double, ShapeClass::Squarish, params.dgemm_sq),
            (GemmDtype::ComplexSingle, ShapeClass::Elongated, params.cgemm),
            (GemmDtype::ComplexSingle, ShapeClass::Squarish, params.cgemm_sq),
            (GemmDtype::ComplexDouble, ShapeClass::Elongated, params.zgemm),
            (GemmDtype::ComplexDouble, ShapeClass::Squarish, params.zgemm_sq),
        ];
        let gemm = entries
            .into_iter()
            .map(|(dtype, class, coefficients)| ((dtype, class), coefficients.into()))
            .collect();

        Self {
            transfer_needed: params.mem_transfer_needed,
            transfer: TransferModel {
                per_byte: params.a_mem_byte,
                offset: params.b_mem_byte,
            },
            gemm,
        }
    }

    /// Load the parameter file. An unreadable file is an error; an illegal
    /// document is logged and yields the all-zero model.
    pub fn from_file(path: &Path) -> Result<Self, CostModelError> {
        let data = read_params(path)?;
        match Pm1Params::from_slice(&data) {
            Ok(params) => {
                info!(path = %path.display(), "loaded PM1 cost model parameters");
                Ok(Self::from_params(&params))
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "falling back to a zeroed PM1 cost model");
                Ok(Self::default())
            }
        }
    }

    pub fn to_params(&self) -> Pm1Params {
        let get = |dtype: GemmDtype, class: ShapeClass| -> Coefficients {
            self.gemm
                .get(&(dtype, class))
                .copied()
                .map(Coefficients::from)
                .unwrap_or_default()
        };
        Pm1Params {
            mem_transfer_needed: self.transfer_needed,
            a_mem_byte: self.transfer.per_byte,
            b_mem_byte: self.transfer.offset,
            sgemm: get(GemmDtype::Single, ShapeClass::Elongated),
            sgemm_sq: get(GemmDtype::Single, ShapeClass::Squarish),
            dgemm: get(GemmDtype::Double, ShapeClass::Elongated),
            dgemm_sq: get(GemmDtype::Double, ShapeClass::Squarish),
            cgemm: get(GemmDtype::ComplexSingle, ShapeClass::Elongated),
            cgemm_sq: get(GemmDtype::ComplexSingle, ShapeClass::Squarish),
            zgemm: get(GemmDtype::ComplexDouble, ShapeClass::Elongated),
            zgemm_sq: get(GemmDtype::ComplexDouble, ShapeClass::Squarish),
        }
    }

    pub fn with_transfer(mut self, transfer_needed: bool, transfer: TransferModel) -> Self {
        self.transfer_needed = transfer_needed;
        self.transfer = transfer;
        self
    }

    pub fn with_coefficients(
        mut self,
        dtype: GemmDtype,
        class: ShapeClass,
        coefficients: GemmCoefficients,
    ) -> Self {
        self.gemm.insert((dtype, class), coefficients);
        self
    }

    pub fn without_coefficients(mut self, dtype: GemmDtype, class: ShapeClass) -> Self {
        self.gemm.remove(&(dtype, class));
        self
    }

    pub fn transfer_needed(&self) -> bool {
        self.transfer_needed
    }

    pub fn transfer_cost(&self, bytes: usize) -> f64 {
        self.transfer.cost(bytes)
    }

    pub fn coefficients(&self, dtype: GemmDtype, class: ShapeClass) -> Option<&GemmCoefficients> {
        self.gemm.get(&(dtype, class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;

    #[test]
    fn params_map_onto_lookup_keys() {
        let params = Pm1Params::from_json(
            r#"{
                "mem_transfer_needed": true,
                "a_mem_byte": 0.5,
                "b_mem_byte": 3.0,
                "cgemm_sq": [1.0, 2.0, 3.0, 4.0],
                "cgemm": [5.0]
            }"#,
        )
        .unwrap();
        let model = CostModel::from_params(&params);

        assert!(model.transfer_needed());
        assert_relative_eq!(model.transfer_cost(10), 8.0);

        let sq = model
            .coefficients(GemmDtype::ComplexSingle, ShapeClass::Squarish)
            .unwrap();
        assert_relative_eq!(sq.host_cost(10), 12.0);
        assert_relative_eq!(sq.device_cost(10), 34.0);

        let elongated = model
            .coefficients(GemmDtype::ComplexSingle, ShapeClass::Elongated)
            .unwrap();
        assert_eq!(elongated.host_linear, 5.0);
        assert_eq!(elongated.device_offset, 0.0);

        assert_eq!(model.to_params(), params);
    }

    #[test]
    fn zeroed_model_costs_nothing() {
        let model = CostModel::default();
        assert!(!model.transfer_needed());
        for dtype in GemmDtype::ALL {
            for class in [ShapeClass::Squarish, ShapeClass::Elongated] {
                let c = model.coefficients(dtype, class).unwrap();
                assert_eq!(c.host_cost(1 << 30), 0.0);
                assert_eq!(c.device_cost(1 << 30), 0.0);
            }
        }
    }

    #[test]
    fn illegal_document_falls_back_to_zeroed_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm1_params.txt");
        fs::write(&path, "{ \"sgemm\": [1, 2, 3, 4, 5] }").unwrap();

        let model = CostModel::from_file(&path).expect("parse errors are not fatal");
        assert_eq!(model, CostModel::default());
    }

    #[test]
    fn unreadable_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = CostModel::from_file(&dir.path().join("missing.txt")).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn non_utf8_document_falls_back_to_zeroed_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm1_params.txt");
        fs::write(&path, [0xff, 0xfe, b'{', b'}']).unwrap();

        let model = CostModel::from_file(&path).expect("undecodable bytes are not fatal");
        assert_eq!(model, CostModel::default());
    }
}

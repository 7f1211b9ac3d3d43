//! Datatype, shape and scalar descriptors shared by every GEMM backend.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type stored in a matrix buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float32,
    Float64,
    Complex32,
    Complex64,
    Int32,
}

impl DataType {
    pub fn element_size_bytes(&self) -> usize {
        match self {
            DataType::Float32 | DataType::Int32 => 4,
            DataType::Float64 | DataType::Complex32 => 8,
            DataType::Complex64 => 16,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DataType::Complex32 | DataType::Complex64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32)
    }

    pub fn gemm_dtype(&self) -> Option<GemmDtype> {
        match self {
            DataType::Float32 => Some(GemmDtype::Single),
            DataType::Float64 => Some(GemmDtype::Double),
            DataType::Complex32 => Some(GemmDtype::ComplexSingle),
            DataType::Complex64 => Some(GemmDtype::ComplexDouble),
            DataType::Int32 => None,
        }
    }
}

/// Floating point GEMM family (s, d, c, z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GemmDtype {
    Single,
    Double,
    ComplexSingle,
    ComplexDouble,
}

impl GemmDtype {
    pub const ALL: [GemmDtype; 4] = [
        GemmDtype::Single,
        GemmDtype::Double,
        GemmDtype::ComplexSingle,
        GemmDtype::ComplexDouble,
    ];

    pub fn is_complex(&self) -> bool {
        matches!(self, GemmDtype::ComplexSingle | GemmDtype::ComplexDouble)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            GemmDtype::Single => DataType::Float32,
            GemmDtype::Double => DataType::Float64,
            GemmDtype::ComplexSingle => DataType::Complex32,
            GemmDtype::ComplexDouble => DataType::Complex64,
        }
    }

    /// BLAS-style prefix letter.
    pub fn prefix(&self) -> char {
        match self {
            GemmDtype::Single => 's',
            GemmDtype::Double => 'd',
            GemmDtype::ComplexSingle => 'c',
            GemmDtype::ComplexDouble => 'z',
        }
    }
}

impl fmt::Display for GemmDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}gemm", self.prefix())
    }
}

/// Coarse shape bucket used by the predictive cost model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShapeClass {
    Squarish,
    Elongated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GemmShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl GemmShape {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }

    /// `m * n * k`, saturating instead of wrapping on absurd shapes.
    pub fn effort(&self) -> u64 {
        (self.m as u64)
            .saturating_mul(self.n as u64)
            .saturating_mul(self.k as u64)
    }

    /// The largest extent is at most twice the smallest.
    pub fn is_squarish(&self) -> bool {
        let max = self.m.max(self.n).max(self.k);
        let min = self.m.min(self.n).min(self.k);
        max <= min.saturating_mul(2)
    }

    pub fn shape_class(&self) -> ShapeClass {
        if self.is_squarish() {
            ShapeClass::Squarish
        } else {
            ShapeClass::Elongated
        }
    }
}

/// Host-resident alpha/beta multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Real(f64),
    Complex(Complex64),
}

impl Scalar {
    pub const ZERO: Scalar = Scalar::Real(0.0);
    pub const ONE: Scalar = Scalar::Real(1.0);

    /// Exact comparison; `-0.0` counts as zero.
    pub fn is_zero(&self) -> bool {
        match self {
            Scalar::Real(v) => *v == 0.0,
            Scalar::Complex(v) => v.re == 0.0 && v.im == 0.0,
        }
    }

    pub fn to_complex(&self) -> Complex64 {
        match self {
            Scalar::Real(v) => Complex64::new(*v, 0.0),
            Scalar::Complex(v) => *v,
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Real(value)
    }
}

impl From<Complex64> for Scalar {
    fn from(value: Complex64) -> Self {
        Scalar::Complex(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squarish_classification() {
        assert!(GemmShape::new(8, 8, 8).is_squarish());
        assert!(!GemmShape::new(8, 8, 64).is_squarish());
        assert!(GemmShape::new(10, 12, 11).is_squarish());
        assert!(GemmShape::new(8, 16, 8).is_squarish());
        assert!(!GemmShape::new(8, 17, 8).is_squarish());
        assert_eq!(GemmShape::new(1, 1, 1).shape_class(), ShapeClass::Squarish);
    }

    #[test]
    fn effort_saturates() {
        assert_eq!(GemmShape::new(2, 3, 4).effort(), 24);
        assert_eq!(
            GemmShape::new(usize::MAX, usize::MAX, 2).effort(),
            u64::MAX
        );
    }

    #[test]
    fn integer_has_no_gemm_family() {
        assert_eq!(DataType::Int32.gemm_dtype(), None);
        assert_eq!(DataType::Complex32.gemm_dtype(), Some(GemmDtype::ComplexSingle));
        assert_eq!(GemmDtype::ComplexDouble.to_string(), "zgemm");
    }

    #[test]
    fn negative_zero_beta_is_zero() {
        assert!(Scalar::Real(-0.0).is_zero());
        assert!(!Scalar::Complex(Complex64::new(0.0, 1e-300)).is_zero());
    }
}

//! On-disk PM1 parameter document.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Longest coefficient array accepted per key.
pub const MAX_COEFFICIENTS: usize = 4;

#[derive(Debug, Error)]
pub enum CostModelError {
    #[error("failed to read cost model parameters from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("illegal cost model parameter document: {0}")]
    Parse(#[from] serde_json::Error),
}

impl CostModelError {
    /// The parameter source could not be read at all.
    pub fn is_io(&self) -> bool {
        matches!(self, CostModelError::Io { .. })
    }
}

/// Up to four coefficients ordered `{host_linear, host_offset,
/// device_linear, device_offset}`; short arrays are zero-padded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Coefficients(pub [f64; MAX_COEFFICIENTS]);

impl Serialize for Coefficients {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Coefficients {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<f64>::deserialize(deserializer)?;
        if values.len() > MAX_COEFFICIENTS {
            return Err(de::Error::invalid_length(
                values.len(),
                &"at most four coefficients",
            ));
        }
        let mut coefficients = [0.0; MAX_COEFFICIENTS];
        coefficients[..values.len()].copy_from_slice(&values);
        Ok(Coefficients(coefficients))
    }
}

/// Every key is optional; unknown keys make the document illegal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Pm1Params {
    pub mem_transfer_needed: bool,
    pub a_mem_byte: f64,
    pub b_mem_byte: f64,
    pub sgemm: Coefficients,
    pub sgemm_sq: Coefficients,
    pub dgemm: Coefficients,
    pub dgemm_sq: Coefficients,
    pub cgemm: Coefficients,
    pub cgemm_sq: Coefficients,
    pub zgemm: Coefficients,
    pub zgemm_sq: Coefficients,
}

impl Pm1Params {
    pub fn from_json(json: &str) -> Result<Self, CostModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Invalid UTF-8 is reported as a parse error, like any other bad token.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CostModelError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String, CostModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Strict load: both unreadable files and illegal documents are errors.
    pub fn load_from_file(path: &Path) -> Result<Self, CostModelError> {
        let data = read_params(path)?;
        Self::from_slice(&data)
    }
}

pub(crate) fn read_params(path: &Path) -> Result<Vec<u8>, CostModelError> {
    fs::read(path).map_err(|source| CostModelError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_arrays_are_zero_padded() {
        let params = Pm1Params::from_json(r#"{ "dgemm_sq": [1.5, 2.0] }"#).unwrap();
        assert_eq!(params.dgemm_sq, Coefficients([1.5, 2.0, 0.0, 0.0]));
        assert_eq!(params.sgemm, Coefficients::default());
        assert!(!params.mem_transfer_needed);
    }

    #[test]
    fn integer_literals_are_accepted_as_reals() {
        let params =
            Pm1Params::from_json(r#"{ "mem_transfer_needed": true, "a_mem_byte": 2, "b_mem_byte": 10 }"#)
                .unwrap();
        assert!(params.mem_transfer_needed);
        assert_eq!(params.a_mem_byte, 2.0);
        assert_eq!(params.b_mem_byte, 10.0);
    }

    #[test]
    fn overlong_array_is_illegal() {
        let err = Pm1Params::from_json(r#"{ "zgemm": [1, 2, 3, 4, 5] }"#).unwrap_err();
        assert!(matches!(err, CostModelError::Parse(_)));
    }

    #[test]
    fn unknown_key_is_illegal() {
        assert!(Pm1Params::from_json(r#"{ "qgemm": [1] }"#).is_err());
        assert!(Pm1Params::from_json("[1, 2]").is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Pm1Params::load_from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn non_utf8_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm1_params.txt");
        fs::write(&path, b"\xff\xfe{}").unwrap();
        let err = Pm1Params::load_from_file(&path).unwrap_err();
        assert!(matches!(err, CostModelError::Parse(_)));
    }
}

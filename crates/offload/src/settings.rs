//! Offload settings as read from the process environment.

use crate::config::{Policy, Threshold};
use gemmroute_kernels::config::GemmDtype;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

pub const OFFLOAD_KEY: &str = "GEMMROUTE_OFFLOAD";
pub const PM1_PARAMS_FILE_KEY: &str = "GEMMROUTE_PM1_PARAMS_FILE";
pub const DEFAULT_PM1_PARAMS_FILE: &str = "pm1_params.txt";

/// Per-datatype threshold key, e.g. `GEMMROUTE_DGEMM_THRESH`.
pub fn threshold_key(dtype: GemmDtype) -> &'static str {
    match dtype {
        GemmDtype::Single => "GEMMROUTE_SGEMM_THRESH",
        GemmDtype::Double => "GEMMROUTE_DGEMM_THRESH",
        GemmDtype::ComplexSingle => "GEMMROUTE_CGEMM_THRESH",
        GemmDtype::ComplexDouble => "GEMMROUTE_ZGEMM_THRESH",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadSettings {
    pub policy: Policy,
    pub sgemm_threshold: Threshold,
    pub dgemm_threshold: Threshold,
    pub cgemm_threshold: Threshold,
    pub zgemm_threshold: Threshold,
    pub params_file: PathBuf,
}

impl Default for OffloadSettings {
    fn default() -> Self {
        Self {
            policy: Policy::Never,
            sgemm_threshold: Threshold::Unbounded,
            dgemm_threshold: Threshold::Unbounded,
            cgemm_threshold: Threshold::Unbounded,
            zgemm_threshold: Threshold::Unbounded,
            params_file: PathBuf::from(DEFAULT_PM1_PARAMS_FILE),
        }
    }
}

impl OffloadSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. An unrecognized policy
    /// selector is reported and treated as `never`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let policy = match lookup(OFFLOAD_KEY) {
            None => Policy::Never,
            Some(value) => Policy::from_selector(&value).unwrap_or_else(|| {
                warn!(key = OFFLOAD_KEY, value = %value, "unrecognized offload policy; offloading disabled");
                Policy::Never
            }),
        };
        let threshold = |dtype| Threshold::parse(lookup(threshold_key(dtype)).as_deref());

        Self {
            policy,
            sgemm_threshold: threshold(GemmDtype::Single),
            dgemm_threshold: threshold(GemmDtype::Double),
            cgemm_threshold: threshold(GemmDtype::ComplexSingle),
            zgemm_threshold: threshold(GemmDtype::ComplexDouble),
            params_file: lookup(PM1_PARAMS_FILE_KEY)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PM1_PARAMS_FILE)),
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_threshold(mut self, dtype: GemmDtype, threshold: Threshold) -> Self {
        *self.threshold_mut(dtype) = threshold;
        self
    }

    pub fn with_params_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.params_file = path.into();
        self
    }

    pub fn threshold(&self, dtype: GemmDtype) -> Threshold {
        match dtype {
            GemmDtype::Single => self.sgemm_threshold,
            GemmDtype::Double => self.dgemm_threshold,
            GemmDtype::ComplexSingle => self.cgemm_threshold,
            GemmDtype::ComplexDouble => self.zgemm_threshold,
        }
    }

    fn threshold_mut(&mut self, dtype: GemmDtype) -> &mut Threshold {
        match dtype {
            GemmDtype::Single => &mut self.sgemm_threshold,
            GemmDtype::Double => &mut self.dgemm_threshold,
            GemmDtype::ComplexSingle => &mut self.cgemm_threshold,
            GemmDtype::ComplexDouble => &mut self.zgemm_threshold,
        }
    }
}

//! Offload configuration record and the runtime container that owns it.

use gemmroute_backend_gpu::runtime::ComputeContext;
use gemmroute_costmodel::CostModel;
use gemmroute_kernels::config::GemmDtype;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Never,
    Always,
    Threshold,
    #[serde(rename = "pm1")]
    Predictive,
}

impl Policy {
    /// Parse the value of the policy selector key.
    pub fn from_selector(value: &str) -> Option<Self> {
        match value {
            "never" => Some(Policy::Never),
            "always" => Some(Policy::Always),
            "threshold" => Some(Policy::Threshold),
            "pm1" => Some(Policy::Predictive),
            _ => None,
        }
    }

    pub fn selector(&self) -> &'static str {
        match self {
            Policy::Never => "never",
            Policy::Always => "always",
            Policy::Threshold => "threshold",
            Policy::Predictive => "pm1",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}

/// Minimum effort (`M * N * K`) for the threshold policy to offload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Threshold {
    Effort(u64),
    Unbounded,
}

impl Threshold {
    /// Absent, unparsable and negative values are all unbounded.
    pub fn parse(value: Option<&str>) -> Self {
        value
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(Threshold::Effort)
            .unwrap_or(Threshold::Unbounded)
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Threshold::Unbounded)
    }

    pub fn is_met_by(&self, effort: u64) -> bool {
        match self {
            Threshold::Effort(min) => effort >= *min,
            Threshold::Unbounded => false,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Effort(min) => write!(f, "{min}"),
            Threshold::Unbounded => f.write_str("unbounded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatatypeControl {
    pub disabled: bool,
    pub threshold: Threshold,
}

impl DatatypeControl {
    pub const DISABLED: DatatypeControl = DatatypeControl {
        disabled: true,
        threshold: Threshold::Unbounded,
    };

    pub const ENABLED: DatatypeControl = DatatypeControl {
        disabled: false,
        threshold: Threshold::Effort(0),
    };

    /// An unbounded threshold disables the datatype.
    pub fn from_threshold(threshold: Threshold) -> Self {
        Self {
            disabled: threshold.is_unbounded(),
            threshold,
        }
    }
}

/// Everything the decision engine and the execution orchestrator read.
///
/// The policy is fixed at construction. The compute context is owned here
/// and destroyed exactly once, either by [`OffloadConfig::take_context`]
/// followed by an explicit destroy, or when the configuration is dropped.
pub struct OffloadConfig {
    policy: Policy,
    controls: [DatatypeControl; 4],
    cost_model: Option<CostModel>,
    context: Mutex<Option<ComputeContext>>,
}

impl OffloadConfig {
    /// Configuration with the datatype controls implied by `policy`.
    pub fn new(policy: Policy) -> Self {
        let control = match policy {
            Policy::Never => DatatypeControl::DISABLED,
            Policy::Always => DatatypeControl::ENABLED,
            Policy::Threshold => DatatypeControl::DISABLED,
            Policy::Predictive => DatatypeControl {
                disabled: false,
                threshold: Threshold::Unbounded,
            },
        };
        Self {
            policy,
            controls: [control; 4],
            cost_model: None,
            context: Mutex::new(None),
        }
    }

    pub fn with_threshold(mut self, dtype: GemmDtype, threshold: Threshold) -> Self {
        self.controls[slot(dtype)] = DatatypeControl::from_threshold(threshold);
        self
    }

    pub fn with_disabled(mut self, dtype: GemmDtype, disabled: bool) -> Self {
        self.controls[slot(dtype)].disabled = disabled;
        self
    }

    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = Some(cost_model);
        self
    }

    pub fn with_context(mut self, context: ComputeContext) -> Self {
        *self.context.get_mut() = Some(context);
        self
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn control(&self, dtype: GemmDtype) -> DatatypeControl {
        self.controls[slot(dtype)]
    }

    pub fn is_disabled(&self, dtype: GemmDtype) -> bool {
        self.control(dtype).disabled
    }

    pub fn threshold(&self, dtype: GemmDtype) -> Threshold {
        self.control(dtype).threshold
    }

    pub fn cost_model(&self) -> Option<&CostModel> {
        self.cost_model.as_ref()
    }

    pub fn has_context(&self) -> bool {
        self.context.lock().is_some()
    }

    /// Exclusive access to the device handle and its stream.
    pub fn lock_context(&self) -> MutexGuard<'_, Option<ComputeContext>> {
        self.context.lock()
    }

    pub fn take_context(&mut self) -> Option<ComputeContext> {
        self.context.get_mut().take()
    }
}

impl fmt::Debug for OffloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadConfig")
            .field("policy", &self.policy)
            .field("controls", &self.controls)
            .field("cost_model", &self.cost_model.is_some())
            .field("context", &self.context.lock().as_ref().map(|ctx| ctx.id()))
            .finish()
    }
}

fn slot(dtype: GemmDtype) -> usize {
    match dtype {
        GemmDtype::Single => 0,
        GemmDtype::Double => 1,
        GemmDtype::ComplexSingle => 2,
        GemmDtype::ComplexDouble => 3,
    }
}

/// Process-wide runtime configuration holding at most one offload
/// configuration.
#[derive(Debug, Default)]
pub struct RuntimeConfig {
    offload: Option<OffloadConfig>,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offload(&self) -> Option<&OffloadConfig> {
        self.offload.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.offload.is_some()
    }

    pub(crate) fn install(&mut self, config: OffloadConfig) {
        self.offload = Some(config);
    }

    pub(crate) fn release(&mut self) -> Option<OffloadConfig> {
        self.offload.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_invariants() {
        let never = OffloadConfig::new(Policy::Never);
        let always = OffloadConfig::new(Policy::Always);
        for dtype in GemmDtype::ALL {
            assert!(never.is_disabled(dtype));
            assert_eq!(never.threshold(dtype), Threshold::Unbounded);
            assert!(!always.is_disabled(dtype));
            assert_eq!(always.threshold(dtype), Threshold::Effort(0));
        }
    }

    #[test]
    fn threshold_parsing() {
        assert_eq!(Threshold::parse(Some("4096")), Threshold::Effort(4096));
        assert_eq!(Threshold::parse(Some(" 12 ")), Threshold::Effort(12));
        assert_eq!(Threshold::parse(Some("-1")), Threshold::Unbounded);
        assert_eq!(Threshold::parse(Some("1e6")), Threshold::Unbounded);
        assert_eq!(Threshold::parse(None), Threshold::Unbounded);
        assert!(Threshold::Effort(8).is_met_by(8));
        assert!(!Threshold::Unbounded.is_met_by(u64::MAX));
    }

    #[test]
    fn unbounded_threshold_disables_datatype() {
        let config = OffloadConfig::new(Policy::Threshold)
            .with_threshold(GemmDtype::Double, Threshold::Effort(100))
            .with_threshold(GemmDtype::Single, Threshold::Unbounded);
        assert!(!config.is_disabled(GemmDtype::Double));
        assert!(config.is_disabled(GemmDtype::Single));
        assert!(config.is_disabled(GemmDtype::ComplexDouble));
    }

    #[test]
    fn policy_selector_names() {
        for policy in [
            Policy::Never,
            Policy::Always,
            Policy::Threshold,
            Policy::Predictive,
        ] {
            assert_eq!(Policy::from_selector(policy.selector()), Some(policy));
        }
        assert_eq!(Policy::from_selector("PM1"), None);
    }
}

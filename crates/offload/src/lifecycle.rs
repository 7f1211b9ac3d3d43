//! Creation and teardown of the offload configuration.

use crate::config::{OffloadConfig, Policy, RuntimeConfig};
use crate::error::LifecycleError;
use crate::settings::OffloadSettings;
use gemmroute_backend_gpu::runtime::{ComputeContext, DynAccelerator, PointerMode};
use gemmroute_costmodel::CostModel;
use gemmroute_kernels::config::GemmDtype;
use tracing::{debug, info, warn};

/// Install a fresh offload configuration built from `settings`.
///
/// Only an unreadable PM1 parameter file is fatal. Failing to create the
/// compute context or to set its pointer mode is logged and leaves a
/// configuration that never executes on the device.
pub fn initialize(
    runtime: &mut RuntimeConfig,
    settings: &OffloadSettings,
    accelerator: DynAccelerator,
) -> Result<(), LifecycleError> {
    if runtime.is_initialized() {
        return Err(LifecycleError::AlreadyInitialized);
    }

    let policy = settings.policy;
    info!(policy = %policy, "initializing gemm offload");
    let mut config = OffloadConfig::new(policy);

    match policy {
        Policy::Never => {
            runtime.install(config);
            return Ok(());
        }
        Policy::Always => {}
        Policy::Threshold => {
            for dtype in GemmDtype::ALL {
                let threshold = settings.threshold(dtype);
                if threshold.is_unbounded() {
                    info!(dtype = %dtype, "no offload threshold set; datatype stays on the host");
                } else {
                    info!(dtype = %dtype, threshold = %threshold, "offload threshold set");
                }
                config = config.with_threshold(dtype, threshold);
            }
        }
        Policy::Predictive => {
            let model = CostModel::from_file(&settings.params_file)
                .map_err(LifecycleError::ParamsUnavailable)?;
            info!(
                path = %settings.params_file.display(),
                transfer_needed = model.transfer_needed(),
                "PM1 cost model ready"
            );
            config = config.with_cost_model(model);
        }
    }

    runtime.install(attach_context(config, accelerator));
    Ok(())
}

fn attach_context(config: OffloadConfig, accelerator: DynAccelerator) -> OffloadConfig {
    let context = match ComputeContext::create(accelerator) {
        Ok(context) => context,
        Err(err) => {
            warn!(error = %err, "failed to create accelerator compute context");
            return config;
        }
    };
    if let Err(err) = context.set_pointer_mode(PointerMode::Host) {
        warn!(context = context.id(), error = %err, "failed to set host pointer mode");
    }
    config.with_context(context)
}

/// Destroy the compute context and release the configuration. Finalizing
/// an uninitialized container does nothing.
pub fn finalize(runtime: &mut RuntimeConfig) {
    let Some(mut config) = runtime.release() else {
        debug!("no offload configuration to finalize");
        return;
    };
    if let Some(context) = config.take_context() {
        let id = context.id();
        if let Err(err) = context.destroy() {
            warn!(context = id, error = %err, "failed to destroy accelerator compute context");
        }
    }
    info!(policy = %config.policy(), "gemm offload finalized");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Threshold;
    use gemmroute_backend_gpu::simulated::{DeviceEvent, FaultPlan, SimulatedAccelerator};
    use std::fs;
    use std::sync::Arc;

    fn settings(policy: Policy) -> OffloadSettings {
        OffloadSettings::default().with_policy(policy)
    }

    fn destroyed(device: &SimulatedAccelerator) -> usize {
        device
            .events()
            .iter()
            .filter(|event| matches!(event, DeviceEvent::ContextDestroyed(_)))
            .count()
    }

    #[test]
    fn never_creates_no_context() {
        let device = Arc::new(SimulatedAccelerator::new());
        let mut runtime = RuntimeConfig::new();
        initialize(&mut runtime, &settings(Policy::Never), device.clone()).unwrap();

        let config = runtime.offload().unwrap();
        assert_eq!(config.policy(), Policy::Never);
        assert!(!config.has_context());
        assert!(device.events().is_empty());
    }

    #[test]
    fn always_sets_host_pointer_mode() {
        let device = Arc::new(SimulatedAccelerator::new());
        let mut runtime = RuntimeConfig::new();
        initialize(&mut runtime, &settings(Policy::Always), device.clone()).unwrap();

        let config = runtime.offload().unwrap();
        let id = config.lock_context().as_ref().map(|ctx| ctx.id()).unwrap();
        assert_eq!(device.pointer_mode(id), Some(PointerMode::Host));
    }

    #[test]
    fn threshold_settings_become_controls() {
        let device = Arc::new(SimulatedAccelerator::new());
        let mut runtime = RuntimeConfig::new();
        let settings = settings(Policy::Threshold)
            .with_threshold(GemmDtype::Double, Threshold::Effort(1 << 20));
        initialize(&mut runtime, &settings, device).unwrap();

        let config = runtime.offload().unwrap();
        assert_eq!(config.threshold(GemmDtype::Double), Threshold::Effort(1 << 20));
        assert!(!config.is_disabled(GemmDtype::Double));
        assert!(config.is_disabled(GemmDtype::Single));
    }

    #[test]
    fn context_failures_are_not_fatal() {
        let device = Arc::new(SimulatedAccelerator::with_faults(FaultPlan {
            fail_create_context: true,
            ..FaultPlan::default()
        }));
        let mut runtime = RuntimeConfig::new();
        initialize(&mut runtime, &settings(Policy::Always), device).unwrap();
        assert!(!runtime.offload().unwrap().has_context());

        let device = Arc::new(SimulatedAccelerator::with_faults(FaultPlan {
            fail_set_pointer_mode: true,
            ..FaultPlan::default()
        }));
        let mut runtime = RuntimeConfig::new();
        initialize(&mut runtime, &settings(Policy::Always), device.clone()).unwrap();
        assert!(runtime.offload().unwrap().has_context());
        assert_eq!(device.live_contexts(), 1);
    }

    #[test]
    fn missing_params_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(SimulatedAccelerator::new());
        let mut runtime = RuntimeConfig::new();
        let settings = settings(Policy::Predictive).with_params_file(dir.path().join("absent.txt"));

        let err = initialize(&mut runtime, &settings, device.clone()).unwrap_err();
        assert!(matches!(err, LifecycleError::ParamsUnavailable(_)));
        assert!(!runtime.is_initialized());
        assert_eq!(device.live_contexts(), 0);
    }

    #[test]
    fn malformed_params_yield_zeroed_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm1_params.txt");
        fs::write(&path, "{ not json").unwrap();

        let mut runtime = RuntimeConfig::new();
        let settings = settings(Policy::Predictive).with_params_file(&path);
        initialize(&mut runtime, &settings, Arc::new(SimulatedAccelerator::new())).unwrap();

        let config = runtime.offload().unwrap();
        assert_eq!(config.cost_model(), Some(&CostModel::default()));
        assert!(config.has_context());
    }

    #[test]
    fn undecodable_params_yield_zeroed_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm1_params.txt");
        fs::write(&path, [0xff, 0xfe]).unwrap();

        let mut runtime = RuntimeConfig::new();
        let settings = settings(Policy::Predictive).with_params_file(&path);
        initialize(&mut runtime, &settings, Arc::new(SimulatedAccelerator::new())).unwrap();

        let config = runtime.offload().unwrap();
        assert_eq!(config.cost_model(), Some(&CostModel::default()));
    }

    #[test]
    fn second_initialize_is_rejected() {
        let device = Arc::new(SimulatedAccelerator::new());
        let mut runtime = RuntimeConfig::new();
        initialize(&mut runtime, &settings(Policy::Always), device.clone()).unwrap();
        let err = initialize(&mut runtime, &settings(Policy::Never), device.clone()).unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyInitialized));
        assert_eq!(runtime.offload().unwrap().policy(), Policy::Always);
        assert_eq!(device.live_contexts(), 1);
    }

    #[test]
    fn context_is_destroyed_exactly_once() {
        let device = Arc::new(SimulatedAccelerator::new());
        let mut runtime = RuntimeConfig::new();
        initialize(&mut runtime, &settings(Policy::Always), device.clone()).unwrap();

        finalize(&mut runtime);
        finalize(&mut runtime);
        assert!(!runtime.is_initialized());
        assert_eq!(destroyed(&device), 1);
        assert_eq!(device.live_contexts(), 0);
    }

    #[test]
    fn dropping_without_finalize_destroys_context() {
        let device = Arc::new(SimulatedAccelerator::new());
        {
            let mut runtime = RuntimeConfig::new();
            initialize(&mut runtime, &settings(Policy::Always), device.clone()).unwrap();
        }
        assert_eq!(destroyed(&device), 1);
    }
}

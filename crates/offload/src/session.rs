//! Dispatch session: decide, offload, fall back to the host.

use crate::config::{OffloadConfig, RuntimeConfig};
use crate::decision::decide;
use crate::executor::execute_offloaded;
use crate::lifecycle::{finalize, initialize};
use crate::settings::OffloadSettings;
use anyhow::{anyhow, Context, Result};
use gemmroute_backend_cpu::runtime::HostExecutor;
use gemmroute_backend_gpu::runtime::DynAccelerator;
use gemmroute_kernels::config::Scalar;
use gemmroute_kernels::matrix::Matrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Where a GEMM ended up running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Host,
    Accelerator,
    /// Offload was chosen but failed; the host computed the result.
    HostFallback,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Placement::Host => "host",
            Placement::Accelerator => "accelerator",
            Placement::HostFallback => "host_fallback",
        };
        f.write_str(name)
    }
}

pub struct OffloadSession {
    runtime: RuntimeConfig,
    host: HostExecutor,
}

impl OffloadSession {
    pub fn new(settings: &OffloadSettings, accelerator: DynAccelerator) -> Result<Self> {
        let mut runtime = RuntimeConfig::new();
        initialize(&mut runtime, settings, accelerator)
            .with_context(|| format!("initializing {} offload policy", settings.policy))?;
        Ok(Self {
            runtime,
            host: HostExecutor::default(),
        })
    }

    pub fn config(&self) -> Option<&OffloadConfig> {
        self.runtime.offload()
    }

    /// `C <- alpha * op(A) * op(B) + beta * C` wherever the configuration
    /// says it should run.
    pub fn gemm(
        &self,
        alpha: Scalar,
        a: &Matrix,
        b: &Matrix,
        beta: Scalar,
        c: &mut Matrix,
    ) -> Result<Placement> {
        let config = self
            .runtime
            .offload()
            .ok_or_else(|| anyhow!("offload session has been shut down"))?;

        let decision = decide(config, alpha, a, b, beta, c);
        debug!(offload = decision.offload, reason = ?decision.reason, "gemm placement");
        if !decision.offload {
            self.host.execute_gemm(alpha, a, b, beta, c)?;
            return Ok(Placement::Host);
        }

        // The copy-back may land before a later step fails; C must be
        // restored before the host reads it again.
        let saved = if beta.is_zero() {
            None
        } else {
            c.host_data().cloned()
        };
        match execute_offloaded(config, alpha, a, b, beta, c) {
            Ok(()) => Ok(Placement::Accelerator),
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "offloaded gemm failed; running on the host");
                if let (Some(saved), Some(data)) = (saved, c.host_data_mut()) {
                    *data = saved;
                }
                self.host
                    .execute_gemm(alpha, a, b, beta, c)
                    .context("host fallback after failed offload")?;
                Ok(Placement::HostFallback)
            }
        }
    }

    pub fn shutdown(&mut self) {
        finalize(&mut self.runtime);
    }
}

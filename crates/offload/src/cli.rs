//! CLI wiring for the gemmroute tool.

use crate::config::{OffloadConfig, Policy, RuntimeConfig};
use crate::decision::{decide, Decision};
use crate::lifecycle::{finalize, initialize};
use crate::session::{OffloadSession, Placement};
use crate::settings::OffloadSettings;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gemmroute_backend_cpu::runtime::HostExecutor;
use gemmroute_backend_gpu::simulated::SimulatedAccelerator;
use gemmroute_costmodel::{CostModel, Pm1Params};
use gemmroute_kernels::buffer::{DeviceBuffer, ElementBuffer, Storage};
use gemmroute_kernels::config::{DataType, GemmDtype, GemmShape, Scalar};
use gemmroute_kernels::matrix::Matrix;
use num_complex::Complex64;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gemmroute", about = "GEMM offload placement toolkit")]
pub struct Cli {
    /// Override the policy selected by GEMMROUTE_OFFLOAD.
    #[arg(long, value_enum, global = true)]
    pub policy: Option<PolicyArg>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum PolicyArg {
    Never,
    Always,
    Threshold,
    Pm1,
}

impl From<PolicyArg> for Policy {
    fn from(value: PolicyArg) -> Policy {
        match value {
            PolicyArg::Never => Policy::Never,
            PolicyArg::Always => Policy::Always,
            PolicyArg::Threshold => Policy::Threshold,
            PolicyArg::Pm1 => Policy::Predictive,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum DtypeArg {
    S,
    D,
    C,
    Z,
}

impl From<DtypeArg> for GemmDtype {
    fn from(value: DtypeArg) -> GemmDtype {
        match value {
            DtypeArg::S => GemmDtype::Single,
            DtypeArg::D => GemmDtype::Double,
            DtypeArg::C => GemmDtype::ComplexSingle,
            DtypeArg::Z => GemmDtype::ComplexDouble,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandArg {
    A,
    B,
    C,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the placement decision for one GEMM shape.
    Decide {
        #[arg(long)]
        m: usize,
        #[arg(long)]
        n: usize,
        #[arg(long)]
        k: usize,
        #[arg(long, value_enum, default_value = "d")]
        dtype: DtypeArg,
        #[arg(long, default_value_t = false)]
        trans_a: bool,
        #[arg(long, default_value_t = false)]
        conj_a: bool,
        #[arg(long, default_value_t = false)]
        trans_b: bool,
        #[arg(long, default_value_t = false)]
        conj_b: bool,
        /// Operands that already live on the accelerator.
        #[arg(long, value_enum, value_delimiter = ',')]
        device_resident: Vec<OperandArg>,
    },
    /// Run one GEMM through the session on the simulated accelerator.
    Run {
        #[arg(long, default_value_t = 64)]
        m: usize,
        #[arg(long, default_value_t = 64)]
        n: usize,
        #[arg(long, default_value_t = 64)]
        k: usize,
        #[arg(long, value_enum, default_value = "d")]
        dtype: DtypeArg,
        #[arg(long, default_value_t = 1.0)]
        alpha: f64,
        #[arg(long, default_value_t = 0.0)]
        beta: f64,
    },
    /// Validate a PM1 parameter file and print the normalized parameters.
    CheckParams { path: PathBuf },
}

#[derive(Debug, Serialize)]
pub struct DecideReport {
    pub policy: Policy,
    pub dtype: GemmDtype,
    pub shape: GemmShape,
    pub decision: Decision,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub policy: Policy,
    pub dtype: GemmDtype,
    pub shape: GemmShape,
    pub placement: Placement,
    pub max_abs_error: f64,
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli { policy, command } = cli;
    let mut settings = OffloadSettings::from_env();
    if let Some(policy) = policy {
        settings = settings.with_policy(policy.into());
    }

    match command {
        Command::Decide {
            m,
            n,
            k,
            dtype,
            trans_a,
            conj_a,
            trans_b,
            conj_b,
            device_resident,
        } => {
            let dtype = GemmDtype::from(dtype);
            let element = dtype.data_type();
            let resident = |operand| device_resident.contains(&operand);

            let (a_rows, a_cols) = if trans_a { (k, m) } else { (m, k) };
            let (b_rows, b_cols) = if trans_b { (n, k) } else { (k, n) };
            let a = descriptor(element, a_rows, a_cols, resident(OperandArg::A), 1)
                .with_transpose(trans_a)
                .with_conjugate(conj_a);
            let b = descriptor(element, b_rows, b_cols, resident(OperandArg::B), 2)
                .with_transpose(trans_b)
                .with_conjugate(conj_b);
            let c = descriptor(element, m, n, resident(OperandArg::C), 3);

            let mut runtime = RuntimeConfig::new();
            initialize(&mut runtime, &settings, Arc::new(SimulatedAccelerator::new()))?;
            let config = runtime
                .offload()
                .context("offload configuration missing after initialization")?;
            let report = DecideReport {
                policy: config.policy(),
                dtype,
                shape: GemmShape::new(m, n, k),
                decision: decide(config, Scalar::ONE, &a, &b, Scalar::ZERO, &c),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            finalize(&mut runtime);
        }
        Command::Run {
            m,
            n,
            k,
            dtype,
            alpha,
            beta,
        } => {
            let dtype = GemmDtype::from(dtype);
            let element = dtype.data_type();
            let a = Matrix::from_host(m, k, sample(element, m * k, 0.5))?;
            let b = Matrix::from_host(k, n, sample(element, k * n, -0.25))?;
            let initial_c = sample(element, m * n, 1.0);
            let mut c = Matrix::from_host(m, n, initial_c.clone())?;
            let mut expected = Matrix::from_host(m, n, initial_c)?;
            let (alpha, beta) = (Scalar::Real(alpha), Scalar::Real(beta));

            let device = Arc::new(SimulatedAccelerator::new());
            let mut session = OffloadSession::new(&settings, device)?;
            let policy = session.config().map(OffloadConfig::policy).unwrap_or(settings.policy);
            let placement = session.gemm(alpha, &a, &b, beta, &mut c)?;
            session.shutdown();

            HostExecutor::default().execute_gemm(alpha, &a, &b, beta, &mut expected)?;
            let report = RunReport {
                policy,
                dtype,
                shape: GemmShape::new(m, n, k),
                placement,
                max_abs_error: max_abs_error(&c, &expected),
            };
            info!(placement = %report.placement, error = report.max_abs_error, "gemm completed");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::CheckParams { path } => {
            let params = Pm1Params::load_from_file(&path)
                .with_context(|| format!("checking {}", path.display()))?;
            let normalized = CostModel::from_params(&params).to_params();
            println!("{}", normalized.to_json()?);
        }
    }
    Ok(())
}

/// Descriptor for the decision engine; device-resident operands get a
/// placeholder handle of the right size.
fn descriptor(dtype: DataType, rows: usize, cols: usize, on_device: bool, id: u64) -> Matrix {
    let storage = if on_device {
        Storage::Device(DeviceBuffer::new(id, rows.max(1) * cols * dtype.element_size_bytes()))
    } else {
        Storage::Host(ElementBuffer::zeros(dtype, rows * cols))
    };
    Matrix::new(dtype, rows, cols, storage)
}

fn sample(dtype: DataType, len: usize, scale: f64) -> ElementBuffer {
    ElementBuffer::from_fn(dtype, len, |idx| {
        let x = ((idx * 7 + 3) % 17) as f64 / 17.0 - 0.5;
        Complex64::new(scale * x, scale * (0.25 - x))
    })
}

fn max_abs_error(actual: &Matrix, expected: &Matrix) -> f64 {
    match (actual.host_data(), expected.host_data()) {
        (Some(actual), Some(expected)) => (0..actual.len().min(expected.len()))
            .map(|idx| (actual.get(idx) - expected.get(idx)).norm())
            .fold(0.0, f64::max),
        _ => f64::NAN,
    }
}

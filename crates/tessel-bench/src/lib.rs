//! # tessel-bench
//!
//! Launch-overhead benchmarks and tile verification for Tessel.
//!
//! Provides:
//! - `Suite` / `run_suite`: warmup, timed rounds, synchronization outside the
//!   timed region
//! - `KernelLaunch`, `KernelLaunchParameters`, `GraphLaunch` suites
//! - `check_param_equivalence`: flat and struct parameters must agree bit for bit
//! - `checks`: tile copy/map forward and gradient scenarios
//! - `BenchReport`: text tables and JSON output

pub mod checks;
pub mod harness;
pub mod kernels;
pub mod report;
pub mod suites;

pub use checks::CheckOutcome;
pub use harness::{run_suite, BenchConfig, Measurement, Suite};
pub use report::{BenchReport, SuiteReport};
pub use suites::{check_param_equivalence, GraphLaunch, KernelLaunch, KernelLaunchParameters, ParamValues};

use tessel_core::{Device, Result};

/// Names accepted by [`suite_by_name`].
pub const SUITES: &[&str] = &["launch", "params", "graph"];

/// Set up a suite by its short name.
pub fn suite_by_name(name: &str, device: Device) -> Result<Box<dyn Suite>> {
    let suite: Box<dyn Suite> = match name {
        "launch" => Box::new(KernelLaunch::setup(device)?),
        "params" => Box::new(KernelLaunchParameters::setup(device)?),
        "graph" => Box::new(GraphLaunch::setup(device)?),
        other => {
            return Err(tessel_core::TesselError::InvalidArgument(format!(
                "unknown suite '{other}', expected one of {SUITES:?}"
            )))
        }
    };
    Ok(suite)
}

/// Run `suite` with `cfg` (or its own defaults) and wrap the result.
pub fn measure(suite: &mut dyn Suite, device: Device, cfg: Option<BenchConfig>) -> Result<SuiteReport> {
    let config = cfg.unwrap_or_else(|| suite.default_config());
    let measurements = run_suite(suite, &config)?;
    Ok(SuiteReport {
        suite: suite.name().to_string(),
        device: device.to_string(),
        config,
        measurements,
    })
}

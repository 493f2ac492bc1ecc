//! Timing harness.
//!
//! A suite exposes named cases; each case is called `number` times per round
//! for `rounds` rounds after `warmup` untimed calls. The device is
//! synchronized before the first round and after each round, outside the
//! timed region, so per-call numbers reflect submission cost only.

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tessel_core::{Result, TesselError};

/// Iteration counts for one suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Calls per timed round.
    pub number: usize,
    /// Timed rounds.
    pub rounds: usize,
    /// Untimed calls before the first round.
    pub warmup: usize,
}

impl BenchConfig {
    pub const fn new(number: usize, rounds: usize, warmup: usize) -> Self {
        Self { number, rounds, warmup }
    }

    /// Parse from JSON; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text).map_err(|e| TesselError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TesselError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.number == 0 || self.rounds == 0 {
            return Err(TesselError::Config(format!(
                "bench config needs number and rounds > 0, got {}x{}",
                self.number, self.rounds
            )));
        }
        Ok(())
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::new(10_000, 8, 5)
    }
}

/// A group of related benchmark cases sharing one setup.
pub trait Suite {
    fn name(&self) -> &'static str;

    /// Case names, in the order they are run and reported.
    fn cases(&self) -> &'static [&'static str];

    /// Iteration counts this suite is tuned for.
    fn default_config(&self) -> BenchConfig;

    /// One timed call of case `case` (an index into [`cases`](Self::cases)).
    fn call(&mut self, case: usize) -> Result<()>;

    /// Wait for outstanding device work.
    fn synchronize(&self) -> Result<()>;

    fn teardown(&mut self) -> Result<()> {
        self.synchronize()
    }
}

/// Per-call wall time of one case, in nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub suite: String,
    pub case: String,
    pub number: usize,
    pub rounds: usize,
    /// Per-call time of each round.
    pub samples_ns: Vec<f64>,
    pub mean_ns: f64,
    pub min_ns: f64,
    pub median_ns: f64,
    pub stddev_ns: f64,
}

impl Measurement {
    pub fn from_samples(suite: &str, case: &str, number: usize, samples_ns: Vec<f64>) -> Self {
        let n = samples_ns.len().max(1) as f64;
        let mean = samples_ns.iter().sum::<f64>() / n;
        let var = samples_ns.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let mut sorted = samples_ns.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = match sorted.len() {
            0 => 0.0,
            len if len % 2 == 1 => sorted[len / 2],
            len => (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0,
        };
        Self {
            suite: suite.to_string(),
            case: case.to_string(),
            number,
            rounds: samples_ns.len(),
            min_ns: sorted.first().copied().unwrap_or(0.0),
            samples_ns,
            mean_ns: mean,
            median_ns: median,
            stddev_ns: var.sqrt(),
        }
    }

    pub fn mean_us(&self) -> f64 {
        self.mean_ns / 1_000.0
    }
}

/// Time every case of `suite`, then tear it down.
pub fn run_suite(suite: &mut dyn Suite, cfg: &BenchConfig) -> Result<Vec<Measurement>> {
    cfg.validate()?;
    let name = suite.name();
    let mut out = Vec::with_capacity(suite.cases().len());
    for (idx, case) in suite.cases().iter().enumerate() {
        for _ in 0..cfg.warmup {
            suite.call(idx)?;
        }
        suite.synchronize()?;

        let mut samples = Vec::with_capacity(cfg.rounds);
        for _ in 0..cfg.rounds {
            let start = Instant::now();
            for _ in 0..cfg.number {
                suite.call(idx)?;
            }
            let elapsed = start.elapsed();
            suite.synchronize()?;
            samples.push(elapsed.as_nanos() as f64 / cfg.number as f64);
        }
        let m = Measurement::from_samples(name, case, cfg.number, samples);
        tracing::info!(suite = name, case, mean_us = m.mean_us(), "measured");
        out.push(m);
    }
    suite.teardown()?;
    Ok(out)
}

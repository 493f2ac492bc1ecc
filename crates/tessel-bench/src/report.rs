//! Benchmark reports: text tables and JSON.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tessel_core::{Result, TesselError};

use crate::harness::{BenchConfig, Measurement};

/// Measurements of one suite on one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub device: String,
    pub config: BenchConfig,
    pub measurements: Vec<Measurement>,
}

impl SuiteReport {
    /// The first case, which every other case is compared against.
    pub fn baseline(&self) -> Option<&Measurement> {
        self.measurements.first()
    }

    /// Mean per-call time of `case` relative to the baseline.
    pub fn ratio(&self, case: &str) -> Option<f64> {
        let base = self.baseline()?.mean_ns;
        let m = self.measurements.iter().find(|m| m.case == case)?;
        (base > 0.0).then(|| m.mean_ns / base)
    }

    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} on {} ({} calls x {} rounds, {} warmup)",
            self.suite, self.device, self.config.number, self.config.rounds, self.config.warmup
        );
        let _ = writeln!(
            out,
            "  {:<22} {:>12} {:>12} {:>12} {:>12} {:>8}",
            "case", "mean (us)", "min (us)", "median (us)", "stddev (us)", "ratio"
        );
        for m in &self.measurements {
            let ratio = self
                .ratio(&m.case)
                .map_or_else(|| "-".to_string(), |r| format!("{r:.2}x"));
            let _ = writeln!(
                out,
                "  {:<22} {:>12.3} {:>12.3} {:>12.3} {:>12.3} {:>8}",
                m.case,
                m.mean_ns / 1e3,
                m.min_ns / 1e3,
                m.median_ns / 1e3,
                m.stddev_ns / 1e3,
                ratio
            );
        }
        out
    }
}

/// Results of a benchmark run across suites.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchReport {
    pub suites: Vec<SuiteReport>,
}

impl BenchReport {
    pub fn push(&mut self, suite: SuiteReport) {
        self.suites.push(suite);
    }

    pub fn render_table(&self) -> String {
        self.suites
            .iter()
            .map(SuiteReport::render_table)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TesselError::InvalidArgument(format!("report serialization failed: {e}")))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TesselError::Config(format!("bench report: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> SuiteReport {
        SuiteReport {
            suite: "KernelLaunch".into(),
            device: "accel:0".into(),
            config: BenchConfig::new(10, 2, 0),
            measurements: vec![
                Measurement::from_samples("KernelLaunch", "standard_launch", 10, vec![4000.0, 4000.0]),
                Measurement::from_samples("KernelLaunch", "launch_object", 10, vec![1000.0, 1000.0]),
            ],
        }
    }

    #[test]
    fn test_ratio_against_baseline() {
        let r = report();
        assert_eq!(r.ratio("standard_launch"), Some(1.0));
        assert_eq!(r.ratio("launch_object"), Some(0.25));
        assert_eq!(r.ratio("missing"), None);
    }

    #[test]
    fn test_table_lists_cases() {
        let table = report().render_table();
        assert!(table.starts_with("KernelLaunch on accel:0"));
        assert!(table.contains("launch_object"));
        assert!(table.contains("0.25x"));
    }

    #[test]
    fn test_json_round_trip() {
        let mut all = BenchReport::default();
        all.push(report());
        let back = BenchReport::from_json(&all.to_json().unwrap()).unwrap();
        assert_eq!(back.suites.len(), 1);
        assert_eq!(back.suites[0].measurements[1].mean_ns, 1000.0);
    }
}

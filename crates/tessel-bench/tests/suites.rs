//! Suites end to end with small iteration counts.
//! Run with: cargo test -p tessel-bench --test suites

use tessel_bench::{
    check_param_equivalence, measure, suite_by_name, BenchConfig, BenchReport, GraphLaunch, KernelLaunchParameters,
    SUITES,
};
use tessel_core::{Device, TesselError};

const SMALL: BenchConfig = BenchConfig::new(8, 2, 1);

#[test]
fn test_every_suite_measures() {
    let device = Device::Accel(0);
    let mut report = BenchReport::default();
    for name in SUITES {
        let mut suite = suite_by_name(name, device).unwrap();
        let r = measure(suite.as_mut(), device, Some(SMALL)).unwrap();
        assert_eq!(r.measurements.len(), suite.cases().len());
        for m in &r.measurements {
            assert_eq!(m.rounds, 2);
            assert_eq!(m.number, 8);
            assert!(m.min_ns >= 0.0);
            assert!(m.mean_ns >= m.min_ns);
            assert!(m.stddev_ns >= 0.0);
        }
        report.push(r);
    }
    let names: Vec<_> = report.suites.iter().map(|s| s.suite.as_str()).collect();
    assert_eq!(names, ["KernelLaunch", "KernelLaunchParameters", "GraphLaunch"]);

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["suites"][2]["measurements"][0]["case"], "ten_graph");
    assert!(report.render_table().contains("struct_empty"));
}

#[test]
fn test_unknown_suite() {
    let err = suite_by_name("memcpy", Device::Cpu).err().unwrap();
    assert!(matches!(err, TesselError::InvalidArgument(_)));
}

#[test]
fn test_default_configs() {
    let params = KernelLaunchParameters::setup(Device::Cpu).unwrap();
    let graph = GraphLaunch::setup(Device::Cpu).unwrap();
    let suites: [&dyn tessel_bench::Suite; 2] = [&params, &graph];
    for s in suites {
        let cfg = s.default_config();
        cfg.validate().unwrap();
        assert!(cfg.number >= 1_000);
    }
}

#[test]
fn test_param_equivalence_on_accel() {
    check_param_equivalence(Device::Accel(0)).unwrap();
}

#[test]
fn test_zero_rounds_rejected() {
    let mut suite = suite_by_name("launch", Device::Cpu).unwrap();
    let err = measure(suite.as_mut(), Device::Cpu, Some(BenchConfig::new(1, 0, 0))).unwrap_err();
    assert!(matches!(err, TesselError::Config(_)));
}

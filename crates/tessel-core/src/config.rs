//! Process-wide runtime configuration.
//!
//! Resolution order: built-in defaults, then an optional JSON file, then
//! `TESSEL_*` environment variables. The resolved config is installed once
//! and read by the device registry and the memory accountant.

use std::path::Path;
use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::TesselError;
use crate::Result;

/// Runtime configuration for devices and launches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of accelerator ordinals (`accel:0 .. accel:N-1`) that may be opened.
    pub accel_devices: usize,

    /// Worker threads per accelerator. `None` uses the rayon default.
    pub threads_per_device: Option<usize>,

    /// Per-accelerator allocation limit in bytes. `None` is unlimited.
    pub memory_limit_bytes: Option<usize>,

    /// Enforce the one-writer-per-element rule for tile stores.
    pub validate_partitions: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            accel_devices: 4,
            threads_per_device: None,
            memory_limit_bytes: None,
            validate_partitions: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from JSON text. Missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TesselError::Config(e.to_string()))
    }

    /// Load a config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TesselError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Apply `TESSEL_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the environment in production).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("TESSEL_ACCEL_DEVICES") {
            self.accel_devices = parse_var("TESSEL_ACCEL_DEVICES", &v)?;
        }
        if let Some(v) = lookup("TESSEL_THREADS") {
            self.threads_per_device = Some(parse_var("TESSEL_THREADS", &v)?);
        }
        if let Some(v) = lookup("TESSEL_MEMORY_LIMIT") {
            self.memory_limit_bytes = Some(parse_var("TESSEL_MEMORY_LIMIT", &v)?);
        }
        if let Some(v) = lookup("TESSEL_VALIDATE_PARTITIONS") {
            self.validate_partitions = match v.trim() {
                "1" | "true" | "on" => true,
                "0" | "false" | "off" => false,
                other => {
                    return Err(TesselError::Config(format!(
                        "TESSEL_VALIDATE_PARTITIONS: expected a boolean, got '{other}'"
                    )))
                }
            };
        }
        self.validate()?;
        Ok(self)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.threads_per_device == Some(0) {
            return Err(TesselError::Config("threads_per_device must be positive".into()));
        }
        Ok(())
    }
}

fn parse_var(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| TesselError::Config(format!("{key}: expected an integer, got '{value}'")))
}

static CONFIG: OnceLock<RwLock<RuntimeConfig>> = OnceLock::new();

fn slot() -> &'static RwLock<RuntimeConfig> {
    CONFIG.get_or_init(|| {
        let cfg = RuntimeConfig::default()
            .with_env_overrides()
            .unwrap_or_else(|e| {
                tracing::warn!("ignoring environment overrides: {e}");
                RuntimeConfig::default()
            });
        RwLock::new(cfg)
    })
}

/// Snapshot of the installed runtime config.
pub fn runtime_config() -> RuntimeConfig {
    slot().read().clone()
}

/// Install a runtime config for the process.
///
/// Devices opened before the call keep the thread pools they were built with.
pub fn install(config: RuntimeConfig) -> Result<()> {
    config.validate()?;
    tracing::debug!(?config, "installing runtime config");
    *slot().write() = config;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.accel_devices, 4);
        assert!(cfg.validate_partitions);
        assert!(cfg.memory_limit_bytes.is_none());
    }

    #[test]
    fn test_partial_json() {
        let cfg = RuntimeConfig::from_json(r#"{"accel_devices": 2}"#).unwrap();
        assert_eq!(cfg.accel_devices, 2);
        assert!(cfg.validate_partitions);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            RuntimeConfig::from_json("{accel_devices"),
            Err(TesselError::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TESSEL_THREADS", "3"),
            ("TESSEL_MEMORY_LIMIT", "4096"),
            ("TESSEL_VALIDATE_PARTITIONS", "off"),
        ]
        .into_iter()
        .collect();
        let cfg = RuntimeConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.threads_per_device, Some(3));
        assert_eq!(cfg.memory_limit_bytes, Some(4096));
        assert!(!cfg.validate_partitions);
    }

    #[test]
    fn test_override_errors() {
        let err = RuntimeConfig::default()
            .with_overrides(|k| (k == "TESSEL_THREADS").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, TesselError::Config(_)));

        let err = RuntimeConfig::default()
            .with_overrides(|k| (k == "TESSEL_ACCEL_DEVICES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, TesselError::Config(_)));
    }
}

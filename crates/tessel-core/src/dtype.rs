use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TesselError;

/// Element types an [`Array`](crate::Array) can hold.
///
/// Tiles always compute in f64; values are rounded to the array's dtype
/// when a tile is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit IEEE 754 single-precision float
    #[default]
    F32,
    /// 64-bit IEEE 754 double-precision float
    F64,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    /// Number of bytes needed to store `n` elements of this dtype.
    pub fn storage_bytes(&self, n: usize) -> usize {
        self.element_size() * n
    }

    /// Default `(rtol, atol)` used when comparing results of this precision.
    pub fn tolerance(&self) -> (f64, f64) {
        match self {
            DType::F32 => (1e-4, 1e-5),
            DType::F64 => (1e-5, 1e-8),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
        }
    }
}

impl FromStr for DType {
    type Err = TesselError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f32" | "float32" => Ok(DType::F32),
            "f64" | "float64" => Ok(DType::F64),
            other => Err(TesselError::InvalidArgument(format!("unknown dtype '{other}'"))),
        }
    }
}

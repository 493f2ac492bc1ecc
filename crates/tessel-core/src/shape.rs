use smallvec::SmallVec;
use std::fmt;

use crate::error::TesselError;
use crate::Result;

/// Array shape. Arrays are 1D or 2D, so dims stay on the stack.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 2]>,
}

impl Shape {
    /// Create a shape, rejecting ranks other than 1 and 2.
    pub fn new(dims: &[usize]) -> Result<Self> {
        if dims.is_empty() || dims.len() > 2 {
            return Err(TesselError::InvalidArgument(format!(
                "arrays must be 1D or 2D, got shape {dims:?}"
            )));
        }
        Ok(Self {
            dims: SmallVec::from_slice(dims),
        })
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Get dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// `(rows, cols)` as seen by tile operations. A 1D shape `[n]` is `n×1`.
    pub fn matrix_dims(&self) -> (usize, usize) {
        match self.dims.as_slice() {
            [n] => (*n, 1),
            [r, c] => (*r, *c),
            _ => unreachable!("shape rank is validated on construction"),
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}

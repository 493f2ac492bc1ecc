//! Per-invocation view of a running launch.
//!
//! An [`Invocation`] carries the invocation index and the tile primitives a
//! kernel body uses to move data between arrays and tiles.

use std::collections::HashMap;

use parking_lot::Mutex;
use tessel_core::{Array, Result, TesselError, Tile, TileRegion};

use crate::launch::Tid;

const UNOWNED: u32 = u32::MAX;

/// Launch-wide bookkeeping shared by all invocations of one launch.
///
/// Tracks which invocation wrote each array element through a tile store so
/// overlapping stores are reported instead of silently racing.
pub(crate) struct LaunchState {
    validate: bool,
    owners: Mutex<HashMap<u64, Vec<u32>>>,
}

impl LaunchState {
    pub(crate) fn new(validate: bool) -> Self {
        Self {
            validate,
            owners: Mutex::new(HashMap::new()),
        }
    }

    fn claim(&self, array: &Array, region: &TileRegion, invocation: u32) -> Result<()> {
        if !self.validate {
            return Ok(());
        }
        let (_, cols) = array.shape().matrix_dims();
        let mut owners = self.owners.lock();
        let slots = owners
            .entry(array.id())
            .or_insert_with(|| vec![UNOWNED; array.numel()]);
        for (row, col, idx) in region.indices(cols) {
            let owner = slots[idx];
            if owner != UNOWNED && owner != invocation {
                return Err(TesselError::OverlappingStore {
                    row,
                    col,
                    first: owner,
                    second: invocation,
                });
            }
        }
        for (_, _, idx) in region.indices(cols) {
            slots[idx] = invocation;
        }
        Ok(())
    }
}

/// One invocation of a launch.
pub struct Invocation<'a> {
    tid: Tid,
    linear: u32,
    state: &'a LaunchState,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(tid: Tid, linear: u32, state: &'a LaunchState) -> Self {
        Self { tid, linear, state }
    }

    /// Multi-dimensional index of this invocation.
    #[inline]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    // =========================================================================
    // Tile primitives
    // =========================================================================

    /// Load tile `(i, j)` of `m×n` from `array`.
    pub fn tile_load(&self, array: &Array, i: usize, j: usize, m: usize, n: usize) -> Result<Tile> {
        Tile::load(array, i, j, m, n)
    }

    /// Store `tile` as tile `(i, j)` of `array`.
    ///
    /// Fails if any element was already written by another invocation of the
    /// same launch.
    pub fn tile_store(&self, array: &Array, i: usize, j: usize, tile: &Tile) -> Result<()> {
        let region = tile.region_at(i, j)?;
        region.check_bounds(array)?;
        self.state.claim(array, &region, self.linear)?;
        let (_, cols) = array.shape().matrix_dims();
        tile.scatter(array.storage(), &region, cols);
        Ok(())
    }

    /// Add `tile` into tile `(i, j)` of `array`. Concurrent adds commute.
    pub fn tile_accumulate(&self, array: &Array, i: usize, j: usize, tile: &Tile) -> Result<()> {
        let region = tile.region_at(i, j)?;
        region.check_bounds(array)?;
        let (_, cols) = array.shape().matrix_dims();
        tile.scatter_add(array.storage(), &region, cols);
        Ok(())
    }

    /// Load tile `(i, j)` of the gradient buffer of `array`.
    pub fn grad_tile_load(&self, array: &Array, i: usize, j: usize, m: usize, n: usize) -> Result<Tile> {
        let grad = array.grad_storage().ok_or_else(|| {
            TesselError::InvalidArgument(format!("array {} has no gradient buffer", array.id()))
        })?;
        let region = TileRegion::at(i, j, m, n)?;
        region.check_bounds(array)?;
        let (_, cols) = array.shape().matrix_dims();
        Ok(Tile::gather(&grad, &region, cols))
    }

    /// Add `tile` into the gradient buffer of `array`. Arrays without a
    /// gradient buffer are skipped.
    pub fn grad_tile_accumulate(&self, array: &Array, i: usize, j: usize, tile: &Tile) -> Result<()> {
        let region = tile.region_at(i, j)?;
        region.check_bounds(array)?;
        if let Some(grad) = array.grad_storage() {
            let (_, cols) = array.shape().matrix_dims();
            tile.scatter_add(&grad, &region, cols);
        }
        Ok(())
    }

    // =========================================================================
    // Element access
    // =========================================================================

    fn check_index(array: &Array, idx: usize) -> Result<()> {
        if idx >= array.numel() {
            return Err(TesselError::InvalidArgument(format!(
                "index {idx} out of range for array of shape {}",
                array.shape()
            )));
        }
        Ok(())
    }

    /// Read element `idx` of the flattened array.
    pub fn load(&self, array: &Array, idx: usize) -> Result<f64> {
        Self::check_index(array, idx)?;
        Ok(array.storage().read().get(idx))
    }

    /// Write element `idx` of the flattened array.
    pub fn store(&self, array: &Array, idx: usize, value: f64) -> Result<()> {
        Self::check_index(array, idx)?;
        array.storage().write().set(idx, value);
        Ok(())
    }

    /// Add into element `idx` of the flattened array.
    pub fn atomic_add(&self, array: &Array, idx: usize, value: f64) -> Result<()> {
        Self::check_index(array, idx)?;
        array.storage().write().add(idx, value);
        Ok(())
    }
}

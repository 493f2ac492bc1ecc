//! Tiles: rectangular blocks of an array held in invocation-local storage.
//!
//! A tile is immutable once loaded. Operations return new tiles; stores
//! replace the contents of the array region the tile maps to.

use std::fmt;

use smallvec::SmallVec;

use crate::array::Array;
use crate::error::TesselError;
use crate::storage::Storage;
use crate::Result;

/// Inline capacity covers tiles up to 8×8 without touching the heap.
type TileBuf = SmallVec<[f64; 64]>;

/// Extent of a tile in rows and columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileShape {
    pub rows: usize,
    pub cols: usize,
}

impl TileShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn numel(&self) -> usize {
        self.rows * self.cols
    }
}

impl fmt::Display for TileShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// An array region addressed by tile index: origin `(i·m, j·n)`, extent `m×n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRegion {
    pub row0: usize,
    pub col0: usize,
    pub shape: TileShape,
}

impl TileRegion {
    /// Region of tile `(i, j)` for tiles of `m×n`.
    pub fn at(i: usize, j: usize, m: usize, n: usize) -> Result<Self> {
        match (i.checked_mul(m), j.checked_mul(n)) {
            (Some(row0), Some(col0)) => Ok(Self {
                row0,
                col0,
                shape: TileShape::new(m, n),
            }),
            _ => Err(TesselError::InvalidArgument(format!(
                "tile ({i}, {j}) of {m}x{n} overflows the index range"
            ))),
        }
    }

    /// Reject regions that leave the array. Tiles never clip or pad.
    pub fn check_bounds(&self, array: &Array) -> Result<()> {
        let (rows, cols) = array.shape().matrix_dims();
        let fits = |origin: usize, extent: usize, limit: usize| {
            origin.checked_add(extent).is_some_and(|end| end <= limit)
        };
        if !fits(self.row0, self.shape.rows, rows) || !fits(self.col0, self.shape.cols, cols) {
            return Err(TesselError::TileOutOfBounds {
                array: array.dims().to_vec(),
                origin: (self.row0, self.col0),
                extent: (self.shape.rows, self.shape.cols),
            });
        }
        Ok(())
    }

    /// Flat element indices covered by the region, row by row.
    pub fn indices(&self, array_cols: usize) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        (0..self.shape.rows).flat_map(move |r| {
            (0..self.shape.cols).map(move |c| {
                let row = self.row0 + r;
                let col = self.col0 + c;
                (row, col, row * array_cols + col)
            })
        })
    }
}

/// An `m×n` block of values in row-major order, computed in f64.
#[derive(Clone, PartialEq)]
pub struct Tile {
    shape: TileShape,
    data: TileBuf,
}

impl Tile {
    /// Build a tile from row-major values.
    pub fn new(rows: usize, cols: usize, data: &[f64]) -> Result<Self> {
        if rows * cols != data.len() {
            return Err(TesselError::ShapeMismatch {
                expected: vec![rows, cols],
                got: vec![data.len()],
            });
        }
        Ok(Self {
            shape: TileShape::new(rows, cols),
            data: SmallVec::from_slice(data),
        })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            shape: TileShape::new(rows, cols),
            data: SmallVec::from_elem(0.0, rows * cols),
        }
    }

    /// Build a tile by evaluating `f(row, col)`.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = TileBuf::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self {
            shape: TileShape::new(rows, cols),
            data,
        }
    }

    pub fn shape(&self) -> TileShape {
        self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape.rows
    }

    pub fn cols(&self) -> usize {
        self.shape.cols
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.shape.cols + col]
    }

    /// Elementwise transform into a new tile of the same shape.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Tile {
        Tile {
            shape: self.shape,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Elementwise combination of two same-shaped tiles. Never broadcasts.
    pub fn zip_map(&self, other: &Tile, f: impl Fn(f64, f64) -> f64) -> Result<Tile> {
        if self.shape != other.shape {
            return Err(TesselError::ShapeMismatch {
                expected: vec![self.shape.rows, self.shape.cols],
                got: vec![other.shape.rows, other.shape.cols],
            });
        }
        Ok(Tile {
            shape: self.shape,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    /// Gather `region` out of `storage` laid out as `array_cols` columns.
    pub fn gather(storage: &Storage, region: &TileRegion, array_cols: usize) -> Tile {
        let src = storage.read();
        let data = region.indices(array_cols).map(|(_, _, idx)| src.get(idx)).collect();
        Tile {
            shape: region.shape,
            data,
        }
    }

    /// Load tile `(i, j)` of `m×n` from `array`.
    pub fn load(array: &Array, i: usize, j: usize, m: usize, n: usize) -> Result<Tile> {
        let region = TileRegion::at(i, j, m, n)?;
        region.check_bounds(array)?;
        let (_, cols) = array.shape().matrix_dims();
        Ok(Self::gather(array.storage(), &region, cols))
    }

    /// Write this tile into `storage` at `region`.
    pub fn scatter(&self, storage: &Storage, region: &TileRegion, array_cols: usize) {
        let mut dst = storage.write();
        for ((_, _, idx), &v) in region.indices(array_cols).zip(self.data.iter()) {
            dst.set(idx, v);
        }
    }

    /// Add this tile into `storage` at `region`.
    pub fn scatter_add(&self, storage: &Storage, region: &TileRegion, array_cols: usize) {
        let mut dst = storage.write();
        for ((_, _, idx), &v) in region.indices(array_cols).zip(self.data.iter()) {
            dst.add(idx, v);
        }
    }

    /// The region this tile occupies when stored as tile `(i, j)`.
    pub fn region_at(&self, i: usize, j: usize) -> Result<TileRegion> {
        TileRegion::at(i, j, self.shape.rows, self.shape.cols)
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("shape", &self.shape)
            .field("data", &self.data.as_slice())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Device};

    fn grid(rows: usize, cols: usize) -> Array {
        let data: Vec<f64> = (0..rows * cols).map(|v| v as f64).collect();
        Array::from_f64(&data, &[rows, cols], Device::Cpu).unwrap()
    }

    #[test]
    fn test_region_origin() {
        let r = TileRegion::at(2, 3, 8, 4).unwrap();
        assert_eq!((r.row0, r.col0), (16, 12));
        assert_eq!(r.shape.numel(), 32);
    }

    #[test]
    fn test_region_overflow_rejected() {
        let err = TileRegion::at(usize::MAX, 0, 2, 2).unwrap_err();
        assert!(matches!(err, TesselError::InvalidArgument(_)));

        let a = grid(4, 6);
        let near_max = TileRegion {
            row0: usize::MAX - 1,
            col0: 0,
            shape: TileShape::new(2, 2),
        };
        assert!(matches!(near_max.check_bounds(&a), Err(TesselError::TileOutOfBounds { .. })));
        assert!(Tile::load(&a, usize::MAX / 2, 0, 3, 1).is_err());
    }

    #[test]
    fn test_load_block() {
        let a = grid(4, 6);
        let t = Tile::load(&a, 1, 1, 2, 3).unwrap();
        // rows 2..4, cols 3..6
        assert_eq!(t.as_slice(), &[15.0, 16.0, 17.0, 21.0, 22.0, 23.0]);
    }

    #[test]
    fn test_load_out_of_bounds_rejected() {
        let a = grid(4, 6);
        let err = Tile::load(&a, 1, 1, 3, 3).unwrap_err();
        assert!(matches!(err, TesselError::TileOutOfBounds { origin: (3, 3), .. }));
    }

    #[test]
    fn test_one_dimensional_is_column() {
        let a = Array::arange(&[6], DType::F32, Device::Cpu).unwrap();
        let t = Tile::load(&a, 1, 0, 3, 1).unwrap();
        assert_eq!(t.as_slice(), &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_scatter_and_add() {
        let a = Array::zeros(&[2, 2], DType::F64, Device::Cpu).unwrap();
        let t = Tile::new(1, 2, &[1.5, 2.5]).unwrap();
        let region = t.region_at(1, 0).unwrap();
        t.scatter(a.storage(), &region, 2);
        t.scatter_add(a.storage(), &region, 2);
        assert_eq!(a.to_vec_f64(), vec![0.0, 0.0, 3.0, 5.0]);
    }

    #[test]
    fn test_zip_map_shape_mismatch() {
        let a = Tile::zeros(2, 2);
        let b = Tile::zeros(2, 3);
        assert!(matches!(a.zip_map(&b, |x, y| x + y), Err(TesselError::ShapeMismatch { .. })));
        let c = Tile::from_fn(2, 2, |r, c| (r * 2 + c) as f64);
        let d = c.zip_map(&c, |x, y| x * y).unwrap();
        assert_eq!(d.as_slice(), &[0.0, 1.0, 4.0, 9.0]);
    }
}

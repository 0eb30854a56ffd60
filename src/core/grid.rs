//! Cubic cell partition of the periodic world, shared by the shell
//! containers and the particle store.

use crate::core::geometry::Vec3;
use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// An `n x n x n` grid of equal cells over a periodic box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGrid {
    world_size: f64,
    matrix_size: usize,
    cell_size: f64,
}

impl CellGrid {
    pub fn new(world_size: f64, matrix_size: usize) -> Result<Self> {
        if !world_size.is_finite() || world_size <= 0.0 {
            return Err(Error::InvalidParam("world_size must be finite and > 0".into()));
        }
        if matrix_size == 0 {
            return Err(Error::InvalidParam("matrix_size must be > 0".into()));
        }
        Ok(Self {
            world_size,
            matrix_size,
            cell_size: world_size / matrix_size as f64,
        })
    }

    #[inline]
    pub fn world_size(&self) -> f64 {
        self.world_size
    }

    #[inline]
    pub fn matrix_size(&self) -> usize {
        self.matrix_size
    }

    #[inline]
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    #[inline]
    pub fn num_cells(&self) -> usize {
        self.matrix_size.pow(3)
    }

    fn cell_coord(&self, x: f64) -> usize {
        let c = (x.rem_euclid(self.world_size) / self.cell_size).floor() as usize;
        c.min(self.matrix_size - 1)
    }

    /// Index of the cell holding `pos`, after periodic wrapping.
    pub fn cell_index(&self, pos: &Vec3) -> usize {
        let n = self.matrix_size;
        let (i, j, k) = (
            self.cell_coord(pos[0]),
            self.cell_coord(pos[1]),
            self.cell_coord(pos[2]),
        );
        (i * n + j) * n + k
    }

    /// Cells whose contents may lie within `reach` of `pos`.
    pub fn candidate_cells(&self, pos: &Vec3, reach: f64) -> BTreeSet<usize> {
        let n = self.matrix_size as i64;
        let span = (reach / self.cell_size).ceil() as i64 + 1;
        let axis = |x: f64| -> Vec<usize> {
            if 2 * span + 1 >= n {
                return (0..n as usize).collect();
            }
            let c = self.cell_coord(x) as i64;
            (c - span..=c + span)
                .map(|i| i.rem_euclid(n) as usize)
                .collect()
        };
        let (xs, ys, zs) = (axis(pos[0]), axis(pos[1]), axis(pos[2]));
        let mut out = BTreeSet::new();
        for &i in &xs {
            for &j in &ys {
                for &k in &zs {
                    out.insert((i * self.matrix_size + j) * self.matrix_size + k);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_wrap_around_the_box() -> Result<()> {
        let grid = CellGrid::new(20.0, 10)?;
        assert_eq!(grid.cell_index(&[0.0, 0.0, 0.0]), 0);
        assert_eq!(grid.cell_index(&[-0.5, 0.0, 0.0]), grid.cell_index(&[19.5, 0.0, 0.0]));
        assert_eq!(grid.cell_index(&[20.0, 20.0, 20.0]), 0);

        // a small reach near the seam picks cells on both sides of it
        let cells = grid.candidate_cells(&[0.1, 5.0, 5.0], 0.1);
        assert!(cells.contains(&grid.cell_index(&[19.9, 5.0, 5.0])));
        assert!(!cells.contains(&grid.cell_index(&[10.0, 5.0, 5.0])));

        // a reach spanning the box covers every cell
        assert_eq!(grid.candidate_cells(&[5.0, 5.0, 5.0], 10.0).len(), grid.num_cells());
        assert!(CellGrid::new(10.0, 0).is_err());
        Ok(())
    }
}

//! Bilinear interpolation of the four corner readings onto the grid.

use crate::{CornerSamples, GRID_SIZE, GridValues, MissingSensorData, round2};

/// Interpolate the four corner readings bilinearly onto a 10x10 grid.
///
/// Cell `(row, col)` is evaluated at the normalized coordinate
/// `x = col / 9`, `y = row / 9`:
///
/// `V = d1*(1-x)*(1-y) + d2*x*(1-y) + d3*(1-x)*y + d4*x*y`
///
/// The blend is exact at the four corners and affine along each axis in
/// between. Values are rounded to 2 decimals for presentation.
///
/// Fails with [`MissingSensorData`] before touching any grid cell when
/// fewer than four corners are populated.
pub fn interpolate_bilinear(samples: &CornerSamples) -> Result<GridValues, MissingSensorData> {
    let corners = samples.require_all()?;
    let mut grid = [[0.0; GRID_SIZE]; GRID_SIZE];
    let n = (GRID_SIZE - 1) as f64;
    for (row, cells) in grid.iter_mut().enumerate() {
        let y = row as f64 / n;
        for (col, cell) in cells.iter_mut().enumerate() {
            let x = col as f64 / n;
            let value = corners.d1 * (1.0 - x) * (1.0 - y)
                + corners.d2 * x * (1.0 - y)
                + corners.d3 * (1.0 - x) * y
                + corners.d4 * x * y;
            *cell = round2(value);
        }
    }
    Ok(grid)
}

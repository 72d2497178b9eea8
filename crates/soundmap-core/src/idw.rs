//! Inverse-distance weighted interpolation with a synthetic peak point.
//!
//! The four corner readings are augmented with one virtual point at the
//! weighted-centroid peak position, so the interpolated field shows a
//! visible hotspot between the sensors instead of flattening out.

use serde::{Deserialize, Serialize};

use crate::peak::{PEAK_STRENGTH_FACTOR, PeakEstimate, weighted_centroid};
use crate::{CornerSamples, EPSILON, GRID_SIZE, GridValues, MissingSensorData, round2};

/// Tuning parameters for the IDW interpolation.
///
/// These are named configuration with fixed defaults, not per-call
/// knobs to optimize.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdwParams {
    /// Scales the maximum corner value into the virtual peak value.
    pub peak_strength_factor: f64,
    /// Distance exponent. Higher values give a sharper falloff around
    /// the interpolation points, lower values a flatter field.
    pub flattening_power: f64,
}

impl Default for IdwParams {
    fn default() -> Self {
        Self {
            peak_strength_factor: PEAK_STRENGTH_FACTOR,
            flattening_power: 2.0,
        }
    }
}

/// Result of one IDW interpolation: the grid and the peak it was
/// biased toward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdwField {
    pub grid: GridValues,
    pub peak: PeakEstimate,
}

/// Interpolate the corner readings onto the grid via inverse-distance
/// weighting, blending in a virtual peak point.
///
/// For every cell, `weight_i = 1 / max(dist_i, EPSILON)^power` over the
/// four corners plus the virtual peak; the cell value is the weighted
/// mean. The epsilon guard keeps cells coincident with a source point
/// finite: their weight dominates and the cell reproduces the source
/// value.
///
/// When all corners are equal the peak sits at the center and the field
/// is a near-constant bump, which is expected IDW behavior, not an
/// error. Grid values are rounded to 2 decimals, peak coordinates to 4,
/// the peak value to 2.
pub fn interpolate_idw(
    samples: &CornerSamples,
    params: &IdwParams,
) -> Result<IdwField, MissingSensorData> {
    let corners = samples.require_all()?;
    let peak = weighted_centroid(&corners, params.peak_strength_factor);

    let mut points = [(0.0, 0.0, 0.0); 5];
    for (slot, (corner, value)) in points.iter_mut().zip(corners.labeled()) {
        let (x, y) = corner.position();
        *slot = (x, y, value);
    }
    points[4] = (peak.x, peak.y, peak.value);

    let mut grid = [[0.0; GRID_SIZE]; GRID_SIZE];
    let n = (GRID_SIZE - 1) as f64;
    for (row, cells) in grid.iter_mut().enumerate() {
        let y = row as f64 / n;
        for (col, cell) in cells.iter_mut().enumerate() {
            let x = col as f64 / n;
            let mut weight_sum = 0.0;
            let mut value_sum = 0.0;
            for (px, py, value) in points {
                let dist = ((x - px).powi(2) + (y - py).powi(2)).sqrt();
                let weight = 1.0 / dist.max(EPSILON).powf(params.flattening_power);
                weight_sum += weight;
                value_sum += value * weight;
            }
            *cell = round2(value_sum / weight_sum);
        }
    }

    Ok(IdwField {
        grid,
        peak: peak.rounded(),
    })
}

//! # Soundmap Core
//!
//! This crate provides the spatial interpolation and peak-estimation engine
//! for the four-corner sound sensor field. It maps corner sensor readings
//! onto a fixed 10x10 intensity grid via bilinear or inverse-distance
//! weighted interpolation and estimates a weighted-centroid peak.
//! All computations are pure functions over an already validated input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bilinear;
pub mod idw;
pub mod peak;

pub use bilinear::interpolate_bilinear;
pub use idw::{IdwField, IdwParams, interpolate_idw};
pub use peak::{PEAK_STRENGTH_FACTOR, PeakEstimate, estimate_peak};

/// Side length of the interpolated intensity grid.
pub const GRID_SIZE: usize = 10;

/// Guard against division by zero in the IDW weights and the
/// weighted-centroid denominator.
pub const EPSILON: f64 = 1e-4;

/// Row-major 10x10 intensity grid, `grid[row][col]`.
pub type GridValues = [[f64; GRID_SIZE]; GRID_SIZE];

/// One of the four fixed corner sensors on the unit square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Corner {
    /// Top-left, position (0, 0).
    #[serde(rename = "d1")]
    D1,
    /// Top-right, position (1, 0).
    #[serde(rename = "d2")]
    D2,
    /// Bottom-left, position (0, 1).
    #[serde(rename = "d3")]
    D3,
    /// Bottom-right, position (1, 1).
    #[serde(rename = "d4")]
    D4,
}

impl Corner {
    pub const ALL: [Corner; 4] = [Corner::D1, Corner::D2, Corner::D3, Corner::D4];

    /// Normalized unit-square position of this corner.
    pub fn position(self) -> (f64, f64) {
        match self {
            Corner::D1 => (0.0, 0.0),
            Corner::D2 => (1.0, 0.0),
            Corner::D3 => (0.0, 1.0),
            Corner::D4 => (1.0, 1.0),
        }
    }

    /// Wire key of this corner (`d1`..`d4`), as stored in the time series.
    pub fn key(self) -> &'static str {
        match self {
            Corner::D1 => "d1",
            Corner::D2 => "d2",
            Corner::D3 => "d3",
            Corner::D4 => "d4",
        }
    }

    /// Parse a wire key back into a corner.
    pub fn from_key(key: &str) -> Option<Corner> {
        Corner::ALL.iter().copied().find(|c| c.key() == key)
    }
}

/// Partially populated corner readings, as collected from the boundary.
///
/// This is the unvalidated input form: any subset of corners may be
/// present. Interpolation requires all four, see [`CornerSamples::require_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CornerSamples {
    pub d1: Option<f64>,
    pub d2: Option<f64>,
    pub d3: Option<f64>,
    pub d4: Option<f64>,
}

impl CornerSamples {
    pub fn get(&self, corner: Corner) -> Option<f64> {
        match corner {
            Corner::D1 => self.d1,
            Corner::D2 => self.d2,
            Corner::D3 => self.d3,
            Corner::D4 => self.d4,
        }
    }

    pub fn set(&mut self, corner: Corner, value: f64) {
        match corner {
            Corner::D1 => self.d1 = Some(value),
            Corner::D2 => self.d2 = Some(value),
            Corner::D3 => self.d3 = Some(value),
            Corner::D4 => self.d4 = Some(value),
        }
    }

    /// Validate that all four corners are populated.
    ///
    /// Fails with [`MissingSensorData`] listing exactly the missing and
    /// the received corners. Never defaults a missing corner.
    pub fn require_all(&self) -> Result<CornerValues, MissingSensorData> {
        let mut missing = Vec::new();
        let mut received = Vec::new();
        for corner in Corner::ALL {
            match self.get(corner) {
                Some(_) => received.push(corner),
                None => missing.push(corner),
            }
        }
        if !missing.is_empty() {
            return Err(MissingSensorData { missing, received });
        }
        Ok(CornerValues {
            d1: self.d1.unwrap_or_default(),
            d2: self.d2.unwrap_or_default(),
            d3: self.d3.unwrap_or_default(),
            d4: self.d4.unwrap_or_default(),
        })
    }
}

/// Fully populated corner readings. Only obtainable through
/// [`CornerSamples::require_all`] or direct construction with known values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornerValues {
    pub d1: f64,
    pub d2: f64,
    pub d3: f64,
    pub d4: f64,
}

impl CornerValues {
    pub fn new(d1: f64, d2: f64, d3: f64, d4: f64) -> Self {
        Self { d1, d2, d3, d4 }
    }

    /// All four readings paired with their corners, in `d1..d4` order.
    pub fn labeled(&self) -> [(Corner, f64); 4] {
        [
            (Corner::D1, self.d1),
            (Corner::D2, self.d2),
            (Corner::D3, self.d3),
            (Corner::D4, self.d4),
        ]
    }
}

/// Fewer than four corner readings were available for an interpolation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "missing sensor data: missing corners [{}], received corners [{}]",
    corner_list(.missing),
    corner_list(.received)
)]
pub struct MissingSensorData {
    pub missing: Vec<Corner>,
    pub received: Vec<Corner>,
}

fn corner_list(corners: &[Corner]) -> String {
    corners
        .iter()
        .map(|c| c.key())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

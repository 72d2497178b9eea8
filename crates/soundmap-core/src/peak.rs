//! # Peak-Schätzung (WCL)
//!
//! Weighted-Centroid Localization über die vier Ecksensoren:
//! Die Peak-Position ist der wertgewichtete Schwerpunkt der vier
//! Eckpositionen, die Peak-Stärke das Maximum der Eckwerte skaliert
//! mit `peak_strength_factor`.

use serde::{Deserialize, Serialize};

use crate::{CornerSamples, CornerValues, EPSILON, MissingSensorData, round2, round4};

/// Standard-Skalierungsfaktor für die Peak-Stärke.
///
/// Überzeichnet das wahre Maximum bewusst, damit der Hotspot in der
/// nachgelagerten Interpolation sichtbar bleibt. Darstellungsheuristik,
/// keine kalibrierte physikalische Schätzung.
pub const PEAK_STRENGTH_FACTOR: f64 = 1.5;

/// Geschätzter Peak: Position im Einheitsquadrat plus Stärke.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakEstimate {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

impl PeakEstimate {
    /// Runde für die externe Darstellung: Koordinaten auf 4,
    /// Stärke auf 2 Nachkommastellen.
    pub fn rounded(&self) -> PeakEstimate {
        PeakEstimate {
            x: round4(self.x),
            y: round4(self.y),
            value: round2(self.value),
        }
    }
}

/// Schätze den Peak aus den vier Eckwerten.
///
/// peakX = Σ(v_i * x_i) / Σ(v_i), peakY analog, über die vier festen
/// Eckpositionen. Ist Σ(v_i) kleiner als [`EPSILON`], wird der Nenner
/// durch EPSILON ersetzt; der Schwerpunkt ist dann entartet (bekannter
/// Randfall, keine stille Korrektur).
///
/// Fehlt ein Eckwert, schlägt die Schätzung mit [`MissingSensorData`]
/// fehl, bevor gerechnet wird.
pub fn estimate_peak(
    samples: &CornerSamples,
    strength_factor: f64,
) -> Result<PeakEstimate, MissingSensorData> {
    let corners = samples.require_all()?;
    Ok(weighted_centroid(&corners, strength_factor).rounded())
}

/// Ungerundete WCL-Schätzung, intern für die IDW-Interpolation.
pub(crate) fn weighted_centroid(corners: &CornerValues, strength_factor: f64) -> PeakEstimate {
    let mut sum = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut max = f64::NEG_INFINITY;
    for (corner, value) in corners.labeled() {
        let (x, y) = corner.position();
        sum += value;
        sum_x += value * x;
        sum_y += value * y;
        max = max.max(value);
    }
    let denom = if sum.abs() < EPSILON { EPSILON } else { sum };
    PeakEstimate {
        x: sum_x / denom,
        y: sum_y / denom,
        value: max * strength_factor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Corner;
    use approx::assert_relative_eq;

    fn samples(d1: f64, d2: f64, d3: f64, d4: f64) -> CornerSamples {
        CornerSamples {
            d1: Some(d1),
            d2: Some(d2),
            d3: Some(d3),
            d4: Some(d4),
        }
    }

    #[test]
    fn equal_corners_put_the_peak_at_the_center() {
        let peak = estimate_peak(&samples(2.0, 2.0, 2.0, 2.0), PEAK_STRENGTH_FACTOR).unwrap();
        assert_relative_eq!(peak.x, 0.5);
        assert_relative_eq!(peak.y, 0.5);
        assert_relative_eq!(peak.value, 3.0);
    }

    #[test]
    fn peak_is_pulled_toward_the_dominant_corner() {
        // d4 dominiert, Schwerpunkt wandert Richtung (1, 1).
        let peak = estimate_peak(&samples(1.0, 1.0, 1.0, 7.0), PEAK_STRENGTH_FACTOR).unwrap();
        assert!(peak.x > 0.5 && peak.x < 1.0);
        assert!(peak.y > 0.5 && peak.y < 1.0);
        assert_relative_eq!(peak.value, 10.5);
    }

    #[test]
    fn coordinates_are_rounded_to_four_decimals() {
        let peak = estimate_peak(&samples(1.0, 2.0, 3.0, 4.0), PEAK_STRENGTH_FACTOR).unwrap();
        // peakX = (2 + 4) / 10, peakY = (3 + 4) / 10
        assert_relative_eq!(peak.x, 0.6);
        assert_relative_eq!(peak.y, 0.7);
        assert_relative_eq!(peak.value, 6.0);
    }

    #[test]
    fn zero_sum_uses_the_epsilon_denominator() {
        let corners = CornerValues::new(0.0, 0.0, 0.0, 0.0);
        let peak = weighted_centroid(&corners, PEAK_STRENGTH_FACTOR);
        // Entarteter Schwerpunkt, aber endlich.
        assert!(peak.x.is_finite());
        assert!(peak.y.is_finite());
        assert_relative_eq!(peak.value, 0.0);
    }

    #[test]
    fn missing_corner_fails_the_estimation() {
        let mut partial = samples(1.0, 2.0, 3.0, 4.0);
        partial.d1 = None;
        let err = estimate_peak(&partial, PEAK_STRENGTH_FACTOR).unwrap_err();
        assert_eq!(err.missing, vec![Corner::D1]);
    }
}

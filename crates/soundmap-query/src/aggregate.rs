//! Single-pass temporal aggregation over series row streams.
//!
//! Every aggregation here is a fold over one finite, already-sorted
//! input sequence. Nothing is retained across calls; the grid
//! accumulator lives exactly as long as one averaging request.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};
use soundmap_core::GRID_SIZE;
use soundmap_redis::{
    ByteGrid, PEAK_VALUE_FIELD, PEAK_X_FIELD, PEAK_Y_FIELD, QueryError, SeriesRow,
};

/// Samples per downsampling chunk.
pub const CHUNK_LEN: usize = 10;

/// One grouped peak snapshot. Fields are present only if the
/// corresponding row was seen for that timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakFrame {
    pub time: String,
    #[serde(rename = "peakX", skip_serializing_if = "Option::is_none")]
    pub peak_x: Option<f64>,
    #[serde(rename = "peakY", skip_serializing_if = "Option::is_none")]
    pub peak_y: Option<f64>,
    #[serde(rename = "peakValue", skip_serializing_if = "Option::is_none")]
    pub peak_value: Option<f64>,
}

impl PeakFrame {
    fn empty(time: &str) -> Self {
        PeakFrame {
            time: time.to_string(),
            peak_x: None,
            peak_y: None,
            peak_value: None,
        }
    }
}

/// Group peak scalar rows by their exact timestamp string.
///
/// The three peak fields of one snapshot share a timestamp; whichever
/// of them arrive are folded into one frame. Frames are emitted in
/// first-seen order, so a time-sorted input yields time-sorted frames.
/// Rows with unexpected fields or non-float values are flagged and
/// skipped, never passed through.
pub fn group_peak_frames<I>(rows: I) -> Result<Vec<PeakFrame>, QueryError>
where
    I: IntoIterator<Item = Result<SeriesRow, QueryError>>,
{
    // Explicit ordered map: frames in insertion order plus an index,
    // since hash map iteration order guarantees nothing.
    let mut frames: Vec<PeakFrame> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let row = row?;
        let Some(value) = row.value.as_float() else {
            warn!("skipping non-scalar peak row at {}", row.time);
            continue;
        };
        let slot = *index.entry(row.time.clone()).or_insert_with(|| {
            frames.push(PeakFrame::empty(&row.time));
            frames.len() - 1
        });
        let frame = &mut frames[slot];
        match row.field.as_str() {
            f if f == PEAK_X_FIELD => frame.peak_x = Some(value),
            f if f == PEAK_Y_FIELD => frame.peak_y = Some(value),
            f if f == PEAK_VALUE_FIELD => frame.peak_value = Some(value),
            other => warn!("skipping unexpected peak field '{}' at {}", other, row.time),
        }
    }
    Ok(frames)
}

/// One `{time, value}` sample of a scalar series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub time: String,
    pub value: f64,
}

/// One field's samples, in stream discovery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSeries {
    pub field: String,
    pub points: Vec<SeriesPoint>,
}

/// Split a mixed row stream into per-field series, fields ordered by
/// first appearance. Non-scalar rows are flagged and skipped.
pub fn group_by_field<I>(rows: I) -> Result<Vec<FieldSeries>, QueryError>
where
    I: IntoIterator<Item = Result<SeriesRow, QueryError>>,
{
    let mut series: Vec<FieldSeries> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let row = row?;
        let Some(value) = row.value.as_float() else {
            warn!("skipping non-scalar row in field '{}'", row.field);
            continue;
        };
        let slot = *index.entry(row.field.clone()).or_insert_with(|| {
            series.push(FieldSeries {
                field: row.field.clone(),
                points: Vec::new(),
            });
            series.len() - 1
        });
        series[slot].points.push(SeriesPoint {
            time: row.time,
            value,
        });
    }
    Ok(series)
}

/// Downsample a sample sequence by consecutive chunks of [`CHUNK_LEN`].
///
/// Each chunk becomes one point: the arithmetic mean of the values and
/// the timestamp of the chunk member at `floor(len / 2)`. The mid-chunk
/// nominal time deliberately stands in for a time-weighted centroid.
/// Output length is `ceil(n / CHUNK_LEN)`.
pub fn downsample_chunk_mean(points: &[SeriesPoint]) -> Vec<SeriesPoint> {
    points
        .chunks(CHUNK_LEN)
        .map(|chunk| {
            let mean = chunk.iter().map(|p| p.value).sum::<f64>() / chunk.len() as f64;
            SeriesPoint {
                // mittlerer Zeitstempel des Chunks
                time: chunk[chunk.len() / 2].time.clone(),
                value: mean,
            }
        })
        .collect()
}

/// Request-scoped elementwise sum over byte grids.
///
/// Allocated fresh per averaging call and consumed by [`finish`];
/// never shared or pooled across requests.
///
/// [`finish`]: GridAccumulator::finish
#[derive(Debug, Default)]
pub struct GridAccumulator {
    sum: [[u64; GRID_SIZE]; GRID_SIZE],
    count: u32,
}

impl GridAccumulator {
    pub fn new() -> Self {
        GridAccumulator::default()
    }

    pub fn add(&mut self, grid: &ByteGrid) {
        for (row, cells) in grid.0.iter().enumerate() {
            for (col, &cell) in cells.iter().enumerate() {
                self.sum[row][col] += u64::from(cell);
            }
        }
        self.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// The integer-rounded mean grid and the number of grids actually
    /// consumed. `None` when nothing was accumulated; an empty range is
    /// never conflated with a zero-valued grid.
    pub fn finish(self) -> Option<(ByteGrid, u32)> {
        if self.count == 0 {
            return None;
        }
        let mut mean = ByteGrid::zeroed();
        for (row, cells) in mean.0.iter_mut().enumerate() {
            for (col, cell) in cells.iter_mut().enumerate() {
                *cell = (self.sum[row][col] as f64 / self.count as f64).round() as u8;
            }
        }
        Some((mean, self.count))
    }
}

//! # Soundmap Query
//!
//! Query operations over the stored sound-field series: live and
//! historical peak frames, decoded heatmap snapshots, range averaging
//! and sensor-series downsampling, plus live interpolation of the
//! newest corner readings. Every operation fetches its own bounded row
//! stream, folds it in a single pass and returns a JSON-serializable
//! result; "no data in range" is `None`, never a zero-valued result.

use log::debug;
use serde::{Deserialize, Serialize};

use soundmap_core::{
    Corner, CornerSamples, GridValues, IdwParams, MissingSensorData, PeakEstimate,
    interpolate_bilinear, interpolate_idw,
};
use soundmap_redis::{
    ByteGrid, CodecError, QueryError, SENSOR_MEASUREMENT, SNAPSHOT_FIELD, SNAPSHOT_MEASUREMENT,
    SeriesQuery, SeriesReader, SeriesRow, SortOrder, TimeRange, decode_snapshot,
};

pub mod aggregate;

pub use aggregate::{
    CHUNK_LEN, FieldSeries, GridAccumulator, PeakFrame, SeriesPoint, downsample_chunk_mean,
    group_by_field, group_peak_frames,
};

use soundmap_redis::{PEAK_VALUE_FIELD, PEAK_X_FIELD, PEAK_Y_FIELD};

/// A query operation failed. "No data in range" is not an error and is
/// reported as `None` by the individual operations.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    MissingSensorData(#[from] MissingSensorData),
    #[error("invalid request parameters: {0}")]
    InvalidRequestParameters(String),
}

/// Validate caller-supplied range bounds before any store access.
fn require_bounds(start: Option<f64>, stop: Option<f64>) -> Result<(f64, f64), OpError> {
    let missing: Vec<&str> = [("start", start), ("stop", stop)]
        .iter()
        .filter(|(_, bound)| bound.is_none())
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        return Err(OpError::InvalidRequestParameters(format!(
            "missing bounds: {}",
            missing.join(", ")
        )));
    }
    let (start, stop) = (start.unwrap_or_default(), stop.unwrap_or_default());
    if !start.is_finite() || !stop.is_finite() {
        return Err(OpError::InvalidRequestParameters(
            "bounds must be finite epoch seconds".to_string(),
        ));
    }
    Ok((start, stop))
}

/// Oldest and newest timestamp of a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRange {
    pub oldest: String,
    pub newest: String,
}

/// One decoded heatmap snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFrame {
    pub time: String,
    pub grid: ByteGrid,
}

/// Elementwise mean over the snapshots of a range, with the consumed
/// count and the original bounds for traceability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotAverage {
    pub start: f64,
    pub stop: f64,
    pub count: u32,
    pub grid: ByteGrid,
}

/// A freshly interpolated field from the newest corner readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub time: String,
    pub grid: GridValues,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak: Option<PeakEstimate>,
}

fn first_time(
    reader: &mut dyn SeriesReader,
    measurement: &str,
    sort: SortOrder,
) -> Result<Option<String>, OpError> {
    let mut query = SeriesQuery::new(measurement).limit(1);
    if sort == SortOrder::Descending {
        query = query.descending();
    }
    let mut rows = reader.iterate(&query)?;
    match rows.next() {
        Some(row) => Ok(Some(row?.time)),
        None => Ok(None),
    }
}

/// Oldest and newest timestamp of a measurement, or `None` when the
/// measurement holds no rows at all.
pub fn data_range(
    reader: &mut dyn SeriesReader,
    measurement: &str,
) -> Result<Option<DataRange>, OpError> {
    let oldest = first_time(reader, measurement, SortOrder::Ascending)?;
    let newest = first_time(reader, measurement, SortOrder::Descending)?;
    Ok(match (oldest, newest) {
        (Some(oldest), Some(newest)) => Some(DataRange { oldest, newest }),
        _ => None,
    })
}

/// Per-field sensor series over absolute bounds, downsampled by
/// chunked mean. Fields absent from the range are absent from the
/// output; an empty range is `None`.
pub fn sensor_range(
    reader: &mut dyn SeriesReader,
    start: Option<f64>,
    stop: Option<f64>,
) -> Result<Option<Vec<FieldSeries>>, OpError> {
    let (start, stop) = require_bounds(start, stop)?;
    let query = SeriesQuery::new(SENSOR_MEASUREMENT)
        .range(TimeRange::between(start, stop))
        .descending();
    let mut series = group_by_field(reader.iterate(&query)?)?;
    if series.is_empty() {
        return Ok(None);
    }
    for entry in &mut series {
        entry.points = downsample_chunk_mean(&entry.points);
    }
    Ok(Some(series))
}

/// Per-field sensor series over a trailing window, undownsampled,
/// oldest first.
pub fn live_sensors(
    reader: &mut dyn SeriesReader,
    window_seconds: f64,
) -> Result<Option<Vec<FieldSeries>>, OpError> {
    let query = SeriesQuery::new(SENSOR_MEASUREMENT).range(TimeRange::last(window_seconds));
    let series = group_by_field(reader.iterate(&query)?)?;
    Ok(if series.is_empty() { None } else { Some(series) })
}

fn decode_snapshot_row(row: SeriesRow) -> Result<SnapshotFrame, OpError> {
    let payload = row.value.as_text().ok_or(CodecError::MissingPayload)?;
    Ok(SnapshotFrame {
        grid: decode_snapshot(payload)?,
        time: row.time,
    })
}

/// The newest stored snapshot within the lookback window, decoded.
///
/// Consumes exactly one row and drops the stream: the newest-first,
/// limit-1 query makes the first row the answer.
pub fn latest_snapshot(
    reader: &mut dyn SeriesReader,
    lookback_seconds: f64,
) -> Result<Option<SnapshotFrame>, OpError> {
    let query = SeriesQuery::new(SNAPSHOT_MEASUREMENT)
        .field(SNAPSHOT_FIELD)
        .range(TimeRange::last(lookback_seconds))
        .descending()
        .limit(1);
    let mut rows = reader.iterate(&query)?;
    match rows.next() {
        Some(row) => decode_snapshot_row(row?).map(Some),
        None => Ok(None),
    }
}

fn collect_snapshots(
    reader: &mut dyn SeriesReader,
    query: &SeriesQuery,
) -> Result<Option<Vec<SnapshotFrame>>, OpError> {
    let mut frames = Vec::new();
    for row in reader.iterate(query)? {
        frames.push(decode_snapshot_row(row?)?);
    }
    Ok(if frames.is_empty() { None } else { Some(frames) })
}

/// All decoded snapshots within absolute bounds, newest first.
pub fn snapshots_range(
    reader: &mut dyn SeriesReader,
    start: Option<f64>,
    stop: Option<f64>,
) -> Result<Option<Vec<SnapshotFrame>>, OpError> {
    let (start, stop) = require_bounds(start, stop)?;
    let query = SeriesQuery::new(SNAPSHOT_MEASUREMENT)
        .field(SNAPSHOT_FIELD)
        .range(TimeRange::between(start, stop))
        .descending();
    collect_snapshots(reader, &query)
}

/// Up to `limit` decoded snapshots from the trailing window, newest
/// first.
pub fn recent_snapshots(
    reader: &mut dyn SeriesReader,
    lookback_seconds: f64,
    limit: usize,
) -> Result<Option<Vec<SnapshotFrame>>, OpError> {
    let query = SeriesQuery::new(SNAPSHOT_MEASUREMENT)
        .field(SNAPSHOT_FIELD)
        .range(TimeRange::last(lookback_seconds))
        .descending()
        .limit(limit);
    collect_snapshots(reader, &query)
}

/// Elementwise mean over every snapshot within absolute bounds.
///
/// The accumulator is scoped to this call; the reported count is the
/// number of snapshots actually consumed from the stream. `None` when
/// the range holds no snapshots, which is distinct from a zero grid.
pub fn average_snapshot(
    reader: &mut dyn SeriesReader,
    start: Option<f64>,
    stop: Option<f64>,
) -> Result<Option<SnapshotAverage>, OpError> {
    let (start, stop) = require_bounds(start, stop)?;
    let query = SeriesQuery::new(SNAPSHOT_MEASUREMENT)
        .field(SNAPSHOT_FIELD)
        .range(TimeRange::between(start, stop))
        .descending();

    let mut acc = GridAccumulator::new();
    for row in reader.iterate(&query)? {
        let frame = decode_snapshot_row(row?)?;
        acc.add(&frame.grid);
    }
    debug!("snapshot average over [{start}, {stop}]: {} grids", acc.count());
    Ok(acc.finish().map(|(grid, count)| SnapshotAverage {
        start,
        stop,
        count,
        grid,
    }))
}

fn peak_query(range: TimeRange, limit: Option<usize>) -> SeriesQuery {
    let mut query = SeriesQuery::new(SNAPSHOT_MEASUREMENT)
        .fields([PEAK_X_FIELD, PEAK_Y_FIELD, PEAK_VALUE_FIELD])
        .range(range)
        .descending();
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    query
}

/// Grouped peak frames within absolute bounds, newest first.
pub fn peaks_range(
    reader: &mut dyn SeriesReader,
    start: Option<f64>,
    stop: Option<f64>,
) -> Result<Option<Vec<PeakFrame>>, OpError> {
    let (start, stop) = require_bounds(start, stop)?;
    let frames = group_peak_frames(reader.iterate(&peak_query(
        TimeRange::between(start, stop),
        None,
    ))?)?;
    Ok(if frames.is_empty() { None } else { Some(frames) })
}

/// Up to `limit` grouped peak frames per field from the trailing
/// window, newest first.
pub fn recent_peaks(
    reader: &mut dyn SeriesReader,
    lookback_seconds: f64,
    limit: usize,
) -> Result<Option<Vec<PeakFrame>>, OpError> {
    let frames = group_peak_frames(reader.iterate(&peak_query(
        TimeRange::last(lookback_seconds),
        Some(limit),
    ))?)?;
    Ok(if frames.is_empty() { None } else { Some(frames) })
}

/// The single newest grouped peak frame from the trailing window.
///
/// Relies on the newest-first, limit-1-per-field query: the three peak
/// fields of the newest snapshot fold into the first frame.
pub fn live_peak(
    reader: &mut dyn SeriesReader,
    lookback_seconds: f64,
) -> Result<Option<PeakFrame>, OpError> {
    let frames = group_peak_frames(reader.iterate(&peak_query(
        TimeRange::last(lookback_seconds),
        Some(1),
    ))?)?;
    Ok(frames.into_iter().next())
}

fn latest_corner_samples(
    reader: &mut dyn SeriesReader,
    lookback_seconds: f64,
) -> Result<Option<(String, CornerSamples)>, OpError> {
    let query = SeriesQuery::new(SENSOR_MEASUREMENT)
        .fields(Corner::ALL.map(Corner::key))
        .range(TimeRange::last(lookback_seconds))
        .descending()
        .limit(1);

    let mut samples = CornerSamples::default();
    let mut newest_time: Option<String> = None;
    for row in reader.iterate(&query)? {
        let row = row?;
        let Some(corner) = Corner::from_key(&row.field) else {
            continue;
        };
        let Some(value) = row.value.as_float() else {
            continue;
        };
        samples.set(corner, value);
        // Newest-first merge: the first row carries the frame time.
        newest_time.get_or_insert(row.time);
    }
    match newest_time {
        Some(time) => Ok(Some((time, samples))),
        None => Ok(None),
    }
}

/// Bilinear interpolation of the newest reading of each corner sensor.
///
/// `None` when no corner has a reading in the window; fails with
/// [`MissingSensorData`] when only some corners have one.
pub fn live_field_bilinear(
    reader: &mut dyn SeriesReader,
    lookback_seconds: f64,
) -> Result<Option<FieldSnapshot>, OpError> {
    let Some((time, samples)) = latest_corner_samples(reader, lookback_seconds)? else {
        return Ok(None);
    };
    let grid = interpolate_bilinear(&samples)?;
    Ok(Some(FieldSnapshot {
        time,
        grid,
        peak: None,
    }))
}

/// IDW interpolation (with virtual peak) of the newest reading of each
/// corner sensor. Same no-data and missing-corner behavior as
/// [`live_field_bilinear`].
pub fn live_field_idw(
    reader: &mut dyn SeriesReader,
    lookback_seconds: f64,
    params: &IdwParams,
) -> Result<Option<FieldSnapshot>, OpError> {
    let Some((time, samples)) = latest_corner_samples(reader, lookback_seconds)? else {
        return Ok(None);
    };
    let field = interpolate_idw(&samples, params)?;
    Ok(Some(FieldSnapshot {
        time,
        grid: field.grid,
        peak: Some(field.peak),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use soundmap_redis::{MemoryReader, SeriesValue, encode_snapshot};

    const NOW: f64 = 1_000.0;

    fn reader() -> MemoryReader {
        MemoryReader::new(NOW)
    }

    fn push_snapshot(reader: &mut MemoryReader, time: &str, score: f64, fill: u8) {
        let grid = ByteGrid([[fill; 10]; 10]);
        reader.push(
            SNAPSHOT_MEASUREMENT,
            SNAPSHOT_FIELD,
            time,
            score,
            SeriesValue::Text(encode_snapshot(&grid)),
        );
    }

    fn push_peak(reader: &mut MemoryReader, time: &str, score: f64, x: f64, y: f64, value: f64) {
        reader.push(
            SNAPSHOT_MEASUREMENT,
            PEAK_X_FIELD,
            time,
            score,
            SeriesValue::Float(x),
        );
        reader.push(
            SNAPSHOT_MEASUREMENT,
            PEAK_Y_FIELD,
            time,
            score,
            SeriesValue::Float(y),
        );
        reader.push(
            SNAPSHOT_MEASUREMENT,
            PEAK_VALUE_FIELD,
            time,
            score,
            SeriesValue::Float(value),
        );
    }

    #[test]
    fn data_range_reports_oldest_and_newest() {
        let mut reader = reader();
        reader.push(SENSOR_MEASUREMENT, "d1", "t1", 1.0, SeriesValue::Float(0.0));
        reader.push(SENSOR_MEASUREMENT, "d2", "t2", 2.0, SeriesValue::Float(0.0));
        reader.push(SENSOR_MEASUREMENT, "d1", "t3", 3.0, SeriesValue::Float(0.0));

        let range = data_range(&mut reader, SENSOR_MEASUREMENT).unwrap().unwrap();
        assert_eq!(range.oldest, "t1");
        assert_eq!(range.newest, "t3");
    }

    #[test]
    fn data_range_of_an_empty_measurement_is_none() {
        assert!(data_range(&mut reader(), SENSOR_MEASUREMENT).unwrap().is_none());
    }

    #[test]
    fn sensor_range_requires_both_bounds() {
        let err = sensor_range(&mut reader(), Some(1.0), None).unwrap_err();
        match err {
            OpError::InvalidRequestParameters(msg) => assert!(msg.contains("stop")),
            other => panic!("expected InvalidRequestParameters, got {other:?}"),
        }
    }

    #[test]
    fn sensor_range_downsamples_each_field() {
        let mut reader = reader();
        for i in 0..12 {
            reader.push(
                SENSOR_MEASUREMENT,
                "d1",
                &format!("t{i}"),
                i as f64,
                SeriesValue::Float(1.0),
            );
        }
        let series = sensor_range(&mut reader, Some(0.0), Some(100.0))
            .unwrap()
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].field, "d1");
        assert_eq!(series[0].points.len(), 2);
    }

    #[test]
    fn sensor_range_with_no_rows_is_none() {
        let outcome = sensor_range(&mut reader(), Some(0.0), Some(100.0)).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn latest_snapshot_takes_only_the_newest_row() {
        let mut reader = reader();
        push_snapshot(&mut reader, "t1", NOW - 2.0, 1);
        push_snapshot(&mut reader, "t2", NOW - 1.0, 2);

        let frame = latest_snapshot(&mut reader, 10.0).unwrap().unwrap();
        assert_eq!(frame.time, "t2");
        assert_eq!(frame.grid, ByteGrid([[2; 10]; 10]));
    }

    #[test]
    fn latest_snapshot_outside_the_window_is_none() {
        let mut reader = reader();
        push_snapshot(&mut reader, "t1", NOW - 100.0, 1);
        assert!(latest_snapshot(&mut reader, 10.0).unwrap().is_none());
    }

    #[test]
    fn snapshots_range_decodes_newest_first() {
        let mut reader = reader();
        push_snapshot(&mut reader, "t1", 10.0, 1);
        push_snapshot(&mut reader, "t2", 20.0, 2);

        let frames = snapshots_range(&mut reader, Some(0.0), Some(30.0))
            .unwrap()
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].time, "t2");
        assert_eq!(frames[1].time, "t1");
    }

    #[test]
    fn recent_snapshots_honors_the_limit() {
        let mut reader = reader();
        for i in 0..5 {
            push_snapshot(&mut reader, &format!("t{i}"), NOW - 5.0 + i as f64, i as u8);
        }
        let frames = recent_snapshots(&mut reader, 60.0, 3).unwrap().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].time, "t4");
    }

    #[test]
    fn average_snapshot_reports_mean_count_and_bounds() {
        let mut reader = reader();
        push_snapshot(&mut reader, "t1", 10.0, 10);
        push_snapshot(&mut reader, "t2", 20.0, 20);

        let avg = average_snapshot(&mut reader, Some(0.0), Some(30.0))
            .unwrap()
            .unwrap();
        assert_eq!(avg.count, 2);
        assert_eq!(avg.start, 0.0);
        assert_eq!(avg.stop, 30.0);
        assert_eq!(avg.grid, ByteGrid([[15; 10]; 10]));
    }

    #[test]
    fn average_snapshot_of_an_empty_range_is_none_not_zeros() {
        let avg = average_snapshot(&mut reader(), Some(0.0), Some(30.0)).unwrap();
        assert!(avg.is_none());
    }

    #[test]
    fn average_counts_only_the_rows_actually_consumed() {
        let mut reader = reader();
        push_snapshot(&mut reader, "t1", 10.0, 7);
        push_snapshot(&mut reader, "t2", 20.0, 7);

        // First-wins consumption: break after one row even though more
        // are available upstream.
        let query = SeriesQuery::new(SNAPSHOT_MEASUREMENT)
            .field(SNAPSHOT_FIELD)
            .range(TimeRange::between(0.0, 30.0))
            .descending();
        let mut acc = GridAccumulator::new();
        for row in reader.iterate(&query).unwrap().take(1) {
            let frame = decode_snapshot_row(row.unwrap()).unwrap();
            acc.add(&frame.grid);
        }
        let (grid, count) = acc.finish().unwrap();
        assert_eq!(count, 1);
        assert_eq!(grid, ByteGrid([[7; 10]; 10]));
    }

    #[test]
    fn corrupt_snapshot_aborts_the_average() {
        let mut reader = reader();
        push_snapshot(&mut reader, "t1", 10.0, 1);
        reader.push(
            SNAPSHOT_MEASUREMENT,
            SNAPSHOT_FIELD,
            "t2",
            20.0,
            SeriesValue::Text("dG9vIHNob3J0".to_string()),
        );
        assert!(average_snapshot(&mut reader, Some(0.0), Some(30.0)).is_err());
    }

    #[test]
    fn peaks_range_groups_by_timestamp() {
        let mut reader = reader();
        push_peak(&mut reader, "t1", 10.0, 0.1, 0.2, 3.0);
        push_peak(&mut reader, "t2", 20.0, 0.4, 0.5, 6.0);

        let frames = peaks_range(&mut reader, Some(0.0), Some(30.0))
            .unwrap()
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].time, "t2");
        assert_eq!(frames[0].peak_x, Some(0.4));
        assert_eq!(frames[1].time, "t1");
        assert_eq!(frames[1].peak_value, Some(3.0));
    }

    #[test]
    fn live_peak_folds_the_newest_frame_only() {
        let mut reader = reader();
        push_peak(&mut reader, "t1", NOW - 2.0, 0.1, 0.1, 1.0);
        push_peak(&mut reader, "t2", NOW - 1.0, 0.9, 0.8, 7.0);

        let frame = live_peak(&mut reader, 10.0).unwrap().unwrap();
        assert_eq!(frame.time, "t2");
        assert_eq!(frame.peak_x, Some(0.9));
        assert_eq!(frame.peak_y, Some(0.8));
        assert_eq!(frame.peak_value, Some(7.0));
    }

    #[test]
    fn live_peak_with_no_rows_is_none() {
        assert!(live_peak(&mut reader(), 10.0).unwrap().is_none());
    }

    #[test]
    fn live_field_interpolates_the_newest_corner_readings() {
        let mut reader = reader();
        for (field, value) in [("d1", 2.0), ("d2", 2.0), ("d3", 2.0), ("d4", 2.0)] {
            // Older readings that must be superseded by the newest ones.
            reader.push(
                SENSOR_MEASUREMENT,
                field,
                "t_old",
                NOW - 5.0,
                SeriesValue::Float(99.0),
            );
            reader.push(
                SENSOR_MEASUREMENT,
                field,
                "t_new",
                NOW - 1.0,
                SeriesValue::Float(value),
            );
        }

        let snapshot = live_field_bilinear(&mut reader, 10.0).unwrap().unwrap();
        assert_eq!(snapshot.time, "t_new");
        assert_eq!(snapshot.grid[0][0], 2.0);
        assert_eq!(snapshot.grid[5][5], 2.0);
        assert!(snapshot.peak.is_none());

        let snapshot = live_field_idw(&mut reader, 10.0, &IdwParams::default())
            .unwrap()
            .unwrap();
        let peak = snapshot.peak.unwrap();
        assert_eq!(peak.x, 0.5);
        assert_eq!(peak.y, 0.5);
        assert_eq!(peak.value, 3.0);
    }

    #[test]
    fn live_field_with_a_silent_corner_fails_with_missing_sensor_data() {
        let mut reader = reader();
        for field in ["d1", "d2", "d4"] {
            reader.push(
                SENSOR_MEASUREMENT,
                field,
                "t1",
                NOW - 1.0,
                SeriesValue::Float(1.0),
            );
        }
        let err = live_field_bilinear(&mut reader, 10.0).unwrap_err();
        match err {
            OpError::MissingSensorData(inner) => {
                assert_eq!(inner.missing, vec![Corner::D3]);
            }
            other => panic!("expected MissingSensorData, got {other:?}"),
        }
    }

    #[test]
    fn live_field_with_no_readings_is_none() {
        assert!(live_field_bilinear(&mut reader(), 10.0).unwrap().is_none());
    }
}

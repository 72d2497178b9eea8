//! # Soundmap Redis
//!
//! This crate defines the time-series storage schema for the sound-field
//! data and provides functions for interacting with the Redis database.
//! Series are kept in sorted sets scored by epoch seconds, one key per
//! measurement/field pair, members JSON-encoded.

use anyhow::Result;
use redis::{Commands, Connection};
use soundmap_core::PeakEstimate;

pub mod codec;
pub mod reader;

pub use codec::{ByteGrid, CodecError, SNAPSHOT_LEN, decode_snapshot, encode_snapshot};
pub use reader::{
    MemoryReader, QueryError, RangeBound, RedisSeriesReader, RowStream, SeriesQuery, SeriesReader,
    SeriesRow, SeriesValue, SortOrder, TimeRange, epoch_seconds,
};

use crate::reader::StoredSample;

// --- Measurement Schema ---

/// Measurement holding the raw corner sensor scalars (`d1`..`d4`).
pub const SENSOR_MEASUREMENT: &str = "sensor_data";

/// Measurement holding heatmap snapshots and their peak scalars.
pub const SNAPSHOT_MEASUREMENT: &str = "heatmap_arr";

/// Field carrying the base64 snapshot payload.
pub const SNAPSHOT_FIELD: &str = "base64";

/// Peak scalar fields stored alongside every snapshot.
pub const PEAK_X_FIELD: &str = "peakX";
pub const PEAK_Y_FIELD: &str = "peakY";
pub const PEAK_VALUE_FIELD: &str = "peakValue";

// --- Key Builders ---

pub fn series_key(measurement: &str, field: &str) -> String {
    format!("ts:{}:{}", measurement, field)
}

// --- Write Functions ---

fn push_sample(
    con: &mut Connection,
    measurement: &str,
    field: &str,
    time: &str,
    score: f64,
    value: SeriesValue,
) -> Result<()> {
    let member = serde_json::to_string(&StoredSample {
        time: time.to_string(),
        value,
    })?;
    con.zadd::<_, _, _, ()>(series_key(measurement, field), member, score)?;
    Ok(())
}

/// Append one scalar sample to a series.
pub fn write_float_sample(
    con: &mut Connection,
    measurement: &str,
    field: &str,
    time: &str,
    score: f64,
    value: f64,
) -> Result<()> {
    push_sample(con, measurement, field, time, score, SeriesValue::Float(value))
}

/// Store one heatmap snapshot: the base64 grid payload plus the three
/// peak scalar fields, all under the same timestamp.
pub fn write_snapshot(
    con: &mut Connection,
    time: &str,
    score: f64,
    grid: &ByteGrid,
    peak: &PeakEstimate,
) -> Result<()> {
    push_sample(
        con,
        SNAPSHOT_MEASUREMENT,
        SNAPSHOT_FIELD,
        time,
        score,
        SeriesValue::Text(encode_snapshot(grid)),
    )?;
    write_float_sample(con, SNAPSHOT_MEASUREMENT, PEAK_X_FIELD, time, score, peak.x)?;
    write_float_sample(con, SNAPSHOT_MEASUREMENT, PEAK_Y_FIELD, time, score, peak.y)?;
    write_float_sample(
        con,
        SNAPSHOT_MEASUREMENT,
        PEAK_VALUE_FIELD,
        time,
        score,
        peak.value,
    )?;
    Ok(())
}

//! Time-ordered series reads.
//!
//! [`SeriesReader`] is the narrow read contract toward the time-series
//! store: describe a query, get back a lazy, time-sorted row stream.
//! Early termination is dropping the stream; mid-stream decode failures
//! surface as `Err` items so callers see one uniform failure path.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use redis::{Commands, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::series_key;

/// One typed row from the time-series store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub field: String,
    pub value: SeriesValue,
    /// Opaque RFC 3339 timestamp string. Grouping downstream is by the
    /// exact string, not by parsed instants.
    pub time: String,
}

/// Row payload, validated at the boundary instead of passed through as
/// a dynamic map. Scalars are floats; snapshot rows carry base64 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesValue {
    Float(f64),
    Text(String),
}

impl SeriesValue {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            SeriesValue::Float(v) => Some(*v),
            SeriesValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SeriesValue::Float(_) => None,
            SeriesValue::Text(t) => Some(t),
        }
    }
}

/// One bound of a query time range, resolved against "now" at read time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RangeBound {
    /// No bound on this side.
    Unbounded,
    /// This many seconds before now.
    Relative(f64),
    /// Absolute epoch seconds.
    At(f64),
}

impl RangeBound {
    fn resolve(self, now: f64, unbounded: f64) -> f64 {
        match self {
            RangeBound::Unbounded => unbounded,
            RangeBound::Relative(seconds) => now - seconds,
            RangeBound::At(epoch) => epoch,
        }
    }
}

/// Query time range in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: RangeBound,
    pub stop: RangeBound,
}

impl TimeRange {
    /// The full history of a series.
    pub fn all() -> Self {
        TimeRange {
            start: RangeBound::Unbounded,
            stop: RangeBound::Unbounded,
        }
    }

    /// The trailing window of the given length, up to now.
    pub fn last(seconds: f64) -> Self {
        TimeRange {
            start: RangeBound::Relative(seconds),
            stop: RangeBound::Unbounded,
        }
    }

    /// Absolute bounds in epoch seconds, inclusive.
    pub fn between(start: f64, stop: f64) -> Self {
        TimeRange {
            start: RangeBound::At(start),
            stop: RangeBound::At(stop),
        }
    }

    /// Resolve both bounds against the given clock reading.
    pub fn resolve(&self, now: f64) -> (f64, f64) {
        (
            self.start.resolve(now, f64::NEG_INFINITY),
            self.stop.resolve(now, f64::INFINITY),
        )
    }
}

/// Sort order of the returned row stream, by time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Description of one series read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesQuery {
    pub measurement: String,
    /// Field filter, OR-combined. Empty means every field of the
    /// measurement.
    pub fields: Vec<String>,
    pub range: TimeRange,
    pub sort: SortOrder,
    /// Row limit, applied per field series before merging.
    pub limit: Option<usize>,
}

impl SeriesQuery {
    pub fn new(measurement: &str) -> Self {
        SeriesQuery {
            measurement: measurement.to_string(),
            fields: Vec::new(),
            range: TimeRange::all(),
            sort: SortOrder::Ascending,
            limit: None,
        }
    }

    pub fn field(mut self, field: &str) -> Self {
        self.fields.push(field.to_string());
        self
    }

    pub fn fields<'a>(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        self.fields.extend(fields.into_iter().map(str::to_string));
        self
    }

    pub fn range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn descending(mut self) -> Self {
        self.sort = SortOrder::Descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A series read failed, before the first row or mid-stream.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("time-series backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("malformed record in {key}: {reason}")]
    MalformedRecord { key: String, reason: String },
}

/// Lazy, time-sorted row stream. Dropping it releases the read.
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<SeriesRow, QueryError>> + 'a>;

/// Narrow read contract toward the time-series store.
pub trait SeriesReader {
    fn iterate(&mut self, query: &SeriesQuery) -> Result<RowStream<'_>, QueryError>;
}

/// Current wall clock in epoch seconds.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// Stored member layout inside the sorted sets.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredSample {
    pub time: String,
    pub value: SeriesValue,
}

/// [`SeriesReader`] over the Redis sorted-set schema.
///
/// Every measurement/field pair is one sorted set (`ts:<m>:<field>`)
/// scored by epoch seconds, members JSON-encoded. Range reads map to
/// `ZRANGEBYSCORE`/`ZREVRANGEBYSCORE` with the per-field limit pushed
/// down to the server.
pub struct RedisSeriesReader {
    con: Connection,
    clock: fn() -> f64,
}

impl RedisSeriesReader {
    pub fn new(con: Connection) -> Self {
        RedisSeriesReader {
            con,
            clock: epoch_seconds,
        }
    }

    /// Inject a deterministic clock for relative-range resolution.
    pub fn with_clock(con: Connection, clock: fn() -> f64) -> Self {
        RedisSeriesReader { con, clock }
    }

    fn discover_fields(&mut self, measurement: &str) -> Result<Vec<String>, QueryError> {
        let keys: Vec<String> = self.con.keys(format!("ts:{measurement}:*"))?;
        let mut fields: Vec<String> = keys
            .into_iter()
            .filter_map(|k| k.rsplit(':').next().map(str::to_string))
            .collect();
        fields.sort();
        fields.dedup();
        Ok(fields)
    }
}

impl SeriesReader for RedisSeriesReader {
    fn iterate(&mut self, query: &SeriesQuery) -> Result<RowStream<'_>, QueryError> {
        let (min, max) = query.range.resolve((self.clock)());
        debug!(
            "series read: measurement={} fields={:?} range=({min}, {max}) sort={:?} limit={:?}",
            query.measurement, query.fields, query.sort, query.limit
        );

        let fields = if query.fields.is_empty() {
            self.discover_fields(&query.measurement)?
        } else {
            query.fields.clone()
        };

        let mut entries: Vec<(f64, String, String)> = Vec::new();
        for field in &fields {
            let key = series_key(&query.measurement, field);
            let members: Vec<(String, f64)> = match (query.sort, query.limit) {
                (SortOrder::Ascending, None) => {
                    self.con.zrangebyscore_withscores(&key, min, max)?
                }
                (SortOrder::Ascending, Some(n)) => {
                    self.con
                        .zrangebyscore_limit_withscores(&key, min, max, 0, n as isize)?
                }
                (SortOrder::Descending, None) => {
                    self.con.zrevrangebyscore_withscores(&key, max, min)?
                }
                (SortOrder::Descending, Some(n)) => {
                    self.con
                        .zrevrangebyscore_limit_withscores(&key, max, min, 0, n as isize)?
                }
            };
            for (member, score) in members {
                entries.push((score, field.clone(), member));
            }
        }

        sort_merged(&mut entries, query.sort);

        let measurement = query.measurement.clone();
        Ok(Box::new(entries.into_iter().map(move |(_, field, member)| {
            parse_member(&measurement, field, &member)
        })))
    }
}

pub(crate) fn sort_merged(entries: &mut [(f64, String, String)], sort: SortOrder) {
    entries.sort_by(|a, b| {
        let ord = a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal);
        match sort {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    });
}

fn parse_member(measurement: &str, field: String, member: &str) -> Result<SeriesRow, QueryError> {
    let sample: StoredSample =
        serde_json::from_str(member).map_err(|e| QueryError::MalformedRecord {
            key: series_key(measurement, &field),
            reason: e.to_string(),
        })?;
    Ok(SeriesRow {
        field,
        value: sample.value,
        time: sample.time,
    })
}

/// In-memory [`SeriesReader`] with the same filter, sort and per-field
/// limit semantics as the Redis-backed one. Used in unit tests and for
/// offline replay.
pub struct MemoryReader {
    samples: Vec<MemorySample>,
    now: f64,
}

struct MemorySample {
    measurement: String,
    field: String,
    score: f64,
    row: SeriesRow,
}

impl MemoryReader {
    pub fn new(now: f64) -> Self {
        MemoryReader {
            samples: Vec::new(),
            now,
        }
    }

    pub fn push(
        &mut self,
        measurement: &str,
        field: &str,
        time: &str,
        score: f64,
        value: SeriesValue,
    ) {
        self.samples.push(MemorySample {
            measurement: measurement.to_string(),
            field: field.to_string(),
            score,
            row: SeriesRow {
                field: field.to_string(),
                value,
                time: time.to_string(),
            },
        });
    }
}

impl SeriesReader for MemoryReader {
    fn iterate(&mut self, query: &SeriesQuery) -> Result<RowStream<'_>, QueryError> {
        let (min, max) = query.range.resolve(self.now);

        // Field universe: the filter, or every field in first-seen order.
        let mut fields: Vec<&str> = Vec::new();
        if query.fields.is_empty() {
            for sample in &self.samples {
                if sample.measurement == query.measurement
                    && !fields.contains(&sample.field.as_str())
                {
                    fields.push(&sample.field);
                }
            }
        } else {
            fields.extend(query.fields.iter().map(String::as_str));
        }

        let mut entries: Vec<(f64, SeriesRow)> = Vec::new();
        for field in fields {
            let mut matching: Vec<(f64, SeriesRow)> = self
                .samples
                .iter()
                .filter(|s| {
                    s.measurement == query.measurement
                        && s.field == field
                        && s.score >= min
                        && s.score <= max
                })
                .map(|s| (s.score, s.row.clone()))
                .collect();
            matching.sort_by(|a, b| {
                let ord = a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal);
                match query.sort {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                }
            });
            if let Some(limit) = query.limit {
                matching.truncate(limit);
            }
            entries.extend(matching);
        }

        entries.sort_by(|a, b| {
            let ord = a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal);
            match query.sort {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        });

        Ok(Box::new(entries.into_iter().map(|(_, row)| Ok(row))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_with_floats() -> MemoryReader {
        let mut reader = MemoryReader::new(1000.0);
        reader.push("sensor_data", "d1", "t10", 10.0, SeriesValue::Float(1.0));
        reader.push("sensor_data", "d1", "t20", 20.0, SeriesValue::Float(2.0));
        reader.push("sensor_data", "d2", "t15", 15.0, SeriesValue::Float(5.0));
        reader.push("other", "d1", "t12", 12.0, SeriesValue::Float(9.0));
        reader
    }

    #[test]
    fn rows_merge_time_sorted_across_fields() {
        let mut reader = reader_with_floats();
        let rows: Vec<SeriesRow> = reader
            .iterate(&SeriesQuery::new("sensor_data"))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let times: Vec<&str> = rows.iter().map(|r| r.time.as_str()).collect();
        assert_eq!(times, vec!["t10", "t15", "t20"]);
    }

    #[test]
    fn descending_sort_reverses_the_stream() {
        let mut reader = reader_with_floats();
        let rows: Vec<SeriesRow> = reader
            .iterate(&SeriesQuery::new("sensor_data").descending())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let times: Vec<&str> = rows.iter().map(|r| r.time.as_str()).collect();
        assert_eq!(times, vec!["t20", "t15", "t10"]);
    }

    #[test]
    fn limit_applies_per_field_series() {
        let mut reader = reader_with_floats();
        let rows: Vec<SeriesRow> = reader
            .iterate(&SeriesQuery::new("sensor_data").descending().limit(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        // One newest row per field, merged newest-first.
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].time, "t20");
        assert_eq!(rows[0].field, "d1");
        assert_eq!(rows[1].time, "t15");
        assert_eq!(rows[1].field, "d2");
    }

    #[test]
    fn field_filter_and_range_restrict_the_stream() {
        let mut reader = reader_with_floats();
        let query = SeriesQuery::new("sensor_data")
            .field("d1")
            .range(TimeRange::between(15.0, 30.0));
        let rows: Vec<SeriesRow> = reader
            .iterate(&query)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time, "t20");
    }

    #[test]
    fn relative_range_resolves_against_the_injected_clock() {
        let mut reader = reader_with_floats();
        // now = 1000, so a 985-second window starts at score 15.
        let query = SeriesQuery::new("sensor_data").range(TimeRange::last(985.0));
        let rows: Vec<SeriesRow> = reader
            .iterate(&query)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].time, "t15");
    }

    #[test]
    fn early_break_stops_consuming_the_stream() {
        let mut reader = reader_with_floats();
        let mut stream = reader
            .iterate(&SeriesQuery::new("sensor_data").descending())
            .unwrap();
        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.time, "t20");
        drop(stream);
    }

    #[test]
    fn stored_sample_json_shape() {
        let sample = StoredSample {
            time: "2025-07-21T20:00:00Z".to_string(),
            value: SeriesValue::Float(3.25),
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"time":"2025-07-21T20:00:00Z","value":3.25}"#);

        let text: StoredSample =
            serde_json::from_str(r#"{"time":"t","value":"AAECgw=="}"#).unwrap();
        assert_eq!(text.value.as_text(), Some("AAECgw=="));
    }
}

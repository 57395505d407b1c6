//! Minute-flow builder (C1).
//!
//! Buckets raw entry/exit timestamps onto a dense, contiguous UTC minute
//! grid. This is the only stage that ever sees raw timestamp strings; every
//! later stage works on plain `f64` arrays indexed by minute.

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

/// A dense, contiguous minute grid with measured entry/exit counts.
///
/// `timestamps[k] == timestamps[0] + k * 60s` for every `k`. Built once by
/// [`build_minute_grid`] and treated as immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct MinuteGrid {
    pub timestamps: Vec<DateTime<Utc>>,
    pub in_count: Vec<f64>,
    pub out_count: Vec<f64>,
}

impl MinuteGrid {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(60);
    Utc.timestamp_opt(floored, 0).single().expect("in-range timestamp")
}

/// Parse one RFC 3339 timestamp, returning `None` on any malformed input.
///
/// Per the C1 contract, malformed timestamps are dropped silently by the
/// caller rather than failing the whole build.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Build a dense minute grid from two sets of raw timestamp strings.
///
/// `column_names` are used only to label dropped-timestamp diagnostics; they
/// carry no semantic weight beyond that.
pub fn build_minute_grid(
    in_timestamps: &[String],
    out_timestamps: &[String],
    in_column: &str,
    out_column: &str,
) -> MinuteGrid {
    let in_parsed = parse_all(in_timestamps, in_column);
    let out_parsed = parse_all(out_timestamps, out_column);
    build_minute_grid_from_datetimes(&in_parsed, &out_parsed)
}

fn parse_all(raw: &[String], column: &str) -> Vec<DateTime<Utc>> {
    let mut dropped = 0usize;
    let parsed: Vec<DateTime<Utc>> = raw
        .iter()
        .filter_map(|s| {
            let ts = parse_timestamp(s);
            if ts.is_none() {
                dropped += 1;
            }
            ts
        })
        .collect();
    if dropped > 0 {
        warn!(column, dropped, "dropped unparseable timestamps");
    }
    parsed
}

/// Build a dense minute grid directly from already-parsed timestamps.
///
/// Determinism: the result depends only on the multiset of timestamps, not
/// their order.
pub fn build_minute_grid_from_datetimes(
    in_timestamps: &[DateTime<Utc>],
    out_timestamps: &[DateTime<Utc>],
) -> MinuteGrid {
    if in_timestamps.is_empty() && out_timestamps.is_empty() {
        return MinuteGrid {
            timestamps: Vec::new(),
            in_count: Vec::new(),
            out_count: Vec::new(),
        };
    }

    let min_ts = in_timestamps
        .iter()
        .chain(out_timestamps.iter())
        .min()
        .copied()
        .expect("non-empty by the check above");
    let max_ts = in_timestamps
        .iter()
        .chain(out_timestamps.iter())
        .max()
        .copied()
        .expect("non-empty by the check above");

    let t0 = floor_to_minute(min_ts);
    let t_last = floor_to_minute(max_ts);
    let n = ((t_last - t0).num_minutes() + 1) as usize;

    let mut timestamps = Vec::with_capacity(n);
    for k in 0..n {
        timestamps.push(t0 + chrono::Duration::minutes(k as i64));
    }

    let mut in_count = vec![0.0; n];
    let mut out_count = vec![0.0; n];

    for ts in in_timestamps {
        let k = bucket_index(*ts, t0);
        in_count[k] += 1.0;
    }
    for ts in out_timestamps {
        let k = bucket_index(*ts, t0);
        out_count[k] += 1.0;
    }

    MinuteGrid {
        timestamps,
        in_count,
        out_count,
    }
}

fn bucket_index(ts: DateTime<Utc>, t0: DateTime<Utc>) -> usize {
    let minutes = (ts - t0).num_seconds().div_euclid(60);
    minutes.max(0) as usize
}

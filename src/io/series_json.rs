use crate::types::{No2Error, No2Result, TimeSeries, TimeSeriesPoint};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Artifact names of the three time-series fragments
pub const MEAN_FRAGMENT: &str = "time-series-mean.json";
pub const MAX_FRAGMENT: &str = "time-series-max.json";
pub const MOVING_AVERAGE_FRAGMENT: &str = "time-series-ma.json";

/// Parse a timestamp key into UTC. Accepts RFC 3339, naive date-times
/// (taken as UTC) and plain dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> No2Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(No2Error::ArtifactIo(format!("unparseable timestamp '{}'", raw)))
}

/// First numeric leaf of a possibly nested value (`[[12.3]]`, `[12.3]`, `12.3`)
fn first_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::Array(items) => items.iter().find_map(first_number),
        _ => None,
    }
}

/// Parse the `{ "<timestamp>": [value, ...], ... }` fragment shape
pub fn parse_fragment(text: &str) -> No2Result<TimeSeries> {
    let root: Value = serde_json::from_str(text)?;
    let object = root
        .as_object()
        .ok_or_else(|| No2Error::ArtifactIo("time series fragment is not a JSON object".to_string()))?;

    let points = object
        .iter()
        .map(|(key, value)| {
            Ok(TimeSeriesPoint {
                timestamp: parse_timestamp(key)?,
                value: first_number(value),
            })
        })
        .collect::<No2Result<Vec<_>>>()?;

    Ok(TimeSeries::from_points(points))
}

pub fn read_fragment<P: AsRef<Path>>(path: P) -> No2Result<TimeSeries> {
    let path = path.as_ref();
    log::debug!("Reading time series fragment {}", path.display());
    let text = fs::read_to_string(path).map_err(|e| {
        No2Error::ArtifactIo(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_fragment(&text)
}

/// Write a series in the same shape the remote service produces
/// (one geometry, one band per timestamp)
pub fn write_fragment<P: AsRef<Path>>(path: P, series: &TimeSeries) -> No2Result<()> {
    let mut object = Map::new();
    for p in series.points() {
        let value = p.value.map(Value::from).unwrap_or(Value::Null);
        object.insert(
            p.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            Value::Array(vec![Value::Array(vec![value])]),
        );
    }
    fs::write(path, serde_json::to_vec_pretty(&Value::Object(object))?)?;
    Ok(())
}

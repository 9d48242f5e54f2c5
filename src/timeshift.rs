//! Re-anchor recorded device data to the present.
//!
//! A recorded payload keeps its internal spacing; every `time` field moves
//! by one delta so the newest reading lands at "now" in the chosen zone.

use std::path::Path;

use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::error::{Result, SeedError};
use crate::logging::{log, obj, v_str, Domain, Level};

const TIME_KEY: &str = "time";

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) if !s.is_empty() => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|n| n.and_utc())
            }),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Zero and empty-string times still shift, but never anchor.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Null | Value::Bool(false) => true,
        _ => false,
    }
}

/// Times found on the top level: each array item's own `time`, or the
/// object's own `time`.
fn top_level_times(data: &Value) -> Vec<DateTime<Utc>> {
    let own_time = |v: &Value| {
        v.as_object()
            .and_then(|m| m.get(TIME_KEY))
            .filter(|t| !is_blank(t))
            .and_then(parse_time)
    };
    match data {
        Value::Array(items) => items.iter().filter_map(own_time).collect(),
        Value::Object(_) => own_time(data).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn shift_value(value: &Value, delta: Duration) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| shift_value(v, delta)).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                let shifted = if key == TIME_KEY {
                    shift_time_field(v, delta)
                } else {
                    shift_value(v, delta)
                };
                out.insert(key.clone(), shifted);
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn shift_time_field(value: &Value, delta: Duration) -> Value {
    match (value, parse_time(value)) {
        (Value::Number(_), Some(t)) => json!((t + delta).timestamp_millis()),
        (Value::String(_), Some(t)) => Value::String((t + delta).to_rfc3339_opts(SecondsFormat::Millis, true)),
        (Value::Array(_) | Value::Object(_), _) => shift_value(value, delta),
        _ => value.clone(),
    }
}

/// Shift every `time` field so the latest top-level time becomes
/// `now + offset_hours`. Strings stay ISO strings and numbers stay epoch
/// milliseconds; values that do not parse are left alone.
pub fn shift_json_times(data: &Value, offset_hours: f64, now: DateTime<Utc>) -> Value {
    let times = top_level_times(data);
    let Some(latest) = times.iter().max().copied() else {
        log(Level::Warn, Domain::Generate, "time_shift_skipped", obj(&[("msg", v_str("no time fields found"))]));
        return data.clone();
    };
    let target = now + Duration::milliseconds((offset_hours * 3_600_000.0).round() as i64);
    let delta = target - latest;
    log(
        Level::Info,
        Domain::Generate,
        "time_shift",
        obj(&[
            ("timestamps", json!(times.len())),
            ("offset_hours", json!(offset_hours)),
            ("shift_minutes", json!(delta.num_minutes())),
            ("latest_was", v_str(&latest.to_rfc3339_opts(SecondsFormat::Millis, true))),
            ("latest_becomes", v_str(&target.to_rfc3339_opts(SecondsFormat::Millis, true))),
        ]),
    );
    shift_value(data, delta)
}

/// Hours east of UTC for a zone abbreviation.
pub fn timezone_offset(abbrev: &str) -> Result<f64> {
    let hours = match abbrev.to_uppercase().as_str() {
        "UTC" | "GMT" => 0.0,
        "EST" => -5.0,
        "EDT" => -4.0,
        "CST" => -6.0,
        "CDT" => -5.0,
        "MST" => -7.0,
        "MDT" => -6.0,
        "PST" => -8.0,
        "PDT" => -7.0,
        "JST" => 9.0,
        "CET" => 1.0,
        "CEST" => 2.0,
        "BST" => 1.0,
        "IST" => 5.5,
        "AEST" => 10.0,
        "AEDT" => 11.0,
        _ => {
            return Err(SeedError::InvalidInput(format!(
                "unknown timezone {:?}; use a numeric offset such as -5 or 9",
                abbrev
            )))
        }
    };
    Ok(hours)
}

/// Numeric hours (`-5`, `5.5`) or a known abbreviation.
pub fn parse_offset(raw: &str) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(h) if h.is_finite() => Ok(h),
        _ => timezone_offset(raw.trim()),
    }
}

/// Read a recorded payload from disk.
pub fn load_recorded(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SeedError::InvalidInput(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| SeedError::InvalidInput(format!("{}: {}", path.display(), e)))
}

/// Shift a JSON file in place, or into `output` when given.
pub fn shift_json_file(input: &Path, offset_hours: f64, output: Option<&Path>, now: DateTime<Utc>) -> Result<Value> {
    let data = load_recorded(input)?;
    let shifted = shift_json_times(&data, offset_hours, now);
    let target = output.unwrap_or(input);
    let body = serde_json::to_string_pretty(&shifted)
        .map_err(|e| SeedError::InvalidInput(format!("serialize shifted data: {}", e)))?;
    std::fs::write(target, body).map_err(|e| SeedError::InvalidInput(format!("{}: {}", target.display(), e)))?;
    Ok(shifted)
}

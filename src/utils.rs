/// Utility functions
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Extract number from JSON value
pub fn num(v: &Value) -> Option<f64> {
    let x = if let Some(x) = v.as_f64() {
        x
    } else if let Some(s) = v.as_str() {
        s.trim().parse::<f64>().ok()?
    } else {
        return None;
    };
    x.is_finite().then_some(x)
}

/// Extract boolean from JSON value, tolerating 0/1 and "true"/"false"
pub fn flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|x| x != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Pick string value from JSON by trying multiple keys
pub fn s_pick(v: &Value, keys: &[&str]) -> Option<String> {
    for k in keys {
        if let Some(x) = v.get(*k) {
            if let Some(s) = x.as_str() {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            } else if x.is_number() {
                return Some(x.to_string());
            }
        }
    }
    None
}

/// Pick number from JSON by trying multiple keys
pub fn n_pick(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| v.get(*k).and_then(num))
}

/// Pick boolean from JSON by trying multiple keys
pub fn b_pick(v: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| v.get(*k).and_then(flag))
}

/// Outcome of reading a timestamp field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeRead {
    Parsed(f64),
    Missing,
    Unparseable,
}

/// Read a timestamp as POSIX seconds.
///
/// Numbers and numeric strings are taken as seconds; strings carrying a date
/// or time separator are parsed as calendar datetimes (naive values are UTC).
pub fn parse_timestamp(v: &Value) -> TimeRead {
    match v {
        Value::Null => TimeRead::Missing,
        Value::Number(_) => num(v).map_or(TimeRead::Unparseable, TimeRead::Parsed),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return TimeRead::Missing;
            }
            if let Ok(x) = s.parse::<f64>() {
                return if x.is_finite() {
                    TimeRead::Parsed(x)
                } else {
                    TimeRead::Unparseable
                };
            }
            if s.contains(['-', 'T', ':']) {
                if let Some(dt) = parse_datetime(s) {
                    return TimeRead::Parsed(to_secs(dt));
                }
            }
            TimeRead::Unparseable
        }
        _ => TimeRead::Unparseable,
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    const NAIVE: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    NAIVE
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

/// Convert a UTC datetime into fractional POSIX seconds
pub fn to_secs(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

/// Current wall clock as fractional POSIX seconds
pub fn now_secs() -> f64 {
    to_secs(Utc::now())
}

/// Euclidean length of a 3-vector
pub fn magnitude(x: f64, y: f64, z: f64) -> f64 {
    (x * x + y * y + z * z).sqrt()
}

/// Format an optional metric for display; unavailable values read "N/A"
pub fn fmt_metric(value: Option<f64>, precision: usize, unit: &str) -> String {
    match value {
        Some(v) if v.is_finite() => {
            if unit.is_empty() {
                format!("{:.*}", precision, v)
            } else {
                format!("{:.*} {}", precision, v, unit)
            }
        }
        _ => "N/A".to_string(),
    }
}

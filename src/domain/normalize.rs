/// Sample normalizer: every duck-typed backend payload is resolved here once
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use super::{
    AnomalyEvent, CommStats, Decision, LogEntry, Severity, SpaceWeather, SystemStatus,
    TelemetrySample, Vec3, WeatherWarning,
};
use crate::utils::{b_pick, flag, n_pick, num, parse_timestamp, s_pick, TimeRead};

const ID_KEYS: &[&str] = &["spacecraft_id", "spacecraftId", "id"];
const TIME_KEYS: &[&str] = &["timestamp", "time", "ts"];
/// Keys that only ever appear on a sample, never as a spacecraft id in a keyed map
const SAMPLE_OBJECT_KEYS: &[&str] = &["position", "velocity", "comm"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("record has no spacecraft id")]
    MissingId,
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Response shapes the backend uses interchangeably
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Value),
    Batch(Vec<Value>),
    Keyed(Vec<(String, Value)>),
}

impl Payload {
    pub fn classify(raw: Value) -> Self {
        match raw {
            Value::Null => Payload::Batch(Vec::new()),
            Value::Array(items) => Payload::Batch(items),
            Value::Object(map) if is_keyed_map(&map) => Payload::Keyed(map.into_iter().collect()),
            other => Payload::Single(other),
        }
    }

    /// Flatten into individual records, carrying the map key as an id hint.
    /// A keyed entry may itself hold a list (history maps).
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Payload::Single(value) => vec![Record { key: None, value }],
            Payload::Batch(items) => items
                .into_iter()
                .map(|value| Record { key: None, value })
                .collect(),
            Payload::Keyed(entries) => entries
                .into_iter()
                .flat_map(|(key, value)| match value {
                    Value::Array(items) => items
                        .into_iter()
                        .map(|value| Record {
                            key: Some(key.clone()),
                            value,
                        })
                        .collect::<Vec<_>>(),
                    value => vec![Record {
                        key: Some(key),
                        value,
                    }],
                })
                .collect(),
        }
    }
}

fn is_keyed_map(map: &Map<String, Value>) -> bool {
    if ID_KEYS.iter().any(|k| map.contains_key(*k)) {
        return false;
    }
    if SAMPLE_OBJECT_KEYS.iter().any(|k| map.contains_key(*k)) {
        return false;
    }
    map.values().all(|v| v.is_object() || v.is_array())
}

/// One raw record plus the id implied by its position in a keyed map
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: Option<String>,
    pub value: Value,
}

/// Normalized items plus how many siblings were dropped
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub rejected: usize,
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            rejected: 0,
        }
    }
}

fn collect_batch<T>(
    raw: Value,
    what: &str,
    mut f: impl FnMut(&Value, Option<&str>) -> Result<T, NormalizationError>,
) -> Batch<T> {
    let mut batch = Batch::default();
    for record in Payload::classify(raw).into_records() {
        match f(&record.value, record.key.as_deref()) {
            Ok(item) => batch.items.push(item),
            Err(e) => {
                warn!("Dropping malformed {} record: {}", what, e);
                batch.rejected += 1;
            }
        }
    }
    batch
}

/// Normalize a single telemetry record.
///
/// `now` stands in for a missing or unparseable timestamp.
pub fn normalize(raw: &Value, now: f64) -> Result<TelemetrySample, NormalizationError> {
    normalize_record(raw, None, now)
}

/// Normalize a record whose id may come from an enclosing keyed map
pub fn normalize_record(
    raw: &Value,
    id_hint: Option<&str>,
    now: f64,
) -> Result<TelemetrySample, NormalizationError> {
    if !raw.is_object() {
        return Err(NormalizationError::NotAnObject);
    }
    let spacecraft_id = pick_id(raw, id_hint)?;
    let timestamp = pick_time(raw, now, &spacecraft_id);

    let mut sample = TelemetrySample::bare(spacecraft_id, timestamp);
    sample.position = pick_vec3(raw, "position");
    sample.velocity = pick_vec3(raw, "velocity");
    sample.temperature = n_pick(raw, &["temperature", "temp"]);
    sample.signal_quality = n_pick(raw, &["signal_quality", "signalQuality"])
        .or_else(|| raw.get("comm").and_then(|c| n_pick(c, &["signal_quality", "signalQuality"])))
        .filter(|q| (0.0..=100.0).contains(q));
    sample.energy_level = n_pick(raw, &["energy_level", "energyLevel", "power_level", "powerLevel"]);
    sample.radiation_level = n_pick(raw, &["radiation_level", "radiationLevel"]);
    sample.mode = s_pick(raw, &["mode"]);
    sample.sequence_number = n_pick(raw, &["sequence_number", "sequenceNumber", "sequence_id"])
        .map(|n| n as i64);
    sample.anomaly_detected = b_pick(raw, &["anomaly_detected", "anomalyDetected"]).unwrap_or(false);
    sample.sos_required = b_pick(raw, &["sos_required", "sosRequired"]).unwrap_or(false);
    sample.sos_reason = s_pick(raw, &["sos_reason", "sosReason"]);

    if sample.anomaly_detected {
        let severity = s_pick(raw, &["anomaly_severity", "anomalySeverity"])
            .map(|s| Severity::parse(&s))
            .unwrap_or(Severity::Warning);
        let descriptions = raw
            .get("anomaly_descriptions")
            .or_else(|| raw.get("anomalyDescriptions"));
        sample.anomalies = split_descriptions(descriptions)
            .into_iter()
            .map(|message| AnomalyEvent {
                timestamp: sample.timestamp,
                spacecraft_id: sample.spacecraft_id.clone(),
                severity,
                message,
            })
            .collect();
    }

    let decisions_made = raw
        .get("decisions_made")
        .and_then(|v| flag(v).or_else(|| num(v).map(|n| n > 0.0)))
        .unwrap_or(false);
    if decisions_made {
        sample.decisions = match raw.get("decisions_descriptions") {
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
            Some(Value::Array(items)) => items.iter().filter_map(text_of).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.to_string()],
        };
    }

    Ok(sample)
}

fn text_of(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::String(_) | Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn split_descriptions(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::String(s)) => s
            .split(';')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|d| d.as_str())
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn pick_id(raw: &Value, id_hint: Option<&str>) -> Result<String, NormalizationError> {
    s_pick(raw, ID_KEYS)
        .or_else(|| id_hint.filter(|h| !h.is_empty()).map(str::to_string))
        .ok_or(NormalizationError::MissingId)
}

fn pick_time(raw: &Value, now: f64, spacecraft_id: &str) -> f64 {
    let field = TIME_KEYS.iter().find_map(|k| raw.get(*k));
    match field.map(parse_timestamp).unwrap_or(TimeRead::Missing) {
        TimeRead::Parsed(t) => t,
        TimeRead::Missing => {
            warn!("Record for {} has no timestamp; using receipt time", spacecraft_id);
            now
        }
        TimeRead::Unparseable => {
            warn!(
                "Record for {} has unparseable timestamp {:?}; using receipt time",
                spacecraft_id, field
            );
            now
        }
    }
}

/// Nested `{x,y,z}` object first, then flat `<prefix>_x` fields
fn pick_vec3(raw: &Value, prefix: &str) -> Option<Vec3> {
    if let Some(obj) = raw.get(prefix).filter(|v| v.is_object()) {
        let x = obj.get("x").and_then(num)?;
        let y = obj.get("y").and_then(num)?;
        let z = obj.get("z").and_then(num)?;
        return Some(Vec3::new(x, y, z));
    }
    let axis = |a: &str| raw.get(format!("{}_{}", prefix, a)).and_then(num);
    Some(Vec3::new(axis("x")?, axis("y")?, axis("z")?))
}

/// Normalize any telemetry payload shape; bad siblings are dropped
pub fn normalize_samples(raw: Value, now: f64) -> Batch<TelemetrySample> {
    collect_batch(raw, "telemetry", |v, key| normalize_record(v, key, now))
}

pub fn normalize_anomaly(
    raw: &Value,
    id_hint: Option<&str>,
    now: f64,
) -> Result<AnomalyEvent, NormalizationError> {
    if !raw.is_object() {
        return Err(NormalizationError::NotAnObject);
    }
    let spacecraft_id = pick_id(raw, id_hint)?;
    let message = s_pick(raw, &["message", "description", "msg"])
        .ok_or(NormalizationError::MissingField("message"))?;
    let severity = s_pick(raw, &["severity", "level"])
        .map(|s| Severity::parse(&s))
        .unwrap_or(Severity::Warning);
    Ok(AnomalyEvent {
        timestamp: pick_time(raw, now, &spacecraft_id),
        spacecraft_id,
        severity,
        message: message.trim().to_string(),
    })
}

pub fn normalize_anomalies(raw: Value, now: f64) -> Batch<AnomalyEvent> {
    collect_batch(raw, "anomaly", |v, key| normalize_anomaly(v, key, now))
}

pub fn normalize_decision(
    raw: &Value,
    id_hint: Option<&str>,
    now: f64,
) -> Result<Decision, NormalizationError> {
    if !raw.is_object() {
        return Err(NormalizationError::NotAnObject);
    }
    let spacecraft_id = pick_id(raw, id_hint)?;
    let decision = raw
        .get("decision")
        .and_then(text_of)
        .ok_or(NormalizationError::MissingField("decision"))?;
    Ok(Decision {
        timestamp: pick_time(raw, now, &spacecraft_id),
        spacecraft_id,
        decision,
        result: s_pick(raw, &["result"]).unwrap_or_else(|| "Success".to_string()),
    })
}

pub fn normalize_decisions(raw: Value, now: f64) -> Batch<Decision> {
    collect_batch(raw, "decision", |v, key| normalize_decision(v, key, now))
}

pub fn normalize_log_entry(raw: &Value, now: f64) -> Result<LogEntry, NormalizationError> {
    if !raw.is_object() {
        return Err(NormalizationError::NotAnObject);
    }
    let message = s_pick(raw, &["message", "msg", "text"])
        .ok_or(NormalizationError::MissingField("message"))?;
    let spacecraft_id = s_pick(raw, ID_KEYS);
    let timestamp = pick_time(raw, now, spacecraft_id.as_deref().unwrap_or("log"));
    Ok(LogEntry {
        timestamp,
        level: s_pick(raw, &["level", "severity", "type"])
            .unwrap_or_else(|| "info".to_string())
            .to_ascii_lowercase(),
        message,
        spacecraft_id,
    })
}

pub fn normalize_log_entries(raw: Value, now: f64) -> Batch<LogEntry> {
    collect_batch(raw, "log", |v, _| normalize_log_entry(v, now))
}

/// Spacecraft ids from a list of ids, a list of objects, or an id-keyed map
pub fn normalize_spacecraft_list(raw: Value) -> Vec<String> {
    let mut ids: Vec<String> = match raw {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(_) => s_pick(item, ID_KEYS),
                other => text_of(other),
            })
            .collect(),
        Value::Object(map) => match map.get("spacecraft").or_else(|| map.get("items")) {
            Some(inner @ Value::Array(_)) => return normalize_spacecraft_list(inner.clone()),
            _ => map.keys().cloned().collect(),
        },
        Value::String(s) if !s.is_empty() => vec![s],
        _ => Vec::new(),
    };
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
    ids
}

pub fn normalize_status(raw: &Value) -> Result<SystemStatus, NormalizationError> {
    if !raw.is_object() {
        return Err(NormalizationError::NotAnObject);
    }
    let active_alerts = match raw.get("active_alerts") {
        Some(Value::Array(items)) => items.iter().filter_map(text_of).collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    };
    Ok(SystemStatus {
        power_level: n_pick(raw, &["power_level", "powerLevel"]),
        system_mode: s_pick(raw, &["system_mode", "systemMode"]),
        active_alerts,
        sos_required: b_pick(raw, &["sos_required", "sosRequired"]).unwrap_or(false),
        sos_reason: s_pick(raw, &["sos_reason", "sosReason"]),
        sos_is_new: b_pick(raw, &["sos_is_new", "sosIsNew"]).unwrap_or(false),
        connection_status: s_pick(raw, &["connection_status", "connectionStatus"]),
        last_update: s_pick(raw, &["last_update", "lastUpdate"]),
    })
}

pub fn normalize_comm_stats(raw: &Value) -> Result<CommStats, NormalizationError> {
    if !raw.is_object() {
        return Err(NormalizationError::NotAnObject);
    }
    Ok(CommStats {
        packets_sent: n_pick(raw, &["packets_sent"]),
        packets_received: n_pick(raw, &["packets_received"]),
        packets_lost: n_pick(raw, &["packets_lost"]),
        packet_loss_rate: n_pick(raw, &["packet_loss_rate"]),
        data_volume_kb: n_pick(raw, &["data_volume_kb"]),
        signal_quality: n_pick(raw, &["signal_quality"]).filter(|q| (0.0..=100.0).contains(q)),
        signal_delay: n_pick(raw, &["signal_delay"]),
    })
}

pub fn normalize_space_weather(raw: &Value, now: f64) -> Result<SpaceWeather, NormalizationError> {
    if !raw.is_object() {
        return Err(NormalizationError::NotAnObject);
    }
    let warnings = raw
        .get("warnings")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|w| w.is_object())
                .map(|w| WeatherWarning {
                    kind: s_pick(w, &["type", "kind"]).unwrap_or_else(|| "unknown".to_string()),
                    severity: s_pick(w, &["severity"]),
                    start_time: n_pick(w, &["start_time"]),
                    estimated_end: n_pick(w, &["estimated_end"]),
                    description: s_pick(w, &["description"]),
                })
                .collect()
        })
        .unwrap_or_default();
    let timestamp = match raw.get("timestamp").map(parse_timestamp) {
        Some(TimeRead::Parsed(t)) => Some(t),
        _ => Some(now),
    };
    Ok(SpaceWeather {
        timestamp,
        solar_flux: n_pick(raw, &["solar_flux"]),
        solar_wind_speed: n_pick(raw, &["solar_wind_speed"]),
        geomagnetic_kp: n_pick(raw, &["geomagnetic_kp"]),
        radiation_level: s_pick(raw, &["radiation_level"]),
        radiation_dose: n_pick(raw, &["radiation_dose"]),
        warnings,
    })
}

/// Domain models for the telemetry console
pub mod normalize;

use serde::{Deserialize, Serialize};

use crate::utils::magnitude;

/// Cartesian triple (km for positions, km/s for velocities)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn norm(&self) -> f64 {
        magnitude(self.x, self.y, self.z)
    }
}

/// Anomaly severity as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Unknown labels degrade to `Warning`, matching the backend default.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "info" | "information" | "notice" => Severity::Info,
            "critical" | "error" | "fatal" | "emergency" => Severity::Critical,
            _ => Severity::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// One spacecraft's state at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub spacecraft_id: String,
    /// POSIX seconds
    pub timestamp: f64,
    pub position: Option<Vec3>,
    pub velocity: Option<Vec3>,
    pub temperature: Option<f64>,
    /// Percentage in [0, 100]
    pub signal_quality: Option<f64>,
    pub energy_level: Option<f64>,
    pub radiation_level: Option<f64>,
    pub mode: Option<String>,
    pub sequence_number: Option<i64>,
    pub anomaly_detected: bool,
    pub anomalies: Vec<AnomalyEvent>,
    pub sos_required: bool,
    pub sos_reason: Option<String>,
    pub decisions: Vec<String>,
}

impl TelemetrySample {
    /// Bare sample with every optional field unavailable
    pub fn bare(spacecraft_id: impl Into<String>, timestamp: f64) -> Self {
        Self {
            spacecraft_id: spacecraft_id.into(),
            timestamp,
            position: None,
            velocity: None,
            temperature: None,
            signal_quality: None,
            energy_level: None,
            radiation_level: None,
            mode: None,
            sequence_number: None,
            anomaly_detected: false,
            anomalies: Vec::new(),
            sos_required: false,
            sos_reason: None,
            decisions: Vec::new(),
        }
    }

    /// Speed magnitude in km/s
    pub fn speed(&self) -> Option<f64> {
        self.velocity.map(|v| v.norm())
    }

    /// Distance from the reference origin in km
    pub fn distance(&self) -> Option<f64> {
        self.position.map(|p| p.norm())
    }
}

/// Anomaly notification; identity is its fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub timestamp: f64,
    pub spacecraft_id: String,
    pub severity: Severity,
    pub message: String,
}

impl AnomalyEvent {
    pub fn fingerprint(&self) -> AnomalyFingerprint {
        AnomalyFingerprint {
            timestamp: TimeKey::from_secs(self.timestamp),
            message: self.message.clone(),
            severity: self.severity,
        }
    }
}

/// Hashable timestamp key (millisecond resolution)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeKey(i64);

impl TimeKey {
    pub fn from_secs(secs: f64) -> Self {
        Self((secs * 1000.0).round() as i64)
    }
}

/// `(timestamp, message, severity)`: the same occurrence on any transport path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnomalyFingerprint {
    pub timestamp: TimeKey,
    pub message: String,
    pub severity: Severity,
}

/// Autonomous decision taken on board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub timestamp: f64,
    pub spacecraft_id: String,
    pub decision: String,
    pub result: String,
}

impl Decision {
    pub fn fingerprint(&self) -> (TimeKey, String, String) {
        (
            TimeKey::from_secs(self.timestamp),
            self.spacecraft_id.clone(),
            self.decision.clone(),
        )
    }
}

/// Operator log entry from the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: f64,
    pub level: String,
    pub message: String,
    pub spacecraft_id: Option<String>,
}

impl LogEntry {
    pub fn fingerprint(&self) -> (TimeKey, String, String) {
        (
            TimeKey::from_secs(self.timestamp),
            self.message.clone(),
            self.level.clone(),
        )
    }
}

/// System status as polled from the backend
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    pub power_level: Option<f64>,
    pub system_mode: Option<String>,
    pub active_alerts: Vec<String>,
    pub sos_required: bool,
    pub sos_reason: Option<String>,
    pub sos_is_new: bool,
    pub connection_status: Option<String>,
    pub last_update: Option<String>,
}

/// Link statistics
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommStats {
    pub packets_sent: Option<f64>,
    pub packets_received: Option<f64>,
    pub packets_lost: Option<f64>,
    pub packet_loss_rate: Option<f64>,
    pub data_volume_kb: Option<f64>,
    pub signal_quality: Option<f64>,
    pub signal_delay: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherWarning {
    pub kind: String,
    pub severity: Option<String>,
    pub start_time: Option<f64>,
    pub estimated_end: Option<f64>,
    pub description: Option<String>,
}

/// Space-weather snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpaceWeather {
    pub timestamp: Option<f64>,
    pub solar_flux: Option<f64>,
    pub solar_wind_speed: Option<f64>,
    pub geomagnetic_kp: Option<f64>,
    pub radiation_level: Option<String>,
    pub radiation_dose: Option<f64>,
    pub warnings: Vec<WeatherWarning>,
}

/// Reply of the pause/resume command endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub status: String,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub spacecraft_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body accepted by the pause endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseRequest {
    pub paused: bool,
    #[serde(default)]
    pub spacecraft_id: Option<String>,
}

/// Critical notification surfaced once per transition into `Shown`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SosAlert {
    pub reason: String,
    pub spacecraft_id: Option<String>,
    pub raised_at: f64,
    pub is_new: bool,
}

/// Health check response
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub now: chrono::DateTime<chrono::Utc>,
}

//! Render sinks: the seam between the engine and whatever draws the dashboard.
//!
//! The engine pushes normalized updates through [`RenderSink`]; sinks keep
//! their own copies and never reach back into engine state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::watch;

use crate::config::EngineSettings;
use crate::domain::{
    AnomalyEvent, CommStats, CommandAck, Decision, LogEntry, SosAlert, SpaceWeather,
    SystemStatus, TelemetrySample, Vec3,
};
use crate::repo::{ChartKind, RollingBuffer, RollingPoint, SeriesKey};
use crate::services::engine::TransportSource;
use crate::utils::fmt_metric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Anomaly,
    Decision,
    Log,
    Command,
}

/// One row of the operator log table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRow {
    pub timestamp: f64,
    pub spacecraft_id: Option<String>,
    pub kind: LogKind,
    pub level: String,
    pub message: String,
}

impl From<&AnomalyEvent> for LogRow {
    fn from(a: &AnomalyEvent) -> Self {
        Self {
            timestamp: a.timestamp,
            spacecraft_id: Some(a.spacecraft_id.clone()),
            kind: LogKind::Anomaly,
            level: a.severity.as_str().to_string(),
            message: a.message.clone(),
        }
    }
}

impl From<&Decision> for LogRow {
    fn from(d: &Decision) -> Self {
        Self {
            timestamp: d.timestamp,
            spacecraft_id: Some(d.spacecraft_id.clone()),
            kind: LogKind::Decision,
            level: "info".to_string(),
            message: format!("{} ({})", d.decision, d.result),
        }
    }
}

impl From<&LogEntry> for LogRow {
    fn from(e: &LogEntry) -> Self {
        Self {
            timestamp: e.timestamp,
            spacecraft_id: e.spacecraft_id.clone(),
            kind: LogKind::Log,
            level: e.level.clone(),
            message: e.message.clone(),
        }
    }
}

/// Everything the engine can tell a renderer
pub trait RenderSink {
    fn chart_point(&mut self, chart: ChartKind, series: usize, point: RollingPoint<f64>);
    fn chart_replaced(&mut self, chart: ChartKind, series: usize, points: &[RollingPoint<f64>]);
    /// Create-or-update the 3D entity of a spacecraft
    fn entity_moved(&mut self, spacecraft_id: &str, position: Vec3);
    fn trail_point(&mut self, spacecraft_id: &str, point: RollingPoint<Vec3>);
    fn trail_replaced(&mut self, spacecraft_id: &str, points: &[RollingPoint<Vec3>]);
    /// New "current" sample for a spacecraft
    fn headline(&mut self, sample: &TelemetrySample);
    fn staleness(&mut self, spacecraft_id: &str, stale: bool);
    fn log_row(&mut self, row: LogRow);
    fn sos_alert(&mut self, alert: &SosAlert);
    fn alert_acknowledged(&mut self, reason: &str, until: f64);
    fn system_status(&mut self, status: &SystemStatus);
    fn comm_stats(&mut self, stats: &CommStats);
    fn space_weather(&mut self, weather: &SpaceWeather);
    fn spacecraft_list(&mut self, ids: &[String], selected: Option<&str>);
    fn pause_state(&mut self, ack: &CommandAck);
    fn connection(&mut self, connected: bool);
    fn transport_error(&mut self, source: TransportSource, message: &str);
}

/// DOM-ready headline strings; unavailable metrics read "N/A"
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadlineText {
    pub temperature: String,
    pub speed: String,
    pub distance: String,
    pub signal_quality: String,
    pub energy_level: String,
    pub mode: String,
}

impl HeadlineText {
    pub fn of(sample: &TelemetrySample) -> Self {
        Self {
            temperature: fmt_metric(sample.temperature, 1, "°C"),
            speed: fmt_metric(sample.speed(), 2, "km/s"),
            distance: fmt_metric(sample.distance(), 0, "km"),
            signal_quality: fmt_metric(sample.signal_quality, 1, "%"),
            energy_level: fmt_metric(sample.energy_level, 1, "%"),
            mode: sample.mode.clone().unwrap_or_else(|| "N/A".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadlineView {
    pub sample: TelemetrySample,
    pub text: HeadlineText,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    pub position: Option<Vec3>,
    pub trail: Vec<RollingPoint<Vec3>>,
}

/// Serializable picture of the whole dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewSnapshot {
    pub selected: Option<String>,
    pub spacecraft: Vec<String>,
    pub headlines: BTreeMap<String, HeadlineView>,
    pub charts: BTreeMap<ChartKind, Vec<Vec<RollingPoint<f64>>>>,
    pub entities: BTreeMap<String, EntityView>,
    pub logs: Vec<LogRow>,
    pub sos: Option<SosAlert>,
    pub acknowledged: BTreeMap<String, f64>,
    pub status: Option<SystemStatus>,
    pub comm: Option<CommStats>,
    pub weather: Option<SpaceWeather>,
    pub paused: Option<bool>,
    pub connected: bool,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Sink that mirrors updates into its own bounded buffers and publishes
/// a [`ViewSnapshot`] over a watch channel for the HTTP layer.
pub struct SnapshotSink {
    view: ViewSnapshot,
    charts: HashMap<SeriesKey, RollingBuffer<RollingPoint<f64>>>,
    trails: HashMap<String, RollingBuffer<RollingPoint<Vec3>>>,
    logs: VecDeque<LogRow>,
    chart_capacity: usize,
    trail_capacity: usize,
    log_max_rows: usize,
    tx: watch::Sender<ViewSnapshot>,
}

impl SnapshotSink {
    pub fn new(settings: &EngineSettings) -> (Self, watch::Receiver<ViewSnapshot>) {
        let (tx, rx) = watch::channel(ViewSnapshot::default());
        let sink = Self {
            view: ViewSnapshot::default(),
            charts: HashMap::new(),
            trails: HashMap::new(),
            logs: VecDeque::new(),
            chart_capacity: settings.chart_capacity,
            trail_capacity: settings.trail_capacity,
            log_max_rows: settings.log_max_rows,
            tx,
        };
        (sink, rx)
    }

    fn chart_buffer(&mut self, key: SeriesKey) -> &mut RollingBuffer<RollingPoint<f64>> {
        let capacity = self.chart_capacity;
        self.charts
            .entry(key)
            .or_insert_with(|| RollingBuffer::new(capacity))
    }

    fn trail_buffer(&mut self, spacecraft_id: &str) -> &mut RollingBuffer<RollingPoint<Vec3>> {
        let capacity = self.trail_capacity;
        self.trails
            .entry(spacecraft_id.to_string())
            .or_insert_with(|| RollingBuffer::new(capacity))
    }

    fn entity(&mut self, spacecraft_id: &str) -> &mut EntityView {
        self.view
            .entities
            .entry(spacecraft_id.to_string())
            .or_insert_with(|| EntityView {
                position: None,
                trail: Vec::new(),
            })
    }

    /// Build the current snapshot
    pub fn snapshot(&self) -> ViewSnapshot {
        let mut view = self.view.clone();
        for chart in ChartKind::ALL {
            let series = (0..chart.series_count())
                .map(|i| {
                    self.charts
                        .get(&(chart, i))
                        .map(RollingBuffer::to_series)
                        .unwrap_or_default()
                })
                .collect();
            view.charts.insert(chart, series);
        }
        for (id, trail) in &self.trails {
            if let Some(entity) = view.entities.get_mut(id) {
                entity.trail = trail.to_series();
            }
        }
        view.logs = self.logs.iter().cloned().collect();
        view.updated_at = Some(Utc::now());
        view
    }

    /// Hand the latest snapshot to readers
    pub fn publish(&self) {
        self.tx.send_replace(self.snapshot());
    }
}

impl RenderSink for SnapshotSink {
    fn chart_point(&mut self, chart: ChartKind, series: usize, point: RollingPoint<f64>) {
        self.chart_buffer((chart, series)).push(point);
    }

    fn chart_replaced(&mut self, chart: ChartKind, series: usize, points: &[RollingPoint<f64>]) {
        self.chart_buffer((chart, series))
            .replace_all(points.iter().copied());
    }

    fn entity_moved(&mut self, spacecraft_id: &str, position: Vec3) {
        self.entity(spacecraft_id).position = Some(position);
    }

    fn trail_point(&mut self, spacecraft_id: &str, point: RollingPoint<Vec3>) {
        self.entity(spacecraft_id);
        self.trail_buffer(spacecraft_id).push(point);
    }

    fn trail_replaced(&mut self, spacecraft_id: &str, points: &[RollingPoint<Vec3>]) {
        self.entity(spacecraft_id);
        self.trail_buffer(spacecraft_id)
            .replace_all(points.iter().copied());
    }

    fn headline(&mut self, sample: &TelemetrySample) {
        self.view.headlines.insert(
            sample.spacecraft_id.clone(),
            HeadlineView {
                sample: sample.clone(),
                text: HeadlineText::of(sample),
                stale: false,
            },
        );
    }

    fn staleness(&mut self, spacecraft_id: &str, stale: bool) {
        if let Some(headline) = self.view.headlines.get_mut(spacecraft_id) {
            headline.stale = stale;
        }
    }

    fn log_row(&mut self, row: LogRow) {
        self.logs.push_front(row);
        self.logs.truncate(self.log_max_rows);
    }

    fn sos_alert(&mut self, alert: &SosAlert) {
        self.view.sos = Some(alert.clone());
    }

    fn alert_acknowledged(&mut self, reason: &str, until: f64) {
        if self.view.sos.as_ref().is_some_and(|sos| sos.reason == reason) {
            self.view.sos = None;
        }
        self.view.acknowledged.insert(reason.to_string(), until);
    }

    fn system_status(&mut self, status: &SystemStatus) {
        self.view.status = Some(status.clone());
    }

    fn comm_stats(&mut self, stats: &CommStats) {
        self.view.comm = Some(stats.clone());
    }

    fn space_weather(&mut self, weather: &SpaceWeather) {
        self.view.weather = Some(weather.clone());
    }

    fn spacecraft_list(&mut self, ids: &[String], selected: Option<&str>) {
        self.view.spacecraft = ids.to_vec();
        self.view.selected = selected.map(str::to_string);
    }

    fn pause_state(&mut self, ack: &CommandAck) {
        self.view.paused = Some(ack.paused);
    }

    fn connection(&mut self, connected: bool) {
        self.view.connected = connected;
        if connected {
            self.view.last_error = None;
        }
    }

    fn transport_error(&mut self, source: TransportSource, message: &str) {
        self.view.last_error = Some(format!("{}: {}", source, message));
    }
}

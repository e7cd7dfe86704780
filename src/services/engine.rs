//! Reconciliation engine: the one place where push and poll data merge.
//!
//! Every mutation of console state happens in [`ReconciliationEngine::handle`],
//! one event at a time. Network work is never done here; the engine returns
//! [`Effect`]s and the runtime reports their outcome back as new events.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::clients::{Endpoint, PushMessage};
use crate::config::EngineSettings;
use crate::domain::normalize::{
    normalize_anomalies, normalize_comm_stats, normalize_decisions, normalize_log_entries,
    normalize_samples, normalize_space_weather, normalize_spacecraft_list, normalize_status,
};
use crate::domain::{
    AnomalyEvent, AnomalyFingerprint, CommandAck, Decision, LogEntry, Severity, SosAlert,
    TelemetrySample, TimeKey, Vec3,
};
use crate::render::{LogKind, LogRow, RenderSink};
use crate::repo::{ChartKind, DedupRegistry, RollingBuffer, RollingPoint, SeriesKey, SeriesRepo};
use crate::services::alerts::{AlertDecision, AlertPolicy, AlertState};
use crate::utils::{parse_timestamp, s_pick, TimeRead};

/// Path a sample arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Push,
    Poll,
}

/// Where a transport failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSource {
    Push,
    Poll(Endpoint),
    History,
    Command,
}

impl fmt::Display for TransportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSource::Push => write!(f, "push channel"),
            TransportSource::Poll(endpoint) => write!(f, "poll {}", endpoint.path()),
            TransportSource::History => write!(f, "history fetch"),
            TransportSource::Command => write!(f, "command"),
        }
    }
}

/// Everything that may mutate console state
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Push(PushMessage),
    PushConnected,
    Polled(Endpoint, Value),
    HistoryLoaded { requested_for: String, payload: Value },
    TransportFailed { source: TransportSource, error: String },
    Select(String),
    Acknowledge(String),
    CommandAcked(CommandAck),
    ClockTick,
}

/// Work the runtime must start on the engine's behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchHistory(String),
}

/// Per-spacecraft state
#[derive(Debug, Clone)]
struct Track {
    current: Option<TelemetrySample>,
    current_channel: Channel,
    received_at: f64,
    stale: bool,
    history: RollingBuffer<TelemetrySample>,
    trail: RollingBuffer<RollingPoint<Vec3>>,
}

impl Track {
    fn new(settings: &EngineSettings) -> Self {
        Self {
            current: None,
            current_channel: Channel::Poll,
            received_at: 0.0,
            stale: false,
            history: RollingBuffer::new(settings.history_capacity),
            trail: RollingBuffer::new(settings.trail_capacity),
        }
    }

    /// Newer embedded timestamp wins; on a tie push beats poll
    fn superseded_by(&self, sample: &TelemetrySample, channel: Channel) -> bool {
        match &self.current {
            None => true,
            Some(current) => {
                sample.timestamp > current.timestamp
                    || (sample.timestamp == current.timestamp
                        && channel == Channel::Push
                        && self.current_channel == Channel::Poll)
            }
        }
    }
}

type SampleKey = (String, TimeKey);
type RowKey = (TimeKey, String, String);

pub struct ReconciliationEngine {
    settings: EngineSettings,
    selected: Option<String>,
    known: Vec<String>,
    tracks: HashMap<String, Track>,
    charts: SeriesRepo,
    anomalies: DedupRegistry<AnomalyFingerprint>,
    decisions: DedupRegistry<RowKey>,
    log_entries: DedupRegistry<RowKey>,
    samples: DedupRegistry<SampleKey>,
    alerts: AlertPolicy,
    paused: Option<bool>,
}

impl ReconciliationEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            selected: None,
            known: Vec::new(),
            tracks: HashMap::new(),
            charts: SeriesRepo::new(settings.chart_capacity),
            anomalies: DedupRegistry::new(settings.anomaly_ttl),
            decisions: DedupRegistry::new(settings.anomaly_ttl),
            log_entries: DedupRegistry::new(settings.anomaly_ttl),
            samples: DedupRegistry::new(settings.sample_ttl),
            alerts: AlertPolicy::new(settings.alert_cooldown, settings.alert_ack_window),
            paused: None,
            settings,
        }
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn current(&self, spacecraft_id: &str) -> Option<&TelemetrySample> {
        self.tracks.get(spacecraft_id)?.current.as_ref()
    }

    pub fn is_stale(&self, spacecraft_id: &str) -> bool {
        self.tracks.get(spacecraft_id).is_some_and(|t| t.stale)
    }

    pub fn history(&self, spacecraft_id: &str) -> Vec<TelemetrySample> {
        self.tracks
            .get(spacecraft_id)
            .map(|t| t.history.to_series())
            .unwrap_or_default()
    }

    pub fn series(&self, key: SeriesKey) -> Vec<RollingPoint<f64>> {
        self.charts.series(key)
    }

    pub fn alert_state(&self, reason: &str, now: f64) -> AlertState {
        self.alerts.state(reason, now)
    }

    pub fn paused(&self) -> Option<bool> {
        self.paused
    }

    /// Apply one event; registries are swept once the event is fully handled
    pub fn handle(
        &mut self,
        event: EngineEvent,
        now: f64,
        sink: &mut dyn RenderSink,
    ) -> Vec<Effect> {
        let effects = match event {
            EngineEvent::Push(message) => self.on_push(message, now, sink),
            EngineEvent::PushConnected => {
                info!("Push channel connected");
                sink.connection(true);
                // Anything missed while disconnected comes back through history
                self.selected
                    .iter()
                    .map(|id| Effect::FetchHistory(id.clone()))
                    .collect()
            }
            EngineEvent::Polled(endpoint, payload) => self.on_poll(endpoint, payload, now, sink),
            EngineEvent::HistoryLoaded {
                requested_for,
                payload,
            } => {
                self.on_history_loaded(requested_for, payload, now, sink);
                Vec::new()
            }
            EngineEvent::TransportFailed { source, error } => {
                self.on_transport_failure(source, &error, sink);
                Vec::new()
            }
            EngineEvent::Select(spacecraft_id) => self.select(spacecraft_id, sink),
            EngineEvent::Acknowledge(reason) => {
                self.alerts.acknowledge(&reason, now);
                info!("Alert {} acknowledged", reason);
                sink.alert_acknowledged(&reason, now + self.settings.alert_ack_window);
                Vec::new()
            }
            EngineEvent::CommandAcked(ack) => {
                info!("Pause command acknowledged: paused={}", ack.paused);
                self.paused = Some(ack.paused);
                sink.pause_state(&ack);
                sink.log_row(LogRow {
                    timestamp: now,
                    spacecraft_id: ack.spacecraft_id.clone(),
                    kind: LogKind::Command,
                    level: "info".to_string(),
                    message: if ack.paused {
                        "Telemetry paused".to_string()
                    } else {
                        "Telemetry resumed".to_string()
                    },
                });
                Vec::new()
            }
            EngineEvent::ClockTick => {
                self.mark_stale_tracks(now, sink);
                Vec::new()
            }
        };
        self.sweep(now);
        effects
    }

    fn on_push(
        &mut self,
        message: PushMessage,
        now: f64,
        sink: &mut dyn RenderSink,
    ) -> Vec<Effect> {
        match message {
            PushMessage::TelemetryUpdate(raw) => {
                for sample in normalize_samples(raw, now).items {
                    self.ingest(sample, Channel::Push, now, sink);
                }
            }
            PushMessage::TelemetryHistory(raw) => {
                let batch = normalize_samples(raw, now);
                for (spacecraft_id, samples) in group_by_spacecraft(batch.items) {
                    self.replay(&spacecraft_id, samples, Channel::Push, now, sink);
                }
            }
            PushMessage::NewAnomaly(raw) | PushMessage::AnomalyHistory(raw) => {
                let batch = normalize_anomalies(raw, now);
                self.ingest_anomalies(&batch.items, now, sink);
            }
            PushMessage::NewDecision(raw) => {
                let batch = normalize_decisions(raw, now);
                self.ingest_decisions(&batch.items, now, sink);
            }
            PushMessage::LogEntry(raw) | PushMessage::LogHistory(raw) => {
                let batch = normalize_log_entries(raw, now);
                self.ingest_log_entries(&batch.items, now, sink);
            }
            PushMessage::CommandSent(raw) => sink.log_row(command_row(&raw, now)),
            PushMessage::SpacecraftList(raw) => {
                return self.apply_spacecraft_list(normalize_spacecraft_list(raw), sink);
            }
        }
        Vec::new()
    }

    fn on_poll(
        &mut self,
        endpoint: Endpoint,
        payload: Value,
        now: f64,
        sink: &mut dyn RenderSink,
    ) -> Vec<Effect> {
        match endpoint {
            Endpoint::LatestTelemetry => {
                let batch = normalize_samples(payload, now);
                for sample in batch.items {
                    self.ingest(sample, Channel::Poll, now, sink);
                }
            }
            Endpoint::SpacecraftList => {
                return self.apply_spacecraft_list(normalize_spacecraft_list(payload), sink);
            }
            Endpoint::SystemStatus => match normalize_status(&payload) {
                Ok(status) => {
                    sink.system_status(&status);
                    if status.sos_required {
                        let reason = status
                            .sos_reason
                            .clone()
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "Unknown emergency".to_string());
                        self.raise_sos(&reason, None, status.sos_is_new, now, sink);
                    }
                }
                Err(e) => warn!("Dropping system status: {}", e),
            },
            Endpoint::CommStats => match normalize_comm_stats(&payload) {
                Ok(stats) => sink.comm_stats(&stats),
                Err(e) => warn!("Dropping comm stats: {}", e),
            },
            Endpoint::Anomalies => {
                let batch = normalize_anomalies(payload, now);
                self.ingest_anomalies(&batch.items, now, sink);
            }
            Endpoint::Decisions => {
                let batch = normalize_decisions(payload, now);
                self.ingest_decisions(&batch.items, now, sink);
            }
            Endpoint::SpaceWeather => match normalize_space_weather(&payload, now) {
                Ok(weather) => sink.space_weather(&weather),
                Err(e) => warn!("Dropping space weather: {}", e),
            },
        }
        Vec::new()
    }

    fn on_history_loaded(
        &mut self,
        requested_for: String,
        payload: Value,
        now: f64,
        sink: &mut dyn RenderSink,
    ) {
        if self.selected.as_deref() != Some(requested_for.as_str()) {
            debug!(
                "Discarding history for {}; selection is now {:?}",
                requested_for, self.selected
            );
            return;
        }
        let batch = normalize_samples(payload, now);
        let samples: Vec<_> = batch
            .items
            .into_iter()
            .filter(|s| s.spacecraft_id == requested_for)
            .collect();
        self.replay(&requested_for, samples, Channel::Poll, now, sink);
    }

    fn on_transport_failure(
        &mut self,
        source: TransportSource,
        message: &str,
        sink: &mut dyn RenderSink,
    ) {
        error!("Transport failure on {}: {}", source, message);
        sink.transport_error(source, message);
        if source == TransportSource::Push {
            sink.connection(false);
        }
        if source == TransportSource::Command {
            return;
        }
        // Last good values stay on screen, flagged stale
        for (id, track) in self.tracks.iter_mut() {
            if track.current.is_some() && !track.stale {
                track.stale = true;
                sink.staleness(id, true);
            }
        }
    }

    fn select(&mut self, spacecraft_id: String, sink: &mut dyn RenderSink) -> Vec<Effect> {
        if spacecraft_id.is_empty() {
            warn!("Ignoring empty spacecraft selection");
            return Vec::new();
        }
        if self.selected.as_deref() == Some(spacecraft_id.as_str()) {
            return Vec::new();
        }
        info!("Selected spacecraft {}", spacecraft_id);
        self.selected = Some(spacecraft_id.clone());
        self.remember(&spacecraft_id, sink);
        sink.spacecraft_list(&self.known, self.selected.as_deref());
        self.rebuild_charts(sink);
        if let Some(current) = self.current(&spacecraft_id).cloned() {
            sink.headline(&current);
            if self.is_stale(&spacecraft_id) {
                sink.staleness(&spacecraft_id, true);
            }
        }
        vec![Effect::FetchHistory(spacecraft_id)]
    }

    fn apply_spacecraft_list(
        &mut self,
        ids: Vec<String>,
        sink: &mut dyn RenderSink,
    ) -> Vec<Effect> {
        if ids.is_empty() {
            return Vec::new();
        }
        self.known = ids;
        let valid = self
            .selected
            .as_ref()
            .is_some_and(|s| self.known.contains(s));
        if !valid {
            let first = self.known[0].clone();
            return self.select(first, sink);
        }
        sink.spacecraft_list(&self.known, self.selected.as_deref());
        Vec::new()
    }

    fn remember(&mut self, spacecraft_id: &str, sink: &mut dyn RenderSink) {
        if !self.known.iter().any(|k| k == spacecraft_id) {
            self.known.push(spacecraft_id.to_string());
            sink.spacecraft_list(&self.known, self.selected.as_deref());
        }
    }

    /// Accept one live sample from either channel
    fn ingest(
        &mut self,
        sample: TelemetrySample,
        channel: Channel,
        now: f64,
        sink: &mut dyn RenderSink,
    ) {
        let id = sample.spacecraft_id.clone();
        self.remember(&id, sink);
        let is_selected = self.selected.as_deref() == Some(id.as_str());
        let track = self
            .tracks
            .entry(id.clone())
            .or_insert_with(|| Track::new(&self.settings));

        let key = (id.clone(), TimeKey::from_secs(sample.timestamp));
        if !self.samples.check_and_record(key.clone(), now) {
            // A backend repeating its latest sample keeps the key alive
            self.samples.record(key, now);
            // Redelivery: only a push copy of a polled current sample matters
            if track.superseded_by(&sample, channel) {
                promote(track, &sample, channel, now, sink);
            }
            debug!("Duplicate sample for {} at {}", id, sample.timestamp);
            return;
        }

        track.history.push(sample.clone());
        if let Some(position) = sample.position {
            let point = RollingPoint::new(sample.timestamp, position);
            track.trail.push(point);
            sink.trail_point(&id, point);
        }

        let supersedes = track.superseded_by(&sample, channel);
        if supersedes {
            promote(track, &sample, channel, now, sink);
        } else {
            debug!(
                "Late sample for {} at {} kept for history only",
                id, sample.timestamp
            );
        }

        if is_selected {
            for (key, point) in chart_points(&sample) {
                self.charts.push(key, point);
                sink.chart_point(key.0, key.1, point);
            }
        }

        self.ingest_anomalies(&sample.anomalies, now, sink);
        self.ingest_decisions(&sample_decisions(&sample), now, sink);
        if supersedes && sample.sos_required {
            let reason = sample
                .sos_reason
                .clone()
                .unwrap_or_else(|| "SOS requested".to_string());
            self.raise_sos(&reason, Some(&id), false, now, sink);
        }
    }

    /// Replace one spacecraft's window wholesale with a fetched history
    fn replay(
        &mut self,
        spacecraft_id: &str,
        samples: Vec<TelemetrySample>,
        channel: Channel,
        now: f64,
        sink: &mut dyn RenderSink,
    ) {
        self.remember(spacecraft_id, sink);
        let track = self
            .tracks
            .entry(spacecraft_id.to_string())
            .or_insert_with(|| Track::new(&self.settings));

        for sample in &samples {
            self.samples.record(
                (spacecraft_id.to_string(), TimeKey::from_secs(sample.timestamp)),
                now,
            );
        }
        track.trail.replace_all(
            samples
                .iter()
                .filter_map(|s| s.position.map(|p| RollingPoint::new(s.timestamp, p))),
        );
        track.history.replace_all(samples.iter().cloned());
        sink.trail_replaced(spacecraft_id, &track.trail.to_series());

        let newest = samples
            .iter()
            .max_by(|a, b| a.timestamp.total_cmp(&b.timestamp))
            .cloned();
        let mut raised = None;
        if let Some(newest) = newest {
            if track.superseded_by(&newest, channel) {
                promote(track, &newest, channel, now, sink);
                if newest.sos_required {
                    raised = Some(
                        newest
                            .sos_reason
                            .clone()
                            .unwrap_or_else(|| "SOS requested".to_string()),
                    );
                }
            }
        }

        info!(
            "Replayed {} samples of history for {}",
            samples.len(),
            spacecraft_id
        );
        if self.selected.as_deref() == Some(spacecraft_id) {
            self.rebuild_charts(sink);
        }
        for sample in &samples {
            self.ingest_anomalies(&sample.anomalies, now, sink);
            self.ingest_decisions(&sample_decisions(sample), now, sink);
        }
        if let Some(reason) = raised {
            self.raise_sos(&reason, Some(spacecraft_id), false, now, sink);
        }
    }

    /// Charts always show exactly the selected spacecraft's history window
    fn rebuild_charts(&mut self, sink: &mut dyn RenderSink) {
        let history = self
            .selected
            .as_ref()
            .and_then(|id| self.tracks.get(id))
            .map(|t| t.history.to_series())
            .unwrap_or_default();

        let mut per_series: HashMap<SeriesKey, Vec<RollingPoint<f64>>> = HashMap::new();
        for sample in &history {
            for (key, point) in chart_points(sample) {
                per_series.entry(key).or_default().push(point);
            }
        }
        let keys: Vec<SeriesKey> = self.charts.keys().collect();
        for key in keys {
            self.charts
                .replace_all(key, per_series.remove(&key).unwrap_or_default());
            sink.chart_replaced(key.0, key.1, &self.charts.series(key));
        }
    }

    fn ingest_anomalies(
        &mut self,
        anomalies: &[AnomalyEvent],
        now: f64,
        sink: &mut dyn RenderSink,
    ) {
        for anomaly in anomalies {
            if !self.anomalies.check_and_record(anomaly.fingerprint(), now) {
                debug!("Suppressed duplicate anomaly: {}", anomaly.message);
                continue;
            }
            info!("Anomaly on {}: {}", anomaly.spacecraft_id, anomaly.message);
            sink.log_row(LogRow::from(anomaly));
            if anomaly.severity == Severity::Critical {
                self.raise_sos(&anomaly.message, Some(&anomaly.spacecraft_id), true, now, sink);
            }
        }
    }

    fn ingest_decisions(&mut self, decisions: &[Decision], now: f64, sink: &mut dyn RenderSink) {
        for decision in decisions {
            if self.decisions.check_and_record(decision.fingerprint(), now) {
                sink.log_row(LogRow::from(decision));
            }
        }
    }

    fn ingest_log_entries(
        &mut self,
        entries: &[LogEntry],
        now: f64,
        sink: &mut dyn RenderSink,
    ) {
        for entry in entries {
            if self.log_entries.check_and_record(entry.fingerprint(), now) {
                sink.log_row(LogRow::from(entry));
            }
        }
    }

    fn raise_sos(
        &mut self,
        reason: &str,
        spacecraft_id: Option<&str>,
        is_new: bool,
        now: f64,
        sink: &mut dyn RenderSink,
    ) {
        match self.alerts.evaluate(reason, now) {
            AlertDecision::Show => {
                warn!("SOS: {}", reason);
                sink.sos_alert(&SosAlert {
                    reason: reason.to_string(),
                    spacecraft_id: spacecraft_id.map(str::to_string),
                    raised_at: now,
                    is_new,
                });
            }
            AlertDecision::CoolingDown => debug!("SOS {} suppressed: cooling down", reason),
            AlertDecision::Acknowledged => debug!("SOS {} suppressed: acknowledged", reason),
        }
    }

    fn mark_stale_tracks(&mut self, now: f64, sink: &mut dyn RenderSink) {
        let stale_after = self.settings.stale_after;
        for (id, track) in self.tracks.iter_mut() {
            if track.current.is_some() && !track.stale && now - track.received_at > stale_after {
                track.stale = true;
                sink.staleness(id, true);
            }
        }
    }

    fn sweep(&mut self, now: f64) {
        self.anomalies.sweep(now);
        self.decisions.sweep(now);
        self.log_entries.sweep(now);
        self.samples.sweep(now);
        self.alerts.sweep(now);
    }
}

/// Make `sample` the displayed current value of its track
fn promote(
    track: &mut Track,
    sample: &TelemetrySample,
    channel: Channel,
    now: f64,
    sink: &mut dyn RenderSink,
) {
    track.current = Some(sample.clone());
    track.current_channel = channel;
    track.received_at = now;
    if track.stale {
        track.stale = false;
        sink.staleness(&sample.spacecraft_id, false);
    }
    sink.headline(sample);
    if let Some(position) = sample.position {
        sink.entity_moved(&sample.spacecraft_id, position);
    }
}

fn chart_points(sample: &TelemetrySample) -> Vec<(SeriesKey, RollingPoint<f64>)> {
    let x = sample.timestamp;
    let mut points = Vec::with_capacity(7);
    let mut add = |chart: ChartKind, series: usize, value: Option<f64>| {
        if let Some(y) = value.filter(|v| v.is_finite()) {
            points.push(((chart, series), RollingPoint::new(x, y)));
        }
    };
    add(ChartKind::Temperature, 0, sample.temperature);
    add(ChartKind::Velocity, 0, sample.speed());
    add(ChartKind::Position, 0, sample.position.map(|p| p.x));
    add(ChartKind::Position, 1, sample.position.map(|p| p.y));
    add(ChartKind::Position, 2, sample.position.map(|p| p.z));
    add(ChartKind::SignalQuality, 0, sample.signal_quality);
    add(ChartKind::Energy, 0, sample.energy_level);
    points
}

fn sample_decisions(sample: &TelemetrySample) -> Vec<Decision> {
    sample
        .decisions
        .iter()
        .map(|decision| Decision {
            timestamp: sample.timestamp,
            spacecraft_id: sample.spacecraft_id.clone(),
            decision: decision.clone(),
            result: "Success".to_string(),
        })
        .collect()
}

/// Stable grouping: spacecraft in first-seen order, samples in arrival order
fn group_by_spacecraft(samples: Vec<TelemetrySample>) -> Vec<(String, Vec<TelemetrySample>)> {
    let mut groups: Vec<(String, Vec<TelemetrySample>)> = Vec::new();
    for sample in samples {
        match groups.iter_mut().find(|(id, _)| *id == sample.spacecraft_id) {
            Some((_, group)) => group.push(sample),
            None => groups.push((sample.spacecraft_id.clone(), vec![sample])),
        }
    }
    groups
}

fn command_row(raw: &Value, now: f64) -> LogRow {
    let command = s_pick(raw, &["command_type", "command", "type"])
        .unwrap_or_else(|| "command".to_string());
    let detail = raw
        .get("parameters")
        .filter(|p| !p.is_null())
        .map(|p| format!(" {}", p))
        .unwrap_or_default();
    let timestamp = match raw.get("timestamp").map(parse_timestamp) {
        Some(TimeRead::Parsed(t)) => t,
        _ => now,
    };
    LogRow {
        timestamp,
        spacecraft_id: s_pick(raw, &["spacecraft_id", "spacecraftId"]),
        kind: LogKind::Command,
        level: "info".to_string(),
        message: format!("Command sent: {}{}", command, detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommStats, SpaceWeather, SystemStatus};
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSink {
        headlines: Vec<(String, f64)>,
        chart_points: Vec<(ChartKind, usize, RollingPoint<f64>)>,
        chart_replacements: Vec<(ChartKind, usize, usize)>,
        trail_points: Vec<String>,
        rows: Vec<LogRow>,
        sos: Vec<SosAlert>,
        stale: Vec<(String, bool)>,
        lists: Vec<(Vec<String>, Option<String>)>,
        paused: Vec<bool>,
        connection: Vec<bool>,
        errors: Vec<String>,
        statuses: usize,
    }

    impl RenderSink for RecordingSink {
        fn chart_point(&mut self, chart: ChartKind, series: usize, point: RollingPoint<f64>) {
            self.chart_points.push((chart, series, point));
        }
        fn chart_replaced(&mut self, chart: ChartKind, series: usize, points: &[RollingPoint<f64>]) {
            self.chart_replacements.push((chart, series, points.len()));
        }
        fn entity_moved(&mut self, _spacecraft_id: &str, _position: Vec3) {}
        fn trail_point(&mut self, spacecraft_id: &str, _point: RollingPoint<Vec3>) {
            self.trail_points.push(spacecraft_id.to_string());
        }
        fn trail_replaced(&mut self, _spacecraft_id: &str, _points: &[RollingPoint<Vec3>]) {}
        fn headline(&mut self, sample: &TelemetrySample) {
            self.headlines
                .push((sample.spacecraft_id.clone(), sample.timestamp));
        }
        fn staleness(&mut self, spacecraft_id: &str, stale: bool) {
            self.stale.push((spacecraft_id.to_string(), stale));
        }
        fn log_row(&mut self, row: LogRow) {
            self.rows.push(row);
        }
        fn sos_alert(&mut self, alert: &SosAlert) {
            self.sos.push(alert.clone());
        }
        fn alert_acknowledged(&mut self, _reason: &str, _until: f64) {}
        fn system_status(&mut self, _status: &SystemStatus) {
            self.statuses += 1;
        }
        fn comm_stats(&mut self, _stats: &CommStats) {}
        fn space_weather(&mut self, _weather: &SpaceWeather) {}
        fn spacecraft_list(&mut self, ids: &[String], selected: Option<&str>) {
            self.lists
                .push((ids.to_vec(), selected.map(str::to_string)));
        }
        fn pause_state(&mut self, ack: &CommandAck) {
            self.paused.push(ack.paused);
        }
        fn connection(&mut self, connected: bool) {
            self.connection.push(connected);
        }
        fn transport_error(&mut self, source: TransportSource, message: &str) {
            self.errors.push(format!("{}: {}", source, message));
        }
    }

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(EngineSettings::default())
    }

    fn telemetry(id: &str, ts: f64, temperature: f64) -> Value {
        json!({
            "spacecraft_id": id,
            "timestamp": ts,
            "temperature": temperature,
            "position": {"x": 7000.0, "y": 0.0, "z": 0.0},
            "velocity": {"x": 0.0, "y": 7.5, "z": 0.0},
        })
    }

    fn push(engine: &mut ReconciliationEngine, sink: &mut RecordingSink, raw: Value, now: f64) {
        engine.handle(
            EngineEvent::Push(PushMessage::TelemetryUpdate(raw)),
            now,
            sink,
        );
    }

    fn poll(engine: &mut ReconciliationEngine, sink: &mut RecordingSink, raw: Value, now: f64) {
        engine.handle(
            EngineEvent::Polled(Endpoint::LatestTelemetry, raw),
            now,
            sink,
        );
    }

    fn anomaly(ts: f64, message: &str, severity: &str) -> Value {
        json!({"timestamp": ts, "spacecraft_id": "A", "message": message, "severity": severity})
    }

    #[test]
    fn current_value_never_moves_backwards() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        for ts in [10.0, 5.0, 20.0, 15.0] {
            push(&mut engine, &mut sink, telemetry("A", ts, 20.0), 100.0);
        }
        let shown: Vec<f64> = sink.headlines.iter().map(|(_, ts)| *ts).collect();
        assert_eq!(shown, vec![10.0, 20.0]);
        assert_eq!(engine.current("A").map(|s| s.timestamp), Some(20.0));
        // late samples still land in history
        let history: Vec<f64> = engine.history("A").iter().map(|s| s.timestamp).collect();
        assert_eq!(history, vec![10.0, 5.0, 20.0, 15.0]);
    }

    #[test]
    fn selected_spacecraft_feeds_charts() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        engine.handle(EngineEvent::Select("A".into()), 0.0, &mut sink);
        push(&mut engine, &mut sink, telemetry("A", 1.0, 21.5), 1.0);
        push(&mut engine, &mut sink, telemetry("B", 1.0, 99.0), 1.0);

        let temps = engine.series((ChartKind::Temperature, 0));
        assert_eq!(temps, vec![RollingPoint::new(1.0, 21.5)]);
        let speed = engine.series((ChartKind::Velocity, 0));
        assert!((speed[0].y - 7.5).abs() < 1e-9);
        assert_eq!(engine.series((ChartKind::Position, 0))[0].y, 7000.0);
        // five populated series for A, none for B
        assert_eq!(sink.chart_points.len(), 5);
        assert_eq!(sink.trail_points, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn chart_window_is_clamped() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        engine.handle(EngineEvent::Select("A".into()), 0.0, &mut sink);
        for i in 0..40 {
            push(&mut engine, &mut sink, telemetry("A", i as f64, i as f64), i as f64);
        }
        let temps = engine.series((ChartKind::Temperature, 0));
        assert_eq!(temps.len(), 30);
        assert_eq!(temps[0].x, 10.0);
        assert_eq!(temps[29].x, 39.0);
    }

    #[test]
    fn anomalies_are_idempotent_across_paths() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        let raw = anomaly(50.0, "Overheat", "warning");
        engine.handle(
            EngineEvent::Push(PushMessage::NewAnomaly(raw.clone())),
            50.0,
            &mut sink,
        );
        engine.handle(
            EngineEvent::Polled(Endpoint::Anomalies, json!([raw.clone()])),
            55.0,
            &mut sink,
        );
        engine.handle(
            EngineEvent::Push(PushMessage::AnomalyHistory(json!([raw.clone()]))),
            56.0,
            &mut sink,
        );
        assert_eq!(sink.rows.len(), 1);
        assert_eq!(sink.rows[0].kind, LogKind::Anomaly);

        // after the retention window the same fingerprint is new again
        engine.handle(
            EngineEvent::Polled(Endpoint::Anomalies, json!([raw])),
            50.0 + 86_400.0 + 1.0,
            &mut sink,
        );
        assert_eq!(sink.rows.len(), 2);
    }

    #[test]
    fn critical_anomaly_raises_sos_once_per_cooldown() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        engine.handle(
            EngineEvent::Push(PushMessage::NewAnomaly(anomaly(1.0, "Hull breach", "critical"))),
            1.0,
            &mut sink,
        );
        engine.handle(
            EngineEvent::Push(PushMessage::NewAnomaly(anomaly(2.0, "Hull breach", "critical"))),
            2.0,
            &mut sink,
        );
        assert_eq!(sink.rows.len(), 2);
        assert_eq!(sink.sos.len(), 1);
        assert_eq!(sink.sos[0].reason, "Hull breach");
        assert_eq!(sink.sos[0].spacecraft_id.as_deref(), Some("A"));
    }

    #[test]
    fn repeated_status_sos_respects_cooldown_and_ack() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        let status = json!({"sos_required": true, "sos_reason": "Power failure", "sos_is_new": true});
        for now in [0.0, 5.0, 30.0] {
            engine.handle(
                EngineEvent::Polled(Endpoint::SystemStatus, status.clone()),
                now,
                &mut sink,
            );
        }
        assert_eq!(sink.statuses, 3);
        assert_eq!(sink.sos.len(), 1);
        assert!(sink.sos[0].is_new);

        engine.handle(
            EngineEvent::Polled(Endpoint::SystemStatus, status.clone()),
            61.0,
            &mut sink,
        );
        assert_eq!(sink.sos.len(), 2);

        engine.handle(EngineEvent::Acknowledge("Power failure".into()), 62.0, &mut sink);
        assert_eq!(engine.alert_state("Power failure", 63.0), AlertState::Acknowledged);
        engine.handle(
            EngineEvent::Polled(Endpoint::SystemStatus, status.clone()),
            200.0,
            &mut sink,
        );
        assert_eq!(sink.sos.len(), 2);
        engine.handle(
            EngineEvent::Polled(Endpoint::SystemStatus, status),
            662.0,
            &mut sink,
        );
        assert_eq!(sink.sos.len(), 3);
    }

    #[test]
    fn sample_sos_uses_its_reason() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        let mut raw = telemetry("A", 1.0, 20.0);
        raw["sos_required"] = json!(true);
        raw["sos_reason"] = json!("Low battery");
        push(&mut engine, &mut sink, raw, 1.0);
        assert_eq!(sink.sos.len(), 1);
        assert_eq!(sink.sos[0].reason, "Low battery");
    }

    #[test]
    fn late_history_for_old_selection_is_discarded() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        let effects = engine.handle(EngineEvent::Select("A".into()), 0.0, &mut sink);
        assert_eq!(effects, vec![Effect::FetchHistory("A".into())]);
        let effects = engine.handle(EngineEvent::Select("B".into()), 1.0, &mut sink);
        assert_eq!(effects, vec![Effect::FetchHistory("B".into())]);

        engine.handle(
            EngineEvent::HistoryLoaded {
                requested_for: "A".into(),
                payload: json!([telemetry("A", 1.0, 10.0), telemetry("A", 2.0, 11.0)]),
            },
            2.0,
            &mut sink,
        );
        assert!(engine.history("A").is_empty());
        assert!(engine.series((ChartKind::Temperature, 0)).is_empty());

        engine.handle(
            EngineEvent::HistoryLoaded {
                requested_for: "B".into(),
                payload: json!([telemetry("B", 1.0, 10.0), telemetry("B", 2.0, 11.0)]),
            },
            3.0,
            &mut sink,
        );
        assert_eq!(engine.history("B").len(), 2);
        assert_eq!(engine.series((ChartKind::Temperature, 0)).len(), 2);
        assert_eq!(engine.current("B").map(|s| s.timestamp), Some(2.0));
    }

    #[test]
    fn switching_selection_rebuilds_charts_from_history() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        engine.handle(EngineEvent::Select("A".into()), 0.0, &mut sink);
        push(&mut engine, &mut sink, telemetry("A", 1.0, 10.0), 1.0);
        push(&mut engine, &mut sink, telemetry("B", 1.0, 50.0), 1.0);
        push(&mut engine, &mut sink, telemetry("B", 2.0, 51.0), 2.0);

        sink.chart_replacements.clear();
        engine.handle(EngineEvent::Select("B".into()), 3.0, &mut sink);
        let temps: Vec<f64> = engine
            .series((ChartKind::Temperature, 0))
            .iter()
            .map(|p| p.y)
            .collect();
        assert_eq!(temps, vec![50.0, 51.0]);
        assert_eq!(sink.chart_replacements.len(), 7);
    }

    #[test]
    fn transport_failure_keeps_last_values_and_marks_stale() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        push(&mut engine, &mut sink, telemetry("A", 1.0, 20.0), 1.0);
        engine.handle(
            EngineEvent::TransportFailed {
                source: TransportSource::Push,
                error: "connection reset".into(),
            },
            2.0,
            &mut sink,
        );
        assert_eq!(engine.current("A").map(|s| s.timestamp), Some(1.0));
        assert!(engine.is_stale("A"));
        assert_eq!(sink.connection, vec![false]);
        assert_eq!(sink.errors, vec!["push channel: connection reset".to_string()]);

        push(&mut engine, &mut sink, telemetry("A", 3.0, 20.0), 3.0);
        assert!(!engine.is_stale("A"));
        assert_eq!(
            sink.stale,
            vec![("A".to_string(), true), ("A".to_string(), false)]
        );
    }

    #[test]
    fn clock_tick_marks_silent_tracks_stale() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        push(&mut engine, &mut sink, telemetry("A", 1.0, 20.0), 100.0);
        engine.handle(EngineEvent::ClockTick, 110.0, &mut sink);
        assert!(!engine.is_stale("A"));
        engine.handle(EngineEvent::ClockTick, 116.0, &mut sink);
        assert!(engine.is_stale("A"));
        engine.handle(EngineEvent::ClockTick, 117.0, &mut sink);
        assert_eq!(sink.stale.len(), 1);
    }

    #[test]
    fn spacecraft_list_auto_selects_first() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        let effects = engine.handle(
            EngineEvent::Polled(Endpoint::SpacecraftList, json!(["SC-1", "SC-2"])),
            0.0,
            &mut sink,
        );
        assert_eq!(engine.selected(), Some("SC-1"));
        assert_eq!(effects, vec![Effect::FetchHistory("SC-1".into())]);

        // a still-valid selection is kept
        let effects = engine.handle(
            EngineEvent::Polled(Endpoint::SpacecraftList, json!(["SC-2", "SC-1"])),
            1.0,
            &mut sink,
        );
        assert!(effects.is_empty());
        assert_eq!(engine.selected(), Some("SC-1"));

        // empty list leaves everything as is
        engine.handle(
            EngineEvent::Polled(Endpoint::SpacecraftList, json!([])),
            2.0,
            &mut sink,
        );
        assert_eq!(engine.selected(), Some("SC-1"));
    }

    #[test]
    fn push_wins_a_timestamp_tie_with_poll() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        poll(&mut engine, &mut sink, json!([telemetry("A", 5.0, 20.0)]), 5.0);
        push(&mut engine, &mut sink, telemetry("A", 5.0, 20.0), 5.5);
        assert_eq!(sink.headlines.len(), 2);

        // the reverse order does not flap back to the polled copy
        poll(&mut engine, &mut sink, json!([telemetry("A", 5.0, 20.0)]), 6.0);
        assert_eq!(sink.headlines.len(), 2);
        // and a redelivered sample is not appended twice
        assert_eq!(engine.history("A").len(), 1);
    }

    #[test]
    fn reconnect_refetches_selected_history() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        assert!(engine
            .handle(EngineEvent::PushConnected, 0.0, &mut sink)
            .is_empty());
        engine.handle(EngineEvent::Select("A".into()), 0.0, &mut sink);
        let effects = engine.handle(EngineEvent::PushConnected, 1.0, &mut sink);
        assert_eq!(effects, vec![Effect::FetchHistory("A".into())]);
        assert_eq!(sink.connection, vec![true, true]);
    }

    #[test]
    fn pause_state_follows_acknowledgement_only() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        assert_eq!(engine.paused(), None);
        engine.handle(
            EngineEvent::TransportFailed {
                source: TransportSource::Command,
                error: "timeout".into(),
            },
            1.0,
            &mut sink,
        );
        assert_eq!(engine.paused(), None);

        let ack = CommandAck {
            status: "success".into(),
            paused: true,
            spacecraft_id: Some("A".into()),
            message: None,
        };
        engine.handle(EngineEvent::CommandAcked(ack), 2.0, &mut sink);
        assert_eq!(engine.paused(), Some(true));
        assert_eq!(sink.paused, vec![true]);
        assert_eq!(sink.rows.last().map(|r| r.kind), Some(LogKind::Command));
    }

    #[test]
    fn decisions_and_logs_are_deduplicated() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        let decisions = json!([{"timestamp": 1.0, "spacecraft_id": "A", "decision": "Rotate panels"}]);
        engine.handle(
            EngineEvent::Polled(Endpoint::Decisions, decisions.clone()),
            1.0,
            &mut sink,
        );
        engine.handle(EngineEvent::Polled(Endpoint::Decisions, decisions), 6.0, &mut sink);

        let log = json!({"timestamp": 2.0, "level": "info", "message": "Link up"});
        engine.handle(
            EngineEvent::Push(PushMessage::LogEntry(log.clone())),
            2.0,
            &mut sink,
        );
        engine.handle(
            EngineEvent::Push(PushMessage::LogHistory(json!([log]))),
            3.0,
            &mut sink,
        );
        let kinds: Vec<LogKind> = sink.rows.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![LogKind::Decision, LogKind::Log]);
    }

    #[test]
    fn repeated_latest_sample_is_charted_once() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        engine.handle(EngineEvent::Select("A".into()), 0.0, &mut sink);
        let latest = json!({"A": {"spacecraft_id": "A", "timestamp": 1.0, "temperature": 20.0}});
        // the backend keeps answering with the same sample well past the redelivery window
        let mut now = 1.0;
        while now <= 1_300.0 {
            poll(&mut engine, &mut sink, latest.clone(), now);
            now += 5.0;
        }
        let xs: Vec<f64> = engine
            .series((ChartKind::Temperature, 0))
            .iter()
            .map(|p| p.x)
            .collect();
        assert_eq!(xs, vec![1.0]);
        assert_eq!(engine.history("A").len(), 1);
        assert_eq!(sink.headlines.len(), 1);
    }

    #[test]
    fn pushed_decision_and_polled_copy_log_once() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        let decision = json!({
            "timestamp": 7.0,
            "spacecraft_id": "A",
            "decision": "Switch to backup transmitter",
            "result": "Success",
        });
        engine.handle(
            EngineEvent::Push(PushMessage::NewDecision(decision.clone())),
            7.0,
            &mut sink,
        );
        engine.handle(
            EngineEvent::Polled(Endpoint::Decisions, json!([decision])),
            10.0,
            &mut sink,
        );
        assert_eq!(sink.rows.len(), 1);
        assert_eq!(sink.rows[0].kind, LogKind::Decision);
        assert_eq!(sink.rows[0].message, "Switch to backup transmitter (Success)");
    }

    #[test]
    fn malformed_records_do_not_disturb_state() {
        let mut engine = engine();
        let mut sink = RecordingSink::default();
        push(&mut engine, &mut sink, telemetry("A", 1.0, 20.0), 1.0);
        push(&mut engine, &mut sink, json!({"temperature": 5.0}), 2.0);
        push(&mut engine, &mut sink, json!("nonsense"), 2.0);
        assert_eq!(engine.current("A").map(|s| s.timestamp), Some(1.0));
        assert_eq!(sink.headlines.len(), 1);
    }

    #[test]
    fn command_rows_describe_the_command() {
        let row = command_row(
            &json!({"command_type": "adjust_orbit", "spacecraft_id": "A", "timestamp": 4.0}),
            9.0,
        );
        assert_eq!(row.message, "Command sent: adjust_orbit");
        assert_eq!(row.timestamp, 4.0);
        assert_eq!(row.spacecraft_id.as_deref(), Some("A"));
    }
}

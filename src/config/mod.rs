/// Application configuration module
use anyhow::{bail, Context};
use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend_url: String,
    pub push_addr: String,
    pub listen_addr: String,
    pub log_level: String,
    pub intervals: PollIntervals,
    pub engine: EngineSettings,
}

#[derive(Clone, Debug)]
pub struct PollIntervals {
    pub poll_ms: u64,
    pub clock_ms: u64,
    pub push_reconnect_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            poll_ms: 5_000,
            clock_ms: 1_000,
            push_reconnect_seconds: 5,
            request_timeout_seconds: 10,
        }
    }
}

/// Tunables of the reconciliation engine; durations in seconds
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub chart_capacity: usize,
    pub trail_capacity: usize,
    pub history_capacity: usize,
    pub history_limit: usize,
    pub anomaly_ttl: f64,
    pub sample_ttl: f64,
    pub alert_cooldown: f64,
    pub alert_ack_window: f64,
    pub stale_after: f64,
    pub log_max_rows: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chart_capacity: 30,
            trail_capacity: 50,
            history_capacity: 100,
            history_limit: 100,
            anomaly_ttl: 86_400.0, // 24h
            sample_ttl: 600.0,
            alert_cooldown: 60.0,
            alert_ack_window: 600.0, // 10 min
            stale_after: 15.0,
            log_max_rows: 100,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            chart_capacity: env_parse("CHART_CAPACITY", defaults.chart_capacity)?,
            trail_capacity: env_parse("TRAIL_CAPACITY", defaults.trail_capacity)?,
            history_capacity: env_parse("HISTORY_CAPACITY", defaults.history_capacity)?,
            history_limit: env_parse("HISTORY_LIMIT", defaults.history_limit)?,
            anomaly_ttl: env_parse("ANOMALY_TTL_SECONDS", 86_400u64)? as f64,
            sample_ttl: env_parse("SAMPLE_TTL_SECONDS", 600u64)? as f64,
            alert_cooldown: env_parse("ALERT_COOLDOWN_SECONDS", 60u64)? as f64,
            alert_ack_window: env_parse("ALERT_ACK_SECONDS", 600u64)? as f64,
            stale_after: env_parse("STALE_AFTER_SECONDS", 15u64)? as f64,
            log_max_rows: env_parse("LOG_MAX_ROWS", defaults.log_max_rows)?,
        };

        let intervals = PollIntervals {
            poll_ms: env_parse("POLL_EVERY_MS", 5_000u64)?,
            clock_ms: env_parse("CLOCK_TICK_MS", 1_000u64)?,
            push_reconnect_seconds: env_parse("PUSH_RECONNECT_SECONDS", 5u64)?,
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS", 10u64)?,
        };

        let config = Self {
            backend_url: env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:5000".to_string()),
            push_addr: env::var("PUSH_ADDR").unwrap_or_else(|_| "127.0.0.1:50054".to_string()),
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            intervals,
            engine,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine.chart_capacity == 0 || self.engine.history_capacity == 0 {
            bail!("chart and history capacities must be greater than zero");
        }
        if !(50..=100).contains(&self.engine.trail_capacity) {
            bail!("TRAIL_CAPACITY must be between 50 and 100");
        }
        if self.intervals.poll_ms == 0 || self.intervals.clock_ms == 0 {
            bail!("poll and clock periods must be greater than zero");
        }
        if self.engine.log_max_rows == 0 {
            bail!("LOG_MAX_ROWS must be greater than zero");
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number, got {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

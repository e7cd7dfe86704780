/// Backend transport: HTTP poll/command client and the push stream reader
use crate::domain::{CommandAck, PauseRequest};
use crate::errors::{ConsoleError, ConsoleResult};
use crate::services::engine::{EngineEvent, TransportSource};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// HTTP client wrapper with common configuration
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> ConsoleResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("space-telemetry-console/0.1")
            .build()?;
        Ok(Self { client })
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}

/// Polled backend resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    LatestTelemetry,
    SpacecraftList,
    SystemStatus,
    CommStats,
    Anomalies,
    Decisions,
    SpaceWeather,
}

impl Endpoint {
    pub const POLLED: [Endpoint; 7] = [
        Endpoint::LatestTelemetry,
        Endpoint::SpacecraftList,
        Endpoint::SystemStatus,
        Endpoint::CommStats,
        Endpoint::Anomalies,
        Endpoint::Decisions,
        Endpoint::SpaceWeather,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::LatestTelemetry => "/api/telemetry/latest",
            Endpoint::SpacecraftList => "/api/spacecraft/list",
            Endpoint::SystemStatus => "/api/system/status",
            Endpoint::CommStats => "/api/comm/stats",
            Endpoint::Anomalies => "/api/anomalies",
            Endpoint::Decisions => "/api/autonomous/decisions",
            Endpoint::SpaceWeather => "/api/space-weather",
        }
    }
}

/// Dashboard backend REST client
pub struct DashboardClient {
    http_client: HttpClient,
    base_url: String,
}

impl DashboardClient {
    pub fn new(base_url: String, timeout: Duration) -> ConsoleResult<Self> {
        Ok(Self {
            http_client: HttpClient::new(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(&self, req: reqwest::RequestBuilder) -> ConsoleResult<Value> {
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(ConsoleError::Upstream(format!(
                "request to {} failed with status {}",
                resp.url(),
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    /// Fetch one polled resource as raw JSON
    pub async fn fetch(&self, endpoint: Endpoint) -> ConsoleResult<Value> {
        let req = self.http_client.get_client().get(self.url(endpoint.path()));
        self.get_json(req).await
    }

    /// Fetch the rolling history of one spacecraft
    pub async fn fetch_history(&self, spacecraft_id: &str, limit: usize) -> ConsoleResult<Value> {
        let req = self
            .http_client
            .get_client()
            .get(self.url("/api/telemetry/history"))
            .query(&[("spacecraft_id", spacecraft_id.to_string()), ("limit", limit.to_string())]);
        self.get_json(req).await
    }

    /// Pause or resume; the reply is the only source of pause state
    pub async fn set_paused(&self, request: &PauseRequest) -> ConsoleResult<CommandAck> {
        let resp = self
            .http_client
            .get_client()
            .post(self.url("/api/spacecraft/pause"))
            .json(request)
            .send()
            .await?;
        let status = resp.status();
        let ack: CommandAck = resp.json().await?;
        if !status.is_success() || ack.status != "success" {
            return Err(ConsoleError::Upstream(
                ack.message
                    .unwrap_or_else(|| format!("pause command rejected with status {}", status)),
            ));
        }
        Ok(ack)
    }
}

/// Named events carried on the push stream
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    TelemetryUpdate(Value),
    TelemetryHistory(Value),
    NewAnomaly(Value),
    AnomalyHistory(Value),
    NewDecision(Value),
    LogEntry(Value),
    LogHistory(Value),
    CommandSent(Value),
    SpacecraftList(Value),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(alias = "type")]
    event: String,
    #[serde(default)]
    data: Value,
}

impl PushMessage {
    /// Parse one `{"event": .., "data": ..}` line; pings and unknown events yield `None`
    pub fn parse(line: &str) -> ConsoleResult<Option<Self>> {
        let envelope: Envelope = serde_json::from_str(line)?;
        let data = envelope.data;
        let message = match envelope.event.as_str() {
            "telemetry_update" => PushMessage::TelemetryUpdate(data),
            "telemetry_history" => PushMessage::TelemetryHistory(data),
            "new_anomaly" => PushMessage::NewAnomaly(data),
            "anomaly_history" => PushMessage::AnomalyHistory(data),
            "new_decision" => PushMessage::NewDecision(data),
            "log_entry" => PushMessage::LogEntry(data),
            "log_history" => PushMessage::LogHistory(data),
            "command_sent" => PushMessage::CommandSent(data),
            "spacecraft_list" => PushMessage::SpacecraftList(data),
            "ping" => return Ok(None),
            other => {
                debug!("Ignoring push event {}", other);
                return Ok(None);
            }
        };
        Ok(Some(message))
    }
}

/// Line-delimited JSON push stream with fixed-delay reconnect
pub struct PushClient {
    addr: String,
    reconnect_delay: Duration,
}

impl PushClient {
    pub fn new(addr: String, reconnect_delay: Duration) -> Self {
        Self {
            addr,
            reconnect_delay,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Runs until the engine queue closes
    pub async fn run(&self, events: mpsc::Sender<EngineEvent>) {
        loop {
            let outcome = self.stream_once(&events).await;
            if events.is_closed() {
                return;
            }
            let message = match outcome {
                Ok(()) => "push stream closed by peer".to_string(),
                Err(e) => e.to_string(),
            };
            error!("Push channel error: {}", message);
            let failed = EngineEvent::TransportFailed {
                source: TransportSource::Push,
                error: message,
            };
            if events.send(failed).await.is_err() {
                return;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn stream_once(&self, events: &mpsc::Sender<EngineEvent>) -> ConsoleResult<()> {
        let stream = TcpStream::connect(&self.addr).await?;
        info!("Connected to push stream at {}", self.addr);
        if events.send(EngineEvent::PushConnected).await.is_err() {
            return Ok(());
        }

        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match PushMessage::parse(&line) {
                Ok(Some(message)) => {
                    if events.send(EngineEvent::Push(message)).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Dropping undecodable push line: {}", e),
            }
        }
        Ok(())
    }
}

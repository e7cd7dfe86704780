/// HTTP request handlers
use crate::clients::DashboardClient;
use crate::domain::{CommandAck, Health, PauseRequest};
use crate::errors::{ConsoleError, ConsoleResult};
use crate::render::{LogRow, ViewSnapshot};
use crate::repo::{ChartKind, RollingPoint};
use crate::services::{EngineEvent, TransportSource};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::warn;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub events: mpsc::Sender<EngineEvent>,
    pub view: watch::Receiver<ViewSnapshot>,
    pub client: Arc<DashboardClient>,
}

impl AppState {
    async fn enqueue(&self, event: EngineEvent) -> ConsoleResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| ConsoleError::EngineUnavailable)
    }
}

/// Successful response wrapper
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { ok: true, data }
    }
}

#[derive(Serialize)]
pub struct LogsView {
    pub items: Vec<LogRow>,
}

#[derive(Serialize)]
pub struct ChartView {
    pub chart: ChartKind,
    pub series: Vec<Vec<RollingPoint<f64>>>,
}

/// Health check handler
pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        now: Utc::now(),
    })
}

/// Whole dashboard snapshot
pub async fn get_view(State(state): State<AppState>) -> Json<SuccessResponse<ViewSnapshot>> {
    let view = state.view.borrow().clone();
    Json(SuccessResponse::new(view))
}

/// Operator log table, newest first
pub async fn get_logs(State(state): State<AppState>) -> Json<SuccessResponse<LogsView>> {
    let items = state.view.borrow().logs.clone();
    Json(SuccessResponse::new(LogsView { items }))
}

/// One chart of the selected spacecraft
pub async fn get_chart(
    Path(chart): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<ChartView>>, ConsoleError> {
    let kind = ChartKind::parse(&chart)
        .ok_or_else(|| ConsoleError::InvalidInput(format!("unknown chart {:?}", chart)))?;
    let series = state
        .view
        .borrow()
        .charts
        .get(&kind)
        .cloned()
        .unwrap_or_else(|| vec![Vec::new(); kind.series_count()]);
    Ok(Json(SuccessResponse::new(ChartView {
        chart: kind,
        series,
    })))
}

/// Change the selected spacecraft
pub async fn select_spacecraft(
    Path(spacecraft_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ConsoleError> {
    let spacecraft_id = spacecraft_id.trim().to_string();
    if spacecraft_id.is_empty() {
        return Err(ConsoleError::InvalidInput("empty spacecraft id".into()));
    }
    state
        .enqueue(EngineEvent::Select(spacecraft_id.clone()))
        .await?;
    Ok(Json(json!(SuccessResponse::new(json!({
        "selected": spacecraft_id
    })))))
}

/// Operator acknowledgement of an SOS reason
pub async fn acknowledge_alert(
    Path(reason): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ConsoleError> {
    state
        .enqueue(EngineEvent::Acknowledge(reason.clone()))
        .await?;
    Ok(Json(json!(SuccessResponse::new(json!({
        "acknowledged": reason
    })))))
}

/// Forward a pause/resume request; displayed state changes only from the reply
pub async fn pause_spacecraft(
    State(state): State<AppState>,
    Json(request): Json<PauseRequest>,
) -> Result<Json<SuccessResponse<CommandAck>>, ConsoleError> {
    match state.client.set_paused(&request).await {
        Ok(ack) => {
            state.enqueue(EngineEvent::CommandAcked(ack.clone())).await?;
            Ok(Json(SuccessResponse::new(ack)))
        }
        Err(e) => {
            warn!("Pause command failed: {}", e);
            state
                .enqueue(EngineEvent::TransportFailed {
                    source: TransportSource::Command,
                    error: e.to_string(),
                })
                .await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::render::{RenderSink, SnapshotSink};
    use axum::routing::post;
    use axum::Router;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn backend(reply: Value) -> String {
        let app = Router::new().route(
            "/api/spacecraft/pause",
            post(move || {
                let reply = reply.clone();
                async move { Json(reply) }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    fn state(base_url: String) -> (AppState, mpsc::Receiver<EngineEvent>, SnapshotSink) {
        let (tx, rx) = mpsc::channel(8);
        let (sink, view) = SnapshotSink::new(&EngineSettings::default());
        let client = Arc::new(DashboardClient::new(base_url, Duration::from_secs(2)).unwrap());
        (
            AppState {
                events: tx,
                view,
                client,
            },
            rx,
            sink,
        )
    }

    #[tokio::test]
    async fn select_enqueues_event() {
        let (state, mut rx, _sink) = state("http://127.0.0.1:1".into());
        let Json(body) = select_spacecraft(Path(" SC-2 ".into()), State(state))
            .await
            .unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["selected"], "SC-2");
        assert!(matches!(rx.recv().await, Some(EngineEvent::Select(id)) if id == "SC-2"));
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let (state, _rx, _sink) = state("http://127.0.0.1:1".into());
        let err = select_spacecraft(Path("  ".into()), State(state))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn closed_queue_reports_engine_unavailable() {
        let (state, rx, _sink) = state("http://127.0.0.1:1".into());
        drop(rx);
        let err = acknowledge_alert(Path("LOW_POWER".into()), State(state))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::EngineUnavailable));
    }

    #[tokio::test]
    async fn unknown_chart_is_invalid_input() {
        let (state, _rx, _sink) = state("http://127.0.0.1:1".into());
        let err = get_chart(Path("pressure".into()), State(state.clone()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "INVALID_INPUT");

        let Json(view) = get_chart(Path("position".into()), State(state))
            .await
            .ok()
            .unwrap();
        assert_eq!(view.data.series.len(), 3);
    }

    #[tokio::test]
    async fn view_reflects_published_snapshot() {
        let (state, _rx, mut sink) = state("http://127.0.0.1:1".into());
        sink.spacecraft_list(&["SC-1".to_string()], Some("SC-1"));
        sink.publish();
        let Json(resp) = get_view(State(state)).await;
        assert!(resp.ok);
        assert_eq!(resp.data.selected.as_deref(), Some("SC-1"));
    }

    #[tokio::test]
    async fn pause_success_is_forwarded_to_engine() {
        let base = backend(json!({"status": "success", "paused": true})).await;
        let (state, mut rx, _sink) = state(base);
        let Json(resp) = pause_spacecraft(
            State(state),
            Json(PauseRequest {
                paused: true,
                spacecraft_id: None,
            }),
        )
        .await
        .ok()
        .unwrap();
        assert!(resp.data.paused);
        assert!(matches!(
            rx.recv().await,
            Some(EngineEvent::CommandAcked(ack)) if ack.paused
        ));
    }

    #[tokio::test]
    async fn pause_rejection_reports_command_failure() {
        let base = backend(json!({"status": "error", "message": "busy"})).await;
        let (state, mut rx, _sink) = state(base);
        let err = pause_spacecraft(
            State(state),
            Json(PauseRequest {
                paused: true,
                spacecraft_id: None,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "upstream error: busy");
        assert!(matches!(
            rx.recv().await,
            Some(EngineEvent::TransportFailed {
                source: TransportSource::Command,
                ..
            })
        ));
    }
}

/// Async shell around the engine: event loop, pollers and clock
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clients::{DashboardClient, Endpoint};
use crate::render::SnapshotSink;
use crate::services::engine::{Effect, EngineEvent, ReconciliationEngine, TransportSource};
use crate::utils::now_secs;

/// Drain the event queue until every sender is gone.
///
/// The engine is owned by this task alone; everything else talks to it
/// through `events`.
pub async fn run_engine(
    mut engine: ReconciliationEngine,
    mut sink: SnapshotSink,
    mut events: mpsc::Receiver<EngineEvent>,
    feedback: mpsc::Sender<EngineEvent>,
    client: Arc<DashboardClient>,
    history_limit: usize,
) {
    info!("Reconciliation engine started");
    while let Some(event) = events.recv().await {
        let effects = engine.handle(event, now_secs(), &mut sink);
        sink.publish();
        for effect in effects {
            spawn_effect(effect, client.clone(), feedback.clone(), history_limit);
        }
    }
    info!("Reconciliation engine stopped");
}

fn spawn_effect(
    effect: Effect,
    client: Arc<DashboardClient>,
    events: mpsc::Sender<EngineEvent>,
    history_limit: usize,
) {
    match effect {
        Effect::FetchHistory(spacecraft_id) => {
            tokio::spawn(async move {
                debug!("Fetching history for {}", spacecraft_id);
                let event = match client.fetch_history(&spacecraft_id, history_limit).await {
                    Ok(payload) => EngineEvent::HistoryLoaded {
                        requested_for: spacecraft_id,
                        payload,
                    },
                    Err(e) => EngineEvent::TransportFailed {
                        source: TransportSource::History,
                        error: e.to_string(),
                    },
                };
                let _ = events.send(event).await;
            });
        }
    }
}

/// Poll every endpoint on a fixed period; a slow request never delays the next tick
pub fn spawn_poller(
    client: Arc<DashboardClient>,
    events: mpsc::Sender<EngineEvent>,
    period: Duration,
) {
    tokio::spawn(async move {
        info!("Starting poller (interval: {}ms)", period.as_millis());
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if events.is_closed() {
                return;
            }
            for endpoint in Endpoint::POLLED {
                let client = client.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    let event = match client.fetch(endpoint).await {
                        Ok(payload) => EngineEvent::Polled(endpoint, payload),
                        Err(e) => {
                            warn!("Poll of {} failed: {}", endpoint.path(), e);
                            EngineEvent::TransportFailed {
                                source: TransportSource::Poll(endpoint),
                                error: e.to_string(),
                            }
                        }
                    };
                    let _ = events.send(event).await;
                });
            }
        }
    });
}

/// Periodic tick that lets the engine notice silent spacecraft
pub fn spawn_clock(events: mpsc::Sender<EngineEvent>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if events.send(EngineEvent::ClockTick).await.is_err() {
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::PushMessage;
    use crate::config::EngineSettings;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::net::TcpListener;
    use tokio::sync::watch;

    async fn backend() -> String {
        let app = Router::new().route(
            "/api/telemetry/history",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let id = q.get("spacecraft_id").cloned().unwrap_or_default();
                Json(json!([
                    {"spacecraft_id": id, "timestamp": 1.0, "temperature": 10.0},
                    {"spacecraft_id": id, "timestamp": 2.0, "temperature": 12.0},
                ]))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    async fn wait_for(
        rx: &mut watch::Receiver<crate::render::ViewSnapshot>,
        pred: impl Fn(&crate::render::ViewSnapshot) -> bool,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if pred(&rx.borrow_and_update()) {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn selection_fetches_history_through_the_queue() {
        let base = backend().await;
        let client = Arc::new(DashboardClient::new(base, Duration::from_secs(5)).unwrap());
        let settings = EngineSettings::default();
        let (sink, mut view) = SnapshotSink::new(&settings);
        let engine = ReconciliationEngine::new(settings);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(run_engine(engine, sink, rx, tx.clone(), client, 100));

        tx.send(EngineEvent::Select("SC-1".into())).await.unwrap();
        wait_for(&mut view, |v| {
            v.charts
                .get(&crate::repo::ChartKind::Temperature)
                .is_some_and(|series| series[0].len() == 2)
        })
        .await;
        assert_eq!(view.borrow().selected.as_deref(), Some("SC-1"));
        assert_eq!(view.borrow().headlines["SC-1"].sample.timestamp, 2.0);
    }

    #[tokio::test]
    async fn failed_history_fetch_is_reported() {
        // nothing listens on this port once the listener is dropped
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = Arc::new(DashboardClient::new(base, Duration::from_secs(2)).unwrap());
        let settings = EngineSettings::default();
        let (sink, mut view) = SnapshotSink::new(&settings);
        let engine = ReconciliationEngine::new(settings);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(run_engine(engine, sink, rx, tx.clone(), client, 100));

        let sample: Value = json!({"spacecraft_id": "SC-1", "timestamp": 1.0});
        tx.send(EngineEvent::Push(PushMessage::TelemetryUpdate(sample)))
            .await
            .unwrap();
        tx.send(EngineEvent::Select("SC-1".into())).await.unwrap();
        wait_for(&mut view, |v| {
            v.last_error
                .as_deref()
                .is_some_and(|e| e.starts_with("history fetch"))
        })
        .await;
        assert!(view.borrow().headlines["SC-1"].stale);
    }

    #[tokio::test]
    async fn clock_ticks_reach_the_queue() {
        let (tx, mut rx) = mpsc::channel(4);
        spawn_clock(tx, Duration::from_millis(10));
        assert!(matches!(rx.recv().await, Some(EngineEvent::ClockTick)));
        assert!(matches!(rx.recv().await, Some(EngineEvent::ClockTick)));
    }
}

/// Telemetry console entry point: transport tasks, engine loop and HTTP view
use space_telemetry_console::clients::{DashboardClient, PushClient};
use space_telemetry_console::config::AppConfig;
use space_telemetry_console::handlers::AppState;
use space_telemetry_console::render::SnapshotSink;
use space_telemetry_console::routes::build_router;
use space_telemetry_console::services::{
    run_engine, spawn_clock, spawn_poller, EngineEvent, ReconciliationEngine,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const EVENT_QUEUE_DEPTH: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env()?;

    // Initialize logging; RUST_LOG wins over LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    info!("Configuration loaded successfully");

    // Initialize clients
    let client = Arc::new(DashboardClient::new(
        config.backend_url.clone(),
        Duration::from_secs(config.intervals.request_timeout_seconds),
    )?);
    info!("Dashboard backend at {}", client.base_url());

    // Engine and its published view
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let (sink, view) = SnapshotSink::new(&config.engine);
    let engine = ReconciliationEngine::new(config.engine.clone());

    // Initialize application state
    let state = AppState {
        events: events_tx.clone(),
        view,
        client: client.clone(),
    };

    // Start background tasks
    start_background_tasks(&config, engine, sink, events_rx, events_tx, client);

    // Build router
    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("space_telemetry_console listening on {}", config.listen_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Start the engine loop and every task that feeds it
fn start_background_tasks(
    config: &AppConfig,
    engine: ReconciliationEngine,
    sink: SnapshotSink,
    events_rx: mpsc::Receiver<EngineEvent>,
    events_tx: mpsc::Sender<EngineEvent>,
    client: Arc<DashboardClient>,
) {
    let intervals = &config.intervals;

    // Background task: reconciliation engine
    tokio::spawn(run_engine(
        engine,
        sink,
        events_rx,
        events_tx.clone(),
        client.clone(),
        config.engine.history_limit,
    ));

    // Background task: push channel
    {
        let push = PushClient::new(
            config.push_addr.clone(),
            Duration::from_secs(intervals.push_reconnect_seconds),
        );
        let events = events_tx.clone();
        tokio::spawn(async move {
            info!("Starting push channel task ({})", push.addr());
            push.run(events).await;
        });
    }

    // Background task: REST polling
    spawn_poller(
        client,
        events_tx.clone(),
        Duration::from_millis(intervals.poll_ms),
    );

    // Background task: staleness clock
    spawn_clock(events_tx, Duration::from_millis(intervals.clock_ms));

    info!("All background tasks started successfully");
}

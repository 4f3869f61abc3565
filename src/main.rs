//! Attendance Server
//!
//! Main entry point for the attendance server.

use attendance_server::{
    attendance::{AttendanceHistory, AttendanceRecorder, AttendanceRepository},
    attendance_policy::{PolicyResolver, SettingsRepository},
    credentials::CredentialRepository,
    dashboard::{DashboardAggregator, DashboardRepository},
    event_dispatch::{AttendanceNotifier, BroadcastWorker},
    realtime_hub::RealtimeHub,
    state::{AppConfig, AppState},
    web_api,
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendance_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting attendance server");

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        host = %config.host,
        port = config.port,
        timezone = %config.timezone,
        ws_queue_capacity = config.ws_queue_capacity,
        "Configuration loaded"
    );

    // Connect to database
    let pool = MySqlPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;
    tracing::info!("Connected to database");

    // Repositories
    let attendance_repo = AttendanceRepository::new(pool.clone());
    let settings_repo = SettingsRepository::new(pool.clone());
    let credentials = CredentialRepository::new(pool.clone());
    let dashboard_repo = DashboardRepository::new(pool.clone());

    // Realtime fan-out
    let realtime = Arc::new(RealtimeHub::new(config.ws_queue_capacity));

    let dashboard = Arc::new(DashboardAggregator::new(
        dashboard_repo,
        config.timezone,
        config.live_feed_limit,
        config.leaderboard_limit,
    ));

    // Persist, then notify
    let (notifier, events) = AttendanceNotifier::channel(config.dispatch_queue_capacity);
    let worker = Arc::new(BroadcastWorker::new(dashboard.clone(), realtime.clone()));
    worker.start(events);

    let history = Arc::new(AttendanceHistory::new(attendance_repo.clone(), config.timezone));
    let recorder = Arc::new(AttendanceRecorder::new(
        attendance_repo,
        credentials.clone(),
        PolicyResolver::new(settings_repo),
        notifier,
        config.timezone,
    ));

    // Evict members that stopped answering pings
    realtime
        .clone()
        .start_liveness_monitor(config.ws_ping_interval, config.ws_pong_timeout);

    let state = AppState {
        pool,
        config,
        recorder,
        history,
        dashboard,
        realtime,
        credentials,
    };

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

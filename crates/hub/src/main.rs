mod actuator;
mod auth;
mod config;
mod db;
mod error;
mod registry;
mod scheduler;
mod state;
mod telemetry;
mod web;

use anyhow::Result;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use actuator::{LogPump, MqttPump, PumpActuator};
use config::Settings;
use db::Db;
use registry::ZoneRegistry;
use state::SystemState;
use telemetry::{StatsAggregator, TelemetryIngester};
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Settings ────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "riego.toml".to_string());
    let mut settings = if std::path::Path::new(&config_path).exists() {
        config::load(&config_path)?
    } else {
        info!("no config file at {config_path}, using built-in defaults");
        Settings::default()
    };
    settings.apply_env();
    settings.validate()?;
    let settings = Arc::new(settings);

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(
        &settings.database.url,
        Duration::from_millis(settings.database.op_timeout_ms),
    )
    .await?;
    db.migrate().await?;

    // ── Shared state (ephemeral, for the status feed) ───────────────
    let shared = SystemState::shared();
    {
        let mut st = shared.write().await;
        st.record_system("hub started".to_string());
    }

    // ── Pump actuator ───────────────────────────────────────────────
    let pump: Arc<dyn PumpActuator> = if settings.mqtt.enabled {
        let (pump, eventloop) = MqttPump::connect(&settings.mqtt);
        tokio::spawn(actuator::run_event_loop(eventloop, Arc::clone(&shared)));
        Arc::new(pump)
    } else {
        info!("mqtt disabled, pump commands are log-only");
        Arc::new(LogPump)
    };

    // ── Zone registry (seed defaults on first run) ──────────────────
    let registry = Arc::new(ZoneRegistry::new(
        db.clone(),
        pump,
        Arc::clone(&shared),
        settings.zones.defaults.clone(),
        settings.api.max_page_size,
    ));
    registry.bootstrap_defaults().await?;

    // ── Timer scheduler ─────────────────────────────────────────────
    tokio::spawn(scheduler::run(
        Arc::clone(&registry),
        Duration::from_secs(settings.scheduler.tick_interval_secs),
    ));

    // ── HTTP API ────────────────────────────────────────────────────
    let state = AppState {
        registry,
        ingester: TelemetryIngester::new(db.clone(), Arc::clone(&shared)),
        stats: StatsAggregator::new(db, settings.api.max_history_limit),
        shared,
        settings: Arc::clone(&settings),
    };
    web::serve(state, &settings.server.bind).await
}

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::auth::{verify_sensor_token, Identity, SENSOR_TOKEN_HEADER};
use crate::config::Settings;
use crate::db::{SensorReading, Zone};
use crate::error::AppError;
use crate::registry::{ZonePatch, ZoneRegistry};
use crate::state::{SharedState, SystemEvent};
use crate::telemetry::{DashboardStats, NewReading, StatsAggregator, TelemetryIngester};

// ---------------------------------------------------------------------------
// Shared handler state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ZoneRegistry>,
    pub ingester: TelemetryIngester,
    pub stats: StatsAggregator,
    pub shared: SharedState,
    pub settings: Arc<Settings>,
}

// ---------------------------------------------------------------------------
// Request/response shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ListQuery {
    offset: Option<i64>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct TimerRequest {
    seconds: i64,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct StatusResponse {
    uptime_secs: u64,
    broker_connected: bool,
    memory_used_bytes: u64,
    memory_total_bytes: u64,
    events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/irrigation/zones", get(list_zones))
        .route("/irrigation/zones/{id}", get(get_zone).put(update_zone))
        .route("/irrigation/zones/{id}/toggle", post(toggle_zone))
        .route("/irrigation/zones/{id}/timer", post(set_zone_timer))
        .route("/sensors/data", post(ingest_reading))
        .route("/sensors/history", get(sensor_history))
        .route("/dashboard/stats", get(dashboard_stats))
        .with_state(state)
}

async fn index() -> Json<Value> {
    Json(json!({ "message": "riego hub running" }))
}

async fn status(State(app): State<AppState>) -> Json<StatusResponse> {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();

    let st = app.shared.read().await;
    Json(StatusResponse {
        uptime_secs: st.uptime_secs(),
        broker_connected: st.broker_connected,
        memory_used_bytes: sys.used_memory(),
        memory_total_bytes: sys.total_memory(),
        events: st.recent_events(),
    })
}

// -- Zones ------------------------------------------------------------------

async fn list_zones(
    State(app): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Zone>>, AppError> {
    let zones = app
        .registry
        .list(query.offset.unwrap_or(0), query.limit.unwrap_or(100))
        .await?;
    Ok(Json(zones))
}

async fn get_zone(
    State(app): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Zone>, AppError> {
    Ok(Json(app.registry.get(id).await?))
}

async fn toggle_zone(
    State(app): State<AppState>,
    identity: Identity,
    Path(id): Path<i64>,
) -> Result<Json<Zone>, AppError> {
    identity.require_user()?;
    Ok(Json(app.registry.toggle(id).await?))
}

async fn set_zone_timer(
    State(app): State<AppState>,
    identity: Identity,
    Path(id): Path<i64>,
    Json(body): Json<TimerRequest>,
) -> Result<Json<Zone>, AppError> {
    identity.require_user()?;
    Ok(Json(app.registry.set_timer(id, body.seconds).await?))
}

async fn update_zone(
    State(app): State<AppState>,
    identity: Identity,
    Path(id): Path<i64>,
    Json(patch): Json<ZonePatch>,
) -> Result<Json<Zone>, AppError> {
    identity.require_admin()?;
    Ok(Json(app.registry.update(id, patch).await?))
}

// -- Telemetry --------------------------------------------------------------

async fn ingest_reading(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(reading): Json<NewReading>,
) -> Result<Json<SensorReading>, AppError> {
    let presented = headers
        .get(SENSOR_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    verify_sensor_token(app.settings.ingest.sensor_token.as_deref(), presented)?;

    Ok(Json(app.ingester.ingest(reading).await?))
}

async fn sensor_history(
    State(app): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<SensorReading>>, AppError> {
    Ok(Json(app.stats.recent_readings(query.limit.unwrap_or(100)).await?))
}

async fn dashboard_stats(
    State(app): State<AppState>,
) -> Result<Json<DashboardStats>, AppError> {
    Ok(Json(app.stats.dashboard_stats().await?))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind.parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("api listening on http://{addr}");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

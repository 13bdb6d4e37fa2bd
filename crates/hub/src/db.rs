use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::warn;

use crate::error::AppError;

/// How many times mutating callers re-attempt a transiently failing
/// persistence call before surfacing `Unavailable`.
pub(crate) const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ZoneMode {
    Manual,
    Timer,
}

#[derive(Debug, Clone, Serialize)]
pub struct Zone {
    pub id: i64,
    pub name: String,
    pub pump_active: bool,
    pub mode: ZoneMode,
    /// Seconds left on the countdown. Non-zero only in timer mode with the
    /// pump active.
    pub timer_remaining: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_watered: Option<OffsetDateTime>,
    #[serde(skip)]
    pub version: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorReading {
    pub id: i64,
    pub sensor_id: String,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Raw totals over the full readings log. Averages are derived by the
/// aggregator, never stored.
#[derive(Debug, Clone, Copy)]
pub struct ReadingTotals {
    pub sum_temperature: f64,
    pub sum_humidity: f64,
    pub total: i64,
    pub distinct_sensors: i64,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct ZoneRow {
    id: i64,
    name: String,
    pump_active: bool,
    mode: ZoneMode,
    timer_remaining: i64,
    last_watered: Option<i64>,
    version: i64,
}

impl From<ZoneRow> for Zone {
    fn from(r: ZoneRow) -> Self {
        Zone {
            id: r.id,
            name: r.name,
            pump_active: r.pump_active,
            mode: r.mode,
            timer_remaining: r.timer_remaining,
            last_watered: r
                .last_watered
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
            version: r.version,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReadingRow {
    id: i64,
    sensor_id: String,
    temperature: f64,
    humidity: f64,
    ts: i64,
}

impl From<ReadingRow> for SensorReading {
    fn from(r: ReadingRow) -> Self {
        SensorReading {
            id: r.id,
            sensor_id: r.sensor_id,
            temperature: r.temperature,
            humidity: r.humidity,
            timestamp: OffsetDateTime::from_unix_timestamp(r.ts)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        }
    }
}

const ZONE_COLUMNS: &str =
    "id, name, pump_active, mode, timer_remaining, last_watered, version";

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
    op_timeout: Duration,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:riego.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str, op_timeout: Duration) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(|e| {
                AppError::Misconfigured(format!("invalid sqlite connection string {db_url}: {e}"))
            })?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // An in-memory sqlite database exists per connection; keep a single
        // one so migrations and queries all see the same database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Unavailable(format!("connect to {db_url}: {e}")))?;

        Ok(Self { pool, op_timeout })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Unavailable(format!("migrations: {e}")))
    }

    /// Bound every pool operation so a wedged database surfaces as a
    /// retryable failure instead of hanging a request or the scheduler.
    async fn guard<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, sqlx::Error>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(AppError::Unavailable(format!("{op}: {e}"))),
            Err(_) => Err(AppError::Unavailable(format!(
                "{op}: timed out after {}ms",
                self.op_timeout.as_millis()
            ))),
        }
    }

    // ----------------------------
    // Zones
    // ----------------------------

    pub async fn count_zones(&self) -> Result<i64, AppError> {
        self.guard(
            "count_zones",
            sqlx::query_scalar("SELECT COUNT(*) FROM zones").fetch_one(&self.pool),
        )
        .await
    }

    /// Insert a fresh zone with default state and return it.
    pub async fn insert_zone(&self, name: &str) -> Result<Zone, AppError> {
        let result = self
            .guard(
                "insert_zone",
                sqlx::query("INSERT INTO zones (name) VALUES (?)")
                    .bind(name)
                    .execute(&self.pool),
            )
            .await?;

        Ok(Zone {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            pump_active: false,
            mode: ZoneMode::Manual,
            timer_remaining: 0,
            last_watered: None,
            version: 0,
        })
    }

    pub async fn load_zone(&self, id: i64) -> Result<Option<Zone>, AppError> {
        let row: Option<ZoneRow> = self
            .guard(
                "load_zone",
                sqlx::query_as(&format!("SELECT {ZONE_COLUMNS} FROM zones WHERE id = ?"))
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Zone::from))
    }

    /// Version-checked write. Returns `false` when no row matched — either
    /// the zone is gone or another writer bumped the version first; the
    /// caller distinguishes the two.
    pub async fn update_zone(&self, zone: &Zone) -> Result<bool, AppError> {
        let result = self
            .guard(
                "update_zone",
                sqlx::query(
                    "UPDATE zones
                     SET name = ?, pump_active = ?, mode = ?, timer_remaining = ?,
                         last_watered = ?, version = version + 1
                     WHERE id = ? AND version = ?",
                )
                .bind(&zone.name)
                .bind(zone.pump_active)
                .bind(zone.mode)
                .bind(zone.timer_remaining)
                .bind(zone.last_watered.map(|t| t.unix_timestamp()))
                .bind(zone.id)
                .bind(zone.version)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_zones(&self, offset: i64, limit: i64) -> Result<Vec<Zone>, AppError> {
        let rows: Vec<ZoneRow> = self
            .guard(
                "list_zones",
                sqlx::query_as(&format!(
                    "SELECT {ZONE_COLUMNS} FROM zones ORDER BY id ASC LIMIT ? OFFSET ?"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(Zone::from).collect())
    }

    /// Ids of zones the scheduler must decrement this tick.
    pub async fn list_timer_zones(&self) -> Result<Vec<i64>, AppError> {
        self.guard(
            "list_timer_zones",
            sqlx::query_scalar(
                "SELECT id FROM zones
                 WHERE pump_active = 1 AND mode = 'timer' AND timer_remaining > 0
                 ORDER BY id ASC",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    // ----------------------------
    // Readings
    // ----------------------------

    pub async fn append_reading(
        &self,
        sensor_id: &str,
        temperature: f64,
        humidity: f64,
        timestamp: OffsetDateTime,
    ) -> Result<SensorReading, AppError> {
        let ts = timestamp.unix_timestamp();
        let result = self
            .guard(
                "append_reading",
                sqlx::query(
                    "INSERT INTO readings (sensor_id, temperature, humidity, ts)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(sensor_id)
                .bind(temperature)
                .bind(humidity)
                .bind(ts)
                .execute(&self.pool),
            )
            .await?;

        Ok(SensorReading {
            id: result.last_insert_rowid(),
            sensor_id: sensor_id.to_string(),
            temperature,
            humidity,
            timestamp,
        })
    }

    /// Most recent readings, newest insertion first.
    pub async fn recent_readings(&self, limit: i64) -> Result<Vec<SensorReading>, AppError> {
        let rows: Vec<ReadingRow> = self
            .guard(
                "recent_readings",
                sqlx::query_as(
                    "SELECT id, sensor_id, temperature, humidity, ts
                     FROM readings ORDER BY id DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(SensorReading::from).collect())
    }

    pub async fn aggregate_readings(&self) -> Result<ReadingTotals, AppError> {
        let (sum_temperature, sum_humidity, total, distinct_sensors): (f64, f64, i64, i64) = self
            .guard(
                "aggregate_readings",
                sqlx::query_as(
                    "SELECT COALESCE(SUM(temperature), 0.0),
                            COALESCE(SUM(humidity), 0.0),
                            COUNT(*),
                            COUNT(DISTINCT sensor_id)
                     FROM readings",
                )
                .fetch_one(&self.pool),
            )
            .await?;

        Ok(ReadingTotals {
            sum_temperature,
            sum_humidity,
            total,
            distinct_sensors,
        })
    }
}

// ---------------------------------------------------------------------------
// Bounded retry
// ---------------------------------------------------------------------------

/// Re-attempt a persistence call on `Unavailable` with linear backoff. Any
/// other outcome (success or a validation error) is returned immediately.
pub(crate) async fn with_retries<T, Fut>(
    op: &'static str,
    mut attempt_fn: impl FnMut() -> Fut,
) -> Result<T, AppError>
where
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 1;
    loop {
        match attempt_fn().await {
            Err(AppError::Unavailable(msg)) if attempt < RETRY_ATTEMPTS => {
                warn!(op, attempt, "transient persistence failure, retrying: {msg}");
                tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) async fn test_db() -> Db {
    let db = Db::connect("sqlite::memory:", Duration::from_secs(5))
        .await
        .unwrap();
    db.migrate().await.unwrap();
    db
}

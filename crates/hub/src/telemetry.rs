//! Telemetry pipeline: validated append-only ingestion plus on-demand
//! aggregation. Aggregates are always recomputed from the readings log;
//! there are no running counters to drift out of sync.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::db::{with_retries, Db, ReadingTotals, SensorReading};
use crate::error::AppError;
use crate::state::SharedState;

/// Incoming sensor sample. The timestamp is optional; ingestion stamps the
/// current time when the device does not supply one.
#[derive(Debug, Clone, Deserialize)]
pub struct NewReading {
    pub sensor_id: String,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub total_readings: i64,
    pub active_sensors: i64,
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TelemetryIngester {
    db: Db,
    shared: SharedState,
}

impl TelemetryIngester {
    pub fn new(db: Db, shared: SharedState) -> Self {
        Self { db, shared }
    }

    /// Validate and append one reading. The append is durable before the
    /// call returns; identical repeated posts each get their own row.
    pub async fn ingest(&self, reading: NewReading) -> Result<SensorReading, AppError> {
        let sensor_id = reading.sensor_id.trim();
        if sensor_id.is_empty() {
            return Err(AppError::InvalidArgument("sensor_id is empty".to_string()));
        }
        if !reading.temperature.is_finite() {
            return Err(AppError::InvalidArgument(format!(
                "temperature {} is not a finite number",
                reading.temperature
            )));
        }
        if !reading.humidity.is_finite() {
            return Err(AppError::InvalidArgument(format!(
                "humidity {} is not a finite number",
                reading.humidity
            )));
        }

        let timestamp = reading.timestamp.unwrap_or_else(OffsetDateTime::now_utc);

        let stored = with_retries("append_reading", || {
            self.db
                .append_reading(sensor_id, reading.temperature, reading.humidity, timestamp)
        })
        .await?;

        self.shared.write().await.record_reading(
            &stored.sensor_id,
            stored.temperature,
            stored.humidity,
        );
        Ok(stored)
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct StatsAggregator {
    db: Db,
    max_history_limit: i64,
}

impl StatsAggregator {
    pub fn new(db: Db, max_history_limit: i64) -> Self {
        Self {
            db,
            max_history_limit,
        }
    }

    /// Recompute dashboard aggregates over the full readings log.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats, AppError> {
        let totals = self.db.aggregate_readings().await?;
        Ok(DashboardStats::from(totals))
    }

    /// Most recent readings, newest insertion first.
    pub async fn recent_readings(&self, limit: i64) -> Result<Vec<SensorReading>, AppError> {
        if limit <= 0 {
            return Err(AppError::InvalidArgument(format!(
                "limit must be positive, got {limit}"
            )));
        }
        let limit = limit.min(self.max_history_limit);
        self.db.recent_readings(limit).await
    }
}

impl From<ReadingTotals> for DashboardStats {
    fn from(totals: ReadingTotals) -> Self {
        let (avg_temperature, avg_humidity) = if totals.total > 0 {
            (
                totals.sum_temperature / totals.total as f64,
                totals.sum_humidity / totals.total as f64,
            )
        } else {
            (0.0, 0.0)
        };
        DashboardStats {
            avg_temperature,
            avg_humidity,
            total_readings: totals.total,
            active_sensors: totals.distinct_sensors,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::state::SystemState;
    use time::macros::datetime;

    async fn pipeline() -> (TelemetryIngester, StatsAggregator) {
        let db = test_db().await;
        let ingester = TelemetryIngester::new(db.clone(), SystemState::shared());
        let aggregator = StatsAggregator::new(db, 500);
        (ingester, aggregator)
    }

    fn reading(sensor_id: &str, temperature: f64, humidity: f64) -> NewReading {
        NewReading {
            sensor_id: sensor_id.to_string(),
            temperature,
            humidity,
            timestamp: None,
        }
    }

    // -- ingest -----------------------------------------------------------

    #[tokio::test]
    async fn ingest_assigns_timestamp_when_absent() {
        let (ingester, _) = pipeline().await;
        let before = OffsetDateTime::now_utc();
        let stored = ingester.ingest(reading("ESP32-001", 21.5, 48.0)).await.unwrap();

        assert_eq!(stored.sensor_id, "ESP32-001");
        assert!(stored.timestamp >= before - time::Duration::seconds(1));
        assert!(stored.timestamp <= OffsetDateTime::now_utc() + time::Duration::seconds(1));
    }

    #[tokio::test]
    async fn ingest_keeps_supplied_timestamp() {
        let (ingester, _) = pipeline().await;
        let ts = datetime!(2025-05-01 06:30 UTC);
        let stored = ingester
            .ingest(NewReading {
                timestamp: Some(ts),
                ..reading("ESP32-001", 19.0, 70.0)
            })
            .await
            .unwrap();

        assert_eq!(stored.timestamp.unix_timestamp(), ts.unix_timestamp());
    }

    #[tokio::test]
    async fn ingest_trims_sensor_id() {
        let (ingester, _) = pipeline().await;
        let stored = ingester.ingest(reading("  ESP32-002  ", 20.0, 50.0)).await.unwrap();
        assert_eq!(stored.sensor_id, "ESP32-002");
    }

    #[tokio::test]
    async fn ingest_rejects_blank_sensor_id() {
        let (ingester, _) = pipeline().await;
        for id in ["", "   "] {
            let err = ingester.ingest(reading(id, 20.0, 50.0)).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidArgument(_)));
        }
    }

    #[tokio::test]
    async fn ingest_rejects_non_finite_values() {
        let (ingester, aggregator) = pipeline().await;

        for (t, h) in [
            (f64::NAN, 50.0),
            (f64::INFINITY, 50.0),
            (20.0, f64::NAN),
            (20.0, f64::NEG_INFINITY),
        ] {
            let err = ingester.ingest(reading("S1", t, h)).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidArgument(_)));
        }

        // Nothing was appended.
        let stats = aggregator.dashboard_stats().await.unwrap();
        assert_eq!(stats.total_readings, 0);
    }

    // -- stats ------------------------------------------------------------

    #[tokio::test]
    async fn stats_on_empty_log_are_zero() {
        let (_, aggregator) = pipeline().await;
        let stats = aggregator.dashboard_stats().await.unwrap();

        assert_eq!(stats.avg_temperature, 0.0);
        assert_eq!(stats.avg_humidity, 0.0);
        assert_eq!(stats.total_readings, 0);
        assert_eq!(stats.active_sensors, 0);
    }

    #[tokio::test]
    async fn stats_average_over_all_readings() {
        let (ingester, aggregator) = pipeline().await;
        ingester.ingest(reading("S1", 20.0, 50.0)).await.unwrap();
        ingester.ingest(reading("S1", 22.0, 55.0)).await.unwrap();
        ingester.ingest(reading("S2", 18.0, 60.0)).await.unwrap();

        let stats = aggregator.dashboard_stats().await.unwrap();
        assert_eq!(stats.total_readings, 3);
        assert_eq!(stats.active_sensors, 2);
        assert!((stats.avg_temperature - 20.0).abs() < 1e-9);
        assert!((stats.avg_humidity - 55.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn repeated_identical_posts_are_not_deduplicated() {
        let (ingester, aggregator) = pipeline().await;
        ingester.ingest(reading("S1", 20.0, 50.0)).await.unwrap();
        ingester.ingest(reading("S1", 20.0, 50.0)).await.unwrap();

        let stats = aggregator.dashboard_stats().await.unwrap();
        assert_eq!(stats.total_readings, 2);
        assert_eq!(stats.active_sensors, 1);
    }

    // -- history ----------------------------------------------------------

    #[tokio::test]
    async fn recent_readings_newest_first_with_limit() {
        let (ingester, aggregator) = pipeline().await;
        ingester.ingest(reading("S1", 20.0, 50.0)).await.unwrap();
        ingester.ingest(reading("S1", 22.0, 55.0)).await.unwrap();
        ingester.ingest(reading("S2", 18.0, 60.0)).await.unwrap();

        let recent = aggregator.recent_readings(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sensor_id, "S2");
        assert_eq!(recent[1].sensor_id, "S1");
        assert_eq!(recent[1].temperature, 22.0);
    }

    #[tokio::test]
    async fn recent_readings_rejects_non_positive_limit() {
        let (_, aggregator) = pipeline().await;
        for limit in [0, -5] {
            let err = aggregator.recent_readings(limit).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidArgument(_)));
        }
    }

    #[tokio::test]
    async fn recent_readings_clamps_oversized_limit() {
        let (ingester, aggregator) = pipeline().await;
        ingester.ingest(reading("S1", 20.0, 50.0)).await.unwrap();

        let recent = aggregator.recent_readings(1_000_000).await.unwrap();
        assert_eq!(recent.len(), 1);
    }
}

//! Zone state machine. All zone mutation funnels through here so the
//! invariants hold under concurrent callers:
//!
//! - timer mode only while the pump is active
//! - a positive countdown only in timer mode with the pump active
//! - deactivating the pump resets mode and countdown and stamps last_watered
//!
//! Request handlers and the scheduler take the same per-zone lock; two
//! operations on the same zone serialize, different zones proceed
//! independently. The version check on every write guards multi-process
//! deployments the in-process lock cannot reach.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::info;

use crate::actuator::PumpActuator;
use crate::db::{with_retries, Db, Zone, ZoneMode};
use crate::error::AppError;
use crate::state::SharedState;

/// Partial zone update applied through the administrative edit path. Pump
/// and mode changes go through the same transition rules as toggle and
/// timer requests, never raw field writes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZonePatch {
    pub name: Option<String>,
    pub pump_active: Option<bool>,
    pub mode: Option<ZoneMode>,
    pub timer_remaining: Option<i64>,
}

pub struct ZoneRegistry {
    db: Db,
    actuator: Arc<dyn PumpActuator>,
    shared: SharedState,
    default_zones: Vec<String>,
    max_page_size: i64,
    /// One async mutex per zone id, created on first touch.
    locks: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
    /// Serializes empty-store checks so defaults are created exactly once.
    bootstrap: Mutex<()>,
}

impl ZoneRegistry {
    pub fn new(
        db: Db,
        actuator: Arc<dyn PumpActuator>,
        shared: SharedState,
        default_zones: Vec<String>,
        max_page_size: i64,
    ) -> Self {
        Self {
            db,
            actuator,
            shared,
            default_zones,
            max_page_size,
            locks: StdMutex::new(HashMap::new()),
            bootstrap: Mutex::new(()),
        }
    }

    async fn lock_zone(&self, id: i64) -> tokio::sync::OwnedMutexGuard<()> {
        let cell = {
            let mut map = self.locks.lock().expect("zone lock map poisoned");
            Arc::clone(map.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        cell.lock_owned().await
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get(&self, id: i64) -> Result<Zone, AppError> {
        with_retries("load_zone", || self.db.load_zone(id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("zone {id} not found")))
    }

    /// Zones ordered by id. Bootstraps the default set when the store turns
    /// out to be empty.
    pub async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Zone>, AppError> {
        if offset < 0 {
            return Err(AppError::InvalidArgument(format!(
                "offset must be non-negative, got {offset}"
            )));
        }
        if limit <= 0 {
            return Err(AppError::InvalidArgument(format!(
                "limit must be positive, got {limit}"
            )));
        }
        let limit = limit.min(self.max_page_size);

        let zones = with_retries("list_zones", || self.db.list_zones(offset, limit)).await?;
        if !zones.is_empty() {
            return Ok(zones);
        }

        // Empty page: either the store has never been seeded or the offset
        // is past the end. bootstrap_defaults re-checks under its own lock.
        if self.bootstrap_defaults().await? {
            return with_retries("list_zones", || self.db.list_zones(offset, limit)).await;
        }
        Ok(zones)
    }

    // ----------------------------
    // Transitions
    // ----------------------------

    /// Flip the pump. Turning on never arms a timer; turning off resets
    /// mode and countdown and stamps last_watered.
    pub async fn toggle(&self, id: i64) -> Result<Zone, AppError> {
        let _guard = self.lock_zone(id).await;
        let mut zone = self.get(id).await?;

        if zone.pump_active {
            apply_pump_off(&mut zone, OffsetDateTime::now_utc());
        } else {
            zone.pump_active = true;
            zone.mode = ZoneMode::Manual;
            zone.timer_remaining = 0;
        }

        let zone = self.commit(&zone).await?;
        self.notify_pump(id, zone.pump_active).await;
        Ok(zone)
    }

    /// Start (or restart) a bounded watering run.
    pub async fn set_timer(&self, id: i64, seconds: i64) -> Result<Zone, AppError> {
        if seconds <= 0 {
            return Err(AppError::InvalidArgument(format!(
                "timer duration must be positive, got {seconds}"
            )));
        }

        let _guard = self.lock_zone(id).await;
        let mut zone = self.get(id).await?;

        let was_active = zone.pump_active;
        zone.pump_active = true;
        zone.mode = ZoneMode::Timer;
        zone.timer_remaining = seconds;

        let zone = self.commit(&zone).await?;
        if !was_active {
            self.notify_pump(id, true).await;
        }
        self.shared
            .write()
            .await
            .record_timer(format!("zone {id}: timer armed for {seconds}s"));
        Ok(zone)
    }

    /// Administrative partial update.
    pub async fn update(&self, id: i64, patch: ZonePatch) -> Result<Zone, AppError> {
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(AppError::InvalidArgument("zone name is empty".to_string()));
            }
        }
        if let Some(t) = patch.timer_remaining {
            if t < 0 {
                return Err(AppError::InvalidArgument(format!(
                    "timer_remaining must be non-negative, got {t}"
                )));
            }
        }
        if patch.pump_active == Some(false) && patch.mode == Some(ZoneMode::Timer) {
            return Err(AppError::InvalidArgument(
                "cannot enter timer mode while deactivating the pump".to_string(),
            ));
        }

        let _guard = self.lock_zone(id).await;
        let current = self.get(id).await?;

        let mut target = current.clone();
        if let Some(name) = patch.name {
            target.name = name;
        }
        if let Some(active) = patch.pump_active {
            target.pump_active = active;
        }
        if let Some(mode) = patch.mode {
            target.mode = mode;
        }
        if let Some(t) = patch.timer_remaining {
            target.timer_remaining = t;
        }

        if !target.pump_active {
            if target.mode == ZoneMode::Timer {
                return Err(AppError::InvalidArgument(
                    "timer mode requires an active pump".to_string(),
                ));
            }
            if current.pump_active {
                apply_pump_off(&mut target, OffsetDateTime::now_utc());
            } else {
                target.timer_remaining = 0;
            }
        } else {
            match target.mode {
                ZoneMode::Timer => {
                    if target.timer_remaining <= 0 {
                        return Err(AppError::InvalidArgument(
                            "timer mode requires a positive timer_remaining".to_string(),
                        ));
                    }
                }
                ZoneMode::Manual => target.timer_remaining = 0,
            }
        }

        let zone = self.commit(&target).await?;
        if zone.pump_active != current.pump_active {
            self.notify_pump(id, zone.pump_active).await;
        }
        Ok(zone)
    }

    // ----------------------------
    // Scheduler entry points
    // ----------------------------

    /// Ids due for a countdown decrement. Single attempt: a failed sweep is
    /// simply retried on the next tick.
    pub async fn timer_zone_ids(&self) -> Result<Vec<i64>, AppError> {
        self.db.list_timer_zones().await
    }

    /// One scheduler step for one zone: decrement the countdown by the tick
    /// interval, clamped at zero, and apply the toggle-to-off transition on
    /// expiry. A toggle that won the per-zone lock first leaves nothing to
    /// do here.
    pub async fn tick_zone(&self, id: i64, step_secs: i64) -> Result<(), AppError> {
        let _guard = self.lock_zone(id).await;

        let Some(mut zone) = with_retries("load_zone", || self.db.load_zone(id)).await? else {
            return Ok(());
        };
        if !(zone.pump_active && zone.mode == ZoneMode::Timer && zone.timer_remaining > 0) {
            return Ok(());
        }

        zone.timer_remaining = (zone.timer_remaining - step_secs).max(0);
        let expired = zone.timer_remaining == 0;
        if expired {
            apply_pump_off(&mut zone, OffsetDateTime::now_utc());
        }

        self.commit(&zone).await?;
        if expired {
            self.notify_pump(id, false).await;
            self.shared
                .write()
                .await
                .record_timer(format!("zone {id}: timer expired, pump off"));
        }
        Ok(())
    }

    // ----------------------------
    // Bootstrap
    // ----------------------------

    /// Create the default zone set when the store is empty. Safe under
    /// concurrent callers; returns whether this call did the seeding.
    pub async fn bootstrap_defaults(&self) -> Result<bool, AppError> {
        let _guard = self.bootstrap.lock().await;

        if with_retries("count_zones", || self.db.count_zones()).await? > 0 {
            return Ok(false);
        }

        for name in &self.default_zones {
            with_retries("insert_zone", || self.db.insert_zone(name)).await?;
        }

        info!(zones = self.default_zones.len(), "default zones created");
        self.shared
            .write()
            .await
            .record_system(format!("{} default zones created", self.default_zones.len()));
        Ok(true)
    }

    // ----------------------------
    // Internals
    // ----------------------------

    /// Version-checked write with bounded retry. A version miss means some
    /// other writer (another hub process) committed first.
    async fn commit(&self, zone: &Zone) -> Result<Zone, AppError> {
        let updated = with_retries("update_zone", || self.db.update_zone(zone)).await?;
        if !updated {
            return match with_retries("load_zone", || self.db.load_zone(zone.id)).await? {
                None => Err(AppError::NotFound(format!("zone {} not found", zone.id))),
                Some(_) => Err(AppError::Conflict(format!(
                    "zone {} was modified concurrently",
                    zone.id
                ))),
            };
        }
        let mut committed = zone.clone();
        committed.version += 1;
        Ok(committed)
    }

    /// Best-effort hardware dispatch; state already committed.
    async fn notify_pump(&self, zone_id: i64, active: bool) {
        self.actuator.notify(zone_id, active);
        self.shared.write().await.record_pump(zone_id, active);
    }
}

/// The single pump-off transition shared by toggle, patch, and timer expiry.
fn apply_pump_off(zone: &mut Zone, now: OffsetDateTime) {
    zone.pump_active = false;
    zone.mode = ZoneMode::Manual;
    zone.timer_remaining = 0;
    zone.last_watered = Some(now);
}

// ===========================================================================
// Tests
// ===========================================================================

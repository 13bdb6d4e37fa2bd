//! Timer countdown sweep. Every tick decrements the countdown of each zone
//! running in timer mode and applies the pump-off transition on expiry.
//!
//! The sweep holds no state of its own: zone rows are the source of truth
//! and every step goes through [`ZoneRegistry`], taking the same per-zone
//! lock as toggle and timer requests. A zone whose persistence call fails is
//! logged and skipped; the next tick picks it up again.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::registry::ZoneRegistry;

/// Run the scheduler loop. Intended to be `tokio::spawn`-ed from main.
pub async fn run(registry: Arc<ZoneRegistry>, tick_interval: Duration) {
    let step_secs = tick_interval.as_secs().max(1) as i64;

    let mut ticker = tokio::time::interval(tick_interval);
    // A late tick must not be followed by a catch-up burst; each sweep
    // decrements by the nominal interval exactly once.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(tick_secs = step_secs, "timer scheduler started");

    loop {
        ticker.tick().await;
        sweep(&registry, step_secs).await;
    }
}

/// One pass over every zone with a running countdown. Per-zone failures are
/// isolated: log, continue with the rest, retry on the next tick.
pub(crate) async fn sweep(registry: &ZoneRegistry, step_secs: i64) {
    let ids = match registry.timer_zone_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            error!("scheduler: listing timer zones failed: {e}");
            return;
        }
    };

    for id in ids {
        if let Err(e) = registry.tick_zone(id, step_secs).await {
            error!(zone = id, "scheduler: tick failed: {e}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

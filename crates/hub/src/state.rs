use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub broker_connected: bool,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Pump,
    Timer,
    Reading,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            broker_connected: false,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record a pump state change.
    pub fn record_pump(&mut self, zone_id: i64, active: bool) {
        let state_str = if active { "ON" } else { "OFF" };
        self.push_event(EventKind::Pump, format!("zone {zone_id}: pump {state_str}"));
    }

    /// Record a timer event (armed or expired).
    pub fn record_timer(&mut self, detail: String) {
        self.push_event(EventKind::Timer, detail);
    }

    /// Record an accepted telemetry reading.
    pub fn record_reading(&mut self, sensor_id: &str, temperature: f64, humidity: f64) {
        self.push_event(
            EventKind::Reading,
            format!("{sensor_id}: {temperature:.1}°C {humidity:.1}%"),
        );
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Events newest-first for the status feed.
    pub fn recent_events(&self) -> Vec<SystemEvent> {
        self.events.iter().rev().cloned().collect()
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_has_no_events() {
        let st = SystemState::new();
        assert!(st.events.is_empty());
        assert!(!st.broker_connected);
    }

    #[test]
    fn record_pump_formats_detail() {
        let mut st = SystemState::new();
        st.record_pump(3, true);
        st.record_pump(3, false);

        assert_eq!(st.events[0].detail, "zone 3: pump ON");
        assert_eq!(st.events[1].detail, "zone 3: pump OFF");
    }

    #[test]
    fn recent_events_newest_first() {
        let mut st = SystemState::new();
        st.record_system("first".into());
        st.record_system("second".into());

        let events = st.recent_events();
        assert_eq!(events[0].detail, "second");
        assert_eq!(events[1].detail, "first");
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let mut st = SystemState::new();
        for i in 0..(MAX_EVENTS + 50) {
            st.record_system(format!("event {i}"));
        }

        assert_eq!(st.events.len(), MAX_EVENTS);
        // Oldest entries were evicted.
        assert_eq!(st.events.front().unwrap().detail, "event 50");
    }
}

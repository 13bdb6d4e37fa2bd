//! Pump command dispatch. Zone state in the database is the source of truth;
//! commands to the field hardware are fire-and-forget and never gate a state
//! change. The MQTT implementation publishes `ON`/`OFF` to
//! `<prefix>/<zone_id>/set`; without a broker a log-only implementation is
//! used instead.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::MqttSettings;
use crate::state::SharedState;

/// Best-effort hardware notification. Implementations must not block and
/// must swallow their own failures.
pub trait PumpActuator: Send + Sync {
    fn notify(&self, zone_id: i64, active: bool);
}

fn command_payload(active: bool) -> &'static [u8] {
    if active {
        b"ON"
    } else {
        b"OFF"
    }
}

// ---------------------------------------------------------------------------
// MQTT-backed actuator (production)
// ---------------------------------------------------------------------------

pub struct MqttPump {
    client: AsyncClient,
    topic_prefix: String,
}

impl MqttPump {
    /// Build the client. The returned event loop must be driven by
    /// [`run_event_loop`] for publishes to actually go out.
    pub fn connect(cfg: &MqttSettings) -> (Self, EventLoop) {
        let mut options = MqttOptions::new("riego-hub", &cfg.host, cfg.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(options, 20);
        (
            Self {
                client,
                topic_prefix: cfg.topic_prefix.clone(),
            },
            eventloop,
        )
    }

    fn topic(&self, zone_id: i64) -> String {
        format!("{}/{zone_id}/set", self.topic_prefix)
    }
}

impl PumpActuator for MqttPump {
    fn notify(&self, zone_id: i64, active: bool) {
        // try_publish queues without awaiting; a full queue or closed
        // connection is logged and dropped.
        if let Err(e) = self.client.try_publish(
            self.topic(zone_id),
            QoS::AtLeastOnce,
            false,
            command_payload(active).to_vec(),
        ) {
            warn!(zone = zone_id, active, "pump command not published: {e}");
        }
    }
}

/// Drive the MQTT connection, tracking broker reachability for the status
/// feed. Intended to be `tokio::spawn`-ed from main.
pub async fn run_event_loop(mut eventloop: EventLoop, shared: SharedState) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let mut st = shared.write().await;
                st.broker_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("mqtt disconnected");
                let mut st = shared.write().await;
                st.broker_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                let mut st = shared.write().await;
                st.broker_connected = false;
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Log-only actuator (development — no broker configured)
// ---------------------------------------------------------------------------

pub struct LogPump;

impl PumpActuator for LogPump {
    fn notify(&self, zone_id: i64, active: bool) {
        info!(
            zone = zone_id,
            "pump command {} (no broker configured)",
            if active { "ON" } else { "OFF" }
        );
    }
}

// ---------------------------------------------------------------------------
// Recording actuator (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) struct RecordingPump {
    pub commands: std::sync::Mutex<Vec<(i64, bool)>>,
}

#[cfg(test)]
impl RecordingPump {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            commands: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn recorded(&self) -> Vec<(i64, bool)> {
        self.commands.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl PumpActuator for RecordingPump {
    fn notify(&self, zone_id: i64, active: bool) {
        self.commands.lock().unwrap().push((zone_id, active));
    }
}

// ===========================================================================
// Tests
// ===========================================================================

//! TOML settings loading, validation, and environment overrides.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;

/// Zones created on first run when the store is empty, unless the config
/// file overrides them.
pub const DEFAULT_ZONE_NAMES: &[&str] = &[
    "Sector Norte",
    "Sector Sur",
    "Invernadero",
    "Jardín Principal",
];

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub mqtt: MqttSettings,
    pub scheduler: SchedulerSettings,
    pub ingest: IngestSettings,
    pub api: ApiSettings,
    pub zones: ZoneSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    /// Upper bound for any single persistence call.
    pub op_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Shared secret sensors present via the x-sensor-token header. Leaving
    /// it unset makes ingestion report a server misconfiguration.
    pub sensor_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub max_page_size: i64,
    pub max_history_limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZoneSettings {
    pub defaults: Vec<String>,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            database: DatabaseSettings::default(),
            mqtt: MqttSettings::default(),
            scheduler: SchedulerSettings::default(),
            ingest: IngestSettings::default(),
            api: ApiSettings::default(),
            zones: ZoneSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite:riego.db?mode=rwc".to_string(),
            op_timeout_ms: 5_000,
        }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 1883,
            topic_prefix: "pump".to_string(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self { sensor_token: None }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            max_page_size: 100,
            max_history_limit: 500,
        }
    }
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self {
            defaults: DEFAULT_ZONE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Settings {
    /// Validate all settings. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.server.bind.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "server.bind '{}' is not a valid socket address",
                self.server.bind
            ));
        }

        if self.database.url.trim().is_empty() {
            errors.push("database.url is empty".to_string());
        }
        if self.database.op_timeout_ms == 0 {
            errors.push("database.op_timeout_ms must be positive".to_string());
        }

        if self.mqtt.enabled {
            if self.mqtt.host.trim().is_empty() {
                errors.push("mqtt.host is empty".to_string());
            }
            if self.mqtt.port == 0 {
                errors.push("mqtt.port must be positive".to_string());
            }
            if self.mqtt.topic_prefix.trim().is_empty() {
                errors.push("mqtt.topic_prefix is empty".to_string());
            } else if self.mqtt.topic_prefix.contains(['#', '+']) {
                errors.push(format!(
                    "mqtt.topic_prefix '{}' must not contain wildcard characters",
                    self.mqtt.topic_prefix
                ));
            }
        }

        if self.scheduler.tick_interval_secs == 0 {
            errors.push("scheduler.tick_interval_secs must be positive".to_string());
        }

        if !(1..=1_000).contains(&self.api.max_page_size) {
            errors.push(format!(
                "api.max_page_size {} out of range [1, 1000]",
                self.api.max_page_size
            ));
        }
        if !(1..=10_000).contains(&self.api.max_history_limit) {
            errors.push(format!(
                "api.max_history_limit {} out of range [1, 10000]",
                self.api.max_history_limit
            ));
        }

        self.validate_zones(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_zones(&self, errors: &mut Vec<String>) {
        if self.zones.defaults.is_empty() {
            errors.push("zones.defaults must name at least one zone".to_string());
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (i, name) in self.zones.defaults.iter().enumerate() {
            if name.trim().is_empty() {
                errors.push(format!("zones.defaults[{i}] is empty"));
            } else if !seen.insert(name.as_str()) {
                errors.push(format!("zones.defaults: duplicate name '{name}'"));
            }
        }
    }

    /// Apply the small set of environment overrides used in container
    /// deployments. Environment wins over the file.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("RIEGO_BIND") {
            self.server.bind = v;
        }
        if let Ok(v) = std::env::var("RIEGO_DB_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("RIEGO_SENSOR_TOKEN") {
            self.ingest.sensor_token = Some(v);
        }
        if let Ok(v) = std::env::var("RIEGO_MQTT_HOST") {
            self.mqtt.host = v;
            self.mqtt.enabled = true;
        }
        if let Ok(v) = std::env::var("RIEGO_MQTT_PORT") {
            if let Ok(port) = v.parse() {
                self.mqtt.port = port;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML settings file.
pub fn load(path: &str) -> Result<Settings> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    settings
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(settings)
}

// ===========================================================================
// Tests
// ===========================================================================

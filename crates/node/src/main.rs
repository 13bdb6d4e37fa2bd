mod sim;

use anyhow::{Context, Result};
use serde::Serialize;
use std::{env, time::Duration};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sim::{ClimateSim, Scenario};

#[derive(Debug, Serialize)]
struct ReadingMsg {
    sensor_id: String,
    temperature: f64,
    humidity: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let hub_url = env::var("HUB_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let sensor_id = env::var("SENSOR_ID").unwrap_or_else(|_| "ESP32-001".to_string());
    let token = env::var("SENSOR_TOKEN")
        .context("SENSOR_TOKEN must be set to the hub's configured sensor token")?;

    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);
    let diurnal_period_s: f64 = env::var("DIURNAL_PERIOD_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(600.0);
    let scenario = Scenario::from_str_lossy(
        &env::var("SIM_SCENARIO").unwrap_or_default(),
    );

    let mut sim = ClimateSim::new(scenario, diurnal_period_s);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build http client")?;
    let url = format!("{}/sensors/data", hub_url.trim_end_matches('/'));

    info!(%sensor_id, %scenario, sample_every_s, "posting readings to {url}");

    loop {
        let sample = sim.sample();
        let msg = ReadingMsg {
            sensor_id: sensor_id.clone(),
            temperature: sample.temperature,
            humidity: sample.humidity,
        };

        // Transport failures are logged and skipped; the next sample retries.
        match client
            .post(&url)
            .header("x-sensor-token", &token)
            .json(&msg)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!(
                    temperature = msg.temperature,
                    humidity = msg.humidity,
                    "reading posted"
                );
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(%status, "hub rejected reading: {body}");
            }
            Err(e) => {
                warn!("post failed: {e}");
            }
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_msg_serializes_with_correct_fields() {
        let msg = ReadingMsg {
            sensor_id: "ESP32-001".to_string(),
            temperature: 21.5,
            humidity: 48.0,
        };
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["sensor_id"], "ESP32-001");
        assert_eq!(json["temperature"], 21.5);
        assert_eq!(json["humidity"], 48.0);
        // Exactly these three fields: the hub stamps the timestamp itself.
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn reading_msg_serializes_to_valid_json_string() {
        let msg = ReadingMsg {
            sensor_id: "S1".to_string(),
            temperature: -2.5,
            humidity: 100.0,
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"sensor_id\":\"S1\""));
        assert!(text.contains("-2.5"));
    }
}

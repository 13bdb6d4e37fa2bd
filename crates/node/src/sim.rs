//! Stateful climate sensor simulator for local development.
//!
//! Models realistic DHT-class sensor behaviour:
//! - Temporal coherence via random walk with mean reversion
//! - Diurnal (day/night) temperature cycle
//! - Per-reading electronic noise
//! - Occasional spikes (sensor flakiness)
//! - Humidity inversely coupled to temperature

use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Hovers around 22°C with moderate humidity. Default steady-state.
    Mild,
    /// Hot and dry: centre near 33°C, slow upward drift. Exercises the
    /// dashboard with values that should prompt watering.
    Heatwave,
    /// Warm and very humid, low variance.
    Tropical,
    /// High noise sigma, ~10% spike rate. Tests averaging robustness and
    /// how the dashboard copes with implausible outliers.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "heatwave" => Self::Heatwave,
            "tropical" => Self::Tropical,
            "flaky" => Self::Flaky,
            _ => Self::Mild, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mild => write!(f, "mild"),
            Self::Heatwave => write!(f, "heatwave"),
            Self::Tropical => write!(f, "tropical"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateSample {
    pub temperature: f64,
    pub humidity: f64,
}

/// Stateful simulator producing coherent temperature/humidity pairs.
pub struct ClimateSim {
    /// Current "true" air temperature in °C. Evolves each tick.
    base_temp: f64,

    // Random walk parameters
    center_temp: f64,
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,

    // Spike parameters
    spike_prob: f32,
    spike_sigma: f64,

    // Humidity model
    base_humidity: f64,
    /// Percentage points of humidity lost per °C above the centre.
    humidity_coupling: f64,

    // Diurnal cycle
    diurnal_amplitude: f64,
    diurnal_period_s: f64,
}

impl ClimateSim {
    /// `diurnal_period_s` controls the day/night cycle length. Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let (center, drift, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma, humidity) =
            match scenario {
                Scenario::Mild => (22.0, 0.0, 0.25, 0.05, 0.15, 0.005_f32, 6.0, 55.0),
                Scenario::Heatwave => (33.0, 0.02, 0.30, 0.04, 0.20, 0.01, 6.0, 30.0),
                Scenario::Tropical => (27.0, 0.0, 0.15, 0.06, 0.10, 0.005, 4.0, 85.0),
                Scenario::Flaky => (22.0, 0.0, 0.60, 0.04, 0.80, 0.10, 12.0, 55.0),
            };

        Self {
            base_temp: gaussian(center, 1.0),
            center_temp: center,
            drift_per_sample: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            noise_sigma,
            spike_prob,
            spike_sigma,
            base_humidity: humidity,
            humidity_coupling: 2.0,
            diurnal_amplitude: 4.0,
            diurnal_period_s,
        }
    }

    /// Produce the next temperature/humidity pair.
    ///
    /// The internal base temperature evolves with each call, so call
    /// frequency matters: once per sampling tick.
    pub fn sample(&mut self) -> ClimateSample {
        // -- Evolve the base temperature ----------------------------------

        let pull = self.mean_reversion * (self.center_temp - self.base_temp);
        let walk = gaussian(0.0, self.walk_sigma);
        self.base_temp = (self.base_temp + self.drift_per_sample + pull + walk).clamp(-10.0, 50.0);

        // -- Build the instantaneous reading ------------------------------

        // Diurnal offset: sinusoidal, peaks at "afternoon" (period/2).
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let phase = 2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s;
        let diurnal = self.diurnal_amplitude * phase.sin();

        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        let temperature = (self.base_temp + diurnal + noise + spike).clamp(-20.0, 60.0);

        // Humidity tracks temperature inversely: hot air over the same soil
        // reads drier. Separate noise so the pair does not move in lockstep.
        let humidity = (self.base_humidity
            - self.humidity_coupling * (temperature - self.center_temp)
            + gaussian(0.0, 2.0))
        .clamp(0.0, 100.0);

        ClimateSample {
            temperature: round1(temperature),
            humidity: round1(humidity),
        }
    }
}

/// Round to one decimal, the precision a DHT-class sensor reports.
pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: collect N samples.
    fn collect_samples(sim: &mut ClimateSim, n: usize) -> Vec<ClimateSample> {
        (0..n).map(|_| sim.sample()).collect()
    }

    #[test]
    fn readings_within_physical_range() {
        let mut sim = ClimateSim::new(Scenario::Flaky, 600.0);
        for s in collect_samples(&mut sim, 500) {
            assert!(
                (-20.0..=60.0).contains(&s.temperature),
                "temperature out of range: {}",
                s.temperature
            );
            assert!(
                (0.0..=100.0).contains(&s.humidity),
                "humidity out of range: {}",
                s.humidity
            );
        }
    }

    #[test]
    fn temporal_coherence() {
        // Consecutive readings should be much closer than the full range.
        let mut sim = ClimateSim::new(Scenario::Mild, 600.0);
        let samples = collect_samples(&mut sim, 100);
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1].temperature - w[0].temperature).abs())
            .fold(0.0_f64, f64::max);
        // Mild scenario spikes are rare and small; 15°C between consecutive
        // samples would mean the walk ran away.
        assert!(max_jump < 15.0, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn heatwave_runs_hotter_than_mild() {
        let avg = |samples: &[ClimateSample]| {
            samples.iter().map(|s| s.temperature).sum::<f64>() / samples.len() as f64
        };

        let mut mild = ClimateSim::new(Scenario::Mild, 600.0);
        let mut heatwave = ClimateSim::new(Scenario::Heatwave, 600.0);

        let avg_mild = avg(&collect_samples(&mut mild, 200));
        let avg_heat = avg(&collect_samples(&mut heatwave, 200));

        assert!(
            avg_heat > avg_mild + 5.0,
            "heatwave ({avg_heat:.1}) should run well above mild ({avg_mild:.1})"
        );
    }

    #[test]
    fn tropical_is_more_humid_than_heatwave() {
        let avg = |samples: &[ClimateSample]| {
            samples.iter().map(|s| s.humidity).sum::<f64>() / samples.len() as f64
        };

        let mut tropical = ClimateSim::new(Scenario::Tropical, 600.0);
        let mut heatwave = ClimateSim::new(Scenario::Heatwave, 600.0);

        let hum_tropical = avg(&collect_samples(&mut tropical, 200));
        let hum_heat = avg(&collect_samples(&mut heatwave, 200));

        assert!(
            hum_tropical > hum_heat + 20.0,
            "tropical humidity ({hum_tropical:.1}) should exceed heatwave ({hum_heat:.1})"
        );
    }

    #[test]
    fn flaky_scenario_has_more_variation() {
        fn variance(sim: &mut ClimateSim, n: usize) -> f64 {
            let samples = collect_samples(sim, n);
            let mean = samples.iter().map(|s| s.temperature).sum::<f64>() / n as f64;
            samples
                .iter()
                .map(|s| (s.temperature - mean).powi(2))
                .sum::<f64>()
                / n as f64
        }

        let mut mild = ClimateSim::new(Scenario::Mild, 600.0);
        let mut flaky = ClimateSim::new(Scenario::Flaky, 600.0);

        let var_mild = variance(&mut mild, 200);
        let var_flaky = variance(&mut flaky, 200);

        assert!(
            var_flaky > var_mild,
            "flaky variance ({var_flaky:.2}) should exceed mild ({var_mild:.2})"
        );
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("mild"), Scenario::Mild);
        assert_eq!(Scenario::from_str_lossy("HEATWAVE"), Scenario::Heatwave);
        assert_eq!(Scenario::from_str_lossy("Tropical"), Scenario::Tropical);
        assert_eq!(Scenario::from_str_lossy("flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("unknown"), Scenario::Mild);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Mild);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Mild.to_string(), "mild");
        assert_eq!(Scenario::Heatwave.to_string(), "heatwave");
        assert_eq!(Scenario::Tropical.to_string(), "tropical");
        assert_eq!(Scenario::Flaky.to_string(), "flaky");
    }

    #[test]
    fn samples_report_one_decimal() {
        let mut sim = ClimateSim::new(Scenario::Mild, 600.0);
        for s in collect_samples(&mut sim, 50) {
            assert_eq!(s.temperature, round1(s.temperature));
            assert_eq!(s.humidity, round1(s.humidity));
        }
    }

    #[test]
    fn round1_rounds_to_one_decimal() {
        assert_eq!(round1(21.44), 21.4);
        assert_eq!(round1(21.45000001), 21.5);
        assert_eq!(round1(-3.26), -3.3);
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let sum: f64 = (0..n).map(|_| approx_std_normal()).sum();
        let mean = sum / n as f64;
        // With n=5000 the std error is 1/sqrt(5000) ≈ 0.014, so ±0.15 is
        // generous.
        assert!(
            mean.abs() < 0.15,
            "approx_std_normal mean should be near zero: {mean}"
        );
    }
}

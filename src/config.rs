//! Run configuration: per-source settings, scoring weights, band tables,
//! fallback penalties, and history retention.
//!
//! The configuration is decoded once, validated once, and treated as
//! immutable for the rest of the run. Validation failure is the only
//! error class that aborts a run before any fetch is attempted.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::bands::Band;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transit: TransitConfig,
    pub weather: WeatherConfig,
    pub air: AirConfig,
    pub scoring: ScoringConfig,
    pub history: HistoryConfig,
    pub output_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transit: TransitConfig::default(),
            weather: WeatherConfig::default(),
            air: AirConfig::default(),
            scoring: ScoringConfig::default(),
            history: HistoryConfig::default(),
            output_dir: "data".to_string(),
        }
    }
}

/// A transit stop to watch for arrival predictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConfig {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Transport modes queried in the combined line-status request.
    pub modes: Vec<String>,
    /// Line names to keep, matched case-insensitively. Empty = keep all.
    pub watch_lines: Vec<String>,
    pub stops: Vec<StopConfig>,
    pub severity: SeverityConfig,
    pub wait_bands: Vec<Band>,
    pub fallback_penalty: f64,
    pub wait_fallback_penalty: f64,
}

/// Points assigned to each recognized line-status description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityConfig {
    pub good_service: f64,
    pub minor_delays: f64,
    pub severe_delays: f64,
    pub part_suspended: f64,
    pub suspended: f64,
    pub unknown: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub enabled: bool,
    pub base_url: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Hours of hourly data requested and retained after slicing.
    pub forecast_hours: usize,
    pub rain_bands: Vec<Band>,
    pub wind_bands: Vec<Band>,
    pub temperature: TemperatureConfig,
    pub fallback_penalty: f64,
}

/// Three-tier comfort rule for the representative temperature: inside the
/// ideal range costs nothing, inside the wider shoulder range costs the
/// shoulder penalty, anything beyond costs the extreme penalty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureConfig {
    pub ideal_min: f64,
    pub ideal_max: f64,
    pub shoulder_min: f64,
    pub shoulder_max: f64,
    pub shoulder_penalty: f64,
    pub extreme_penalty: f64,
}

/// One row of the air-quality index table: first row whose `ceiling` is
/// >= the observed index wins; the last row is the catch-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirBand {
    pub ceiling: u8,
    pub label: String,
    pub penalty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AirConfig {
    pub enabled: bool,
    /// Group-wide endpoint returning index observations for all stations.
    pub base_url: String,
    pub bands: Vec<AirBand>,
    pub fallback_penalty: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: Weights,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub transit: f64,
    pub wait: f64,
    pub weather: f64,
    pub air: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub retention_days: i64,
    pub interval_minutes: u32,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.tfl.gov.uk".to_string(),
            modes: vec!["tube".to_string(), "overground".to_string()],
            watch_lines: Vec::new(),
            stops: Vec::new(),
            severity: SeverityConfig::default(),
            wait_bands: vec![
                Band::new(5.0, 0.0),
                Band::new(10.0, 10.0),
                Band::new(20.0, 25.0),
                Band::new(1e9, 40.0),
            ],
            fallback_penalty: 10.0,
            wait_fallback_penalty: 15.0,
        }
    }
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            good_service: 0.0,
            minor_delays: 10.0,
            severe_delays: 25.0,
            part_suspended: 40.0,
            suspended: 50.0,
            unknown: 15.0,
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            latitude: 51.5074,
            longitude: -0.1278,
            forecast_hours: 12,
            rain_bands: vec![
                Band::new(20.0, 0.0),
                Band::new(50.0, 10.0),
                Band::new(80.0, 20.0),
                Band::new(1e9, 30.0),
            ],
            wind_bands: vec![
                Band::new(30.0, 0.0),
                Band::new(45.0, 10.0),
                Band::new(1e9, 18.0),
            ],
            temperature: TemperatureConfig::default(),
            fallback_penalty: 20.0,
        }
    }
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            ideal_min: 16.0,
            ideal_max: 24.0,
            shoulder_min: 10.0,
            shoulder_max: 28.0,
            shoulder_penalty: 8.0,
            extreme_penalty: 16.0,
        }
    }
}

impl Default for AirConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.erg.ic.ac.uk/AirQuality/Hourly/MonitoringIndex/GroupName=London/Json"
                .to_string(),
            bands: vec![
                AirBand { ceiling: 3, label: "Low".to_string(), penalty: 0.0 },
                AirBand { ceiling: 6, label: "Moderate".to_string(), penalty: 10.0 },
                AirBand { ceiling: 9, label: "High".to_string(), penalty: 25.0 },
                AirBand { ceiling: 10, label: "Very High".to_string(), penalty: 40.0 },
            ],
            fallback_penalty: 10.0,
        }
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self { transit: 1.0, wait: 1.0, weather: 0.8, air: 1.0 }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { retention_days: 14, interval_minutes: 15 }
    }
}

impl Config {
    /// Loads and validates a config from a JSON file. A missing file is an
    /// error; callers that want defaults should use `Config::default()`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// The one fatal error path: rejects the config before any fetch runs.
    pub fn validate(&self) -> Result<()> {
        let w = &self.scoring.weights;
        for (name, value) in [
            ("transit", w.transit),
            ("wait", w.wait),
            ("weather", w.weather),
            ("air", w.air),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("scoring.weights.{name} must be a finite non-negative number, got {value}");
            }
        }
        if w.transit + w.wait + w.weather + w.air <= 0.0 {
            bail!("scoring.weights must include at least one positive weight");
        }

        // Upper bound keeps `Duration::days` well inside its panic-free
        // range during the history trim.
        if !(1..=3650).contains(&self.history.retention_days) {
            bail!(
                "history.retention_days must be between 1 and 3650, got {}",
                self.history.retention_days
            );
        }
        if self.history.interval_minutes < 1 {
            bail!("history.interval_minutes must be >= 1");
        }

        validate_bands("transit.wait_bands", &self.transit.wait_bands)?;
        validate_bands("weather.rain_bands", &self.weather.rain_bands)?;
        validate_bands("weather.wind_bands", &self.weather.wind_bands)?;
        if self.air.bands.is_empty() {
            bail!("air.bands must not be empty");
        }
        for pair in self.air.bands.windows(2) {
            if pair[0].ceiling > pair[1].ceiling {
                bail!("air.bands ceilings must be ascending");
            }
        }

        Ok(())
    }
}

fn validate_bands(path: &str, bands: &[Band]) -> Result<()> {
    if bands.is_empty() {
        bail!("{path} must not be empty");
    }
    for band in bands {
        if !band.threshold.is_finite() || !band.penalty.is_finite() {
            bail!("{path} rows must be finite numbers");
        }
        if band.penalty < 0.0 {
            bail!("{path} penalties must be non-negative");
        }
    }
    for pair in bands.windows(2) {
        if pair[0].threshold > pair[1].threshold {
            bail!("{path} thresholds must be ascending");
        }
    }
    Ok(())
}

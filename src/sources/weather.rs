//! Weather source: hourly forecast arrays sliced to the forecast horizon,
//! summarized over the next-6-hours window into three component penalties.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::bands;
use crate::config::{TemperatureConfig, WeatherConfig};
use crate::fetch::{self, HttpClient};
use crate::trace::RequestTrace;

pub const SOURCE: &str = "weather";

/// Penalty computation looks at the first entries of each sliced array.
const WINDOW_HOURS: usize = 6;

/// Raw forecast shape. Arrays arrive as untyped JSON values so malformed
/// entries can be dropped individually instead of failing the decode.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawForecast {
    pub hourly: RawHourly,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawHourly {
    pub time: Vec<serde_json::Value>,
    pub temperature_2m: Vec<serde_json::Value>,
    pub precipitation_probability: Vec<serde_json::Value>,
    pub wind_speed_10m: Vec<serde_json::Value>,
}

/// Canonical hourly arrays truncated to the forecast horizon. Arrays are
/// coerced independently and may end up different lengths.
#[derive(Debug, Clone, Serialize)]
pub struct WeatherSlice {
    pub time: Vec<String>,
    pub temperature: Vec<f64>,
    pub rain_probability: Vec<f64>,
    pub wind_speed: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeatherSummary {
    pub max_rain_probability: Option<f64>,
    /// The immediately-next hour's temperature.
    pub representative_temperature: Option<f64>,
    pub max_wind_speed: Option<f64>,
    pub rain_penalty: f64,
    pub temp_penalty: f64,
    pub wind_penalty: f64,
    pub total_penalty: f64,
}

fn coerce_numbers(values: &[serde_json::Value], horizon: usize) -> Vec<f64> {
    values
        .iter()
        .take(horizon)
        .filter_map(|v| v.as_f64())
        .filter(|n| n.is_finite())
        .collect()
}

/// Slices a raw forecast to the configured horizon, dropping non-numeric
/// and non-finite entries per array.
pub fn slice_forecast(raw: &RawForecast, horizon: usize) -> WeatherSlice {
    WeatherSlice {
        time: raw
            .hourly
            .time
            .iter()
            .take(horizon)
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        temperature: coerce_numbers(&raw.hourly.temperature_2m, horizon),
        rain_probability: coerce_numbers(&raw.hourly.precipitation_probability, horizon),
        wind_speed: coerce_numbers(&raw.hourly.wind_speed_10m, horizon),
    }
}

/// Three-tier comfort rule: ideal range costs nothing, shoulder range the
/// shoulder penalty, anything beyond the extreme penalty.
pub fn temperature_penalty(temp: f64, cfg: &TemperatureConfig) -> f64 {
    if temp >= cfg.ideal_min && temp <= cfg.ideal_max {
        0.0
    } else if temp >= cfg.shoulder_min && temp <= cfg.shoulder_max {
        cfg.shoulder_penalty
    } else {
        cfg.extreme_penalty
    }
}

fn window_max(values: &[f64]) -> Option<f64> {
    values
        .iter()
        .take(WINDOW_HOURS)
        .copied()
        .reduce(f64::max)
}

/// Summarizes the next-6-hours window: rain and wind penalties band the
/// window maxima, the temperature penalty applies the comfort rule to the
/// first entry. An empty window array sends that component to the
/// configured fallback.
pub fn summarize(slice: &WeatherSlice, cfg: &WeatherConfig) -> WeatherSummary {
    let max_rain = window_max(&slice.rain_probability);
    let max_wind = window_max(&slice.wind_speed);
    let next_temp = slice.temperature.first().copied();

    let rain_penalty = match max_rain {
        Some(p) => bands::lookup(p, &cfg.rain_bands),
        None => cfg.fallback_penalty,
    };
    let wind_penalty = match max_wind {
        Some(w) => bands::lookup(w, &cfg.wind_bands),
        None => cfg.fallback_penalty,
    };
    let temp_penalty = match next_temp {
        Some(t) => temperature_penalty(t, &cfg.temperature),
        None => cfg.fallback_penalty,
    };

    WeatherSummary {
        max_rain_probability: max_rain,
        representative_temperature: next_temp,
        max_wind_speed: max_wind,
        rain_penalty,
        temp_penalty,
        wind_penalty,
        total_penalty: rain_penalty + temp_penalty + wind_penalty,
    }
}

fn forecast_url(cfg: &WeatherConfig) -> String {
    format!(
        "{}?latitude={}&longitude={}&hourly=temperature_2m,precipitation_probability,wind_speed_10m&forecast_hours={}",
        cfg.base_url, cfg.latitude, cfg.longitude, cfg.forecast_hours
    )
}

/// Collects the weather source: one forecast request, sliced and
/// summarized.
pub async fn collect(
    client: Arc<dyn HttpClient>,
    cfg: &WeatherConfig,
) -> (Result<(WeatherSlice, WeatherSummary)>, Vec<RequestTrace>) {
    let url = forecast_url(cfg);
    let traces = vec![RequestTrace::get(SOURCE, &url, "hourly forecast")];

    let outcome = match fetch::fetch_json(client.as_ref(), &url).await {
        Ok(value) => {
            let raw: RawForecast = serde_json::from_value(value).unwrap_or_default();
            let slice = slice_forecast(&raw, cfg.forecast_hours);
            let summary = summarize(&slice, cfg);
            debug!(
                hours = slice.time.len(),
                total_penalty = summary.total_penalty,
                "Weather forecast summarized"
            );
            Ok((slice, summary))
        }
        Err(e) => Err(e),
    };

    (outcome, traces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slice(temp: &[f64], rain: &[f64], wind: &[f64]) -> WeatherSlice {
        WeatherSlice {
            time: Vec::new(),
            temperature: temp.to_vec(),
            rain_probability: rain.to_vec(),
            wind_speed: wind.to_vec(),
        }
    }

    #[test]
    fn test_summarize_next_six_hours_scenario() {
        let cfg = WeatherConfig::default();
        let summary = summarize(
            &slice(
                &[8.0, 9.0, 10.0, 11.0, 12.0, 13.0],
                &[10.0, 40.0, 55.0, 80.0, 90.0, 30.0],
                &[15.0, 19.0, 22.0, 28.0, 36.0, 18.0],
            ),
            &cfg,
        );

        assert_eq!(summary.max_rain_probability, Some(90.0));
        assert_eq!(summary.rain_penalty, 30.0);
        assert_eq!(summary.representative_temperature, Some(8.0));
        assert_eq!(summary.temp_penalty, 16.0);
        assert_eq!(summary.max_wind_speed, Some(36.0));
        assert_eq!(summary.wind_penalty, 10.0);
        assert_eq!(summary.total_penalty, 56.0);
    }

    #[test]
    fn test_summarize_ignores_entries_beyond_window() {
        let cfg = WeatherConfig::default();
        // The 95% in hour seven must not affect the window maximum.
        let summary = summarize(
            &slice(
                &[18.0; 7],
                &[10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 95.0],
                &[5.0; 7],
            ),
            &cfg,
        );

        assert_eq!(summary.max_rain_probability, Some(10.0));
        assert_eq!(summary.rain_penalty, 0.0);
        assert_eq!(summary.total_penalty, 0.0);
    }

    #[test]
    fn test_summarize_empty_arrays_fall_back_per_component() {
        let cfg = WeatherConfig::default();
        let summary = summarize(&slice(&[], &[50.0], &[]), &cfg);

        assert_eq!(summary.rain_penalty, 10.0);
        assert_eq!(summary.temp_penalty, cfg.fallback_penalty);
        assert_eq!(summary.wind_penalty, cfg.fallback_penalty);
        assert_eq!(summary.representative_temperature, None);
        assert_eq!(summary.max_wind_speed, None);
    }

    #[test]
    fn test_temperature_comfort_tiers() {
        let cfg = TemperatureConfig::default();
        assert_eq!(temperature_penalty(20.0, &cfg), 0.0);
        assert_eq!(temperature_penalty(16.0, &cfg), 0.0);
        assert_eq!(temperature_penalty(12.0, &cfg), cfg.shoulder_penalty);
        assert_eq!(temperature_penalty(27.0, &cfg), cfg.shoulder_penalty);
        assert_eq!(temperature_penalty(8.0, &cfg), cfg.extreme_penalty);
        assert_eq!(temperature_penalty(35.0, &cfg), cfg.extreme_penalty);
    }

    #[test]
    fn test_slice_drops_non_numeric_entries_independently() {
        let raw: RawForecast = serde_json::from_value(json!({
            "hourly": {
                "time": ["2026-08-29T08:00", "2026-08-29T09:00"],
                "temperature_2m": [12.5, "broken", 13.0],
                "precipitation_probability": [40, null],
                "wind_speed_10m": [],
            }
        }))
        .unwrap();

        let slice = slice_forecast(&raw, 12);
        assert_eq!(slice.temperature, vec![12.5, 13.0]);
        assert_eq!(slice.rain_probability, vec![40.0]);
        assert!(slice.wind_speed.is_empty());
        assert_eq!(slice.time.len(), 2);
    }

    #[test]
    fn test_slice_truncates_to_horizon() {
        let raw: RawForecast = serde_json::from_value(json!({
            "hourly": { "temperature_2m": [1, 2, 3, 4, 5] }
        }))
        .unwrap();

        let slice = slice_forecast(&raw, 3);
        assert_eq!(slice.temperature, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_malformed_forecast_decodes_to_default() {
        let raw: RawForecast =
            serde_json::from_value(json!({ "hourly": "gone" })).unwrap_or_default();
        let summary = summarize(&slice_forecast(&raw, 6), &WeatherConfig::default());

        // No usable data: every component falls back.
        assert_eq!(summary.total_penalty, 60.0);
    }
}

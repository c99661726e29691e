//! Air-quality source: schema-tolerant scan of a deeply nested payload for
//! index observations, keeping the worst index across all stations.
//!
//! Upstream restructures this payload freely, so extraction is an explicit
//! recursive walk over `serde_json::Value` rather than a fixed decode: any
//! field whose name resembles an air-quality index and whose value is an
//! integer in 1..=10 counts, tagged with the nearest enclosing station
//! name seen on the way down.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::config::AirConfig;
use crate::fetch::{self, HttpClient};
use crate::trace::RequestTrace;

pub const SOURCE: &str = "air";

/// Accepted index field spellings after normalization (lowercase, `_` and
/// `@` stripped).
const INDEX_KEYS: &[&str] = &["airqualityindex", "aqindex", "aqi"];

/// Field spellings that name the enclosing site or station.
const STATION_KEYS: &[&str] = &["sitename", "stationname", "site", "station"];

#[derive(Debug, Clone, Serialize)]
pub struct AirQualitySummary {
    /// The maximum index across every station in the payload — a
    /// conservative worst-case policy, deliberately not an average.
    pub max_index: Option<u8>,
    pub band: Option<String>,
    pub penalty: f64,
    pub station_name: Option<String>,
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '@')
        .collect::<String>()
        .to_lowercase()
}

/// Accepts integer indices in 1..=10, whether encoded as a JSON number or
/// a numeric string (upstream emits both).
fn coerce_index(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    (1..=10).contains(&n).then_some(n as u8)
}

fn station_of(map: &serde_json::Map<String, Value>) -> Option<String> {
    for (key, value) in map {
        if STATION_KEYS.contains(&normalize_key(key).as_str()) {
            if let Some(name) = value.as_str() {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn scan(value: &Value, station: Option<&str>, hits: &mut Vec<(u8, Option<String>)>) {
    match value {
        Value::Object(map) => {
            let station_here = station_of(map);
            let nearest = station_here.as_deref().or(station);

            for (key, child) in map {
                if INDEX_KEYS.contains(&normalize_key(key).as_str()) {
                    if let Some(index) = coerce_index(child) {
                        hits.push((index, nearest.map(str::to_string)));
                    }
                }
                scan(child, nearest, hits);
            }
        }
        Value::Array(items) => {
            for item in items {
                scan(item, station, hits);
            }
        }
        // Scalars and null carry no structure to descend into.
        _ => {}
    }
}

/// Reduces an arbitrary payload to the worst observed index and its band.
/// No valid index anywhere means absent index/band/station plus the
/// configured fallback penalty.
pub fn summarize(payload: &Value, cfg: &AirConfig) -> AirQualitySummary {
    let mut hits = Vec::new();
    scan(payload, None, &mut hits);

    let mut worst: Option<(u8, Option<String>)> = None;
    for (index, station) in hits {
        // Strict comparison keeps the first station seen at the maximum.
        if worst.as_ref().is_none_or(|(best, _)| index > *best) {
            worst = Some((index, station));
        }
    }

    match worst {
        Some((index, station_name)) => {
            let row = cfg
                .bands
                .iter()
                .find(|b| index <= b.ceiling)
                .or_else(|| cfg.bands.last());

            AirQualitySummary {
                max_index: Some(index),
                band: row.map(|b| b.label.clone()),
                penalty: row.map(|b| b.penalty).unwrap_or(cfg.fallback_penalty),
                station_name,
            }
        }
        None => AirQualitySummary {
            max_index: None,
            band: None,
            penalty: cfg.fallback_penalty,
            station_name: None,
        },
    }
}

/// Collects the air-quality source: one group-wide request, scanned for
/// the worst index.
pub async fn collect(
    client: Arc<dyn HttpClient>,
    cfg: &AirConfig,
) -> (Result<AirQualitySummary>, Vec<RequestTrace>) {
    let traces = vec![RequestTrace::get(SOURCE, &cfg.base_url, "group monitoring index")];

    let outcome = match fetch::fetch_json(client.as_ref(), &cfg.base_url).await {
        Ok(payload) => {
            let summary = summarize(&payload, cfg);
            debug!(
                max_index = summary.max_index,
                band = summary.band.as_deref(),
                "Air quality summarized"
            );
            Ok(summary)
        }
        Err(e) => Err(e),
    };

    (outcome, traces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> AirConfig {
        AirConfig::default()
    }

    #[test]
    fn test_single_index_maps_to_moderate_band() {
        let payload = json!({ "Site": { "SiteName": "Bloomsbury", "AirQualityIndex": 6 } });
        let summary = summarize(&payload, &cfg());

        assert_eq!(summary.max_index, Some(6));
        assert_eq!(summary.band.as_deref(), Some("Moderate"));
        assert_eq!(summary.penalty, 10.0);
        assert_eq!(summary.station_name.as_deref(), Some("Bloomsbury"));
    }

    #[test]
    fn test_maximum_index_wins_across_nested_stations() {
        let payload = json!({
            "HourlyAirQualityIndex": {
                "LocalAuthority": [
                    { "Site": { "@SiteName": "Camden", "@AirQualityIndex": "3" } },
                    { "Site": [
                        { "@SiteName": "Brixton Road", "@AirQualityIndex": "8" },
                        { "@SiteName": "Bexley", "@AirQualityIndex": "5" },
                    ]},
                ]
            }
        });
        let summary = summarize(&payload, &cfg());

        assert_eq!(summary.max_index, Some(8));
        assert_eq!(summary.band.as_deref(), Some("High"));
        assert_eq!(summary.penalty, 25.0);
        assert_eq!(summary.station_name.as_deref(), Some("Brixton Road"));
    }

    #[test]
    fn test_out_of_range_and_non_integer_values_ignored() {
        let payload = json!({
            "a": { "aqi": 0 },
            "b": { "aqi": 11 },
            "c": { "aqi": "not a number" },
            "d": { "aqi": 4.5 },
            "e": { "aqi": true },
        });
        let summary = summarize(&payload, &cfg());

        assert_eq!(summary.max_index, None);
        assert_eq!(summary.band, None);
        assert_eq!(summary.penalty, cfg().fallback_penalty);
    }

    #[test]
    fn test_no_index_anywhere_uses_fallback() {
        let payload = json!({ "stations": [{ "name": "x", "no2": 12 }] });
        let summary = summarize(&payload, &cfg());

        assert_eq!(summary.max_index, None);
        assert_eq!(summary.station_name, None);
        assert_eq!(summary.penalty, cfg().fallback_penalty);
    }

    #[test]
    fn test_station_from_enclosing_object_is_used() {
        // Index sits deeper than the station name that labels it.
        let payload = json!({
            "SiteName": "Marylebone Road",
            "readings": { "aq_index": "9" }
        });
        let summary = summarize(&payload, &cfg());

        assert_eq!(summary.max_index, Some(9));
        assert_eq!(summary.station_name.as_deref(), Some("Marylebone Road"));
    }

    #[test]
    fn test_key_spellings_normalized() {
        for key in ["AirQualityIndex", "air_quality_index", "@AirQualityIndex", "AQI"] {
            let payload = json!({ key: 2 });
            let summary = summarize(&payload, &cfg());
            assert_eq!(summary.max_index, Some(2), "key {key} should match");
            assert_eq!(summary.band.as_deref(), Some("Low"));
        }
    }
}

//! Lineage: per-metric derivation records explaining how every emitted
//! number was produced — which queries ran, what the normalizers did,
//! which configuration was consulted, and whether a fallback substituted
//! for real data.
//!
//! Lineage explains *values*; provenance (run identity) lives on the
//! snapshot separately. URLs entering here were sanitized at trace-capture
//! time, so nothing in a lineage record can leak a credential.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::score::Penalties;
use crate::sources::SourceStatus;
use crate::sources::air::AirQualitySummary;
use crate::sources::transit::{LineStatus, StopArrivals};
use crate::sources::weather::WeatherSummary;
use crate::trace::RequestTrace;

pub const METRIC_SCORE: &str = "score";
pub const METRIC_TRANSIT: &str = "transit";
pub const METRIC_WAIT: &str = "wait";
pub const METRIC_WEATHER: &str = "weather";
pub const METRIC_AIR: &str = "air";

#[derive(Debug, Clone, Serialize)]
pub struct LineageMetric {
    pub metric: String,
    pub sources: Vec<String>,
    pub queries: Vec<RequestTrace>,
    pub ingestion_steps: Vec<String>,
    pub transform_steps: Vec<String>,
    pub calculation_steps: Vec<String>,
    pub config_paths: Vec<String>,
    pub outputs: BTreeMap<String, f64>,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
}

impl LineageMetric {
    fn new(metric: &str, sources: &[&str]) -> Self {
        Self {
            metric: metric.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            queries: Vec::new(),
            ingestion_steps: Vec::new(),
            transform_steps: Vec::new(),
            calculation_steps: Vec::new(),
            config_paths: Vec::new(),
            outputs: BTreeMap::new(),
            fallback_used: false,
            fallback_reason: None,
        }
    }

    fn ingestion(mut self, step: impl Into<String>) -> Self {
        self.ingestion_steps.push(step.into());
        self
    }

    fn transform(mut self, step: impl Into<String>) -> Self {
        self.transform_steps.push(step.into());
        self
    }

    fn calculation(mut self, step: impl Into<String>) -> Self {
        self.calculation_steps.push(step.into());
        self
    }

    fn config_path(mut self, path: &str) -> Self {
        self.config_paths.push(path.to_string());
        self
    }

    fn output(mut self, name: &str, value: f64) -> Self {
        // Outputs feed JSON directly and must stay finite.
        if value.is_finite() {
            self.outputs.insert(name.to_string(), value);
        }
        self
    }

    fn fallback(mut self, reason: impl Into<String>) -> Self {
        self.fallback_used = true;
        self.fallback_reason = Some(reason.into());
        self
    }
}

/// Returns the traces belonging to one metric: matched by source, and for
/// the two transit sub-metrics further narrowed by URL shape.
pub fn traces_for(
    traces: &[RequestTrace],
    source: &str,
    url_fragment: Option<&str>,
) -> Vec<RequestTrace> {
    traces
        .iter()
        .filter(|t| t.source == source)
        .filter(|t| url_fragment.is_none_or(|f| t.url.contains(f)))
        .cloned()
        .collect()
}

/// Describes how a disabled or errored source routed this metric to its
/// configured fallback value.
fn unavailable_reason(status: SourceStatus, source: &str, error: Option<&str>) -> String {
    match status {
        SourceStatus::Disabled => format!("{source} source disabled by configuration"),
        _ => match error {
            Some(e) => format!("{source} source failed: {e}"),
            None => format!("{source} source produced no usable data"),
        },
    }
}

/// `status` here is the line-status half's outcome. The arrivals half
/// degrades the wait metric only; failed stops never route this metric
/// to its fallback.
pub fn build_transit(
    status: SourceStatus,
    lines: Option<&[LineStatus]>,
    error: Option<&str>,
    penalty: f64,
    config: &Config,
    traces: &[RequestTrace],
) -> LineageMetric {
    let mut record = LineageMetric::new(METRIC_TRANSIT, &["transit"])
        .config_path("transit.severity")
        .config_path("transit.watch_lines")
        .output("penalty", penalty);
    record.queries = traces_for(traces, "transit", Some("/line/"));

    match (status, lines) {
        (SourceStatus::Ok, Some(lines)) if !lines.is_empty() => {
            record = record
                .ingestion(format!(
                    "Fetched line status for modes [{}]; {} line(s) after normalization",
                    config.transit.modes.join(", "),
                    lines.len()
                ))
                .transform(
                    "Mapped each line's first status description through transit.severity \
                     (case-insensitive, trimmed; unrecognized text takes the unknown tier)",
                );
            record = if config.transit.watch_lines.is_empty() {
                record.transform("Watch list empty: kept every returned line")
            } else {
                record.transform(format!(
                    "Filtered to {} watched line name(s), case-insensitive",
                    config.transit.watch_lines.len()
                ))
            };
            record = record
                .calculation(format!(
                    "Averaged severity points across {} line(s), rounded to 2 dp => {}",
                    lines.len(),
                    penalty
                ))
                .output("line_count", lines.len() as f64);
            if let Some(worst) = lines
                .iter()
                .map(|l| l.severity_points)
                .reduce(f64::max)
            {
                record = record.output("worst_line_points", worst);
            }
            record
        }
        _ => {
            let reason = unavailable_reason(status, "transit", error);
            record
                .ingestion(reason.clone())
                .calculation(format!(
                    "Substituted transit.fallback_penalty = {}",
                    config.transit.fallback_penalty
                ))
                .config_path("transit.fallback_penalty")
                .fallback(reason)
        }
    }
}

/// `status` here is the arrivals half's outcome: `Error` means every
/// configured stop's fetch failed. A failed line-status fetch does not
/// touch this metric.
pub fn build_wait(
    status: SourceStatus,
    stops: &[StopArrivals],
    failed_stops: &[String],
    penalty: f64,
    config: &Config,
    traces: &[RequestTrace],
) -> LineageMetric {
    let mut record = LineageMetric::new(METRIC_WAIT, &["transit"])
        .config_path("transit.stops")
        .config_path("transit.wait_bands")
        .output("penalty", penalty);
    record.queries = traces_for(traces, "transit", Some("/arrivals"));

    let usable = stops.iter().filter(|s| s.median_minutes.is_some()).count();

    if status == SourceStatus::Disabled || stops.is_empty() || usable == 0 {
        let reason = if status == SourceStatus::Disabled {
            unavailable_reason(status, "transit", None)
        } else if status == SourceStatus::Error {
            "every configured stop's arrivals fetch failed".to_string()
        } else if stops.is_empty() {
            "no stops configured".to_string()
        } else {
            "no stop returned a usable arrival prediction".to_string()
        };
        record = record.fallback(reason.clone()).ingestion(reason);
    } else {
        record = record
            .ingestion(format!(
                "Fetched arrival predictions for {} stop(s); {} returned usable data",
                stops.len(),
                usable
            ))
            .transform(
                "Kept finite non-negative countdowns, sorted ascending, first three, \
                 converted to minutes at 1 dp",
            )
            .transform("Banded each stop's median wait through transit.wait_bands");
        for label in failed_stops {
            record = record.transform(format!(
                "Stop '{label}' fetch failed: counted with the wait fallback penalty"
            ));
        }
        if !failed_stops.is_empty() {
            record = record.config_path("transit.wait_fallback_penalty");
        }
    }

    if stops.is_empty() || usable == 0 {
        record = record
            .calculation(format!(
                "Substituted transit.wait_fallback_penalty = {}",
                config.transit.wait_fallback_penalty
            ))
            .config_path("transit.wait_fallback_penalty");
    } else {
        record = record
            .calculation(format!(
                "Averaged wait-band penalties across {} stop(s), rounded to 2 dp => {}",
                stops.len(),
                penalty
            ))
            .output("stop_count", stops.len() as f64);
        if let Some(worst) = stops
            .iter()
            .filter_map(|s| s.median_minutes)
            .reduce(f64::max)
        {
            record = record.output("worst_median_minutes", worst);
        }
    }

    record
}

pub fn build_weather(
    status: SourceStatus,
    summary: Option<&WeatherSummary>,
    error: Option<&str>,
    penalty: f64,
    config: &Config,
    traces: &[RequestTrace],
) -> LineageMetric {
    let mut record = LineageMetric::new(METRIC_WEATHER, &["weather"])
        .config_path("weather.rain_bands")
        .config_path("weather.wind_bands")
        .config_path("weather.temperature")
        .output("penalty", penalty);
    record.queries = traces_for(traces, "weather", None);

    match (status, summary) {
        (SourceStatus::Ok, Some(s)) => {
            record = record
                .ingestion(format!(
                    "Fetched {} hour(s) of hourly forecast and sliced each array independently",
                    config.weather.forecast_hours
                ))
                .transform(
                    "Restricted each array to the next-6-hours window; dropped non-finite entries",
                )
                .calculation(format!(
                    "Rain: banded window max {:?} => {}",
                    s.max_rain_probability, s.rain_penalty
                ))
                .calculation(format!(
                    "Temperature: comfort rule on next hour {:?} => {}",
                    s.representative_temperature, s.temp_penalty
                ))
                .calculation(format!(
                    "Wind: banded window max {:?} => {}",
                    s.max_wind_speed, s.wind_penalty
                ))
                .calculation(format!(
                    "Total = rain + temperature + wind = {}",
                    s.total_penalty
                ))
                .output("rain_penalty", s.rain_penalty)
                .output("temp_penalty", s.temp_penalty)
                .output("wind_penalty", s.wind_penalty);
            if let Some(rain) = s.max_rain_probability {
                record = record.output("max_rain_probability", rain);
            }
            if let Some(wind) = s.max_wind_speed {
                record = record.output("max_wind_speed", wind);
            }
            // A component that saw an empty window already took the fallback.
            let components = [s.max_rain_probability, s.representative_temperature, s.max_wind_speed];
            if components.iter().any(Option::is_none) {
                record = record
                    .config_path("weather.fallback_penalty")
                    .fallback("one or more forecast arrays were empty in the 6-hour window");
            }
            record
        }
        _ => {
            let reason = unavailable_reason(status, "weather", error);
            record
                .ingestion(reason.clone())
                .calculation(format!(
                    "Substituted weather.fallback_penalty = {} for all three components",
                    config.weather.fallback_penalty
                ))
                .config_path("weather.fallback_penalty")
                .fallback(reason)
        }
    }
}

pub fn build_air(
    status: SourceStatus,
    summary: Option<&AirQualitySummary>,
    error: Option<&str>,
    penalty: f64,
    config: &Config,
    traces: &[RequestTrace],
) -> LineageMetric {
    let mut record = LineageMetric::new(METRIC_AIR, &["air"])
        .config_path("air.bands")
        .output("penalty", penalty);
    record.queries = traces_for(traces, "air", None);

    match (status, summary) {
        (SourceStatus::Ok, Some(s)) if s.max_index.is_some() => {
            let index = s.max_index.unwrap_or_default();
            record
                .ingestion("Scanned the group payload for index fields at every nesting depth")
                .transform(format!(
                    "Selected the maximum index {} across all stations (worst-case policy){}",
                    index,
                    s.station_name
                        .as_deref()
                        .map(|n| format!(", reported at '{n}'"))
                        .unwrap_or_default()
                ))
                .calculation(format!(
                    "Banded index {} through air.bands => {} ({})",
                    index,
                    penalty,
                    s.band.as_deref().unwrap_or("unbanded")
                ))
                .output("max_index", f64::from(index))
        }
        (SourceStatus::Ok, Some(_)) => {
            let reason = "payload contained no valid index in 1..=10".to_string();
            record
                .ingestion("Scanned the group payload for index fields at every nesting depth")
                .ingestion(reason.clone())
                .calculation(format!(
                    "Substituted air.fallback_penalty = {}",
                    config.air.fallback_penalty
                ))
                .config_path("air.fallback_penalty")
                .fallback(reason)
        }
        _ => {
            let reason = unavailable_reason(status, "air", error);
            record
                .ingestion(reason.clone())
                .calculation(format!(
                    "Substituted air.fallback_penalty = {}",
                    config.air.fallback_penalty
                ))
                .config_path("air.fallback_penalty")
                .fallback(reason)
        }
    }
}

pub fn build_score(
    penalties: &Penalties,
    weighted_total: f64,
    score: f64,
    any_fallback: bool,
    config: &Config,
) -> LineageMetric {
    let w = &config.scoring.weights;
    let mut record = LineageMetric::new(METRIC_SCORE, &["transit", "weather", "air"])
        .ingestion("Combined the four component penalties")
        .calculation(format!(
            "weighted_total = {}*{} + {}*{} + {}*{} + {}*{} = {}",
            w.transit,
            penalties.transit,
            w.wait,
            penalties.wait,
            w.weather,
            penalties.weather,
            w.air,
            penalties.air,
            weighted_total
        ))
        .calculation(format!("score = clamp(100 - weighted_total, 0, 100) = {score}"))
        .config_path("scoring.weights")
        .output("weighted_total", weighted_total)
        .output("score", score);

    if any_fallback {
        record = record.fallback("one or more component penalties used a fallback value");
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::compose;

    fn traces() -> Vec<RequestTrace> {
        vec![
            RequestTrace::get(
                "transit",
                "https://api.test/line/mode/tube/status?detail=false&app_key=s3cret",
                "combined line status",
            ),
            RequestTrace::get("transit", "https://api.test/stopPoint/940X/arrivals", "stop arrivals"),
            RequestTrace::get("weather", "https://api.test/forecast?latitude=51.5", "hourly forecast"),
        ]
    }

    #[test]
    fn test_traces_split_by_source_and_url_shape() {
        let all = traces();

        let status = traces_for(&all, "transit", Some("/line/"));
        let arrivals = traces_for(&all, "transit", Some("/arrivals"));
        let weather = traces_for(&all, "weather", None);

        assert_eq!(status.len(), 1);
        assert_eq!(arrivals.len(), 1);
        assert_eq!(weather.len(), 1);
        assert!(status[0].url.contains("app_key=REDACTED"));
    }

    #[test]
    fn test_transit_lineage_ok_path() {
        let config = Config::default();
        let lines = vec![
            LineStatus {
                id: "victoria".into(),
                name: "Victoria".into(),
                mode: "tube".into(),
                status_text: "Good Service".into(),
                severity_points: 0.0,
            },
            LineStatus {
                id: "northern".into(),
                name: "Northern".into(),
                mode: "tube".into(),
                status_text: "Severe Delays".into(),
                severity_points: 25.0,
            },
        ];

        let record =
            build_transit(SourceStatus::Ok, Some(&lines), None, 12.5, &config, &traces());

        assert!(!record.fallback_used);
        assert_eq!(record.outputs["penalty"], 12.5);
        assert_eq!(record.outputs["line_count"], 2.0);
        assert_eq!(record.outputs["worst_line_points"], 25.0);
        assert!(record.config_paths.contains(&"transit.severity".to_string()));
        assert!(!record.calculation_steps.is_empty());
    }

    #[test]
    fn test_transit_lineage_error_records_fallback_value() {
        let config = Config::default();
        let record = build_transit(
            SourceStatus::Error,
            None,
            Some("request failed with status 503"),
            config.transit.fallback_penalty,
            &config,
            &[],
        );

        assert!(record.fallback_used);
        assert!(record.fallback_reason.as_deref().unwrap().contains("503"));
        // The literal fallback value appears in the calculation narrative.
        assert!(record.calculation_steps.iter().any(|s| s.contains("10")));
        assert!(record.config_paths.contains(&"transit.fallback_penalty".to_string()));
    }

    #[test]
    fn test_wait_lineage_empty_stops_is_fallback() {
        let config = Config::default();
        let record = build_wait(
            SourceStatus::Ok,
            &[],
            &[],
            config.transit.wait_fallback_penalty,
            &config,
            &[],
        );

        assert!(record.fallback_used);
        assert_eq!(record.fallback_reason.as_deref(), Some("no stops configured"));
    }

    #[test]
    fn test_arrivals_failure_degrades_only_the_wait_metric() {
        // The line-status half succeeded with one healthy line while every
        // stop's arrivals fetch failed. The transit metric must keep the
        // normalized lines; only the wait metric falls back.
        let config = Config::default();
        let lines = vec![LineStatus {
            id: "victoria".into(),
            name: "Victoria".into(),
            mode: "tube".into(),
            status_text: "Good Service".into(),
            severity_points: 0.0,
        }];
        let stops = vec![StopArrivals {
            stop_id: "940X".into(),
            label: "Oval".into(),
            next_arrival_minutes: Vec::new(),
            median_minutes: None,
            penalty: config.transit.wait_fallback_penalty,
        }];
        let failed = vec!["Oval".to_string()];

        let transit = build_transit(SourceStatus::Ok, Some(&lines), None, 0.0, &config, &[]);
        assert!(!transit.fallback_used);
        assert_eq!(transit.outputs["line_count"], 1.0);

        let wait = build_wait(
            SourceStatus::Error,
            &stops,
            &failed,
            config.transit.wait_fallback_penalty,
            &config,
            &[],
        );
        assert!(wait.fallback_used);
        assert_eq!(
            wait.fallback_reason.as_deref(),
            Some("every configured stop's arrivals fetch failed")
        );
    }

    #[test]
    fn test_air_lineage_no_valid_index() {
        let config = Config::default();
        let summary = AirQualitySummary {
            max_index: None,
            band: None,
            penalty: config.air.fallback_penalty,
            station_name: None,
        };
        let record = build_air(
            SourceStatus::Ok,
            Some(&summary),
            None,
            config.air.fallback_penalty,
            &config,
            &[],
        );

        assert!(record.fallback_used);
        assert!(!record.outputs.contains_key("max_index"));
    }

    #[test]
    fn test_score_lineage_narrates_weighting() {
        let config = Config::default();
        let penalties = Penalties { transit: 10.0, wait: 20.0, weather: 56.0, air: 10.0 };
        let (weighted_total, score) = compose(&config.scoring.weights, &penalties);

        let record = build_score(&penalties, weighted_total, score, false, &config);

        assert_eq!(record.outputs["score"], 15.2);
        assert_eq!(record.outputs["weighted_total"], 84.8);
        assert!(!record.fallback_used);
        assert!(record.calculation_steps[0].contains("84.8"));
    }

    #[test]
    fn test_outputs_reject_non_finite_values() {
        let record = LineageMetric::new("x", &[]).output("bad", f64::NAN).output("ok", 1.0);
        assert!(!record.outputs.contains_key("bad"));
        assert_eq!(record.outputs["ok"], 1.0);
    }
}

//! One collection run: concurrent source fan-out, penalty scoring, lineage
//! assembly, history merge, artifact emission.
//!
//! The only fatal failure is an invalid configuration, checked before any
//! fetch. Every source failure is caught locally, downgrades that source
//! to `error`, and routes its dependent penalties to their fallbacks; the
//! sibling sources' in-flight work is never cancelled.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::fetch::{BasicClient, HttpClient, auth::UrlParam};
use crate::history::{self, HistoryPoint, HistorySeries};
use crate::lineage;
use crate::score::{self, Penalties};
use crate::snapshot::{self, Detail, LatestSnapshot, Meta};
use crate::sources::air::AirQualitySummary;
use crate::sources::transit::{LineStatus, StopArrivals};
use crate::sources::weather::{WeatherSlice, WeatherSummary};
use crate::sources::{SourceStatus, air, transit, weather};
use crate::trace::RequestTrace;

/// Run-identity metadata attached to the snapshot. Built once at process
/// start and passed in explicitly; the pipeline holds no hidden state.
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub app_version: String,
    pub trigger: String,
    pub started_at: DateTime<Utc>,
}

impl Provenance {
    pub fn new(trigger: &str) -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            trigger: trigger.to_string(),
            started_at: Utc::now(),
        }
    }
}

/// Per-source HTTP clients. The transit credential lives only on the
/// transit client; weather and air requests must never carry it.
pub struct Clients {
    pub transit: Arc<dyn HttpClient>,
    pub general: Arc<dyn HttpClient>,
}

impl Clients {
    /// Builds the run's clients. When a transit API key is given, only the
    /// transit client gets the `app_key` query-parameter decorator; the
    /// general client stays undecorated.
    pub fn build(transit_app_key: Option<String>) -> Result<Self> {
        let general: Arc<dyn HttpClient> = Arc::new(BasicClient::new()?);

        let transit: Arc<dyn HttpClient> = match transit_app_key {
            Some(key) if !key.is_empty() => Arc::new(UrlParam {
                inner: BasicClient::new()?,
                param_name: "app_key".to_string(),
                key,
            }),
            _ => general.clone(),
        };

        Ok(Self { transit, general })
    }
}

/// Derives the transit statuses from the run's fetch outcomes: one for
/// the line-status half, one for the arrivals half, and the overall
/// status reported in the source map. Each half fails independently; the
/// overall status is `Error` when either half wholly failed.
fn split_transit_status(
    enabled: bool,
    line_fetch_ok: bool,
    configured_stops: usize,
    failed_stops: usize,
) -> (SourceStatus, SourceStatus, SourceStatus) {
    if !enabled {
        return (SourceStatus::Disabled, SourceStatus::Disabled, SourceStatus::Disabled);
    }

    let line_status = if line_fetch_ok { SourceStatus::Ok } else { SourceStatus::Error };
    let wait_status = if configured_stops > 0 && failed_stops == configured_stops {
        SourceStatus::Error
    } else {
        SourceStatus::Ok
    };

    let overall = if line_status == SourceStatus::Error || wait_status == SourceStatus::Error {
        SourceStatus::Error
    } else {
        SourceStatus::Ok
    };

    (line_status, wait_status, overall)
}

/// Executes one collection and writes the three artifacts.
#[tracing::instrument(skip_all, fields(trigger = %provenance.trigger))]
pub async fn run(config: &Config, provenance: &Provenance, clients: &Clients) -> Result<()> {
    config.validate()?;

    let now = Utc::now();
    let mut traces: Vec<RequestTrace> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut sources: BTreeMap<String, SourceStatus> = BTreeMap::new();

    // The three sources fetch in parallel; within transit, the status call
    // and every per-stop arrivals call are themselves concurrent.
    let (transit_out, weather_out, air_out) = tokio::join!(
        async {
            if config.transit.enabled {
                Some(transit::collect(clients.transit.clone(), &config.transit).await)
            } else {
                None
            }
        },
        async {
            if config.weather.enabled {
                Some(weather::collect(clients.general.clone(), &config.weather).await)
            } else {
                None
            }
        },
        async {
            if config.air.enabled {
                Some(air::collect(clients.general.clone(), &config.air).await)
            } else {
                None
            }
        },
    );

    // Transit: the two halves (line status / stop arrivals) degrade
    // independently, so each metric keys off its own half's outcome.
    let mut lines: Option<Vec<LineStatus>> = None;
    let mut stops: Vec<StopArrivals> = Vec::new();
    let mut failed_stops: Vec<String> = Vec::new();
    let mut transit_error: Option<String> = None;

    if let Some((data, t)) = transit_out {
        traces.extend(t);
        stops = data.stops;
        failed_stops = data.failed_stops;

        for label in &failed_stops {
            warnings.push(format!("transit: arrivals fetch failed for stop '{label}'"));
        }

        match data.lines {
            Ok(normalized) => lines = Some(normalized),
            Err(e) => {
                let message = format!("line status fetch failed: {e:#}");
                warnings.push(format!("transit: {message}"));
                transit_error = Some(message);
            }
        }
    }

    let (line_status, wait_status, transit_status) = split_transit_status(
        config.transit.enabled,
        transit_error.is_none(),
        config.transit.stops.len(),
        failed_stops.len(),
    );
    sources.insert("transit".to_string(), transit_status);

    let mut weather_slice: Option<WeatherSlice> = None;
    let mut weather_summary: Option<WeatherSummary> = None;
    let mut weather_error: Option<String> = None;

    let weather_status = match weather_out {
        None => SourceStatus::Disabled,
        Some((outcome, t)) => {
            traces.extend(t);
            match outcome {
                Ok((slice, summary)) => {
                    weather_slice = Some(slice);
                    weather_summary = Some(summary);
                    SourceStatus::Ok
                }
                Err(e) => {
                    let message = format!("forecast fetch failed: {e:#}");
                    warnings.push(format!("weather: {message}"));
                    weather_error = Some(message);
                    SourceStatus::Error
                }
            }
        }
    };
    sources.insert("weather".to_string(), weather_status);

    let mut air_summary: Option<AirQualitySummary> = None;
    let mut air_error: Option<String> = None;

    let air_status = match air_out {
        None => SourceStatus::Disabled,
        Some((outcome, t)) => {
            traces.extend(t);
            match outcome {
                Ok(summary) => {
                    air_summary = Some(summary);
                    SourceStatus::Ok
                }
                Err(e) => {
                    let message = format!("monitoring index fetch failed: {e:#}");
                    warnings.push(format!("air: {message}"));
                    air_error = Some(message);
                    SourceStatus::Error
                }
            }
        }
    };
    sources.insert("air".to_string(), air_status);

    for warning in &warnings {
        warn!("{warning}");
    }

    // Penalties. Disabled and errored halves take their configured
    // fallbacks without touching the other half's normalization output.
    let transit_penalty = match (line_status, &lines) {
        (SourceStatus::Ok, Some(lines)) => {
            let points: Vec<f64> = lines.iter().map(|l| l.severity_points).collect();
            score::mean_penalty(&points).unwrap_or(config.transit.fallback_penalty)
        }
        _ => config.transit.fallback_penalty,
    };

    let wait_penalty = if wait_status == SourceStatus::Disabled || stops.is_empty() {
        config.transit.wait_fallback_penalty
    } else {
        let penalties: Vec<f64> = stops.iter().map(|s| s.penalty).collect();
        score::mean_penalty(&penalties).unwrap_or(config.transit.wait_fallback_penalty)
    };

    // A failed weather source degrades exactly like an empty forecast:
    // each of the three components takes the configured fallback.
    let weather_penalty = match &weather_summary {
        Some(summary) => summary.total_penalty,
        None => 3.0 * config.weather.fallback_penalty,
    };

    let air_penalty = match &air_summary {
        Some(summary) => summary.penalty,
        None => config.air.fallback_penalty,
    };

    let penalties = Penalties {
        transit: transit_penalty,
        wait: wait_penalty,
        weather: weather_penalty,
        air: air_penalty,
    };
    let (weighted_total, score) = score::compose(&config.scoring.weights, &penalties);

    info!(
        score,
        weighted_total,
        transit = penalties.transit,
        wait = penalties.wait,
        weather = penalties.weather,
        air = penalties.air,
        "Run scored"
    );

    // Lineage: one derivation record per tracked metric, each keyed off
    // the status of the half that actually feeds it.
    let transit_record = lineage::build_transit(
        line_status,
        lines.as_deref(),
        transit_error.as_deref(),
        penalties.transit,
        config,
        &traces,
    );
    let wait_record = lineage::build_wait(
        wait_status,
        &stops,
        &failed_stops,
        penalties.wait,
        config,
        &traces,
    );
    let weather_record = lineage::build_weather(
        weather_status,
        weather_summary.as_ref(),
        weather_error.as_deref(),
        penalties.weather,
        config,
        &traces,
    );
    let air_record = lineage::build_air(
        air_status,
        air_summary.as_ref(),
        air_error.as_deref(),
        penalties.air,
        config,
        &traces,
    );

    let any_fallback = [&transit_record, &wait_record, &weather_record, &air_record]
        .iter()
        .any(|r| r.fallback_used);
    let score_record = lineage::build_score(&penalties, weighted_total, score, any_fallback, config);

    // History: one point per run, trimmed to the retention window and
    // capped at the cadence the configured interval implies.
    let out_dir = std::path::Path::new(&config.output_dir);
    let history_path = out_dir.join(snapshot::HISTORY_FILE);
    let previous = history::load(&history_path);
    let points = history::merge(
        previous,
        HistoryPoint { timestamp_utc: now, score, penalties },
        now,
        config.history.retention_days,
        history::points_per_day(config.history.interval_minutes),
    );
    let series = HistorySeries { retention_days: config.history.retention_days, points };

    let provenance_value = serde_json::to_value(provenance)?;

    let latest = LatestSnapshot {
        schema_version: snapshot::SCHEMA_VERSION,
        generated_at: now,
        score,
        weighted_total,
        penalties,
        kpis: snapshot::build_kpis(
            lines.as_deref().unwrap_or_default(),
            &stops,
            weather_summary.as_ref(),
            air_summary.as_ref(),
        ),
        digest: snapshot::build_digest(
            lines.as_deref().unwrap_or_default(),
            &stops,
            weather_summary.as_ref(),
            air_summary.as_ref(),
        ),
        detail: Detail {
            lines: lines.unwrap_or_default(),
            stops,
            weather: weather_slice,
            weather_summary,
            air: air_summary,
        },
        sources: sources.clone(),
        provenance: provenance_value.clone(),
        lineage: vec![score_record, transit_record, wait_record, weather_record, air_record],
        warnings,
    };

    let meta = Meta::new(&provenance.app_version, now, sources, provenance_value);

    snapshot::write_artifacts(out_dir, &latest, &series, &meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transit_key_decorates_only_the_transit_client() {
        let clients = Clients::build(Some("hunter2".to_string())).unwrap();
        // Distinct clients: the credentialed one is not shared with the
        // weather/air fetch path.
        assert!(!Arc::ptr_eq(&clients.transit, &clients.general));
    }

    #[test]
    fn test_no_key_shares_one_client() {
        let clients = Clients::build(None).unwrap();
        assert!(Arc::ptr_eq(&clients.transit, &clients.general));

        let clients = Clients::build(Some(String::new())).unwrap();
        assert!(Arc::ptr_eq(&clients.transit, &clients.general));
    }

    #[test]
    fn test_split_status_all_stops_failed_keeps_line_half_ok() {
        let (line, wait, overall) = split_transit_status(true, true, 2, 2);
        assert_eq!(line, SourceStatus::Ok);
        assert_eq!(wait, SourceStatus::Error);
        assert_eq!(overall, SourceStatus::Error);
    }

    #[test]
    fn test_split_status_line_fetch_failed_keeps_wait_half_ok() {
        let (line, wait, overall) = split_transit_status(true, false, 2, 0);
        assert_eq!(line, SourceStatus::Error);
        assert_eq!(wait, SourceStatus::Ok);
        assert_eq!(overall, SourceStatus::Error);
    }

    #[test]
    fn test_split_status_partial_stop_failure_is_not_an_error() {
        let (line, wait, overall) = split_transit_status(true, true, 3, 1);
        assert_eq!(line, SourceStatus::Ok);
        assert_eq!(wait, SourceStatus::Ok);
        assert_eq!(overall, SourceStatus::Ok);
    }

    #[test]
    fn test_split_status_disabled_everywhere() {
        let (line, wait, overall) = split_transit_status(false, true, 0, 0);
        assert_eq!(line, SourceStatus::Disabled);
        assert_eq!(wait, SourceStatus::Disabled);
        assert_eq!(overall, SourceStatus::Disabled);
    }

    #[test]
    fn test_split_status_no_stops_configured() {
        let (line, wait, overall) = split_transit_status(true, true, 0, 0);
        assert_eq!(line, SourceStatus::Ok);
        assert_eq!(wait, SourceStatus::Ok);
        assert_eq!(overall, SourceStatus::Ok);
    }
}

//! Transit source: line status across the watched modes plus arrival
//! predictions for each watched stop.
//!
//! Raw payloads are decoded into permissively-optional records; missing or
//! malformed fields degrade to safe defaults rather than failing the run.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bands;
use crate::config::{SeverityConfig, TransitConfig};
use crate::fetch::{self, HttpClient};
use crate::score::round1;
use crate::trace::RequestTrace;

pub const SOURCE: &str = "transit";

/// Raw line entry as returned by the status endpoint. Every field is
/// optional; upstream omits fields freely.
#[derive(Debug, Deserialize)]
pub struct RawLine {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "modeName")]
    pub mode_name: Option<String>,
    #[serde(rename = "lineStatuses", default)]
    pub line_statuses: Vec<RawLineStatus>,
}

#[derive(Debug, Deserialize)]
pub struct RawLineStatus {
    #[serde(rename = "statusSeverityDescription")]
    pub description: Option<String>,
}

/// Raw arrival prediction for one stop.
#[derive(Debug, Deserialize)]
pub struct RawArrival {
    #[serde(rename = "timeToStation")]
    pub time_to_station: Option<f64>,
}

/// One watched line reduced to its first reported status and the points
/// that status carries. Discarded at run end, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct LineStatus {
    pub id: String,
    pub name: String,
    pub mode: String,
    pub status_text: String,
    pub severity_points: f64,
}

/// One watched stop reduced to its next few arrivals and a wait penalty.
#[derive(Debug, Clone, Serialize)]
pub struct StopArrivals {
    pub stop_id: String,
    pub label: String,
    /// Minutes until the next arrivals, ascending, at most three entries.
    pub next_arrival_minutes: Vec<f64>,
    /// Absent only when the stop returned zero usable predictions.
    pub median_minutes: Option<f64>,
    pub penalty: f64,
}

/// Everything the transit source produced this run. The two halves fail
/// independently: a dead status endpoint does not discard arrival data.
#[derive(Debug)]
pub struct TransitData {
    pub lines: Result<Vec<LineStatus>>,
    pub stops: Vec<StopArrivals>,
    /// Labels of stops whose arrivals fetch failed (they appear in `stops`
    /// with no predictions and the fallback penalty).
    pub failed_stops: Vec<String>,
}

/// Maps a reported status description onto configured severity points.
/// Matching is case-insensitive on the trimmed text; anything outside the
/// fixed vocabulary lands in the unknown tier.
pub fn severity_points(status_text: &str, severity: &SeverityConfig) -> f64 {
    match status_text.trim().to_lowercase().as_str() {
        "good service" => severity.good_service,
        "minor delays" => severity.minor_delays,
        "severe delays" => severity.severe_delays,
        "part suspended" => severity.part_suspended,
        "suspended" => severity.suspended,
        _ => severity.unknown,
    }
}

/// Normalizes raw lines, applying the watch-list filter. An empty watch
/// list accepts every returned line.
pub fn normalize_lines(
    raw: Vec<RawLine>,
    severity: &SeverityConfig,
    watch_lines: &[String],
) -> Vec<LineStatus> {
    let watched: Vec<String> = watch_lines.iter().map(|w| w.to_lowercase()).collect();

    raw.into_iter()
        .filter_map(|line| {
            let name = line
                .name
                .or(line.id.clone())
                .unwrap_or_else(|| "unknown".to_string());
            let id = line.id.unwrap_or_else(|| name.clone());

            if !watched.is_empty() && !watched.contains(&name.to_lowercase()) {
                return None;
            }

            let status_text = line
                .line_statuses
                .first()
                .and_then(|s| s.description.clone())
                .unwrap_or_else(|| "Unknown".to_string());

            let points = severity_points(&status_text, severity);

            Some(LineStatus {
                id,
                name,
                mode: line.mode_name.unwrap_or_default(),
                status_text,
                severity_points: points,
            })
        })
        .collect()
}

/// Median of a sorted slice; even counts average the two middle values.
pub fn median(sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Reduces one stop's raw countdowns: keep finite non-negative seconds,
/// sort ascending, keep the first three, convert to minutes at one
/// decimal, then band the median into a wait penalty. Zero usable
/// predictions means an absent median and the wait fallback penalty.
pub fn reduce_arrivals(
    stop_id: &str,
    label: &str,
    seconds: &[f64],
    wait_bands: &[bands::Band],
    fallback_penalty: f64,
) -> StopArrivals {
    let mut usable: Vec<f64> = seconds
        .iter()
        .copied()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .collect();
    usable.sort_by(|a, b| a.total_cmp(b));
    usable.truncate(3);

    let minutes: Vec<f64> = usable.iter().map(|s| round1(s / 60.0)).collect();
    let median_minutes = median(&minutes);

    let penalty = match median_minutes {
        Some(m) => bands::lookup(m, wait_bands),
        None => fallback_penalty,
    };

    StopArrivals {
        stop_id: stop_id.to_string(),
        label: label.to_string(),
        next_arrival_minutes: minutes,
        median_minutes,
        penalty,
    }
}

fn status_url(base_url: &str, modes: &str) -> String {
    format!("{base_url}/line/mode/{modes}/status?detail=false")
}

fn arrivals_url(base_url: &str, stop_id: &str) -> String {
    format!("{base_url}/stopPoint/{stop_id}/arrivals")
}

/// Fetches raw lines via the combined multi-mode request. A client-error
/// response triggers one request per mode in parallel, merging the
/// successes; if none succeed, the original combined error is surfaced
/// rather than a fabricated empty result.
async fn fetch_lines(
    client: Arc<dyn HttpClient>,
    cfg: &TransitConfig,
) -> (Result<Vec<RawLine>>, Vec<RequestTrace>) {
    let combined_url = status_url(&cfg.base_url, &cfg.modes.join(","));
    let mut traces = vec![RequestTrace::get(SOURCE, &combined_url, "combined line status")];

    let combined_err = match fetch::fetch_json(client.as_ref(), &combined_url).await {
        Ok(value) => {
            let raw: Vec<RawLine> = serde_json::from_value(value).unwrap_or_default();
            return (Ok(raw), traces);
        }
        Err(e) => e,
    };

    if !fetch::is_client_error(&combined_err) {
        return (Err(combined_err), traces);
    }

    warn!(error = %combined_err, "Combined status request rejected, retrying per mode");

    let mut tasks = Vec::new();
    for mode in &cfg.modes {
        let url = status_url(&cfg.base_url, mode);
        let client = client.clone();
        let mode = mode.clone();
        tasks.push(tokio::spawn(async move {
            let trace = RequestTrace::get(SOURCE, &url, "per-mode line status fallback");
            let result = fetch::fetch_json(client.as_ref(), &url).await;
            (mode, result, trace)
        }));
    }

    let mut merged: Vec<RawLine> = Vec::new();
    let mut any_ok = false;
    for task in tasks {
        let Ok((mode, result, trace)) = task.await else {
            continue;
        };
        traces.push(trace);
        match result {
            Ok(value) => {
                any_ok = true;
                let mut raw: Vec<RawLine> = serde_json::from_value(value).unwrap_or_default();
                merged.append(&mut raw);
            }
            Err(e) => warn!(mode, error = %e, "Per-mode status request failed"),
        }
    }

    if any_ok {
        (Ok(merged), traces)
    } else {
        (Err(combined_err), traces)
    }
}

/// Collects the transit source: the line-status request and every per-stop
/// arrivals request run in parallel with each other.
pub async fn collect(
    client: Arc<dyn HttpClient>,
    cfg: &TransitConfig,
) -> (TransitData, Vec<RequestTrace>) {
    let status_task = {
        let client = client.clone();
        let cfg = cfg.clone();
        tokio::spawn(async move { fetch_lines(client, &cfg).await })
    };

    let mut stop_tasks = Vec::new();
    for stop in &cfg.stops {
        let client = client.clone();
        let url = arrivals_url(&cfg.base_url, &stop.id);
        let stop = stop.clone();
        stop_tasks.push(tokio::spawn(async move {
            let trace = RequestTrace::get(SOURCE, &url, "stop arrivals");
            let result = fetch::fetch_json(client.as_ref(), &url).await;
            (stop, result, trace)
        }));
    }

    let mut traces = Vec::new();

    let lines = match status_task.await {
        Ok((result, status_traces)) => {
            traces.extend(status_traces);
            result.map(|raw| {
                let normalized = normalize_lines(raw, &cfg.severity, &cfg.watch_lines);
                debug!(line_count = normalized.len(), "Transit lines normalized");
                normalized
            })
        }
        Err(e) => Err(anyhow::anyhow!("line status task panicked: {e}")),
    };

    let mut stops = Vec::new();
    let mut failed_stops = Vec::new();
    for task in stop_tasks {
        let Ok((stop, result, trace)) = task.await else {
            continue;
        };
        traces.push(trace);

        let seconds: Vec<f64> = match result {
            Ok(value) => {
                let raw: Vec<RawArrival> = serde_json::from_value(value).unwrap_or_default();
                raw.into_iter().filter_map(|a| a.time_to_station).collect()
            }
            Err(e) => {
                warn!(stop = %stop.label, error = %e, "Stop arrivals fetch failed");
                failed_stops.push(stop.label.clone());
                Vec::new()
            }
        };

        stops.push(reduce_arrivals(
            &stop.id,
            &stop.label,
            &seconds,
            &cfg.wait_bands,
            cfg.wait_fallback_penalty,
        ));
    }

    (TransitData { lines, stops, failed_stops }, traces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransitConfig;
    use serde_json::json;

    fn severity() -> SeverityConfig {
        SeverityConfig::default()
    }

    fn raw_line(id: &str, name: &str, status: &str) -> RawLine {
        serde_json::from_value(json!({
            "id": id,
            "name": name,
            "modeName": "tube",
            "lineStatuses": [{ "statusSeverityDescription": status }],
        }))
        .unwrap()
    }

    #[test]
    fn test_severity_points_vocabulary() {
        let s = severity();
        assert_eq!(severity_points("Good Service", &s), 0.0);
        assert_eq!(severity_points("  severe delays ", &s), 25.0);
        assert_eq!(severity_points("Part Suspended", &s), 40.0);
        assert_eq!(severity_points("SUSPENDED", &s), 50.0);
        assert_eq!(severity_points("Planned Closure", &s), 15.0);
    }

    #[test]
    fn test_normalize_lines_two_line_scenario() {
        let raw = vec![
            raw_line("victoria", "Victoria", "Good Service"),
            raw_line("northern", "Northern", "Severe Delays"),
        ];
        let lines = normalize_lines(raw, &severity(), &[]);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].severity_points, 0.0);
        assert_eq!(lines[1].severity_points, 25.0);
    }

    #[test]
    fn test_normalize_lines_watch_list_filters_case_insensitively() {
        let raw = vec![
            raw_line("victoria", "Victoria", "Good Service"),
            raw_line("northern", "Northern", "Minor Delays"),
        ];
        let lines = normalize_lines(raw, &severity(), &["VICTORIA".to_string()]);

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].name, "Victoria");
    }

    #[test]
    fn test_normalize_lines_degrades_missing_fields() {
        let raw: Vec<RawLine> = serde_json::from_value(json!([{ "id": "dlr" }])).unwrap();
        let lines = normalize_lines(raw, &severity(), &[]);

        assert_eq!(lines[0].name, "dlr");
        assert_eq!(lines[0].status_text, "Unknown");
        assert_eq!(lines[0].severity_points, 15.0);
        assert_eq!(lines[0].mode, "");
    }

    #[test]
    fn test_reduce_arrivals_countdown_scenario() {
        let cfg = TransitConfig::default();
        let stop = reduce_arrivals(
            "940X",
            "King's Cross",
            &[120.0, 360.0, 600.0, 1800.0],
            &cfg.wait_bands,
            cfg.wait_fallback_penalty,
        );

        assert_eq!(stop.next_arrival_minutes, vec![2.0, 6.0, 10.0]);
        assert_eq!(stop.median_minutes, Some(6.0));
        assert_eq!(stop.penalty, 10.0);
    }

    #[test]
    fn test_reduce_arrivals_drops_negative_and_non_finite() {
        let cfg = TransitConfig::default();
        let stop = reduce_arrivals(
            "s",
            "s",
            &[-30.0, f64::NAN, f64::INFINITY, 90.0],
            &cfg.wait_bands,
            cfg.wait_fallback_penalty,
        );

        assert_eq!(stop.next_arrival_minutes, vec![1.5]);
        assert_eq!(stop.median_minutes, Some(1.5));
        assert_eq!(stop.penalty, 0.0);
    }

    #[test]
    fn test_reduce_arrivals_empty_uses_fallback() {
        let cfg = TransitConfig::default();
        let stop = reduce_arrivals("s", "s", &[], &cfg.wait_bands, cfg.wait_fallback_penalty);

        assert!(stop.next_arrival_minutes.is_empty());
        assert_eq!(stop.median_minutes, None);
        assert_eq!(stop.penalty, cfg.wait_fallback_penalty);
    }

    #[test]
    fn test_median_even_count_averages_middle_pair() {
        assert_eq!(median(&[2.0, 6.0]), Some(4.0));
        assert_eq!(median(&[2.0, 6.0, 10.0]), Some(6.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_malformed_payload_decodes_to_empty() {
        let raw: Vec<RawLine> =
            serde_json::from_value(json!({ "not": "an array" })).unwrap_or_default();
        assert!(raw.is_empty());
    }
}
